//! Concrete transform stages, one per external tool or rewrite.

pub mod bem;
pub mod html;
pub mod image;
pub mod postcss;
pub mod script;
pub mod style;
pub mod template;
pub mod vendor;

pub use bem::{Bem, BemClasses};
pub use html::{Forbid, PrettyHtml};
pub use self::image::OptimizeImages;
pub use postcss::PostCss;
pub use script::{Concat, Esbuild};
pub use style::{CompileSass, GlobImports, MinifyCss, PrettyCss};
pub use template::RenderTemplates;
pub use vendor::MainFiles;
