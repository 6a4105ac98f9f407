//! The standard task set of a project and the watch bindings that re-run it.
//!
//! Source layout, relative to the source root:
//!
//! ```text
//! bootstrap/   framework stylesheets           -> css/
//! scss/        project stylesheets (style.scss) -> css/
//! components/  template and stylesheet partials
//! pages/       page templates                  -> ./
//! data/        data.json for templates
//! script/      scripts, concatenated           -> js/main.js
//! images/                                      -> img/
//! fonts/                                       -> fonts/
//! misc/        copied verbatim                 -> ./
//! lib/         standalone scripts, minified    -> js/
//! bower/       installed vendor packages
//! ```

use std::sync::Arc;

use camino::Utf8PathBuf;

use crate::config::BuildConfig;
use crate::error::BuildError;
use crate::io::clear_dir;
use crate::orchestrator::{Orchestrator, Reload, Task};
use crate::pipeline::{Collect, Filter, Pipeline, Replace, Source, Transform};
use crate::stages::{
    BemClasses, CompileSass, Concat, Esbuild, Forbid, GlobImports, MainFiles, MinifyCss,
    OptimizeImages, PostCss, PrettyCss, PrettyHtml, RenderTemplates,
};
use crate::watch::Binding;

/// Marker left behind by an element attribute that found no enclosing block.
pub const FORBIDDEN_MARKER: &str = "elem=\"";

/// Tasks run, in this order, by `build`.
pub const BUILD: &[&str] = &[
    "compile-base-styles",
    "compile-styles",
    "clear-images",
    "build-images",
    "compile-scripts",
    "compile-templates",
    "copy-misc",
    "copy-fonts",
    "bundle-vendor-css",
    "bundle-vendor-js",
    "copy-vendor-libs",
];

/// Tools backed by external binaries.
#[derive(Clone)]
pub struct Tools {
    pub transpile: Arc<dyn Transform>,
    pub minify_js: Arc<dyn Transform>,
}

impl Tools {
    /// Both tools run the `esbuild` binary.
    pub fn esbuild() -> Self {
        Self {
            transpile: Arc::new(Esbuild::transpile()),
            minify_js: Arc::new(Esbuild::minify()),
        }
    }
}

/// A task writing the output of a pipeline.
fn pipeline(name: &'static str, pipeline: Pipeline) -> Task {
    Task::new(name, move |ctx| {
        pipeline.run(ctx.config)?;
        Ok(())
    })
}

fn copy(name: &'static str, source: impl Collect + 'static, dest: impl Into<Utf8PathBuf>) -> Task {
    pipeline(name, Pipeline::new(source, dest))
}

/// Registers every build task; `build` is the default.
pub fn standard(config: Arc<BuildConfig>, tools: Tools) -> Result<Orchestrator, BuildError> {
    let layout = &config.layout;
    let production = config.production;
    let mut orch = Orchestrator::new(config.clone());

    let base = layout.src("bootstrap");
    let styles = Pipeline::new(Source::new(&base).glob("**/*.scss").skip_partials(), layout.out("css"))
        .pipe(GlobImports::new(&base))
        .pipe(
            CompileSass::new(&base)
                .load_path(layout.packages().join("bootstrap-sass/assets/stylesheets")),
        )
        .pipe(PostCss::standard())
        .pipe(MinifyCss)
        .pipe_if(!production, PrettyCss);
    orch.register(pipeline("compile-base-styles", styles).reload(Reload::Styles))?;

    let base = layout.src("scss");
    let styles = Pipeline::new(Source::new(&base).glob("**/style.scss"), layout.out("css"))
        .pipe(GlobImports::new(&base))
        .pipe(CompileSass::new(&base).load_path(&layout.source))
        .pipe(PostCss::standard())
        .pipe(MinifyCss)
        .pipe_if(!production, PrettyCss);
    orch.register(pipeline("compile-styles", styles).reload(Reload::Styles))?;

    let images = layout.out("img");
    orch.register(Task::new("clear-images", move |_| {
        clear_dir(&images)?;
        Ok(())
    }))?;

    let images = Pipeline::new(Source::new(layout.src("images")).glob("**/*"), layout.out("img"))
        .pipe(OptimizeImages::default());
    orch.register(pipeline("build-images", images))?;

    orch.register(Task::sequence("optimize-images", ["clear-images", "build-images"]))?;

    let scripts = Pipeline::new(Source::new(layout.src("script")).glob("**/*.js"), layout.out("js"))
        .pipe(tools.transpile.clone())
        .pipe(Concat::new("main.js"))
        .pipe_if(production, tools.minify_js.clone());
    orch.register(pipeline("compile-scripts", scripts).reload(Reload::Page))?;

    let pages = Pipeline::new(
        Source::new(layout.src("pages")).glob("*.html").skip_partials(),
        &layout.dest,
    )
    .pipe(RenderTemplates::new(&layout.source, "pages", layout.data()))
    .pipe(BemClasses::default())
    .pipe(PrettyHtml::new(4))
    .pipe(Replace::new("&nbsp;", " "))
    .pipe(Forbid::new(FORBIDDEN_MARKER))
    .remember();
    orch.register(pipeline("compile-templates", pages).reload(Reload::Page))?;

    orch.register(copy("copy-misc", Source::new(layout.src("misc")).glob("**/*"), &layout.dest))?;
    orch.register(copy("copy-fonts", Source::new(layout.src("fonts")).glob("**/*"), layout.out("fonts")))?;

    let vendor = || MainFiles::new(layout.manifest(), layout.packages()).include_dev();

    let css = Pipeline::new(vendor(), layout.out("css"))
        .pipe(Filter::extension("css"))
        .pipe(MinifyCss);
    orch.register(pipeline("bundle-vendor-css", css))?;

    let js = Pipeline::new(vendor(), layout.out("js"))
        .pipe(Filter::extension("js"))
        .pipe(tools.minify_js.clone());
    orch.register(pipeline("bundle-vendor-js", js))?;

    let libs = Pipeline::new(Source::new(layout.src("lib")).glob("**/*.js"), layout.out("js"))
        .pipe(tools.minify_js);
    orch.register(pipeline("copy-vendor-libs", libs))?;

    orch.register(Task::sequence("build", BUILD.iter().copied()))?;
    orch.set_default("build")?;

    Ok(orch)
}

/// Source patterns, relative to the source root, and the task they re-run.
pub fn bindings() -> Vec<Binding> {
    let table: &[(&'static str, &[&str])] = &[
        ("compile-styles", &["components/**/*.scss", "scss/**/*.scss"]),
        ("compile-base-styles", &["bootstrap/**/*.scss"]),
        ("optimize-images", &["images/**"]),
        (
            "compile-templates",
            &["data/**/*.json", "pages/**/*.html", "components/**/*.html"],
        ),
        ("compile-scripts", &["script/**/*.js"]),
    ];

    table
        .iter()
        .filter_map(|(task, patterns)| match Binding::new(*task, patterns) {
            Ok(binding) => Some(binding),
            Err(e) => {
                tracing::error!("invalid watch pattern for {task}: {e}");
                None
            }
        })
        .collect()
}

/// Registers `serve` and makes it the default: an initial build, the HTTP
/// server when `http` is set, then the watch loop until the process ends.
#[cfg(feature = "live")]
pub fn serve(orch: &mut Orchestrator, http: Option<u16>) -> Result<(), BuildError> {
    use crate::watch::{self, FsEvents};

    orch.register(Task::new("serve", move |ctx| {
        if let Err(e) = ctx.run("build") {
            ctx.report(&e);
        }

        #[cfg(feature = "server")]
        let _http = http
            .map(|port| crate::server::http::start(ctx.config.layout.dest.clone(), port))
            .transpose()?;
        #[cfg(not(feature = "server"))]
        let _ = http;

        let bindings = bindings();
        let events = FsEvents::new(&ctx.config.layout.source, &bindings)?;
        watch::run(ctx, &bindings, events);
        Ok(())
    }))?;

    orch.set_default("serve")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Layout, Mode};

    #[test]
    fn test_build_plan() {
        let config = BuildConfig::new(false, Mode::Build, Layout::new("."));
        let orch = standard(Arc::new(config), Tools::esbuild()).unwrap();

        let plan: Vec<_> = orch.plan("build").unwrap().iter().map(|t| t.name()).collect();
        let mut expected = BUILD.to_vec();
        expected.push("build");
        assert_eq!(plan, expected);

        let plan: Vec<_> = orch
            .plan("optimize-images")
            .unwrap()
            .iter()
            .map(|t| t.name())
            .collect();
        assert_eq!(plan, vec!["clear-images", "build-images", "optimize-images"]);
    }

    #[test]
    fn test_bindings_target_registered_tasks() {
        let config = BuildConfig::new(false, Mode::Build, Layout::new("."));
        let orch = standard(Arc::new(config), Tools::esbuild()).unwrap();

        let bindings = bindings();
        assert_eq!(bindings.len(), 5);
        for binding in &bindings {
            assert!(orch.get(binding.task()).is_some(), "{}", binding.task());
        }
    }
}
