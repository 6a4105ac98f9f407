use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use glob::glob;
use grass::{Options, OutputStyle};
use regex::{Captures, Regex};

use crate::config::BuildConfig;
use crate::error::StageError;
use crate::io::glob_in;
use crate::pipeline::{Asset, Transform, map_text};

static GLOB_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@import\s+["']([^"']*[*?\[][^"']*)["']\s*;"#).unwrap()
});

/// Expands `@import "dir/**/*.scss";` into one import per matching file.
///
/// Patterns are resolved relative to the importing file; matches are sorted
/// so the expansion is deterministic.
pub struct GlobImports {
    base: Utf8PathBuf,
}

impl GlobImports {
    pub fn new(base: impl Into<Utf8PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn expand(&self, path: &Utf8Path, text: &str) -> Result<String, StageError> {
        let dir = self.base.join(path.parent().unwrap_or(Utf8Path::new("")));
        let mut error = None;

        let expanded = GLOB_IMPORT.replace_all(text, |caps: &Captures| {
            match resolve(&dir, &caps[1]) {
                Ok(files) => files
                    .iter()
                    .map(|file| format!("@import \"{file}\";"))
                    .collect::<Vec<_>>()
                    .join("\n"),
                Err(e) => {
                    error.get_or_insert(e);
                    String::new()
                }
            }
        });

        match error {
            Some(e) => Err(e),
            None => Ok(expanded.into_owned()),
        }
    }
}

fn resolve(dir: &Utf8Path, pattern: &str) -> Result<Vec<String>, StageError> {
    let mut files = Vec::new();

    for path in glob(&glob_in(dir, pattern))? {
        let path = Utf8PathBuf::try_from(path?)?;
        if !path.is_file() {
            continue;
        }

        let rel = path.strip_prefix(dir).unwrap_or(&path);
        files.push(rel.as_str().replace('\\', "/"));
    }

    files.sort();
    Ok(files)
}

impl Transform for GlobImports {
    fn name(&self) -> &'static str {
        "glob-imports"
    }

    fn apply(&self, assets: Vec<Asset>, _: &BuildConfig) -> Result<Vec<Asset>, StageError> {
        map_text(assets, |path, text| self.expand(path, text))
    }
}

/// Compiles Sass/SCSS to CSS using `grass`.
///
/// Each file can import siblings relative to its own directory, plus anything
/// found in the extra load paths.
pub struct CompileSass {
    base: Utf8PathBuf,
    load_paths: Vec<Utf8PathBuf>,
}

impl CompileSass {
    pub fn new(base: impl Into<Utf8PathBuf>) -> Self {
        Self {
            base: base.into(),
            load_paths: Vec::new(),
        }
    }

    pub fn load_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.load_paths.push(path.into());
        self
    }
}

impl Transform for CompileSass {
    fn name(&self) -> &'static str {
        "sass"
    }

    fn apply(&self, assets: Vec<Asset>, _: &BuildConfig) -> Result<Vec<Asset>, StageError> {
        assets
            .into_iter()
            .map(|asset| -> Result<Asset, StageError> {
                let file = self.base.join(&asset.path);
                let dir = file.parent().unwrap_or(&self.base).to_path_buf();

                let options = Options::default()
                    .style(OutputStyle::Expanded)
                    .load_path(dir.as_std_path())
                    .load_paths(self.load_paths.as_slice());

                let css = grass::from_string(asset.text()?.to_string(), &options)
                    .map_err(|e| StageError::compile("sass", &file, e))?;

                Ok(Asset::new(asset.path.with_extension("css"), css))
            })
            .collect()
    }
}

fn reformat(path: &Utf8Path, css: &str, style: OutputStyle) -> Result<String, StageError> {
    let options = Options::default().style(style);
    let mut out = grass::from_string(css.to_string(), &options)
        .map_err(|e| StageError::compile("css", path, e))?;

    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }

    Ok(out)
}

/// Minifies CSS.
pub struct MinifyCss;

impl Transform for MinifyCss {
    fn name(&self) -> &'static str {
        "minify-css"
    }

    fn apply(&self, assets: Vec<Asset>, _: &BuildConfig) -> Result<Vec<Asset>, StageError> {
        map_text(assets, |path, text| reformat(path, text, OutputStyle::Compressed))
    }
}

/// Pretty-prints CSS with one declaration per line.
pub struct PrettyCss;

impl Transform for PrettyCss {
    fn name(&self) -> &'static str {
        "pretty-css"
    }

    fn apply(&self, assets: Vec<Asset>, _: &BuildConfig) -> Result<Vec<Asset>, StageError> {
        map_text(assets, |path, text| reformat(path, text, OutputStyle::Expanded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Layout, Mode};
    use crate::io::write_file;

    fn config() -> BuildConfig {
        BuildConfig::new(false, Mode::Build, Layout::new("."))
    }

    #[test]
    fn test_glob_imports() {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        write_file(&base.join("scss/blocks/b.scss"), b"").unwrap();
        write_file(&base.join("scss/blocks/a.scss"), b"").unwrap();
        write_file(&base.join("scss/blocks/deep/c.scss"), b"").unwrap();

        let assets = vec![Asset::new(
            "scss/style.scss",
            "@import \"vars\";\n@import 'blocks/**/*.scss';\n",
        )];
        let assets = GlobImports::new(&base).apply(assets, &config()).unwrap();

        assert_eq!(
            assets[0].text().unwrap(),
            "@import \"vars\";\n@import \"blocks/a.scss\";\n@import \"blocks/b.scss\";\n@import \"blocks/deep/c.scss\";\n"
        );
    }

    #[test]
    fn test_compile_sass_with_imports() {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        write_file(&base.join("scss/_vars.scss"), b"$c: red;").unwrap();

        let assets = vec![Asset::new(
            "scss/style.scss",
            "@import \"vars\";\n.a { .b { color: $c; } }",
        )];
        let assets = CompileSass::new(&base).apply(assets, &config()).unwrap();

        assert_eq!(assets[0].path, "scss/style.css");
        assert_eq!(assets[0].text().unwrap(), ".a .b {\n  color: red;\n}\n");
    }

    #[test]
    fn test_compile_sass_error() {
        let assets = vec![Asset::new("style.scss", ".a { color: $missing; }")];
        let err = CompileSass::new(".").apply(assets, &config()).unwrap_err();

        assert!(matches!(err, StageError::Compile { tool: "sass", .. }));
    }

    #[test]
    fn test_minify_and_pretty() {
        let css = vec![Asset::new("a.css", ".a {\n  color: red;\n}\n\n.b {\n  margin: 0;\n}\n")];

        let min = MinifyCss.apply(css, &config()).unwrap();
        assert_eq!(min[0].text().unwrap(), ".a{color:red}.b{margin:0}\n");

        let pretty = PrettyCss.apply(min, &config()).unwrap();
        assert_eq!(
            pretty[0].text().unwrap(),
            ".a {\n  color: red;\n}\n\n.b {\n  margin: 0;\n}\n"
        );
    }
}
