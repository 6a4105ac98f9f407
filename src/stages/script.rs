use std::io::Write;
use std::process::{Command, Stdio};

use camino::Utf8Path;

use crate::config::BuildConfig;
use crate::error::StageError;
use crate::pipeline::{Asset, Transform, map_text};

/// Runs the `esbuild` binary over each file, feeding it through stdin.
///
/// **Note:** requires the `esbuild` binary to be available in the system PATH.
pub struct Esbuild {
    name: &'static str,
    program: String,
    args: Vec<&'static str>,
}

impl Esbuild {
    fn new(name: &'static str, args: &[&'static str]) -> Self {
        Self {
            name,
            program: "esbuild".into(),
            args: args.to_vec(),
        }
    }

    /// Lowers modern syntax to ES2015, dropping legal comments.
    pub fn transpile() -> Self {
        Self::new(
            "transpile",
            &["--target=es2015", "--legal-comments=none", "--loader=js"],
        )
    }

    /// Strips whitespace and simplifies syntax while keeping every identifier,
    /// so globals shared between concatenated scripts survive.
    pub fn minify() -> Self {
        Self::new(
            "minify-js",
            &[
                "--minify-whitespace",
                "--minify-syntax",
                "--legal-comments=none",
                "--loader=js",
            ],
        )
    }

    /// Overrides the executable, e.g. a project-local `node_modules/.bin/esbuild`.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn run(&self, path: &Utf8Path, input: &str) -> Result<String, StageError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(format!("--sourcefile={path}"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| StageError::compile("esbuild", path, format!("{}: {e}", self.program)))?;

        // feed stdin from another thread so a full stdout pipe can't block us
        let (output, written) = std::thread::scope(|scope| {
            let stdin = child.stdin.take();
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(input.as_bytes()),
                None => Ok(()),
            });

            let output = child.wait_with_output();
            (output, writer.join().unwrap_or(Ok(())))
        });

        let output = output?;

        if !output.status.success() {
            let message = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(StageError::compile("esbuild", path, message));
        }

        written?;

        String::from_utf8(output.stdout).map_err(|e| StageError::compile("esbuild", path, e))
    }
}

impl Transform for Esbuild {
    fn name(&self) -> &'static str {
        self.name
    }

    fn apply(&self, assets: Vec<Asset>, _: &BuildConfig) -> Result<Vec<Asset>, StageError> {
        map_text(assets, |path, text| self.run(path, text))
    }
}

/// Joins every asset, in order, into a single file.
pub struct Concat {
    output: &'static str,
}

impl Concat {
    pub fn new(output: &'static str) -> Self {
        Self { output }
    }
}

impl Transform for Concat {
    fn name(&self) -> &'static str {
        "concat"
    }

    fn apply(&self, assets: Vec<Asset>, _: &BuildConfig) -> Result<Vec<Asset>, StageError> {
        if assets.is_empty() {
            return Ok(assets);
        }

        let mut data = Vec::new();

        for asset in &assets {
            data.extend_from_slice(&asset.data);
            if !data.ends_with(b"\n") {
                data.push(b'\n');
            }
        }

        Ok(vec![Asset::new(self.output, data)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Layout, Mode};

    fn config() -> BuildConfig {
        BuildConfig::new(false, Mode::Build, Layout::new("."))
    }

    #[test]
    fn test_concat_in_order() {
        let assets = vec![
            Asset::new("a.js", "var a = 1;"),
            Asset::new("lib/b.js", "var b = 2;\n"),
        ];

        let assets = Concat::new("main.js").apply(assets, &config()).unwrap();

        assert_eq!(assets, vec![Asset::new("main.js", "var a = 1;\nvar b = 2;\n")]);
    }

    #[test]
    fn test_concat_nothing() {
        let assets = Concat::new("main.js").apply(vec![], &config()).unwrap();
        assert!(assets.is_empty());
    }

    #[test]
    fn test_missing_binary_is_compile_error() {
        let stage = Esbuild::transpile().program("tsumiki-no-such-esbuild");
        let assets = vec![Asset::new("a.js", "let a = 1;")];

        let err = stage.apply(assets, &config()).unwrap_err();
        assert!(matches!(err, StageError::Compile { tool: "esbuild", path, .. } if path == "a.js"));
    }
}
