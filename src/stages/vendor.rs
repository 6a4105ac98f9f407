//! Third-party front-end packages declared in a bower-style manifest.
//!
//! ```json
//! {
//!   "dependencies": { "jquery": "~3.7", "bootstrap-sass": "~3.4" },
//!   "devDependencies": { "normalize-css": "*" },
//!   "overrides": { "bootstrap-sass": { "main": ["assets/javascripts/bootstrap.js"] } }
//! }
//! ```
//!
//! Every package is installed in its own directory whose `bower.json` (or the
//! `.bower.json` left by the installer) names the package's `main` files.

use std::collections::{BTreeMap, HashSet};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use glob::glob;
use serde::Deserialize;

use crate::error::StageError;
use crate::io::glob_in;
use crate::pipeline::{Asset, Collect};

#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum Main {
    #[default]
    Empty,
    One(String),
    Many(Vec<String>),
}

impl Main {
    fn entries(&self) -> Vec<&str> {
        match self {
            Main::Empty => vec![],
            Main::One(entry) => vec![entry.as_str()],
            Main::Many(entries) => entries.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Override {
    #[serde(default)]
    main: Option<Main>,
    #[serde(default)]
    dependencies: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    main: Main,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    overrides: BTreeMap<String, Override>,
}

fn read_manifest(path: &Utf8Path) -> Result<Manifest, StageError> {
    let text = fs::read_to_string(path).map_err(|e| StageError::config(path, e))?;
    serde_json::from_str(&text).map_err(|e| StageError::config(path, e))
}

/// Main files of every declared package, dependencies before dependents.
///
/// Each asset is named by its file name only, so bundles can be written flat
/// into a single output directory.
pub struct MainFiles {
    manifest: Utf8PathBuf,
    packages: Utf8PathBuf,
    include_dev: bool,
}

impl MainFiles {
    pub fn new(manifest: impl Into<Utf8PathBuf>, packages: impl Into<Utf8PathBuf>) -> Self {
        Self {
            manifest: manifest.into(),
            packages: packages.into(),
            include_dev: false,
        }
    }

    /// Also resolves the packages listed under `devDependencies`.
    pub fn include_dev(mut self) -> Self {
        self.include_dev = true;
        self
    }

    fn package(&self, name: &str) -> Result<(Utf8PathBuf, Manifest), StageError> {
        let dir = self.packages.join(name);

        for file in ["bower.json", ".bower.json"] {
            let path = dir.join(file);
            if path.is_file() {
                return Ok((dir, read_manifest(&path)?));
            }
        }

        if dir.is_dir() {
            return Ok((dir, Manifest::default()));
        }

        Err(StageError::config(
            &self.manifest,
            format!("package '{name}' is not installed in {}", self.packages),
        ))
    }

    /// Resolves the ordered list of main files.
    pub fn paths(&self) -> Result<Vec<Utf8PathBuf>, StageError> {
        let root = read_manifest(&self.manifest)?;

        let mut names: Vec<&String> = root.dependencies.keys().collect();
        if self.include_dev {
            names.extend(root.dev_dependencies.keys());
        }

        let mut resolver = Resolver {
            files: self,
            overrides: &root.overrides,
            visited: HashSet::new(),
            paths: Vec::new(),
        };

        for name in names {
            resolver.visit(name)?;
        }

        Ok(resolver.paths)
    }
}

struct Resolver<'a> {
    files: &'a MainFiles,
    overrides: &'a BTreeMap<String, Override>,
    visited: HashSet<String>,
    paths: Vec<Utf8PathBuf>,
}

impl Resolver<'_> {
    fn visit(&mut self, name: &str) -> Result<(), StageError> {
        if !self.visited.insert(name.to_string()) {
            return Ok(());
        }

        let (dir, manifest) = self.files.package(name)?;
        let rule = self.overrides.get(name);

        let deps = rule
            .and_then(|o| o.dependencies.as_ref())
            .unwrap_or(&manifest.dependencies);

        for dep in deps.keys() {
            self.visit(dep)?;
        }

        let main = rule.and_then(|o| o.main.as_ref()).unwrap_or(&manifest.main);

        for entry in main.entries() {
            let mut matches = Vec::new();
            for path in glob(&glob_in(&dir, entry))? {
                let path = Utf8PathBuf::try_from(path?)?;
                if path.is_file() {
                    matches.push(path);
                }
            }

            if matches.is_empty() {
                tracing::warn!("{name}: main file '{entry}' not found");
            }

            matches.sort();
            for path in matches {
                if !self.paths.contains(&path) {
                    self.paths.push(path);
                }
            }
        }

        Ok(())
    }
}

impl Collect for MainFiles {
    fn collect(&self) -> Result<Vec<Asset>, StageError> {
        self.paths()?
            .into_iter()
            .map(|path| -> Result<Asset, StageError> {
                let data = fs::read(&path)?;
                let name = path.file_name().unwrap_or(path.as_str()).to_string();
                Ok(Asset::new(name, data))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::write_file;

    fn project() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        write_file(
            &root.join("bower.json"),
            br#"{
                "dependencies": { "bootstrap": "~3", "jquery": "~3" },
                "devDependencies": { "debug-kit": "*" },
                "overrides": { "bootstrap": { "main": ["dist/*.js", "dist/bootstrap.css"] } }
            }"#,
        )
        .unwrap();

        let pkg = root.join("bower");
        write_file(
            &pkg.join("bootstrap/bower.json"),
            br#"{ "main": "less/bootstrap.less", "dependencies": { "jquery": ">= 1.9" } }"#,
        )
        .unwrap();
        write_file(&pkg.join("bootstrap/dist/bootstrap.js"), b"bs()").unwrap();
        write_file(&pkg.join("bootstrap/dist/affix.js"), b"affix()").unwrap();
        write_file(&pkg.join("bootstrap/dist/bootstrap.css"), b".bs{}").unwrap();
        write_file(&pkg.join("jquery/.bower.json"), br#"{ "main": "dist/jquery.js" }"#).unwrap();
        write_file(&pkg.join("jquery/dist/jquery.js"), b"$()").unwrap();
        write_file(&pkg.join("debug-kit/bower.json"), br#"{ "main": ["kit.js"] }"#).unwrap();
        write_file(&pkg.join("debug-kit/kit.js"), b"kit()").unwrap();

        (dir, root)
    }

    fn names(files: &MainFiles) -> Vec<String> {
        files
            .collect()
            .unwrap()
            .into_iter()
            .map(|a| a.path.to_string())
            .collect()
    }

    #[test]
    fn test_dependencies_first_with_overrides() {
        let (_dir, root) = project();
        let files = MainFiles::new(root.join("bower.json"), root.join("bower"));

        assert_eq!(
            names(&files),
            vec!["jquery.js", "affix.js", "bootstrap.js", "bootstrap.css"]
        );
    }

    #[test]
    fn test_dev_dependencies() {
        let (_dir, root) = project();
        let files = MainFiles::new(root.join("bower.json"), root.join("bower")).include_dev();

        assert_eq!(names(&files).last().map(String::as_str), Some("kit.js"));
    }

    #[test]
    fn test_missing_package() {
        let (_dir, root) = project();
        fs::remove_dir_all(root.join("bower/jquery")).unwrap();

        let files = MainFiles::new(root.join("bower.json"), root.join("bower"));
        let err = files.collect().unwrap_err();
        assert!(matches!(err, StageError::Config { .. }));
    }

    #[test]
    fn test_missing_manifest() {
        let (_dir, root) = project();
        let files = MainFiles::new(root.join("nope.json"), root.join("bower"));
        assert!(matches!(files.paths(), Err(StageError::Config { .. })));
    }
}
