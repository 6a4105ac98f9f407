//! Linear file-set pipelines: collect sources, apply transform stages in a
//! fixed order, then write the surviving assets into the output tree.

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use glob::glob;
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::config::BuildConfig;
use crate::error::StageError;
use crate::hash::Hash32;
use crate::io::{as_overhead, glob_in, write_file};

/// A single file flowing through a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Path relative to the pipeline destination.
    pub path: Utf8PathBuf,
    pub data: Vec<u8>,
}

impl Asset {
    pub fn new(path: impl Into<Utf8PathBuf>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
        }
    }

    pub fn text(&self) -> Result<&str, StageError> {
        std::str::from_utf8(&self.data)
            .map_err(|e| StageError::compile("utf-8", self.path.clone(), e))
    }

    pub fn extension(&self) -> Option<&str> {
        self.path.extension()
    }
}

/// Applies `func` to the text of every asset, keeping the paths.
pub(crate) fn map_text<F>(assets: Vec<Asset>, func: F) -> Result<Vec<Asset>, StageError>
where
    F: Fn(&Utf8Path, &str) -> Result<String, StageError>,
{
    assets
        .into_iter()
        .map(|asset| -> Result<Asset, StageError> {
            let text = func(&asset.path, asset.text()?)?;
            Ok(Asset::new(asset.path, text))
        })
        .collect()
}

/// A conversion from one file set to another, usually backed by an external
/// tool. Pipelines depend only on this interface.
pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, assets: Vec<Asset>, config: &BuildConfig) -> Result<Vec<Asset>, StageError>;
}

impl<T> Transform for Arc<T>
where
    T: Transform + ?Sized,
{
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn apply(&self, assets: Vec<Asset>, config: &BuildConfig) -> Result<Vec<Asset>, StageError> {
        (**self).apply(assets, config)
    }
}

/// Something that produces the initial file set of a pipeline.
pub trait Collect: Send + Sync {
    fn collect(&self) -> Result<Vec<Asset>, StageError>;
}

/// Files matching glob patterns below a base directory, resolved lazily every
/// time the pipeline runs.
#[derive(Debug, Clone)]
pub struct Source {
    base: Utf8PathBuf,
    patterns: Vec<String>,
    skip_partials: bool,
}

impl Source {
    pub fn new(base: impl Into<Utf8PathBuf>) -> Self {
        Self {
            base: base.into(),
            patterns: Vec::new(),
            skip_partials: false,
        }
    }

    /// Adds a pattern relative to the base directory.
    pub fn glob(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    /// Ignores files whose name starts with `_`.
    pub fn skip_partials(mut self) -> Self {
        self.skip_partials = true;
        self
    }

    /// Resolves the matching files, sorted and without duplicates.
    pub fn paths(&self) -> Result<Vec<Utf8PathBuf>, StageError> {
        let mut paths = Vec::new();

        for pattern in &self.patterns {
            for path in glob(&glob_in(&self.base, pattern))? {
                let path = Utf8PathBuf::try_from(path?)?;

                if !path.is_file() {
                    continue;
                }

                if self.skip_partials && path.file_name().is_some_and(|n| n.starts_with('_')) {
                    continue;
                }

                paths.push(path);
            }
        }

        paths.sort();
        paths.dedup();
        Ok(paths)
    }
}

impl Collect for Source {
    fn collect(&self) -> Result<Vec<Asset>, StageError> {
        self.paths()?
            .into_par_iter()
            .map(|path| -> Result<Asset, StageError> {
                let data = fs::read(&path)?;
                let rel = path.strip_prefix(&self.base).unwrap_or(&path).to_path_buf();
                Ok(Asset::new(rel, data))
            })
            .collect()
    }
}

/// Keeps only assets with one of the given extensions.
pub struct Filter {
    extensions: Vec<&'static str>,
}

impl Filter {
    pub fn extension(extension: &'static str) -> Self {
        Self {
            extensions: vec![extension],
        }
    }
}

impl Transform for Filter {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn apply(&self, assets: Vec<Asset>, _: &BuildConfig) -> Result<Vec<Asset>, StageError> {
        Ok(assets
            .into_iter()
            .filter(|asset| {
                asset
                    .extension()
                    .is_some_and(|ext| self.extensions.contains(&ext))
            })
            .collect())
    }
}

/// Replaces every occurrence of a literal string.
pub struct Replace {
    from: &'static str,
    to: &'static str,
}

impl Replace {
    pub fn new(from: &'static str, to: &'static str) -> Self {
        Self { from, to }
    }
}

impl Transform for Replace {
    fn name(&self) -> &'static str {
        "replace"
    }

    fn apply(&self, assets: Vec<Asset>, _: &BuildConfig) -> Result<Vec<Asset>, StageError> {
        map_text(assets, |_, text| Ok(text.replace(self.from, self.to)))
    }
}

/// Collect, transform and write a file set.
pub struct Pipeline {
    source: Box<dyn Collect>,
    stages: Vec<Box<dyn Transform>>,
    dest: Utf8PathBuf,
    remember: Option<Mutex<HashMap<Utf8PathBuf, Hash32>>>,
}

impl Pipeline {
    pub fn new(source: impl Collect + 'static, dest: impl Into<Utf8PathBuf>) -> Self {
        Self {
            source: Box::new(source),
            stages: Vec::new(),
            dest: dest.into(),
            remember: None,
        }
    }

    /// Appends a stage.
    pub fn pipe(mut self, stage: impl Transform + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Appends a stage only when `enabled` holds.
    pub fn pipe_if(self, enabled: bool, stage: impl Transform + 'static) -> Self {
        if enabled { self.pipe(stage) } else { self }
    }

    /// Remembers the digest of every written file across runs and skips
    /// rewriting outputs whose bytes did not change.
    pub fn remember(mut self) -> Self {
        self.remember = Some(Mutex::new(HashMap::new()));
        self
    }

    pub fn dest(&self) -> &Utf8Path {
        &self.dest
    }

    /// Collects the sources and applies every stage, without writing.
    pub fn process(&self, config: &BuildConfig) -> Result<Vec<Asset>, StageError> {
        let mut assets = self.source.collect()?;

        for stage in &self.stages {
            let s = Instant::now();
            assets = stage.apply(assets, config)?;
            tracing::debug!("{} -> {} files {}", stage.name(), assets.len(), as_overhead(s));
        }

        Ok(assets)
    }

    /// Runs the pipeline and writes the result. Nothing is written unless
    /// every stage succeeded. Returns the number of files written.
    pub fn run(&self, config: &BuildConfig) -> Result<usize, StageError> {
        let assets = self.process(config)?;
        let mut written = 0;

        for asset in assets {
            let path = self.dest.join(&asset.path);

            if let Some(remember) = &self.remember {
                let hash = Hash32::hash(&asset.data);
                let mut seen = remember.lock().unwrap_or_else(|e| e.into_inner());

                if seen.get(&path) == Some(&hash) && path.exists() {
                    continue;
                }

                write_file(&path, &asset.data)?;
                seen.insert(path, hash);
            } else {
                write_file(&path, &asset.data)?;
            }

            written += 1;
        }

        tracing::info!("wrote {written} files to {}", self.dest);
        Ok(written)
    }
}
