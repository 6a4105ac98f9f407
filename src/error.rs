use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised by a single transform stage while processing a file set.
#[derive(Debug, Error)]
pub enum StageError {
    /// An external compiler rejected its input (template, stylesheet or script).
    #[error("{tool} failed on '{path}':\n{message}")]
    Compile {
        tool: &'static str,
        path: Utf8PathBuf,
        message: String,
    },

    /// Compiled output contained a marker that must never reach the output tree.
    #[error("'{path}' contains the forbidden marker `{marker}`")]
    Validation { path: Utf8PathBuf, marker: String },

    /// A configuration document is missing or malformed.
    #[error("Couldn't read configuration '{path}':\n{message}")]
    Config { path: Utf8PathBuf, message: String },

    #[error("Couldn't access file system.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),
}

impl StageError {
    pub(crate) fn compile(
        tool: &'static str,
        path: impl Into<Utf8PathBuf>,
        message: impl ToString,
    ) -> Self {
        Self::Compile {
            tool,
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn config(path: impl Into<Utf8PathBuf>, message: impl ToString) -> Self {
        Self::Config {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// Errors raised by the orchestrator while planning or running tasks.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Task '{0}' is not registered")]
    UnknownTask(String),

    #[error("Task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("Task dependencies form a cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("Task '{name}':\n{source:#}")]
    Task {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

impl BuildError {
    /// Name of the task that failed, if the failure happened inside a task.
    pub fn task(&self) -> Option<&str> {
        match self {
            BuildError::Task { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Errors raised while watching the source tree.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "live")]
    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    #[error(transparent)]
    Build(#[from] BuildError),
}
