use std::fmt::Display;
use std::fs;
use std::time::Instant;

use camino::Utf8Path;
use console::Style;
use glob::Pattern;
use indicatif::ProgressStyle;

const ANSI_BLUE: Style = Style::new().blue();

pub(crate) fn as_overhead(s: Instant) -> impl Display {
    let f = format!("(+{}ms)", s.elapsed().as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Spinner style attached to every task span.
pub(crate) fn task_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Pattern matching `pattern` below `dir`, with `dir` taken literally even
/// when it contains glob metacharacters.
pub(crate) fn glob_in(dir: &Utf8Path, pattern: &str) -> String {
    let dir = dir.as_str().trim_end_matches('/');
    format!("{}/{}", Pattern::escape(dir), pattern)
}

/// Delete a directory of the output tree if it exists.
pub(crate) fn clear_dir(path: &Utf8Path) -> std::io::Result<()> {
    if fs::metadata(path).is_ok() {
        fs::remove_dir_all(path)?;
    }

    Ok(())
}

/// Write a file, creating missing parent directories.
pub(crate) fn write_file(path: &Utf8Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    fs::write(path, data)
}
