use std::sync::LazyLock;

use regex::Regex;

use crate::config::BuildConfig;
use crate::error::StageError;
use crate::pipeline::{Asset, Transform, map_text};
use crate::stages::bem::{RAW, VOID};

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<!--.*?-->|<![^>]*>|<(/?)([A-Za-z][A-Za-z0-9-]*)(?:[^>"']|"[^"]*"|'[^']*')*>"#)
        .unwrap()
});

static SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const INLINE: &[&str] = &[
    "a", "abbr", "b", "bdi", "bdo", "br", "cite", "code", "data", "dfn", "em", "i", "img", "kbd",
    "label", "mark", "q", "s", "samp", "small", "span", "strong", "sub", "sup", "time", "u", "var",
];

/// Re-indents HTML with one block-level element per line.
///
/// Inline elements and text stay on the line of their block; the content of
/// `script`, `style`, `pre` and `textarea` is copied verbatim.
pub struct PrettyHtml {
    indent: usize,
}

impl PrettyHtml {
    pub fn new(indent: usize) -> Self {
        Self { indent }
    }

    pub fn format(&self, html: &str) -> String {
        let mut printer = Printer {
            out: String::with_capacity(html.len()),
            line: String::new(),
            depth: 0,
            indent: self.indent,
        };

        let mut cursor = 0;

        while let Some(caps) = TOKEN.captures_at(html, cursor) {
            let Some(whole) = caps.get(0) else { break };
            printer.text(&html[cursor..whole.start()]);
            cursor = whole.end();

            let Some(name) = caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) else {
                // comment or doctype
                printer.flush();
                printer.emit(whole.as_str());
                continue;
            };

            let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
            let tag = whole.as_str();

            if INLINE.contains(&name.as_str()) {
                printer.line.push_str(tag);
                continue;
            }

            printer.flush();

            if closing {
                printer.depth = printer.depth.saturating_sub(1);
                printer.emit(tag);
                continue;
            }

            printer.emit(tag);

            if RAW.contains(&name.as_str()) {
                let end = format!("</{name}");
                let offset = html[cursor..]
                    .to_ascii_lowercase()
                    .find(&end)
                    .unwrap_or(html.len() - cursor);

                let body = html[cursor..cursor + offset].trim_matches(['\n', '\r']);
                if !body.trim().is_empty() {
                    printer.out.push_str(body);
                    printer.out.push('\n');
                }

                cursor += offset;
                printer.depth += 1;
                continue;
            }

            if !tag.ends_with("/>") && !VOID.contains(&name.as_str()) {
                printer.depth += 1;
            }
        }

        printer.text(&html[cursor..]);
        printer.flush();
        printer.out
    }
}

struct Printer {
    out: String,
    line: String,
    depth: usize,
    indent: usize,
}

impl Printer {
    fn text(&mut self, text: &str) {
        if text.trim().is_empty() {
            if !self.line.is_empty() && !text.is_empty() {
                self.line.push(' ');
            }
            return;
        }

        self.line.push_str(&SPACE.replace_all(text, " "));
    }

    fn flush(&mut self) {
        let line = std::mem::take(&mut self.line);
        let line = line.trim();

        if !line.is_empty() {
            self.emit(line);
        }
    }

    fn emit(&mut self, line: &str) {
        for _ in 0..self.depth * self.indent {
            self.out.push(' ');
        }
        self.out.push_str(line);
        self.out.push('\n');
    }
}

impl Transform for PrettyHtml {
    fn name(&self) -> &'static str {
        "pretty-html"
    }

    fn apply(&self, assets: Vec<Asset>, _: &BuildConfig) -> Result<Vec<Asset>, StageError> {
        map_text(assets, |_, text| Ok(self.format(text)))
    }
}

/// Rejects any file containing a marker string.
pub struct Forbid {
    marker: &'static str,
}

impl Forbid {
    pub fn new(marker: &'static str) -> Self {
        Self { marker }
    }
}

impl Transform for Forbid {
    fn name(&self) -> &'static str {
        "forbid"
    }

    fn apply(&self, assets: Vec<Asset>, _: &BuildConfig) -> Result<Vec<Asset>, StageError> {
        for asset in &assets {
            if asset.text()?.contains(self.marker) {
                return Err(StageError::Validation {
                    path: asset.path.clone(),
                    marker: self.marker.to_string(),
                });
            }
        }

        Ok(assets)
    }
}
