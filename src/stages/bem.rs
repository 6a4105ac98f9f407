//! Structural class naming.
//!
//! Markup describes its structure with `block`, `elem` and `mods` attributes;
//! this stage turns them into BEM class names:
//!
//! ```html
//! <div block="card" mods="wide"><p elem="title" mods="size:big">…</p></div>
//! <div class="card card_wide"><p class="card__title card__title_size--big">…</p></div>
//! ```
//!
//! An `elem` without an enclosing `block` is left untouched so that later
//! validation can reject it.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::BuildConfig;
use crate::error::StageError;
use crate::pipeline::{Asset, Transform, map_text};

// quoted attribute values may contain `>`
static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<(/?)([A-Za-z][A-Za-z0-9-]*)((?:[^>"']|"[^"]*"|'[^']*')*?)(/?)>"#).unwrap()
});

static ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([^\s=/"']+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#).unwrap()
});

pub(crate) const VOID: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

pub(crate) const RAW: &[&str] = &["script", "style", "textarea", "pre"];

/// Naming scheme of generated class names.
#[derive(Debug, Clone)]
pub struct Bem {
    pub elem_prefix: &'static str,
    pub mod_prefix: &'static str,
    pub mod_delimiter: &'static str,
}

impl Default for Bem {
    fn default() -> Self {
        Self {
            elem_prefix: "__",
            mod_prefix: "_",
            mod_delimiter: "--",
        }
    }
}

struct Attr<'a> {
    name: &'a str,
    value: Option<&'a str>,
    raw: &'a str,
}

fn parse_attrs(text: &str) -> Vec<Attr<'_>> {
    ATTR.captures_iter(text)
        .map(|caps| Attr {
            name: caps.get(1).map_or("", |m| m.as_str()),
            value: caps.get(2).or(caps.get(3)).or(caps.get(4)).map(|m| m.as_str()),
            raw: caps.get(0).map_or("", |m| m.as_str()),
        })
        .collect()
}

impl Bem {
    fn modifiers(&self, base: &str, mods: &str, classes: &mut Vec<String>) {
        for entry in mods.split([',', ' ']).map(str::trim).filter(|m| !m.is_empty()) {
            match entry.split_once(':') {
                Some((key, value)) => classes.push(format!(
                    "{base}{}{}{}{}",
                    self.mod_prefix,
                    key.trim(),
                    self.mod_delimiter,
                    value.trim()
                )),
                None => classes.push(format!("{base}{}{entry}", self.mod_prefix)),
            }
        }
    }

    /// Rewrites one start tag. Returns the new tag text and the block in scope
    /// for the element's children.
    fn rewrite(&self, name: &str, attrs: &str, close: &str, parent: Option<&str>) -> (Option<String>, Option<String>) {
        let attrs = parse_attrs(attrs);
        let find = |key: &str| attrs.iter().find(|a| a.name == key).and_then(|a| a.value);

        let block = find("block");
        let elem = find("elem");
        let mods = find("mods");

        let base = match (block, elem) {
            (Some(block), Some(elem)) => Some(format!("{block}{}{elem}", self.elem_prefix)),
            (Some(block), None) => Some(block.to_string()),
            (None, Some(elem)) => parent.map(|block| format!("{block}{}{elem}", self.elem_prefix)),
            (None, None) => None,
        };

        let scope = block.or(parent).map(str::to_string);

        let Some(base) = base else {
            return (None, scope);
        };

        let mut classes = vec![base.clone()];
        if let Some(mods) = mods {
            self.modifiers(&base, mods, &mut classes);
        }

        let mut tag = format!("<{name}");
        let mut class_written = false;

        for attr in &attrs {
            match attr.name {
                "block" | "elem" | "mods" => {}
                "class" => {
                    if let Some(existing) = attr.value.filter(|v| !v.trim().is_empty()) {
                        classes.push(existing.trim().to_string());
                    }
                    tag.push_str(&format!(r#" class="{}""#, classes.join(" ")));
                    class_written = true;
                }
                _ => {
                    tag.push(' ');
                    tag.push_str(attr.raw);
                }
            }
        }

        if !class_written {
            tag.push_str(&format!(r#" class="{}""#, classes.join(" ")));
        }

        tag.push_str(close);
        tag.push('>');

        (Some(tag), scope)
    }

    /// Applies the naming scheme to a whole document.
    pub fn transform(&self, html: &str) -> String {
        let mut out = String::with_capacity(html.len());
        let mut stack: Vec<(String, Option<String>)> = Vec::new();
        let mut cursor = 0;

        while let Some(caps) = TAG.captures_at(html, cursor) {
            let Some(whole) = caps.get(0) else { break };
            out.push_str(&html[cursor..whole.start()]);
            cursor = whole.end();

            let closing = !caps[1].is_empty();
            let name = caps[2].to_ascii_lowercase();
            let self_closing = !caps[4].is_empty();

            if closing {
                if let Some(index) = stack.iter().rposition(|(open, _)| *open == name) {
                    stack.truncate(index);
                }
                out.push_str(whole.as_str());
                continue;
            }

            let parent = stack.last().and_then(|(_, scope)| scope.as_deref());
            let (tag, scope) = self.rewrite(&caps[2], &caps[3], &caps[4], parent);
            out.push_str(tag.as_deref().unwrap_or(whole.as_str()));

            if RAW.contains(&name.as_str()) {
                let end = format!("</{name}");
                match html[cursor..].to_ascii_lowercase().find(&end) {
                    Some(offset) => {
                        out.push_str(&html[cursor..cursor + offset]);
                        cursor += offset;
                    }
                    None => {
                        out.push_str(&html[cursor..]);
                        cursor = html.len();
                    }
                }
                continue;
            }

            if !self_closing && !VOID.contains(&name.as_str()) {
                stack.push((name, scope));
            }
        }

        out.push_str(&html[cursor..]);
        out
    }
}

/// Pipeline stage applying [`Bem`] to every document.
#[derive(Default)]
pub struct BemClasses(pub Bem);

impl Transform for BemClasses {
    fn name(&self) -> &'static str {
        "bem"
    }

    fn apply(&self, assets: Vec<Asset>, _: &BuildConfig) -> Result<Vec<Asset>, StageError> {
        map_text(assets, |_, text| Ok(self.0.transform(text)))
    }
}
