//! A minimal CSS tree and the post-processors that run on compiled styles.
//!
//! The parser understands exactly what a stylesheet compiler emits: rules,
//! declarations, at-rules with or without blocks, and comments (dropped).

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::config::BuildConfig;
use crate::error::StageError;
use crate::pipeline::{Asset, Transform, map_text};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Decl {
        prop: String,
        value: String,
    },
    Rule {
        selector: String,
        children: Vec<Node>,
    },
    At {
        name: String,
        params: String,
        children: Option<Vec<Node>>,
    },
}

/// Parses a stylesheet into a list of top-level nodes.
pub fn parse(css: &str) -> Vec<Node> {
    let mut parser = Parser {
        chars: css.chars().collect(),
        pos: 0,
    };
    parser.block()
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn block(&mut self) -> Vec<Node> {
        let mut nodes = Vec::new();
        let mut buffer = String::new();
        let mut depth = 0usize;

        while let Some(c) = self.peek(0) {
            match c {
                '/' if self.peek(1) == Some('*') => {
                    self.pos += 2;
                    while self.pos < self.chars.len()
                        && !(self.peek(0) == Some('*') && self.peek(1) == Some('/'))
                    {
                        self.pos += 1;
                    }
                    self.pos += 2;
                    continue;
                }
                '"' | '\'' => {
                    buffer.push(c);
                    self.pos += 1;
                    while let Some(inner) = self.peek(0) {
                        buffer.push(inner);
                        self.pos += 1;
                        if inner == '\\' {
                            if let Some(escaped) = self.peek(0) {
                                buffer.push(escaped);
                                self.pos += 1;
                            }
                        } else if inner == c {
                            break;
                        }
                    }
                    continue;
                }
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                '{' if depth == 0 => {
                    self.pos += 1;
                    let prelude = std::mem::take(&mut buffer);
                    let children = self.block();
                    nodes.push(open(prelude.trim(), children));
                    continue;
                }
                ';' if depth == 0 => {
                    self.pos += 1;
                    statement(std::mem::take(&mut buffer).trim(), &mut nodes);
                    continue;
                }
                '}' if depth == 0 => {
                    self.pos += 1;
                    statement(buffer.trim(), &mut nodes);
                    return nodes;
                }
                _ => {}
            }

            buffer.push(c);
            self.pos += 1;
        }

        statement(buffer.trim(), &mut nodes);
        nodes
    }
}

fn split_at_rule(prelude: &str) -> (String, String) {
    let body = &prelude[1..];
    match body.find(|c: char| c.is_whitespace() || c == '(' || c == '"' || c == '\'') {
        Some(i) => (body[..i].to_string(), body[i..].trim().to_string()),
        None => (body.to_string(), String::new()),
    }
}

fn open(prelude: &str, children: Vec<Node>) -> Node {
    if prelude.starts_with('@') {
        let (name, params) = split_at_rule(prelude);
        Node::At {
            name,
            params,
            children: Some(children),
        }
    } else {
        Node::Rule {
            selector: prelude.to_string(),
            children,
        }
    }
}

fn statement(text: &str, nodes: &mut Vec<Node>) {
    if text.is_empty() {
        return;
    }

    if text.starts_with('@') {
        let (name, params) = split_at_rule(text);
        nodes.push(Node::At {
            name,
            params,
            children: None,
        });
    } else if let Some((prop, value)) = text.split_once(':') {
        nodes.push(Node::Decl {
            prop: prop.trim().to_string(),
            value: value.trim().to_string(),
        });
    }
}

/// Serializes nodes back to expanded CSS.
pub fn stringify(nodes: &[Node]) -> String {
    let mut out = String::new();
    write_nodes(nodes, 0, &mut out);
    out
}

fn write_nodes(nodes: &[Node], depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);

    for node in nodes {
        match node {
            Node::Decl { prop, value } => {
                out.push_str(&format!("{indent}{prop}: {value};\n"));
            }
            Node::Rule { selector, children } => {
                out.push_str(&format!("{indent}{selector} {{\n"));
                write_nodes(children, depth + 1, out);
                out.push_str(&format!("{indent}}}\n"));
            }
            Node::At {
                name,
                params,
                children,
            } => {
                out.push_str(&indent);
                out.push('@');
                out.push_str(name);
                if !params.is_empty() {
                    out.push(' ');
                    out.push_str(params);
                }
                match children {
                    Some(children) => {
                        out.push_str(" {\n");
                        write_nodes(children, depth + 1, out);
                        out.push_str(&format!("{indent}}}\n"));
                    }
                    None => out.push_str(";\n"),
                }
            }
        }
    }
}

/// Splits a selector list on top-level commas.
fn split_selectors(selector: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for c in selector.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }

    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }

    parts
}

/// A single rewrite of a parsed stylesheet.
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;
    fn process(&self, nodes: &mut Vec<Node>);
}

/// Visits every rule, including the ones nested in at-rules.
fn walk_rules(nodes: &mut [Node], func: &mut dyn FnMut(&mut String, &mut Vec<Node>)) {
    for node in nodes {
        match node {
            Node::Rule { selector, children } => func(selector, children),
            Node::At {
                children: Some(children),
                ..
            } => walk_rules(children, func),
            _ => {}
        }
    }
}

/// Visits every declaration together with the selector of its rule, if any.
fn walk_decls(
    nodes: &mut [Node],
    selector: Option<&str>,
    func: &mut dyn FnMut(Option<&str>, &mut String, &mut String),
) {
    for node in nodes {
        match node {
            Node::Decl { prop, value } => func(selector, prop, value),
            Node::Rule { selector, children } => walk_decls(children, Some(selector), func),
            Node::At {
                children: Some(children),
                ..
            } => walk_decls(children, None, func),
            _ => {}
        }
    }
}

static PX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"]*"|'[^']*'|url\([^)]*\)|(\d*\.?\d+)px"#).unwrap());

/// Converts pixel values to `rem` for typographic properties.
pub struct PxToRem {
    pub root: f64,
    pub precision: i32,
    pub props: &'static [&'static str],
    pub selector_blacklist: &'static [&'static str],
}

impl Default for PxToRem {
    fn default() -> Self {
        Self {
            root: 14.0,
            precision: 5,
            props: &["font", "font-size", "line-height", "letter-spacing"],
            selector_blacklist: &["html"],
        }
    }
}

impl PxToRem {
    fn convert(&self, value: &str) -> String {
        let scale = 10f64.powi(self.precision);

        PX.replace_all(value, |caps: &Captures| {
            let Some(number) = caps.get(1) else {
                return caps[0].to_string();
            };

            let px: f64 = number.as_str().parse().unwrap_or(0.0);
            let rem = (px / self.root * scale).round() / scale;

            if rem == 0.0 {
                "0".to_string()
            } else {
                format!("{rem}rem")
            }
        })
        .into_owned()
    }
}

impl Processor for PxToRem {
    fn name(&self) -> &'static str {
        "px-to-rem"
    }

    fn process(&self, nodes: &mut Vec<Node>) {
        walk_decls(nodes, None, &mut |selector, prop, value| {
            if !self.props.contains(&prop.as_str()) {
                return;
            }

            if selector.is_some_and(|s| self.selector_blacklist.iter().any(|b| s.contains(b))) {
                return;
            }

            *value = self.convert(value);
        });
    }
}

/// Adds vendor-prefixed duplicates of declarations that need them.
pub struct Autoprefix {
    pub props: &'static [(&'static str, &'static [&'static str])],
    pub values: &'static [(&'static str, &'static str, &'static [&'static str])],
}

impl Default for Autoprefix {
    fn default() -> Self {
        Self {
            props: &[
                ("appearance", &["-webkit-", "-moz-"]),
                ("backdrop-filter", &["-webkit-"]),
                ("box-decoration-break", &["-webkit-"]),
                ("clip-path", &["-webkit-"]),
                ("hyphens", &["-webkit-", "-ms-"]),
                ("mask", &["-webkit-"]),
                ("mask-image", &["-webkit-"]),
                ("text-size-adjust", &["-webkit-", "-ms-"]),
                ("user-select", &["-webkit-", "-moz-", "-ms-"]),
            ],
            values: &[
                ("display", "flex", &["-webkit-box", "-ms-flexbox"]),
                ("display", "inline-flex", &["-webkit-inline-box", "-ms-inline-flexbox"]),
                ("position", "sticky", &["-webkit-sticky"]),
            ],
        }
    }
}

impl Autoprefix {
    fn prefix(&self, children: &mut Vec<Node>) {
        let mut out: Vec<Node> = Vec::with_capacity(children.len());

        let written: Vec<(String, String)> = children
            .iter()
            .filter_map(|node| match node {
                Node::Decl { prop, value } => Some((prop.clone(), value.clone())),
                _ => None,
            })
            .collect();

        // hand-written prefixed declarations win, wherever they are in the rule
        let present = |out: &[Node], p: &str, v: Option<&str>| {
            let hit = |prop: &str, value: &str| prop == p && v.is_none_or(|v| v == value);
            written.iter().any(|(prop, value)| hit(prop, value))
                || out.iter().any(|node| match node {
                    Node::Decl { prop, value } => hit(prop, value),
                    _ => false,
                })
        };

        for node in std::mem::take(children) {
            if let Node::Decl { prop, value } = &node {
                if let Some((_, prefixes)) = self.props.iter().find(|(p, _)| *p == prop.as_str()) {
                    for prefix in prefixes.iter() {
                        let name = format!("{prefix}{prop}");
                        if !present(&out, &name, None) {
                            out.push(Node::Decl {
                                prop: name,
                                value: value.clone(),
                            });
                        }
                    }
                }

                for (p, v, prefixed) in self.values.iter() {
                    if *p != prop.as_str() || *v != value.as_str() {
                        continue;
                    }

                    for alt in prefixed.iter().copied() {
                        if !present(&out, prop, Some(alt)) {
                            out.push(Node::Decl {
                                prop: prop.clone(),
                                value: alt.to_string(),
                            });
                        }
                    }
                }
            }

            out.push(node);
        }

        *children = out;
    }
}

impl Processor for Autoprefix {
    fn name(&self) -> &'static str {
        "autoprefix"
    }

    fn process(&self, nodes: &mut Vec<Node>) {
        walk_rules(nodes, &mut |_, children| self.prefix(children));
    }
}

/// Merges top-level `@media` blocks with identical queries and moves them to
/// the end of the stylesheet, in order of first appearance.
pub struct PackMediaQueries;

impl Processor for PackMediaQueries {
    fn name(&self) -> &'static str {
        "pack-media-queries"
    }

    fn process(&self, nodes: &mut Vec<Node>) {
        let mut rest = Vec::with_capacity(nodes.len());
        let mut packed: Vec<(String, Vec<Node>)> = Vec::new();

        for node in std::mem::take(nodes) {
            match node {
                Node::At {
                    name,
                    params,
                    children: Some(children),
                } if name == "media" => {
                    match packed.iter_mut().find(|(query, _)| *query == params) {
                        Some((_, merged)) => merged.extend(children),
                        None => packed.push((params, children)),
                    }
                }
                other => rest.push(other),
            }
        }

        rest.extend(packed.into_iter().map(|(params, children)| Node::At {
            name: "media".into(),
            params,
            children: Some(children),
        }));

        *nodes = rest;
    }
}

/// Resolves `@custom-selector :--name <selector list>;` definitions.
pub struct CustomSelectors;

impl CustomSelectors {
    fn expand(selector: &str, defs: &[(String, Vec<String>)]) -> String {
        let mut list = split_selectors(selector);

        for (name, alternatives) in defs {
            list = list
                .into_iter()
                .flat_map(|sel| {
                    if sel.contains(name.as_str()) {
                        alternatives
                            .iter()
                            .map(|alt| sel.replace(name.as_str(), alt))
                            .collect::<Vec<_>>()
                    } else {
                        vec![sel]
                    }
                })
                .collect();
        }

        list.join(", ")
    }
}

impl Processor for CustomSelectors {
    fn name(&self) -> &'static str {
        "custom-selectors"
    }

    fn process(&self, nodes: &mut Vec<Node>) {
        let mut defs = Vec::new();

        nodes.retain(|node| match node {
            Node::At {
                name,
                params,
                children: None,
            } if name == "custom-selector" => {
                if let Some((custom, list)) = params.split_once(char::is_whitespace) {
                    defs.push((custom.trim().to_string(), split_selectors(list)));
                }
                false
            }
            _ => true,
        });

        if defs.is_empty() {
            return;
        }

        // longer names first so `:--a` never matches inside `:--ab`
        defs.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        walk_rules(nodes, &mut |selector, _| {
            *selector = Self::expand(selector, &defs);
        });
    }
}

/// Gives every `:hover` selector an equivalent `:focus` twin.
pub struct FocusHover;

impl Processor for FocusHover {
    fn name(&self) -> &'static str {
        "focus-hover"
    }

    fn process(&self, nodes: &mut Vec<Node>) {
        walk_rules(nodes, &mut |selector, _| {
            if !selector.contains(":hover") {
                return;
            }

            let mut list = split_selectors(selector);
            let twins: Vec<_> = list
                .iter()
                .filter(|s| s.contains(":hover"))
                .map(|s| s.replace(":hover", ":focus"))
                .collect();

            for twin in twins {
                if !list.contains(&twin) {
                    list.push(twin);
                }
            }

            *selector = list.join(", ");
        });
    }
}

/// Runs a fixed, ordered chain of processors over each stylesheet.
pub struct PostCss {
    processors: Vec<Box<dyn Processor>>,
}

impl PostCss {
    pub fn new() -> Self {
        Self {
            processors: Vec::new(),
        }
    }

    pub fn with(mut self, processor: impl Processor + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    /// The chain applied to every project stylesheet.
    pub fn standard() -> Self {
        Self::new()
            .with(PxToRem::default())
            .with(Autoprefix::default())
            .with(PackMediaQueries)
            .with(CustomSelectors)
            .with(FocusHover)
    }

    pub fn run(&self, css: &str) -> String {
        let mut nodes = parse(css);

        for processor in &self.processors {
            processor.process(&mut nodes);
            tracing::trace!("applied {}", processor.name());
        }

        stringify(&nodes)
    }
}

impl Default for PostCss {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for PostCss {
    fn name(&self) -> &'static str {
        "postcss"
    }

    fn apply(&self, assets: Vec<Asset>, _: &BuildConfig) -> Result<Vec<Asset>, StageError> {
        map_text(assets, |_, text| Ok(self.run(text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(processor: impl Processor + 'static, css: &str) -> String {
        PostCss::new().with(processor).run(css)
    }

    #[test]
    fn test_parse_roundtrip() {
        let css = "@charset \"UTF-8\";\n/* note */\n.a { background: url(\"data:image/png;base64,AA==\"); content: \"{;}\" }\n@media (min-width: 10px) {\n  .b { margin: 0 }\n}\n";

        assert_eq!(
            stringify(&parse(css)),
            "@charset \"UTF-8\";\n.a {\n  background: url(\"data:image/png;base64,AA==\");\n  content: \"{;}\";\n}\n@media (min-width: 10px) {\n  .b {\n    margin: 0;\n  }\n}\n"
        );
    }

    #[test]
    fn test_px_to_rem() {
        let css = "html { font-size: 14px; }\n.a { font-size: 21px; line-height: 0px; margin: 14px; font: 12px/1.5 \"7px\"; }";

        assert_eq!(
            run(PxToRem::default(), css),
            "html {\n  font-size: 14px;\n}\n.a {\n  font-size: 1.5rem;\n  line-height: 0;\n  margin: 14px;\n  font: 0.85714rem/1.5 \"7px\";\n}\n"
        );
    }

    #[test]
    fn test_autoprefix() {
        let css = ".a { user-select: none; display: flex; -webkit-appearance: none; appearance: none; }";

        assert_eq!(
            run(Autoprefix::default(), css),
            ".a {\n  -webkit-user-select: none;\n  -moz-user-select: none;\n  -ms-user-select: none;\n  user-select: none;\n  display: -webkit-box;\n  display: -ms-flexbox;\n  display: flex;\n  -webkit-appearance: none;\n  -moz-appearance: none;\n  appearance: none;\n}\n"
        );
    }

    #[test]
    fn test_autoprefix_keeps_later_prefixed() {
        let css = ".a { user-select: none; -webkit-user-select: text; display: flex; display: -webkit-box; }";

        assert_eq!(
            run(Autoprefix::default(), css),
            ".a {\n  -moz-user-select: none;\n  -ms-user-select: none;\n  user-select: none;\n  -webkit-user-select: text;\n  display: -ms-flexbox;\n  display: flex;\n  display: -webkit-box;\n}\n"
        );
    }

    #[test]
    fn test_pack_media_queries() {
        let css = "@media (max-width: 5px) { .a { color: red; } }\n.x { color: blue; }\n@media print { .p { color: black; } }\n@media (max-width: 5px) { .b { color: green; } }";

        assert_eq!(
            run(PackMediaQueries, css),
            ".x {\n  color: blue;\n}\n@media (max-width: 5px) {\n  .a {\n    color: red;\n  }\n  .b {\n    color: green;\n  }\n}\n@media print {\n  .p {\n    color: black;\n  }\n}\n"
        );
    }

    #[test]
    fn test_custom_selectors() {
        let css = "@custom-selector :--heading h1, h2;\n@custom-selector :--button button, .btn;\n:--heading a, .x { color: red; }\n:--button :--heading { margin: 0; }";

        assert_eq!(
            run(CustomSelectors, css),
            "h1 a, h2 a, .x {\n  color: red;\n}\nbutton h1, .btn h1, button h2, .btn h2 {\n  margin: 0;\n}\n"
        );
    }

    #[test]
    fn test_focus_hover() {
        let css = "a:hover, .b { color: red; }\n@media print { .c:hover span { color: blue; } }";

        assert_eq!(
            run(FocusHover, css),
            "a:hover, .b, a:focus {\n  color: red;\n}\n@media print {\n  .c:hover span, .c:focus span {\n    color: blue;\n  }\n}\n"
        );
    }
}
