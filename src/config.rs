use camino::{Utf8Path, Utf8PathBuf};

/// Environment variable selecting the production configuration.
pub const ENV_VAR: &str = "NODE_ENV";

/// The mode in which the pipeline is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A one-shot build of every task.
    Build,
    /// Interactive development: dev server plus file watching.
    Dev,
}

/// Source and destination trees of a project.
///
/// Every path is derived from three roots: the project root (where the vendor
/// manifest lives), the source root and the destination root.
#[derive(Debug, Clone)]
pub struct Layout {
    pub root: Utf8PathBuf,
    pub source: Utf8PathBuf,
    pub dest: Utf8PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        let root = root.into();
        Self {
            source: root.join("assets"),
            dest: root.join("app"),
            root,
        }
    }

    /// Path inside the source root.
    pub fn src(&self, rel: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.source.join(rel)
    }

    /// Path inside the destination root.
    pub fn out(&self, rel: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.dest.join(rel)
    }

    pub fn data(&self) -> Utf8PathBuf {
        self.src("data/data.json")
    }

    pub fn manifest(&self) -> Utf8PathBuf {
        self.root.join("bower.json")
    }

    pub fn packages(&self) -> Utf8PathBuf {
        self.src("bower")
    }
}

/// Immutable snapshot of the build configuration.
///
/// Built once at startup and shared with every task and stage; nothing reads
/// the process environment after this value exists.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Production builds minify scripts, skip CSS pretty-printing and render
    /// templates with `debug = false`.
    pub production: bool,
    /// One-shot build or interactive development.
    pub mode: Mode,
    /// Project directories.
    pub layout: Layout,
    /// Port of the live-reload channel, when one is running.
    pub live: Option<u16>,
}

impl BuildConfig {
    pub fn new(production: bool, mode: Mode, layout: Layout) -> Self {
        Self {
            production,
            mode,
            layout,
            live: None,
        }
    }

    /// Reads [`ENV_VAR`] once: `"prod"` selects production, anything else
    /// (including an unset variable) selects development.
    pub fn from_env(mode: Mode, layout: Layout) -> Self {
        let production = is_production(std::env::var(ENV_VAR).ok().as_deref());
        Self::new(production, mode, layout)
    }

    pub fn with_live(mut self, port: u16) -> Self {
        self.live = Some(port);
        self
    }

    /// Returns a JavaScript snippet that connects to the live-reload channel.
    ///
    /// `reload` refreshes the page, `css` swaps stylesheets in place and
    /// `error:` messages are printed to the browser console.
    pub fn refresh_script(&self) -> Option<String> {
        if self.mode != Mode::Dev {
            return None;
        }

        self.live.map(|port| {
            format!(
                r#"<script>
const socket = new WebSocket("ws://localhost:{port}");
socket.addEventListener("message", event => {{
    if (event.data === "css") {{
        for (const link of document.querySelectorAll('link[rel="stylesheet"]')) {{
            const url = new URL(link.href);
            url.searchParams.set("t", Date.now());
            link.href = url.toString();
        }}
    }} else if (event.data.startsWith("error:")) {{
        console.error(event.data.slice(6));
    }} else {{
        window.location.reload();
    }}
}});
</script>"#
            )
        })
    }
}

fn is_production(value: Option<&str>) -> bool {
    value == Some("prod")
}
