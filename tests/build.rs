use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tsumiki::tasks::{self, Tools};
use tsumiki::{
    Asset, BuildConfig, BuildError, Layout, Mode, Orchestrator, StageError, Transform,
};

type Log = Arc<Mutex<Vec<&'static str>>>;

/// Stands in for esbuild: records its calls, optionally collapses whitespace.
struct Stub {
    name: &'static str,
    log: Log,
    collapse: bool,
}

impl Transform for Stub {
    fn name(&self) -> &'static str {
        self.name
    }

    fn apply(&self, assets: Vec<Asset>, _: &BuildConfig) -> Result<Vec<Asset>, StageError> {
        self.log.lock().unwrap().push(self.name);

        assets
            .into_iter()
            .map(|asset| -> Result<Asset, StageError> {
                if !self.collapse {
                    return Ok(asset);
                }
                let text = asset.text()?.split_whitespace().collect::<Vec<_>>().join(" ");
                Ok(Asset::new(asset.path, text))
            })
            .collect()
    }
}

fn tools(log: &Log) -> Tools {
    Tools {
        transpile: Arc::new(Stub {
            name: "transpile",
            log: log.clone(),
            collapse: false,
        }),
        minify_js: Arc::new(Stub {
            name: "minify",
            log: log.clone(),
            collapse: true,
        }),
    }
}

fn png(shade: u8) -> Vec<u8> {
    let image = RgbImage::from_fn(8, 8, |x, _| Rgb([shade, x as u8, 0]));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buffer, ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}

fn put(root: &Utf8Path, path: &str, data: impl AsRef<[u8]>) {
    let path = root.join(path);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

fn project() -> (tempfile::TempDir, Utf8PathBuf) {
    project_in("")
}

/// Sample project in `sub` below a fresh temporary directory.
fn project_in(sub: &str) -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = match sub {
        "" => dir.path().to_path_buf(),
        sub => dir.path().join(sub),
    };
    let root = Utf8PathBuf::try_from(root).unwrap();

    put(&root, "bower.json", "{}");

    put(&root, "assets/bootstrap/_vars.scss", "$c: red;");
    put(
        &root,
        "assets/bootstrap/base.scss",
        "@import \"vars\";\nbody { color: $c; font-size: 28px; }",
    );

    put(&root, "assets/scss/blocks/card.scss", ".card { margin: 0; }");
    put(
        &root,
        "assets/scss/style.scss",
        "@import \"blocks/*.scss\";\n.page:hover { user-select: none; }",
    );

    put(&root, "assets/script/a.js", "var a = 1;\n\nfunction go() {\n  return a;\n}\n");
    put(&root, "assets/script/b.js", "go();\n");
    put(&root, "assets/lib/extra.js", "var   extra = true;\n");

    put(&root, "assets/data/data.json", r#"{"title": "Hello"}"#);
    put(
        &root,
        "assets/components/header.html",
        r#"<header block="head"><h1 elem="title">{{ title }}</h1></header>"#,
    );
    put(
        &root,
        "assets/pages/index.html",
        r#"<html><body>{% include "components/header.html" %}<p>debug={{ debug }}&nbsp;!</p></body></html>"#,
    );
    put(&root, "assets/pages/_partial.html", "<p>partial</p>");

    put(&root, "assets/images/a.png", png(10));
    put(&root, "assets/images/b.png", png(200));
    put(&root, "assets/fonts/icons.woff", "woff");
    put(&root, "assets/misc/robots.txt", "User-agent: *\n");

    (dir, root)
}

fn orchestrator(root: &Utf8Path, production: bool, log: &Log) -> Orchestrator {
    let config = BuildConfig::new(production, Mode::Build, Layout::new(root));
    tasks::standard(Arc::new(config), tools(log)).unwrap()
}

fn tree(dir: &Utf8Path) -> BTreeMap<Utf8PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(path) = stack.pop() {
        for entry in path.read_dir_utf8().unwrap() {
            let entry = entry.unwrap();
            let path = entry.path().to_path_buf();
            if path.is_dir() {
                stack.push(path);
            } else {
                let rel = path.strip_prefix(dir).unwrap().to_path_buf();
                files.insert(rel, fs::read(&path).unwrap());
            }
        }
    }

    files
}

fn read(root: &Utf8Path, path: &str) -> String {
    fs::read_to_string(root.join(path)).unwrap()
}

#[test]
fn full_build_writes_every_output() {
    let (_dir, root) = project();
    let log = Log::default();

    orchestrator(&root, false, &log).run("build").unwrap();

    let files: Vec<_> = tree(&root.join("app")).into_keys().collect();
    assert_eq!(
        files,
        vec![
            "css/base.css",
            "css/style.css",
            "fonts/icons.woff",
            "img/a.png",
            "img/b.png",
            "index.html",
            "js/extra.js",
            "js/main.js",
            "robots.txt",
        ]
    );

    // scripts are transpiled before the vendor and lib scripts are minified
    assert_eq!(*log.lock().unwrap(), vec!["transpile", "minify", "minify"]);

    let html = read(&root, "app/index.html");
    assert!(html.contains(r#"<header class="head">"#));
    assert!(html.contains(r#"<h1 class="head__title">"#));
    assert!(html.contains("debug=true !"));
    assert!(!html.contains("&nbsp;"));

    let css = read(&root, "app/css/base.css");
    assert!(css.contains("font-size: 2rem;"));

    let css = read(&root, "app/css/style.css");
    assert!(css.contains(".page:hover, .page:focus {"));
    assert!(css.contains("-webkit-user-select: none;"));
    assert!(css.contains(".card {"));
}

#[test]
fn build_below_bracketed_root() {
    let (_dir, root) = project_in("site[v2]");
    let log = Log::default();

    orchestrator(&root, false, &log).run("build").unwrap();

    let files = tree(&root.join("app"));
    assert_eq!(files.len(), 9);
    assert!(read(&root, "app/css/style.css").contains(".card {"));
}

#[test]
fn build_is_idempotent() {
    let (_dir, root) = project();
    let log = Log::default();

    orchestrator(&root, false, &log).run("build").unwrap();
    let first = tree(&root.join("app"));

    orchestrator(&root, false, &log).run("build").unwrap();
    let second = tree(&root.join("app"));

    assert_eq!(first, second);
}

#[test]
fn production_flag_roundtrip() {
    let (_dir, root) = project();
    let log = Log::default();

    orchestrator(&root, true, &log).run("build").unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["transpile", "minify", "minify", "minify"]
    );

    assert!(read(&root, "app/index.html").contains("debug=false !"));
    assert_eq!(
        read(&root, "app/js/main.js"),
        "var a = 1; function go() { return a; } go();"
    );
    assert_eq!(
        read(&root, "app/css/base.css"),
        "body{color:red;font-size:2rem}\n"
    );
    assert!(!read(&root, "app/css/style.css").contains("\n  "));

    orchestrator(&root, false, &log).run("build").unwrap();

    assert!(read(&root, "app/index.html").contains("debug=true !"));
    assert_eq!(read(&root, "app/js/main.js"), read(&root, "assets/script/a.js") + "go();\n");
    assert_eq!(
        read(&root, "app/css/base.css"),
        "body {\n  color: red;\n  font-size: 2rem;\n}\n"
    );
}

#[test]
fn invalid_template_leaves_output_untouched() {
    let (_dir, root) = project();
    let log = Log::default();
    let orch = orchestrator(&root, false, &log);

    orch.run("compile-templates").unwrap();
    let before = read(&root, "app/index.html");

    put(
        &root,
        "assets/pages/index.html",
        r#"<html><body><p elem="orphan">x</p></body></html>"#,
    );

    let err = orch.run("compile-templates").unwrap_err();
    assert_eq!(err.task(), Some("compile-templates"));

    let BuildError::Task { source, .. } = &err else {
        panic!("unexpected error: {err}");
    };
    assert!(matches!(
        source.downcast_ref::<StageError>(),
        Some(StageError::Validation { .. })
    ));

    assert_eq!(read(&root, "app/index.html"), before);
}

#[test]
fn template_syntax_error_is_compile_error() {
    let (_dir, root) = project();
    let log = Log::default();

    put(&root, "assets/pages/index.html", "{% if %}");

    let err = orchestrator(&root, false, &log).run("build").unwrap_err();
    assert_eq!(err.task(), Some("compile-templates"));

    // tasks after the failing one never ran
    assert!(!root.join("app/robots.txt").exists());
    assert!(root.join("app/js/main.js").exists());
}

#[test]
fn optimize_images_clears_stale_output() {
    let (_dir, root) = project();
    let log = Log::default();
    let orch = orchestrator(&root, false, &log);

    orch.run("optimize-images").unwrap();
    put(&root, "app/img/stale.png", png(0));
    fs::remove_file(root.join("assets/images/b.png")).unwrap();

    orch.run("optimize-images").unwrap();

    let files: Vec<_> = tree(&root.join("app/img")).into_keys().collect();
    assert_eq!(files, vec!["a.png"]);
}

#[test]
fn unknown_task_writes_nothing() {
    let (_dir, root) = project();
    let log = Log::default();

    let err = orchestrator(&root, false, &log).run("nope").unwrap_err();

    assert!(matches!(err, BuildError::UnknownTask(name) if name == "nope"));
    assert!(!root.join("app").exists());
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn watch_change_runs_only_the_bound_task() {
    let (_dir, root) = project();
    let log = Log::default();
    let orch = orchestrator(&root, false, &log);
    let bindings = tasks::bindings();

    let events: Vec<tsumiki::watch::Batch> = vec![
        Ok(vec![Utf8PathBuf::from("README.md")]),
        Ok(vec![Utf8PathBuf::from("scss/blocks/card.scss")]),
    ];

    tsumiki::watch::run(&orch.context(), &bindings, events.into_iter());

    let files: Vec<_> = tree(&root.join("app")).into_keys().collect();
    assert_eq!(files, vec!["css/style.css"]);
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn watch_change_runs_the_bound_task_with_its_dependencies() {
    let (_dir, root) = project();
    let log = Log::default();
    let orch = orchestrator(&root, false, &log);

    put(&root, "app/img/stale.png", png(0));
    put(&root, "app/css/keep.css", "a{}");

    let events: Vec<tsumiki::watch::Batch> = vec![Ok(vec![Utf8PathBuf::from("images/a.png")])];
    tsumiki::watch::run(&orch.context(), &tasks::bindings(), events.into_iter());

    let files: Vec<_> = tree(&root.join("app")).into_keys().collect();
    assert_eq!(files, vec!["css/keep.css", "img/a.png", "img/b.png"]);
}
