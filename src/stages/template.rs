use std::fs;

use camino::Utf8PathBuf;
use minijinja::{Environment, Value, path_loader};
use serde_json::Map;

use crate::config::BuildConfig;
use crate::error::StageError;
use crate::pipeline::{Asset, Transform, map_text};

/// Renders page templates with the shared data document.
///
/// Templates can include or extend any template below `root` by its relative
/// path, e.g. `{% include "components/header.html" %}`. The data document must
/// be a JSON object; a `debug` field set to the inverse of the production flag
/// is added to it before rendering.
pub struct RenderTemplates {
    root: Utf8PathBuf,
    prefix: Utf8PathBuf,
    data: Utf8PathBuf,
}

impl RenderTemplates {
    /// * `root`: directory templates are resolved from.
    /// * `prefix`: location of the rendered pages relative to `root`.
    /// * `data`: the JSON data document.
    pub fn new(
        root: impl Into<Utf8PathBuf>,
        prefix: impl Into<Utf8PathBuf>,
        data: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
            data: data.into(),
        }
    }

    fn load_data(&self, production: bool) -> Result<Value, StageError> {
        let text =
            fs::read_to_string(&self.data).map_err(|e| StageError::config(&self.data, e))?;

        let mut data: Map<String, serde_json::Value> =
            serde_json::from_str(&text).map_err(|e| StageError::config(&self.data, e))?;

        data.insert("debug".into(), serde_json::Value::Bool(!production));

        Ok(Value::from_serialize(&data))
    }
}

impl Transform for RenderTemplates {
    fn name(&self) -> &'static str {
        "templates"
    }

    fn apply(&self, assets: Vec<Asset>, config: &BuildConfig) -> Result<Vec<Asset>, StageError> {
        let data = self.load_data(config.production)?;

        let mut env = Environment::new();
        env.set_loader(path_loader(&self.root));

        let script = config.refresh_script();

        map_text(assets, |path, text| {
            let name = self.prefix.join(path);
            let html = env
                .render_named_str(name.as_str(), text, &data)
                .map_err(|e| StageError::compile("minijinja", &name, format!("{e:#}")))?;

            Ok(match &script {
                Some(script) => inject(html, script),
                None => html,
            })
        })
    }
}

/// Inserts `script` before the closing body tag, or appends it.
fn inject(mut html: String, script: &str) -> String {
    match html.rfind("</body>") {
        Some(index) => html.insert_str(index, script),
        None => html.push_str(script),
    }

    html
}
