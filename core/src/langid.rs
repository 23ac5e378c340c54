//! Thin wrapper over the pretrained fastText language-identification
//! model. Loaded lazily, at most once per process, behind a mutex
//! (spec.md §4.5 / §9 "Global model singleton").

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use fasttext::FastText;
use parking_lot::Mutex;

static MODEL: OnceLock<Mutex<FastText>> = OnceLock::new();

/// Loads the model on first use, from `model_path`. Subsequent calls
/// with a different path are ignored — the model is process-wide.
fn model(model_path: &Path) -> Result<&'static Mutex<FastText>> {
    if let Some(m) = MODEL.get() {
        return Ok(m);
    }
    let mut ft = FastText::new();
    ft.load_model(
        model_path
            .to_str()
            .context("model path is not valid UTF-8")?,
    )
    .map_err(|e| anyhow::anyhow!("failed to load language identification model: {e}"))?;
    Ok(MODEL.get_or_init(|| Mutex::new(ft)))
}

/// Wraps the singleton fastText classifier: one paragraph in, one
/// `iso639-3_iso15924` tag out (e.g. `kin_Latn`).
#[derive(Clone)]
pub struct LanguageIdentifier {
    model_path: PathBuf,
}

impl LanguageIdentifier {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self { model_path: model_path.into() }
    }

    /// Classifies a single paragraph. No confidence threshold is
    /// applied here; callers decide what to do with low-confidence
    /// predictions.
    pub fn identify(&self, text: &str) -> Result<String> {
        let model = model(&self.model_path)?;
        let predictions = model
            .lock()
            .predict(text, 1, 0.0)
            .map_err(|e| anyhow::anyhow!("language identification failed: {e}"))?;
        let label = predictions
            .first()
            .map(|p| p.label.clone())
            .unwrap_or_default();
        Ok(strip_label_prefix(&label).to_string())
    }
}

fn strip_label_prefix(label: &str) -> &str {
    label.strip_prefix("__label__").unwrap_or(label)
}
