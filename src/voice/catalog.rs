//! Voice model discovery.
//!
//! Models live under `<models_dir>/<game>/<prefix>_<voice>.json`, with the
//! weights file beside the metadata at the same path minus `.json`.

use crate::error::{Result, TtsError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// A voice model located on disk. Nothing is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceModel {
    /// Voice name (file stem after the first `_`).
    pub name: String,
    /// Game directory the model belongs to.
    pub game: String,
    /// `<prefix>_<voice>.json`
    pub metadata_path: PathBuf,
    /// Weights path handed to the synthesis server.
    pub weights_path: PathBuf,
}

impl VoiceModel {
    fn from_metadata_path(path: PathBuf) -> Option<Self> {
        let stem = path.file_stem()?.to_str()?;
        let name = voice_name_from_stem(stem).to_string();
        let game = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let weights_path = path.with_extension("");
        Some(Self {
            name,
            game,
            metadata_path: path,
            weights_path,
        })
    }

    /// Read and parse the metadata file.
    pub fn load_metadata(&self) -> Result<ModelMetadata> {
        ModelMetadata::load(&self.metadata_path).map_err(|e| TtsError::ModelLoad {
            voice: self.name.clone(),
            message: e.to_string(),
        })
    }
}

/// `me3_edi` → `edi`; stems without a prefix are used as-is.
fn voice_name_from_stem(stem: &str) -> &str {
    stem.split_once('_').map(|(_, name)| name).unwrap_or(stem)
}

/// Model metadata JSON written next to the weights.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelMetadata {
    #[serde(rename = "modelType", default)]
    pub model_type: Option<String>,
    #[serde(rename = "modelVersion", default)]
    pub model_version: Option<serde_json::Value>,
    #[serde(default)]
    pub games: Vec<GameEntry>,
}

/// Per-game section of the metadata.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GameEntry {
    #[serde(rename = "gameId", default)]
    pub game_id: Option<String>,
    #[serde(rename = "voiceName", default)]
    pub voice_name: Option<String>,
    #[serde(default)]
    pub base_speaker_emb: Vec<f64>,
}

impl ModelMetadata {
    /// Parse a metadata file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parse metadata JSON and check it carries a speaker embedding.
    pub fn from_json(json: &str) -> Result<Self> {
        let metadata: ModelMetadata = serde_json::from_str(json)?;
        if metadata.base_embedding().is_none() {
            return Err(TtsError::Other(
                "metadata has no games[0].base_speaker_emb".to_string(),
            ));
        }
        Ok(metadata)
    }

    /// Base speaker embedding of the first game entry.
    pub fn base_embedding(&self) -> Option<&[f64]> {
        self.games
            .first()
            .map(|g| g.base_speaker_emb.as_slice())
            .filter(|emb| !emb.is_empty())
    }

    /// Embedding in the comma-separated form the server expects.
    pub fn base_embedding_csv(&self) -> String {
        self.base_embedding()
            .unwrap_or_default()
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Discovers voice models under a models directory.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    root: PathBuf,
}

impl ModelCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every model metadata file under the root, sorted by path.
    pub fn models(&self) -> Result<Vec<VoiceModel>> {
        self.glob_models("*.json")
    }

    /// Sorted, de-duplicated voice names. Reads directory entries only.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.models()?.into_iter().map(|m| m.name).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Find the model for `voice`.
    ///
    /// # Errors
    /// Returns `TtsError::VoiceNotFound` when no metadata file matches.
    pub fn locate(&self, voice: &str) -> Result<VoiceModel> {
        let file_pattern = format!("*_{}.json", glob::Pattern::escape(voice));
        self.glob_models(&file_pattern)?
            .into_iter()
            .find(|m| m.name == voice)
            .ok_or_else(|| TtsError::VoiceNotFound {
                voice: voice.to_string(),
            })
    }

    fn glob_models(&self, file_pattern: &str) -> Result<Vec<VoiceModel>> {
        let root = glob::Pattern::escape(&self.root.to_string_lossy());
        let pattern = format!("{}/**/{}", root.trim_end_matches('/'), file_pattern);
        let paths = glob::glob(&pattern).map_err(|e| TtsError::Other(format!(
            "Invalid model search pattern '{}': {}",
            pattern, e
        )))?;

        let mut models: Vec<VoiceModel> = paths
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::debug!("skipping unreadable model path: {e}");
                    None
                }
            })
            .filter_map(VoiceModel::from_metadata_path)
            .collect();
        models.sort_by(|a, b| a.metadata_path.cmp(&b.metadata_path));
        Ok(models)
    }
}
