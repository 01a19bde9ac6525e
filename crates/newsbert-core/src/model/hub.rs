//! # Pretrained Model Artifacts
//!
//! Resolves a [`ModelSource`] to the files of a BERT checkpoint: the
//! architecture config, the wordpiece vocabulary with its casing flag, and
//! the safetensors weights.

use std::path::{Path, PathBuf};

use hf_hub::api::tokio::{ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::{ModelLocation, ModelSource};
use crate::error::{NewsbertError, Result};
use crate::model::tokenizer::WordpieceTokenizer;

const CONFIG_FILE: &str = "config.json";
const VOCAB_FILE: &str = "vocab.txt";
const WEIGHTS_FILE: &str = "model.safetensors";
const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";

/// Vocabulary and casing policy bundled with the encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizationInfo {
    pub vocab_file: PathBuf,
    pub do_lower_case: bool,
}

/// Local paths of a resolved encoder artifact.
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub config_file: PathBuf,
    pub vocab_file: PathBuf,
    pub weights_file: PathBuf,
    pub tokenizer_config_file: Option<PathBuf>,
    /// Parameter-name prefix of the encoder weights.
    pub weight_prefix: String,
}

#[derive(Deserialize)]
struct RawTokenizerConfig {
    do_lower_case: Option<bool>,
}

impl ModelArtifact {
    /// Resolve `source`, downloading from the hub when needed.
    pub async fn resolve(source: &ModelSource) -> Result<Self> {
        let mut artifact = match &source.location {
            ModelLocation::Local { dir } => Self::from_dir(dir)?,
            ModelLocation::Hub { repo, revision } => {
                Self::download(hub_repo(repo, revision), &source.describe()).await?
            }
        };
        artifact.weight_prefix = source.weight_prefix.clone();
        info!("Pretrained encoder: {}", source.describe());
        Ok(artifact)
    }

    /// Use an artifact already present in `dir`.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let required = |name: &str| {
            let path = dir.join(name);
            if path.is_file() {
                Ok(path)
            } else {
                Err(NewsbertError::ModelLoad(format!(
                    "{name} not found in {}",
                    dir.display()
                )))
            }
        };

        let tokenizer_config = dir.join(TOKENIZER_CONFIG_FILE);
        Ok(Self {
            config_file: required(CONFIG_FILE)?,
            vocab_file: required(VOCAB_FILE)?,
            weights_file: required(WEIGHTS_FILE)?,
            tokenizer_config_file: tokenizer_config.is_file().then_some(tokenizer_config),
            weight_prefix: "bert".to_string(),
        })
    }

    async fn download(repo: Repo, locator: &str) -> Result<Self> {
        let api = ApiBuilder::new()
            .with_progress(false)
            .build()
            .map_err(|e| NewsbertError::Download(format!("failed to initialize hub API: {e}")))?;
        let api = api.repo(repo);

        let config_file = fetch(&api, CONFIG_FILE, locator).await?;
        let vocab_file = fetch(&api, VOCAB_FILE, locator).await?;
        let weights_file = fetch(&api, WEIGHTS_FILE, locator).await?;
        let tokenizer_config_file = match fetch(&api, TOKENIZER_CONFIG_FILE, locator).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("{e}; assuming an uncased vocabulary");
                None
            }
        };

        Ok(Self {
            config_file,
            vocab_file,
            weights_file,
            tokenizer_config_file,
            weight_prefix: "bert".to_string(),
        })
    }

    /// Vocabulary file and lowercase flag of the artifact.
    pub fn tokenization_info(&self) -> Result<TokenizationInfo> {
        let do_lower_case = match &self.tokenizer_config_file {
            Some(path) => {
                let contents =
                    std::fs::read_to_string(path).map_err(|e| NewsbertError::io(path, e))?;
                let raw: RawTokenizerConfig = serde_json::from_str(&contents)?;
                raw.do_lower_case.unwrap_or(true)
            }
            None => true,
        };

        Ok(TokenizationInfo {
            vocab_file: self.vocab_file.clone(),
            do_lower_case,
        })
    }

    /// Wordpiece tokenizer bound to the artifact's vocabulary.
    pub fn tokenizer(&self) -> Result<WordpieceTokenizer> {
        let info = self.tokenization_info()?;
        WordpieceTokenizer::from_vocab_file(&info.vocab_file, info.do_lower_case)
    }

    /// Raw architecture config.
    pub fn config_json(&self) -> Result<String> {
        std::fs::read_to_string(&self.config_file).map_err(|e| NewsbertError::io(&self.config_file, e))
    }
}

/// Model repository pinned at `revision`.
fn hub_repo(repo: &str, revision: &str) -> Repo {
    Repo::with_revision(repo.to_string(), RepoType::Model, revision.to_string())
}

async fn fetch(api: &ApiRepo, name: &str, locator: &str) -> Result<PathBuf> {
    api.get(name).await.map_err(|e| {
        NewsbertError::Download(format!("failed to download '{name}' from '{locator}': {e}"))
    })
}
