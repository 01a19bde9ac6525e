//! # Pretrained Text Encoder
//!
//! BERT plus the pooler that summarizes a sequence by its `[CLS]`
//! position. The pooled vector is the classifier's only input.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use tracing::{debug, info};

use crate::error::{NewsbertError, Result};
use crate::features::FeatureBatch;
use crate::model::bert::{BertConfig, BertModel};
use crate::model::classifier::HEAD_VARIABLES;

/// Maps a batch of features to one pooled vector per example.
pub trait TextEncoder {
    /// Width of the pooled representation.
    fn hidden_size(&self) -> usize;

    /// Pooled representation, `[batch, hidden_size]`. Internal dropout is
    /// active only when `train` is set.
    fn pooled_output(&self, batch: &FeatureBatch, train: bool) -> Result<Tensor>;
}

/// BERT encoder with a tanh pooler over the first position.
pub struct BertEncoder {
    bert: BertModel,
}

impl BertEncoder {
    /// Build the encoder variables under `prefix` from a `config.json` body.
    pub fn load(vb: VarBuilder, config_json: &str, prefix: &str) -> Result<Self> {
        let config = BertConfig::from_json(config_json)?;
        let vb = if prefix.is_empty() { vb } else { vb.pp(prefix) };
        Ok(Self {
            bert: BertModel::load(&config, vb)?,
        })
    }
}

impl TextEncoder for BertEncoder {
    fn hidden_size(&self) -> usize {
        self.bert.hidden_size()
    }

    fn pooled_output(&self, batch: &FeatureBatch, train: bool) -> Result<Tensor> {
        let sequence = self.bert.sequence_output(
            &batch.input_ids,
            &batch.segment_ids,
            &batch.input_mask,
            train,
        )?;
        self.bert.pool(&sequence)
    }
}

/// Candidate checkpoint names for a variable: the name itself, legacy
/// `gamma`/`beta` LayerNorm names, and both with the prefix dropped.
fn candidate_names(name: &str, prefix: &str) -> Vec<String> {
    let mut bases = vec![name.to_string()];
    if !prefix.is_empty() {
        if let Some(stripped) = name.strip_prefix(&format!("{prefix}.")) {
            bases.push(stripped.to_string());
        }
    }

    let mut names = Vec::with_capacity(bases.len() * 2);
    for base in bases {
        if let Some(stem) = base.strip_suffix("LayerNorm.weight") {
            names.push(format!("{stem}LayerNorm.gamma"));
        } else if let Some(stem) = base.strip_suffix("LayerNorm.bias") {
            names.push(format!("{stem}LayerNorm.beta"));
        }
        names.push(base);
    }
    names
}

fn is_encoder_variable(name: &str, prefix: &str) -> bool {
    if HEAD_VARIABLES.contains(&name) {
        return false;
    }
    prefix.is_empty() || name.starts_with(&format!("{prefix}."))
}

/// Overwrite the encoder variables of `varmap` with pretrained values.
///
/// Every encoder variable must be present in the weights file; head
/// variables keep their initialization. Returns the number of tensors copied.
pub fn load_pretrained_weights<P: AsRef<Path>>(
    varmap: &VarMap,
    weights_file: P,
    prefix: &str,
    device: &Device,
) -> Result<usize> {
    let path = weights_file.as_ref();
    let pretrained: HashMap<String, Tensor> = candle_core::safetensors::load(path, device)?;

    let vars = varmap
        .data()
        .lock()
        .map_err(|_| NewsbertError::ModelLoad("variable map lock poisoned".into()))?;

    let mut missing = Vec::new();
    let mut copied = 0usize;
    for (name, var) in vars.iter() {
        if !is_encoder_variable(name, prefix) {
            continue;
        }
        let found = candidate_names(name, prefix)
            .iter()
            .find_map(|candidate| pretrained.get(candidate));
        match found {
            Some(tensor) => {
                var.set(&tensor.to_dtype(var.dtype())?)?;
                copied += 1;
            }
            None => missing.push(name.clone()),
        }
    }

    if !missing.is_empty() {
        missing.sort();
        return Err(NewsbertError::ModelLoad(format!(
            "{} encoder tensors missing from {}: {}",
            missing.len(),
            path.display(),
            missing.join(", ")
        )));
    }

    debug!("Pretrained file holds {} tensors", pretrained.len());
    info!("Loaded {} pretrained tensors from {}", copied, path.display());
    Ok(copied)
}
