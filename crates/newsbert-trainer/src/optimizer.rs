//! # BERT-style AdamW
//!
//! Decoupled weight decay for every variable except biases and LayerNorm
//! parameters, with the gradients clipped to a global norm before each
//! update. The learning rate is set by the caller every step.

use anyhow::{Result, anyhow};
use candle_core::backprop::GradStore;
use candle_core::{DType, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use newsbert_core::TrainingConfig;
use tracing::debug;

/// Variables whose name matches any of these are never decayed.
const NO_DECAY_PATTERNS: [&str; 3] = ["LayerNorm", "layer_norm", "bias"];

pub fn excluded_from_decay(name: &str) -> bool {
    NO_DECAY_PATTERNS.iter().any(|p| name.contains(p))
}

pub struct BertAdamW {
    decay: AdamW,
    no_decay: AdamW,
    vars: Vec<Var>,
    clip_norm: f64,
}

impl BertAdamW {
    /// Split the variables of `varmap` into the two decay groups.
    pub fn new(varmap: &VarMap, config: &TrainingConfig) -> Result<Self> {
        let mut named: Vec<(String, Var)> = varmap
            .data()
            .lock()
            .map_err(|_| anyhow!("variable map lock poisoned"))?
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));

        let (plain, decayed): (Vec<_>, Vec<_>) =
            named.iter().partition(|(name, _)| excluded_from_decay(name));
        debug!(
            "AdamW groups: {} decayed, {} without decay",
            decayed.len(),
            plain.len()
        );

        let params = |weight_decay: f64| ParamsAdamW {
            lr: config.learning_rate,
            beta1: config.adam_beta1,
            beta2: config.adam_beta2,
            eps: config.adam_epsilon,
            weight_decay,
        };
        let vars_of = |group: &[&(String, Var)]| -> Vec<Var> {
            group.iter().map(|(_, v)| v.clone()).collect()
        };

        Ok(Self {
            decay: AdamW::new(vars_of(&decayed), params(config.weight_decay))?,
            no_decay: AdamW::new(vars_of(&plain), params(0.0))?,
            vars: named.into_iter().map(|(_, v)| v).collect(),
            clip_norm: config.clip_norm,
        })
    }

    /// Backpropagate `loss`, clip, and update every variable at `lr`.
    /// Returns the gradient norm before clipping.
    pub fn backward_step(&mut self, loss: &Tensor, lr: f64) -> Result<f64> {
        let mut grads = loss.backward()?;
        let norm = clip_by_global_norm(&mut grads, &self.vars, self.clip_norm)?;

        self.decay.set_learning_rate(lr);
        self.no_decay.set_learning_rate(lr);
        self.decay.step(&grads)?;
        self.no_decay.step(&grads)?;
        Ok(norm)
    }
}

/// Scale all gradients by `max_norm / max(norm, max_norm)`.
pub fn clip_by_global_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> Result<f64> {
    let mut total = 0f64;
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            total += grad
                .sqr()?
                .sum_all()?
                .to_dtype(DType::F64)?
                .to_scalar::<f64>()?;
        }
    }
    let norm = total.sqrt();

    if max_norm > 0.0 && norm > max_norm {
        let scale = max_norm / norm;
        for var in vars {
            if let Some(grad) = grads.get(var.as_tensor()) {
                let clipped = grad.affine(scale, 0.0)?;
                grads.insert(var.as_tensor(), clipped);
            }
        }
    }
    Ok(norm)
}
