//! # Classification Head
//!
//! A dropout + affine layer over the pooled encoder output, producing
//! per-class log-probabilities and, when labels are known, the mean
//! cross-entropy against one-hot targets.

use candle_core::{D, DType, Tensor};
use candle_nn::{Dropout, Init, Linear, Module, VarBuilder};

use crate::error::Result;
use crate::features::FeatureBatch;
use crate::model::encoder::TextEncoder;

/// Names of the trainable head variables in the variable map.
pub const HEAD_VARIABLES: [&str; 2] = ["output_weights", "output_bias"];

/// Which of the three estimator modes a forward pass serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Dropout active, loss computed.
    Train,
    /// No dropout, loss computed.
    Eval,
    /// No dropout, labels ignored.
    Predict,
}

impl Mode {
    pub fn is_training(&self) -> bool {
        matches!(self, Mode::Train)
    }

    pub fn computes_loss(&self) -> bool {
        !matches!(self, Mode::Predict)
    }
}

/// Result of one forward pass.
#[derive(Debug)]
pub struct ModelOutput {
    /// `[batch, num_labels]` log-probabilities.
    pub log_probs: Tensor,
    /// Scalar mean loss; absent in [`Mode::Predict`].
    pub loss: Option<Tensor>,
}

impl ModelOutput {
    /// Host-side copy of the log-probabilities, one row per example.
    pub fn log_prob_rows(&self) -> Result<Vec<Vec<f32>>> {
        Ok(self.log_probs.to_dtype(DType::F32)?.to_vec2::<f32>()?)
    }

    /// Predicted label id per example.
    pub fn predicted_labels(&self) -> Result<Vec<usize>> {
        Ok(self.log_prob_rows()?.iter().map(|row| argmax(row)).collect())
    }

    /// Loss as a plain number, if computed.
    pub fn loss_value(&self) -> Result<Option<f32>> {
        match &self.loss {
            Some(loss) => Ok(Some(loss.to_dtype(DType::F32)?.to_scalar::<f32>()?)),
            None => Ok(None),
        }
    }
}

/// Index of the largest value; ties resolve to the lowest index.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0usize;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// Pretrained encoder fine-tuned jointly with a linear head.
pub struct Classifier<E: TextEncoder> {
    encoder: E,
    head: Linear,
    dropout: Dropout,
    num_labels: usize,
}

impl<E: TextEncoder> Classifier<E> {
    /// Create the head variables (`output_weights` ~ N(0, 0.02),
    /// `output_bias` = 0) on top of `encoder`.
    pub fn new(encoder: E, vb: VarBuilder, num_labels: usize, dropout_keep_prob: f64) -> Result<Self> {
        let hidden = encoder.hidden_size();
        let weights = vb.get_with_hints(
            (num_labels, hidden),
            HEAD_VARIABLES[0],
            Init::Randn {
                mean: 0.0,
                stdev: 0.02,
            },
        )?;
        let bias = vb.get_with_hints(num_labels, HEAD_VARIABLES[1], Init::Const(0.0))?;

        Ok(Self {
            encoder,
            head: Linear::new(weights, Some(bias)),
            dropout: Dropout::new((1.0 - dropout_keep_prob) as f32),
            num_labels,
        })
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Forward pass for `mode`.
    pub fn forward(&self, batch: &FeatureBatch, mode: Mode) -> Result<ModelOutput> {
        let pooled = self.encoder.pooled_output(batch, mode.is_training())?;
        let pooled = self.dropout.forward(&pooled, mode.is_training())?;

        let logits = self.head.forward(&pooled)?;
        let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;

        let loss = if mode.computes_loss() {
            let one_hot = candle_nn::encoding::one_hot(
                batch.label_ids.clone(),
                self.num_labels,
                1f32,
                0f32,
            )?
            .to_dtype(log_probs.dtype())?;
            let per_example = (one_hot * &log_probs)?.sum(D::Minus1)?.neg()?;
            Some(per_example.mean_all()?)
        } else {
            None
        };

        Ok(ModelOutput { log_probs, loss })
    }
}
