//! # Feature Encoding
//!
//! Turns [`LabeledExample`]s into the fixed-length id / mask / segment
//! triples a BERT encoder consumes, and stacks them into tensors.

use candle_core::{Device, Tensor};
use tracing::debug;

use crate::data::LabeledExample;
use crate::error::{NewsbertError, Result};
use crate::labels::NewsCategory;
use crate::model::tokenizer::Tokenize;

/// Fixed-shape encoding of one example.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFeature {
    /// `[CLS] wordpieces [SEP]` followed by padding ids.
    pub input_ids: Vec<u32>,
    /// 1 for real tokens, 0 for padding.
    pub input_mask: Vec<u32>,
    /// Single-segment task: all zeros.
    pub segment_ids: Vec<u32>,
    pub label_id: u32,
}

impl EncodedFeature {
    /// Sequence length shared by the three parallel vectors.
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Number of real (unpadded) positions.
    pub fn num_real_tokens(&self) -> usize {
        self.input_mask.iter().filter(|&&m| m == 1).count()
    }
}

/// Encodes examples against a bound tokenizer and fixed sequence length.
pub struct FeatureEncoder<'a, T: Tokenize> {
    tokenizer: &'a T,
    max_seq_length: usize,
}

impl<'a, T: Tokenize> FeatureEncoder<'a, T> {
    pub fn new(tokenizer: &'a T, max_seq_length: usize) -> Self {
        Self {
            tokenizer,
            max_seq_length,
        }
    }

    pub fn max_seq_length(&self) -> usize {
        self.max_seq_length
    }

    /// Encode a single example.
    pub fn encode(&self, example: &LabeledExample) -> Result<EncodedFeature> {
        if self.max_seq_length < 3 {
            return Err(NewsbertError::InvalidConfig(format!(
                "max_seq_length {} leaves no room for text",
                self.max_seq_length
            )));
        }
        if NewsCategory::from_index(example.label).is_none() {
            return Err(NewsbertError::LabelOutOfRange {
                label: example.label as i64,
            });
        }

        let special = self.tokenizer.special_tokens();
        let mut wordpieces = self.tokenizer.tokenize(&example.text_a)?;
        // Two positions are reserved for [CLS] and [SEP].
        wordpieces.truncate(self.max_seq_length - 2);

        let mut input_ids = Vec::with_capacity(self.max_seq_length);
        input_ids.push(special.cls);
        input_ids.extend_from_slice(&wordpieces);
        input_ids.push(special.sep);

        let real = input_ids.len();
        let mut input_mask = vec![1u32; real];

        input_ids.resize(self.max_seq_length, special.pad);
        input_mask.resize(self.max_seq_length, 0);
        let segment_ids = vec![0u32; self.max_seq_length];

        Ok(EncodedFeature {
            input_ids,
            input_mask,
            segment_ids,
            label_id: example.label as u32,
        })
    }

    /// Encode every example, preserving order.
    pub fn encode_all(&self, examples: &[LabeledExample]) -> Result<Vec<EncodedFeature>> {
        let features = examples
            .iter()
            .map(|example| self.encode(example))
            .collect::<Result<Vec<_>>>()?;

        if let (Some(example), Some(feature)) = (examples.first(), features.first()) {
            if tracing::enabled!(tracing::Level::DEBUG) {
                debug!("First feature: {}", self.describe(example, feature)?);
            }
        }
        Ok(features)
    }

    /// Sentence, wordpieces and encoded vectors of one example, for logs.
    pub fn describe(&self, example: &LabeledExample, feature: &EncodedFeature) -> Result<String> {
        let mut tokens = vec!["[CLS]".to_string()];
        let mut wordpieces = self.tokenizer.tokens(&example.text_a)?;
        wordpieces.truncate(self.max_seq_length.saturating_sub(2));
        tokens.extend(wordpieces);
        tokens.push("[SEP]".to_string());

        Ok(format!(
            "guid={} text={:?} tokens={} input_ids={:?} input_mask={:?} segment_ids={:?} label={}",
            example.guid.as_deref().unwrap_or("-"),
            example.text_a,
            tokens.join(" "),
            feature.input_ids,
            feature.input_mask,
            feature.segment_ids,
            feature.label_id
        ))
    }
}

/// A batch of features as `[batch, seq]` u32 tensors plus `[batch]` labels.
#[derive(Debug, Clone)]
pub struct FeatureBatch {
    pub input_ids: Tensor,
    pub input_mask: Tensor,
    pub segment_ids: Tensor,
    pub label_ids: Tensor,
}

impl FeatureBatch {
    /// Stack features of exactly `seq_length` positions onto `device`.
    pub fn stack(features: &[&EncodedFeature], seq_length: usize, device: &Device) -> Result<Self> {
        let batch = features.len();
        let mut ids = Vec::with_capacity(batch * seq_length);
        let mut mask = Vec::with_capacity(batch * seq_length);
        let mut segments = Vec::with_capacity(batch * seq_length);
        let mut labels = Vec::with_capacity(batch);

        for feature in features {
            for len in [
                feature.input_ids.len(),
                feature.input_mask.len(),
                feature.segment_ids.len(),
            ] {
                if len != seq_length {
                    return Err(NewsbertError::ShapeMismatch {
                        expected: seq_length,
                        actual: len,
                    });
                }
            }
            ids.extend_from_slice(&feature.input_ids);
            mask.extend_from_slice(&feature.input_mask);
            segments.extend_from_slice(&feature.segment_ids);
            labels.push(feature.label_id);
        }

        Ok(Self {
            input_ids: Tensor::from_vec(ids, (batch, seq_length), device)?,
            input_mask: Tensor::from_vec(mask, (batch, seq_length), device)?,
            segment_ids: Tensor::from_vec(segments, (batch, seq_length), device)?,
            label_ids: Tensor::from_vec(labels, batch, device)?,
        })
    }

    /// Number of examples in the batch.
    pub fn len(&self) -> usize {
        self.label_ids.dims().first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
