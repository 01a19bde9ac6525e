//! # BERT Layers
//!
//! Embeddings, self-attention encoder stack and pooler, laid out under the
//! usual checkpoint names (`embeddings.*`, `encoder.layer.N.*`,
//! `pooler.dense`). Every operation is built from differentiable tensor
//! primitives so the whole stack can be fine-tuned.

use candle_core::{D, Module, Tensor};
use candle_nn::{Dropout, Embedding, Init, Linear, VarBuilder};
use serde::Deserialize;

use crate::error::{NewsbertError, Result};

/// Activation of the feed-forward block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HiddenAct {
    /// Exact erf-based GELU.
    Gelu,
    /// Tanh approximation of GELU.
    #[serde(alias = "gelu_approximate", alias = "gelu_pytorch_tanh")]
    GeluNew,
    Relu,
}

impl HiddenAct {
    fn apply(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            HiddenAct::Gelu => xs.gelu_erf(),
            HiddenAct::GeluNew => xs.gelu(),
            HiddenAct::Relu => xs.relu(),
        }
    }
}

fn default_hidden_act() -> HiddenAct {
    HiddenAct::Gelu
}

fn default_dropout() -> f64 {
    0.1
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

fn default_initializer_range() -> f64 {
    0.02
}

/// Architecture fields of a BERT `config.json`; other keys are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BertConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    #[serde(default = "default_hidden_act")]
    pub hidden_act: HiddenAct,
    #[serde(default = "default_dropout")]
    pub hidden_dropout_prob: f64,
    #[serde(default = "default_dropout")]
    pub attention_probs_dropout_prob: f64,
    pub max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    #[serde(default = "default_initializer_range")]
    pub initializer_range: f64,
}

impl BertConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: BertConfig = serde_json::from_str(json)?;
        if config.num_attention_heads == 0 || config.hidden_size % config.num_attention_heads != 0 {
            return Err(NewsbertError::ModelLoad(format!(
                "hidden_size {} is not divisible into {} attention heads",
                config.hidden_size, config.num_attention_heads
            )));
        }
        Ok(config)
    }

    fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }
}

/// Layer normalization over the last dimension.
struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    fn load(size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            weight: vb.get_with_hints(size, "weight", Init::Const(1.0))?,
            bias: vb.get_with_hints(size, "bias", Init::Const(0.0))?,
            eps,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mean = xs.mean_keepdim(D::Minus1)?;
        let centered = xs.broadcast_sub(&mean)?;
        let variance = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normalized = centered.broadcast_div(&(variance + self.eps)?.sqrt()?)?;
        Ok(normalized
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)?)
    }
}

fn linear(in_dim: usize, out_dim: usize, init_std: f64, vb: VarBuilder) -> Result<Linear> {
    let weight = vb.get_with_hints(
        (out_dim, in_dim),
        "weight",
        Init::Randn {
            mean: 0.0,
            stdev: init_std,
        },
    )?;
    let bias = vb.get_with_hints(out_dim, "bias", Init::Const(0.0))?;
    Ok(Linear::new(weight, Some(bias)))
}

fn embedding(count: usize, dim: usize, init_std: f64, vb: VarBuilder) -> Result<Embedding> {
    let weight = vb.get_with_hints(
        (count, dim),
        "weight",
        Init::Randn {
            mean: 0.0,
            stdev: init_std,
        },
    )?;
    Ok(Embedding::new(weight, dim))
}

struct Embeddings {
    word: Embedding,
    position: Embedding,
    token_type: Embedding,
    layer_norm: LayerNorm,
    dropout: Dropout,
}

impl Embeddings {
    fn load(config: &BertConfig, vb: VarBuilder) -> Result<Self> {
        let std = config.initializer_range;
        let h = config.hidden_size;
        Ok(Self {
            word: embedding(config.vocab_size, h, std, vb.pp("word_embeddings"))?,
            position: embedding(config.max_position_embeddings, h, std, vb.pp("position_embeddings"))?,
            token_type: embedding(config.type_vocab_size, h, std, vb.pp("token_type_embeddings"))?,
            layer_norm: LayerNorm::load(h, config.layer_norm_eps, vb.pp("LayerNorm"))?,
            dropout: Dropout::new(config.hidden_dropout_prob as f32),
        })
    }

    fn forward(&self, input_ids: &Tensor, token_type_ids: &Tensor, train: bool) -> Result<Tensor> {
        let (_batch, seq_len) = input_ids.dims2()?;
        let positions = Tensor::arange(0u32, seq_len as u32, input_ids.device())?.unsqueeze(0)?;

        let embedded = self
            .word
            .forward(input_ids)?
            .add(&self.token_type.forward(token_type_ids)?)?
            .broadcast_add(&self.position.forward(&positions)?)?;
        let normalized = self.layer_norm.forward(&embedded)?;
        Ok(self.dropout.forward(&normalized, train)?)
    }
}

struct SelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    layer_norm: LayerNorm,
    attention_dropout: Dropout,
    hidden_dropout: Dropout,
    num_heads: usize,
    head_dim: usize,
}

impl SelfAttention {
    fn load(config: &BertConfig, vb: VarBuilder) -> Result<Self> {
        let h = config.hidden_size;
        let std = config.initializer_range;
        let self_vb = vb.pp("self");
        let output_vb = vb.pp("output");
        Ok(Self {
            query: linear(h, h, std, self_vb.pp("query"))?,
            key: linear(h, h, std, self_vb.pp("key"))?,
            value: linear(h, h, std, self_vb.pp("value"))?,
            output: linear(h, h, std, output_vb.pp("dense"))?,
            layer_norm: LayerNorm::load(h, config.layer_norm_eps, output_vb.pp("LayerNorm"))?,
            attention_dropout: Dropout::new(config.attention_probs_dropout_prob as f32),
            hidden_dropout: Dropout::new(config.hidden_dropout_prob as f32),
            num_heads: config.num_attention_heads,
            head_dim: config.head_dim(),
        })
    }

    /// `[batch, seq, hidden]` to `[batch, heads, seq, head_dim]`.
    fn split_heads(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch, seq, _) = xs.dims3()?;
        Ok(xs
            .reshape((batch, seq, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?)
    }

    fn forward(&self, hidden: &Tensor, mask_bias: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, seq, width) = hidden.dims3()?;
        let q = self.split_heads(&self.query.forward(hidden)?)?;
        let k = self.split_heads(&self.key.forward(hidden)?)?;
        let v = self.split_heads(&self.value.forward(hidden)?)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = q
            .matmul(&k.transpose(2, 3)?.contiguous()?)?
            .affine(scale, 0.0)?
            .broadcast_add(mask_bias)?;
        let probs = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let probs = self.attention_dropout.forward(&probs, train)?;

        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq, width))?;
        let projected = self.output.forward(&context)?;
        let projected = self.hidden_dropout.forward(&projected, train)?;
        self.layer_norm.forward(&(projected + hidden)?)
    }
}

struct EncoderLayer {
    attention: SelfAttention,
    intermediate: Linear,
    output: Linear,
    layer_norm: LayerNorm,
    dropout: Dropout,
    act: HiddenAct,
}

impl EncoderLayer {
    fn load(config: &BertConfig, vb: VarBuilder) -> Result<Self> {
        let std = config.initializer_range;
        Ok(Self {
            attention: SelfAttention::load(config, vb.pp("attention"))?,
            intermediate: linear(
                config.hidden_size,
                config.intermediate_size,
                std,
                vb.pp("intermediate").pp("dense"),
            )?,
            output: linear(
                config.intermediate_size,
                config.hidden_size,
                std,
                vb.pp("output").pp("dense"),
            )?,
            layer_norm: LayerNorm::load(
                config.hidden_size,
                config.layer_norm_eps,
                vb.pp("output").pp("LayerNorm"),
            )?,
            dropout: Dropout::new(config.hidden_dropout_prob as f32),
            act: config.hidden_act,
        })
    }

    fn forward(&self, hidden: &Tensor, mask_bias: &Tensor, train: bool) -> Result<Tensor> {
        let attended = self.attention.forward(hidden, mask_bias, train)?;
        let expanded = self.act.apply(&self.intermediate.forward(&attended)?)?;
        let contracted = self.dropout.forward(&self.output.forward(&expanded)?, train)?;
        self.layer_norm.forward(&(contracted + attended)?)
    }
}

/// Transformer encoder with the `[CLS]` pooler.
pub struct BertModel {
    embeddings: Embeddings,
    layers: Vec<EncoderLayer>,
    pooler: Linear,
    hidden_size: usize,
}

impl BertModel {
    /// Create or bind every variable under `vb`.
    pub fn load(config: &BertConfig, vb: VarBuilder) -> Result<Self> {
        let encoder_vb = vb.pp("encoder").pp("layer");
        let layers = (0..config.num_hidden_layers)
            .map(|i| EncoderLayer::load(config, encoder_vb.pp(i.to_string())))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            embeddings: Embeddings::load(config, vb.pp("embeddings"))?,
            layers,
            pooler: linear(
                config.hidden_size,
                config.hidden_size,
                config.initializer_range,
                vb.pp("pooler").pp("dense"),
            )?,
            hidden_size: config.hidden_size,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Final hidden states, `[batch, seq, hidden]`.
    pub fn sequence_output(
        &self,
        input_ids: &Tensor,
        token_type_ids: &Tensor,
        attention_mask: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let mut hidden = self.embeddings.forward(input_ids, token_type_ids, train)?;

        // 0 for real positions, -10000 for padding, broadcast over heads and queries.
        let (batch, seq) = attention_mask.dims2()?;
        let mask_bias = attention_mask
            .to_dtype(hidden.dtype())?
            .affine(10_000.0, -10_000.0)?
            .reshape((batch, 1, 1, seq))?;

        for layer in &self.layers {
            hidden = layer.forward(&hidden, &mask_bias, train)?;
        }
        Ok(hidden)
    }

    /// `tanh(dense(h[CLS]))`, `[batch, hidden]`.
    pub fn pool(&self, sequence_output: &Tensor) -> Result<Tensor> {
        let first = sequence_output.narrow(1, 0, 1)?.squeeze(1)?;
        Ok(self.pooler.forward(&first)?.tanh()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TINY_HIDDEN_SIZE, tiny_bert_config};
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn model(varmap: &VarMap) -> BertModel {
        let config = BertConfig::from_json(&tiny_bert_config()).unwrap();
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        BertModel::load(&config, vb).unwrap()
    }

    fn inputs(mask: &[[u32; 5]; 2]) -> (Tensor, Tensor, Tensor) {
        let device = Device::Cpu;
        let ids = Tensor::new(&[[2u32, 6, 7, 3, 0], [2, 13, 14, 15, 3]], &device).unwrap();
        let types = ids.zeros_like().unwrap();
        let mask = Tensor::new(mask, &device).unwrap();
        (ids, types, mask)
    }

    #[test]
    fn parses_config_with_defaults() {
        let config = BertConfig::from_json(
            r#"{"vocab_size": 10, "hidden_size": 4, "num_hidden_layers": 1,
                "num_attention_heads": 2, "intermediate_size": 8,
                "max_position_embeddings": 16, "model_type": "bert"}"#,
        )
        .unwrap();
        assert_eq!(config.hidden_act, HiddenAct::Gelu);
        assert_eq!(config.type_vocab_size, 2);
        assert_eq!(config.layer_norm_eps, 1e-12);
    }

    #[test]
    fn rejects_indivisible_heads() {
        let err = BertConfig::from_json(
            r#"{"vocab_size": 10, "hidden_size": 5, "num_hidden_layers": 1,
                "num_attention_heads": 2, "intermediate_size": 8,
                "max_position_embeddings": 16}"#,
        );
        assert!(matches!(err, Err(NewsbertError::ModelLoad(_))));
    }

    #[test]
    fn variable_names_follow_checkpoint_layout() {
        let varmap = VarMap::new();
        model(&varmap);
        let vars = varmap.data().lock().unwrap();
        for name in [
            "embeddings.word_embeddings.weight",
            "embeddings.LayerNorm.weight",
            "encoder.layer.0.attention.self.query.weight",
            "encoder.layer.0.attention.output.LayerNorm.bias",
            "encoder.layer.0.intermediate.dense.weight",
            "encoder.layer.0.output.dense.bias",
            "pooler.dense.weight",
        ] {
            assert!(vars.contains_key(name), "missing {name}");
        }
    }

    #[test]
    fn shapes_and_padding_invariance() {
        let varmap = VarMap::new();
        let bert = model(&varmap);
        let (ids, types, mask) = inputs(&[[1, 1, 1, 1, 0], [1, 1, 1, 1, 1]]);

        let sequence = bert.sequence_output(&ids, &types, &mask, false).unwrap();
        assert_eq!(sequence.dims(), &[2, 5, TINY_HIDDEN_SIZE]);
        let pooled = bert.pool(&sequence).unwrap();
        assert_eq!(pooled.dims(), &[2, TINY_HIDDEN_SIZE]);

        // Changing a masked-out id must not change the pooled output.
        let altered = Tensor::new(&[[2u32, 6, 7, 3, 9], [2, 13, 14, 15, 3]], &Device::Cpu).unwrap();
        let pooled_altered = bert
            .pool(&bert.sequence_output(&altered, &types, &mask, false).unwrap())
            .unwrap();
        let a: Vec<f32> = pooled.get(0).unwrap().to_vec1().unwrap();
        let b: Vec<f32> = pooled_altered.get(0).unwrap().to_vec1().unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-4);
        }
    }

    #[test]
    fn gradients_reach_the_embeddings() {
        let varmap = VarMap::new();
        let bert = model(&varmap);
        let (ids, types, mask) = inputs(&[[1, 1, 1, 1, 0], [1, 1, 1, 1, 1]]);

        let pooled = bert
            .pool(&bert.sequence_output(&ids, &types, &mask, true).unwrap())
            .unwrap();
        let grads = pooled.sqr().unwrap().sum_all().unwrap().backward().unwrap();

        let vars = varmap.data().lock().unwrap();
        for name in [
            "embeddings.word_embeddings.weight",
            "embeddings.LayerNorm.weight",
            "encoder.layer.0.attention.self.key.weight",
        ] {
            assert!(grads.get(vars[name].as_tensor()).is_some(), "no gradient for {name}");
        }
    }

    #[test]
    fn layer_norm_normalizes_last_dim() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let norm = LayerNorm::load(4, 1e-12, vb).unwrap();

        let xs = Tensor::new(&[[1f32, 2.0, 3.0, 4.0]], &device).unwrap();
        let ys: Vec<f32> = norm.forward(&xs).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        let mean: f32 = ys.iter().sum::<f32>() / 4.0;
        let var: f32 = ys.iter().map(|y| (y - mean).powi(2)).sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-5);
        assert!((var - 1.0).abs() < 1e-4);
    }
}
