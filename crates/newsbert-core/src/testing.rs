//! Fixtures for tests: a small wordpiece vocabulary and a randomly
//! initialized BERT small enough to run on a CPU in milliseconds.

use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use serde_json::json;

use crate::error::{NewsbertError, Result};
use crate::model::encoder::BertEncoder;

/// Hidden width of [`tiny_bert_config`].
pub const TINY_HIDDEN_SIZE: usize = 8;

/// Vocabulary in id order: markers first, then whole words and suffixes.
pub fn tiny_vocab() -> Vec<&'static str> {
    vec![
        "[PAD]",
        "[UNK]",
        "[CLS]",
        "[SEP]",
        "[MASK]",
        "the",
        "new",
        "phone",
        "launched",
        "today",
        "government",
        "passes",
        "bill",
        "election",
        "results",
        "announced",
        "film",
        "market",
        "shares",
        "news",
        "##s",
        "##ed",
        "##ing",
        ".",
        ",",
    ]
}

/// `config.json` body of a one-layer BERT over [`tiny_vocab`].
pub fn tiny_bert_config() -> String {
    json!({
        "architectures": ["BertForMaskedLM"],
        "model_type": "bert",
        "vocab_size": tiny_vocab().len(),
        "hidden_size": TINY_HIDDEN_SIZE,
        "num_hidden_layers": 1,
        "num_attention_heads": 2,
        "intermediate_size": 16,
        "hidden_act": "gelu",
        "hidden_dropout_prob": 0.1,
        "attention_probs_dropout_prob": 0.1,
        "max_position_embeddings": 128,
        "type_vocab_size": 2,
        "initializer_range": 0.02,
        "layer_norm_eps": 1e-12,
        "pad_token_id": 0,
        "position_embedding_type": "absolute",
        "use_cache": false,
        "classifier_dropout": null
    })
    .to_string()
}

/// Write a complete encoder artifact directory with random weights.
pub fn write_tiny_artifact(dir: &Path) -> Result<()> {
    let write = |name: &str, contents: String| {
        let path = dir.join(name);
        std::fs::write(&path, contents).map_err(|e| NewsbertError::io(path, e))
    };

    std::fs::create_dir_all(dir).map_err(|e| NewsbertError::io(dir, e))?;
    write("config.json", tiny_bert_config())?;
    write("vocab.txt", tiny_vocab().join("\n"))?;
    write("tokenizer_config.json", json!({ "do_lower_case": true }).to_string())?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    BertEncoder::load(vb, &tiny_bert_config(), "bert")?;
    varmap.save(dir.join("model.safetensors"))?;
    Ok(())
}
