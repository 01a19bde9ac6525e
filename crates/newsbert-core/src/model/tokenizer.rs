//! # Wordpiece Tokenization
//!
//! Subword tokenization is delegated to the `tokenizers` crate. This module
//! only binds it to the vocabulary and casing policy shipped with the
//! pretrained encoder.

use std::path::Path;
use std::str::FromStr;

use serde_json::{Map, Value, json};
use tokenizers::Tokenizer as HfTokenizer;

use crate::error::{NewsbertError, Result};

/// Ids of the boundary and padding markers the feature encoder inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokens {
    pub cls: u32,
    pub sep: u32,
    pub pad: u32,
}

/// Text to vocabulary ids, without boundary markers.
pub trait Tokenize {
    /// Subword ids of `text` in order.
    fn tokenize(&self, text: &str) -> Result<Vec<u32>>;

    /// Subword strings of `text`, parallel to [`Tokenize::tokenize`].
    fn tokens(&self, text: &str) -> Result<Vec<String>>;

    /// Marker ids of the bound vocabulary.
    fn special_tokens(&self) -> SpecialTokens;
}

/// BERT wordpiece tokenizer over a fixed vocabulary.
pub struct WordpieceTokenizer {
    inner: HfTokenizer,
    special: SpecialTokens,
    do_lower_case: bool,
}

impl WordpieceTokenizer {
    /// Build from a `vocab.txt` file (one token per line, line number = id).
    pub fn from_vocab_file<P: AsRef<Path>>(path: P, do_lower_case: bool) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| NewsbertError::io(path, e))?;
        let tokens: Vec<&str> = contents.lines().map(|l| l.trim_end_matches('\r')).collect();
        Self::from_vocab(&tokens, do_lower_case)
    }

    /// Build from an in-memory vocabulary in id order.
    pub fn from_vocab<S: AsRef<str>>(tokens: &[S], do_lower_case: bool) -> Result<Self> {
        let mut vocab = Map::new();
        for (id, token) in tokens.iter().enumerate() {
            vocab.insert(token.as_ref().to_string(), Value::from(id as u64));
        }

        let definition = json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": {
                "type": "BertNormalizer",
                "clean_text": true,
                "handle_chinese_chars": true,
                "strip_accents": null,
                "lowercase": do_lower_case
            },
            "pre_tokenizer": { "type": "BertPreTokenizer" },
            "post_processor": null,
            "decoder": {
                "type": "WordPiece",
                "prefix": "##",
                "cleanup": true
            },
            "model": {
                "type": "WordPiece",
                "unk_token": "[UNK]",
                "continuing_subword_prefix": "##",
                "max_input_chars_per_word": 100,
                "vocab": vocab
            }
        });

        let inner = HfTokenizer::from_str(&definition.to_string())
            .map_err(|e| NewsbertError::Tokenizer(e.to_string()))?;
        let special = lookup_special_tokens(&inner)?;

        Ok(Self {
            inner,
            special,
            do_lower_case,
        })
    }

    /// Whether input text is lowercased before wordpiece lookup.
    pub fn do_lower_case(&self) -> bool {
        self.do_lower_case
    }

    /// Number of vocabulary entries.
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(false)
    }
}

impl Tokenize for WordpieceTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| NewsbertError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn tokens(&self, text: &str) -> Result<Vec<String>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| NewsbertError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_tokens().to_vec())
    }

    fn special_tokens(&self) -> SpecialTokens {
        self.special
    }
}

fn lookup_special_tokens(tokenizer: &HfTokenizer) -> Result<SpecialTokens> {
    let required = |token: &str| {
        tokenizer
            .token_to_id(token)
            .ok_or_else(|| NewsbertError::Tokenizer(format!("vocabulary lacks {token}")))
    };

    Ok(SpecialTokens {
        cls: required("[CLS]")?,
        sep: required("[SEP]")?,
        pad: tokenizer.token_to_id("[PAD]").unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::tiny_vocab;

    #[test]
    fn lowercases_and_splits_wordpieces() {
        let tokenizer = WordpieceTokenizer::from_vocab(&tiny_vocab(), true).unwrap();
        let tokens = tokenizer.tokens("Government passes NEW bills").unwrap();
        assert_eq!(tokens, ["government", "passes", "new", "bill", "##s"]);
    }

    #[test]
    fn unknown_words_map_to_unk() {
        let tokenizer = WordpieceTokenizer::from_vocab(&tiny_vocab(), true).unwrap();
        let ids = tokenizer.tokenize("zzzq").unwrap();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn special_token_ids() {
        let tokenizer = WordpieceTokenizer::from_vocab(&tiny_vocab(), true).unwrap();
        assert_eq!(
            tokenizer.special_tokens(),
            SpecialTokens {
                cls: 2,
                sep: 3,
                pad: 0
            }
        );
        assert_eq!(tokenizer.vocab_size(), tiny_vocab().len());
    }

    #[test]
    fn vocab_without_markers_is_rejected() {
        let err = WordpieceTokenizer::from_vocab(&["[PAD]", "[UNK]", "hello"], true);
        assert!(matches!(err, Err(NewsbertError::Tokenizer(_))));
    }

    #[test]
    fn loads_vocab_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.txt");
        std::fs::write(&path, tiny_vocab().join("\n")).unwrap();

        let tokenizer = WordpieceTokenizer::from_vocab_file(&path, true).unwrap();
        assert!(tokenizer.do_lower_case());
        assert_eq!(tokenizer.tokenize("phone").unwrap().len(), 1);
    }
}
