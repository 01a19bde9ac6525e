pub mod bert;
pub mod classifier;
pub mod encoder;
pub mod hub;
pub mod tokenizer;

pub use bert::{BertConfig, BertModel, HiddenAct};
pub use classifier::{Classifier, HEAD_VARIABLES, Mode, ModelOutput, argmax};
pub use encoder::{BertEncoder, TextEncoder, load_pretrained_weights};
pub use hub::{ModelArtifact, TokenizationInfo};
pub use tokenizer::{SpecialTokens, Tokenize, WordpieceTokenizer};
