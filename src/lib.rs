mod pipeline;

pub mod config;
pub mod error;
pub mod huffman;
pub mod model;
pub mod network;
pub mod similarity;
pub mod train;
pub mod vocab;

pub use pipeline::Pipeline;
pub use config::{files_handling, Architecture, LossMode, NeuralNetworkConfig};
pub use error::{Result, Word2VecError};
pub use model::TrainedModel;
pub use similarity::{Match, Searcher, SemanticDifference};
pub use train::{ProgressListener, Stage, Word2VecTrainer};
pub use vocab::{FrequencyTable, Token, TokenCounter, Vocabulary, VocabularyFilter};
