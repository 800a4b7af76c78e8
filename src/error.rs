//! Error type shared by the vocabulary, training, search and file layers.

use std::io;

use crate::vocab::Token;

/// Everything that can go wrong between counting a corpus and answering a query.
#[derive(Debug, thiserror::Error)]
pub enum Word2VecError {
    /// Token absent from the trained vocabulary.
    #[error("unknown search token '{0}'")]
    UnknownToken(Token),

    /// Nothing survived frequency filtering.
    #[error("vocabulary is empty after filtering with min_frequency={min_frequency}")]
    EmptyVocabulary { min_frequency: u64 },

    /// The network was handed a vocabulary with no rows to train.
    #[error("cannot train a network over an empty vocabulary")]
    NothingToTrain,

    /// A model lists the same token at two positions.
    #[error("token {0} appears more than once in the model vocabulary")]
    DuplicateToken(Token),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The cancellation flag was raised while workers were running.
    #[error("training was interrupted")]
    InterruptedTraining,

    /// A forward pass produced NaN or an infinity.
    #[error("non-finite activation in epoch {epoch} while training token {token}")]
    NumericCorruption { epoch: usize, token: Token },

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("could not build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("npy error: {0}")]
    Npy(#[from] ndarray_npy::WriteNpyError),

    #[error("parse error on line {line}: {msg}")]
    Parse { line: usize, msg: String },
}

pub type Result<T> = std::result::Result<T, Word2VecError>;
