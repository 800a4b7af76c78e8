use std::collections::HashSet;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Result, Word2VecError};
use crate::vocab::Token;

/// Output of training: vocabulary ordering, dimensionality and one flat row-major
/// buffer where row `i` is the vector of `vocabulary[i]`.
///
/// Never mutated once built, so it can be shared between any number of readers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawModel")]
pub struct TrainedModel {
    vocabulary: Vec<Token>,
    layer_size: usize,
    vectors: Vec<f32>,
}

// serde shape before the length check
#[derive(Deserialize)]
struct RawModel {
    vocabulary: Vec<Token>,
    layer_size: usize,
    vectors: Vec<f32>,
}

impl TryFrom<RawModel> for TrainedModel {
    type Error = Word2VecError;

    fn try_from(raw: RawModel) -> Result<Self> {
        TrainedModel::new(raw.vocabulary, raw.layer_size, raw.vectors)
    }
}

impl TrainedModel {

    pub fn new(vocabulary: Vec<Token>, layer_size: usize, vectors: Vec<f32>) -> Result<TrainedModel> {
        let expected = vocabulary.len() * layer_size;
        if vectors.len() != expected {
            return Err(Word2VecError::DimensionMismatch { expected, got: vectors.len() });
        }
        // every token owns exactly one row
        let mut seen: HashSet<Token> = HashSet::with_capacity(vocabulary.len());
        if let Some(t) = vocabulary.iter().find(|t| !seen.insert(**t)) {
            return Err(Word2VecError::DuplicateToken(*t));
        }
        Ok(Self { vocabulary, layer_size, vectors })
    }

    /// A model with no tokens; every lookup against it misses.
    pub fn empty(layer_size: usize) -> TrainedModel {
        Self { vocabulary: Vec::new(), layer_size, vectors: Vec::new() }
    }

    pub fn vocabulary(&self) -> &[Token] {
        &self.vocabulary
    }

    pub fn layer_size(&self) -> usize {
        self.layer_size
    }

    pub fn len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocabulary.is_empty()
    }

    /// The whole `V x D` buffer, as handed over by the trainer.
    pub fn raw_vectors(&self) -> &[f32] {
        &self.vectors
    }

    /// Row of the token at vocabulary position `rank`.
    pub fn vector(&self, rank: usize) -> &[f32] {
        let start = rank * self.layer_size;
        &self.vectors[start..start + self.layer_size]
    }

    /// Copies the buffer into a `(V, D)` matrix, for export to npy.
    pub fn to_array(&self) -> Array2<f32> {
        let d = self.layer_size;
        Array2::from_shape_fn((self.len(), d), |(i, j)| self.vectors[i * d + j])
    }
}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn rows_test() {
        let model = TrainedModel::new(vec![7, 3], 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(model.len(), 2);
        assert_eq!(model.vector(1), &[4.0, 5.0, 6.0]);
        assert_eq!(model.vector(0).iter().sum::<f32>(), 6.0);
        assert_eq!(model.to_array()[[1, 2]], 6.0);
        assert_eq!(model.raw_vectors().len(), 6);
    }

    #[test]
    fn shape_checked_test() {
        match TrainedModel::new(vec![1, 2], 3, vec![0.0; 5]) {
            Err(Word2VecError::DimensionMismatch { expected, got }) => {
                assert_eq!(expected, 6);
                assert_eq!(got, 5);
            },
            other => panic!("expected dimension mismatch, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_tokens_rejected_test() {
        assert!(matches!(
            TrainedModel::new(vec![4, 9, 4], 1, vec![0.0, 1.0, 2.0]),
            Err(Word2VecError::DuplicateToken(4))
        ));
        let json = r#"{"vocabulary":[3,3],"layer_size":1,"vectors":[0.0,1.0]}"#;
        assert!(serde_json::from_str::<TrainedModel>(json).is_err());
    }

    #[test]
    fn deserialize_rejects_bad_buffer_test() {
        let json = r#"{"vocabulary":[1,2],"layer_size":2,"vectors":[0.0,1.0,2.0]}"#;
        assert!(serde_json::from_str::<TrainedModel>(json).is_err());
        let json = r#"{"vocabulary":[1,2],"layer_size":2,"vectors":[0.0,1.0,2.0,3.0]}"#;
        let model: TrainedModel = serde_json::from_str(json).unwrap();
        assert_eq!(model.vector(1), &[2.0, 3.0]);
    }
}
