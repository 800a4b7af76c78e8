use std::cmp::Ordering;
use std::collections::HashMap;

use ndarray::{prelude::*, Zip};

use crate::error::{Result, Word2VecError};
use crate::model::TrainedModel;
use crate::vocab::Token;

/// A search hit. Lower distance means closer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Match {
    pub token: Token,
    /// Cosine distance, `1 - cos`.
    pub distance: f64,
}

/// Exact nearest-neighbour and analogy queries over a trained model.
///
/// Holds a row-normalised copy of the vectors so a full scan is one matrix-vector
/// product. Read-only after construction; share it freely across threads.
pub struct Searcher {
    model: TrainedModel,
    w: Array2<f32>,
    t2i: HashMap<Token, usize>,
}

impl Searcher {

    pub fn new(model: TrainedModel) -> Searcher {

        // normalize w so each entry norm l2 is 1, zero rows stay zero
        let mut w = model.to_array();
        for mut row in w.axis_iter_mut(Axis(0)) {
            let norm = row.dot(&row).sqrt();
            if norm > 0.0 {
                row.mapv_inplace(|a| a / norm);
            }
        }

        let t2i = model.vocabulary().iter().enumerate().map(|(i, t)| (*t, i)).collect();

        Self { model, w, t2i }
    }

    pub fn model(&self) -> &TrainedModel {
        &self.model
    }

    pub fn contains(&self, token: Token) -> bool {
        self.t2i.contains_key(&token)
    }

    fn rank(&self, token: Token) -> Result<usize> {
        self.t2i.get(&token).copied().ok_or(Word2VecError::UnknownToken(token))
    }

    /// The token's vector exactly as trained.
    pub fn raw_vector(&self, token: Token) -> Result<&[f32]> {
        Ok(self.model.vector(self.rank(token)?))
    }

    /// Closest tokens to `token`, never including `token` itself.
    pub fn matches(&self, token: Token, max_matches: usize) -> Result<Vec<Match>> {
        let i = self.rank(token)?;
        Ok(self.rank_matches(self.w.row(i), max_matches, Some(i)))
    }

    /// Closest tokens to an arbitrary vector of the model's dimensionality.
    pub fn matches_for_vector(&self, vec: &[f32], max_matches: usize) -> Result<Vec<Match>> {
        let expected = self.model.layer_size();
        if vec.len() != expected {
            return Err(Word2VecError::DimensionMismatch { expected, got: vec.len() });
        }
        let mut query = Array1::from(vec.to_vec());
        let norm = query.dot(&query).sqrt();
        if norm > 0.0 {
            query.mapv_inplace(|a| a / norm);
        }
        Ok(self.rank_matches(query.view(), max_matches, None))
    }

    fn rank_matches(&self, query: ArrayView1<'_, f32>, max_matches: usize, exclude: Option<usize>) -> Vec<Match> {

        // multiply all vectors by the query vector, both sides are unit length
        let scores = self.w.dot(&query);
        let mut indexed: Vec<(usize, f64)> = scores
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != exclude)
            .map(|(i, s)| (i, 1.0 - *s as f64))
            .collect();

        // ascending distance, vocabulary order on ties
        let by_distance = |(i, s): &(usize, f64), (j, t): &(usize, f64)| -> Ordering {
            s.total_cmp(t).then(i.cmp(j))
        };
        if max_matches < indexed.len() {
            if max_matches == 0 {
                return Vec::new();
            }
            indexed.select_nth_unstable_by(max_matches - 1, by_distance);
            indexed.truncate(max_matches);
        }
        indexed.sort_by(by_distance);

        let vocabulary = self.model.vocabulary();
        indexed.into_iter().map(|(i, distance)| Match { token: vocabulary[i], distance }).collect()
    }

    /// Offset from `a` to `b`, to be applied to other tokens ("a is to b as c is to ?").
    pub fn similarity(&self, a: Token, b: Token) -> Result<SemanticDifference<'_>> {
        let va = self.w.row(self.rank(a)?);
        let vb = self.w.row(self.rank(b)?);
        Ok(SemanticDifference { searcher: self, diff: &vb - &va })
    }

    /// Pairwise distance, computed in f64 from the raw vectors without a scan.
    pub fn cosine_distance(&self, a: Token, b: Token) -> Result<f64> {
        let x = self.raw_vector(a)?;
        let y = self.raw_vector(b)?;
        Ok(cosine_distance(x, y))
    }
}

// a zero vector is orthogonal to everything
fn cosine_distance(x: &[f32], y: &[f32]) -> f64 {
    let (mut dot, mut nx, mut ny) = (0.0f64, 0.0f64, 0.0f64);
    for (a, b) in x.iter().zip(y) {
        let (a, b) = (*a as f64, *b as f64);
        dot += a * b;
        nx += a * a;
        ny += b * b;
    }
    if nx == 0.0 || ny == 0.0 {
        return 1.0;
    }
    1.0 - dot / (nx * ny).sqrt()
}


/// The vector offset between two tokens.
pub struct SemanticDifference<'a> {
    searcher: &'a Searcher,
    diff: Array1<f32>,
}

impl<'a> SemanticDifference<'a> {

    pub fn offset(&self) -> ArrayView1<'_, f32> {
        self.diff.view()
    }

    /// Tokens closest to `token` translated by this offset.
    pub fn matches(&self, token: Token, max_matches: usize) -> Result<Vec<Match>> {
        let i = self.searcher.rank(token)?;
        let mut target = self.diff.clone();
        Zip::from(&mut target).and(self.searcher.w.row(i)).for_each(|t, v| *t += *v);
        self.searcher.matches_for_vector(target.as_slice().unwrap_or(&[]), max_matches)
    }
}


#[cfg(test)]
mod tests {

    use super::*;

    fn searcher(vocabulary: Vec<Token>, rows: &[&[f32]]) -> Searcher {
        let layer_size = rows[0].len();
        let vectors = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Searcher::new(TrainedModel::new(vocabulary, layer_size, vectors).unwrap())
    }

    fn grid() -> Searcher {
        searcher(
            vec![10, 20, 30, 40, 50, 60],
            &[
                &[1.0, 0.0, 0.0],
                &[0.9, 0.1, 0.0],
                &[0.0, 1.0, 0.0],
                &[0.0, 0.0, 3.0],
                &[-1.0, 0.0, 0.0],
                &[0.5, 0.5, 0.0],
            ],
        )
    }

    #[test]
    fn find_most_similar_test() {
        let s = grid();
        let matches = s.matches(10, 3).unwrap();
        let tokens: Vec<Token> = matches.iter().map(|m| m.token).collect();
        assert_eq!(tokens, vec![20, 60, 30]);
        assert!(matches[0].distance < 0.01);
    }

    #[test]
    fn matches_invariants_test() {
        let s = grid();
        for token in [10, 20, 30, 40, 50, 60] {
            for k in [0, 1, 3, 5, 6, 100] {
                let matches = s.matches(token, k).unwrap();
                assert_eq!(matches.len(), k.min(5));
                assert!(matches.iter().all(|m| m.token != token));
                assert!(matches.windows(2).all(|w| w[0].distance <= w[1].distance));
                let mut seen: Vec<Token> = matches.iter().map(|m| m.token).collect();
                seen.sort();
                seen.dedup();
                assert_eq!(seen.len(), matches.len());
            }
        }
    }

    #[test]
    fn vector_query_test() {
        let s = grid();
        let matches = s.matches_for_vector(&[0.0, 0.0, 1.0], 2).unwrap();
        assert_eq!(matches[0].token, 40);
        assert!(matches[0].distance.abs() < 1e-6);
        // perpendicular rows tie at distance 1 and come back in vocabulary order
        assert_eq!(matches[1].token, 10);
        assert!((matches[1].distance - 1.0).abs() < 1e-6);

        assert!(matches!(
            s.matches_for_vector(&[1.0, 0.0], 2),
            Err(Word2VecError::DimensionMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn ties_follow_vocabulary_order_test() {
        let s = searcher(vec![5, 3, 9, 1], &[&[1.0, 0.0], &[0.0, 2.0], &[0.0, 1.0], &[0.0, 5.0]]);
        let tokens: Vec<Token> = s.matches(5, 3).unwrap().iter().map(|m| m.token).collect();
        assert_eq!(tokens, vec![3, 9, 1]);
        let tokens: Vec<Token> = s.matches(5, 2).unwrap().iter().map(|m| m.token).collect();
        assert_eq!(tokens, vec![3, 9]);
    }

    #[test]
    fn cosine_distance_test() {
        let s = grid();
        for x in [10, 20, 30, 40, 50, 60] {
            assert_eq!(s.cosine_distance(x, x).unwrap(), 0.0);
            for y in [10, 20, 30, 40, 50, 60] {
                assert_eq!(s.cosine_distance(x, y).unwrap(), s.cosine_distance(y, x).unwrap());
            }
        }
        assert!((s.cosine_distance(10, 50).unwrap() - 2.0).abs() < 1e-12);
        assert!((s.cosine_distance(10, 30).unwrap() - 1.0).abs() < 1e-12);
        assert!(matches!(s.cosine_distance(10, 99), Err(Word2VecError::UnknownToken(99))));
    }

    #[test]
    fn zero_vector_test() {
        let s = searcher(vec![1, 2], &[&[0.0, 0.0], &[1.0, 1.0]]);
        assert_eq!(s.cosine_distance(1, 2).unwrap(), 1.0);
        let matches = s.matches_for_vector(&[0.0, 0.0], 5).unwrap();
        assert!(matches.iter().all(|m| (m.distance - 1.0).abs() < 1e-12));
    }

    #[test]
    fn raw_vector_test() {
        let s = grid();
        assert!(s.contains(40));
        assert!(!s.contains(41));
        assert_eq!(s.raw_vector(40).unwrap(), &[0.0, 0.0, 3.0]);
        assert!(matches!(s.raw_vector(41), Err(Word2VecError::UnknownToken(41))));
        assert!(matches!(s.matches(41, 3), Err(Word2VecError::UnknownToken(41))));
    }

    #[test]
    fn empty_model_test() {
        let s = Searcher::new(TrainedModel::empty(4));
        for token in [0, 1, 7, Token::MAX] {
            assert!(!s.contains(token));
            assert!(matches!(s.raw_vector(token), Err(Word2VecError::UnknownToken(_))));
        }
        assert!(s.matches_for_vector(&[1.0, 0.0, 0.0, 0.0], 3).unwrap().is_empty());
    }

    #[test]
    fn symmetric_triangle_analogy_test() {
        // three unit vectors 120 degrees apart
        let h = 3f32.sqrt() / 2.0;
        let s = searcher(vec![1, 2, 3], &[&[1.0, 0.0], &[-0.5, h], &[-0.5, -h]]);

        // c + (b - a) lands on (-2, 0): equidistant from b and c, opposite to a
        let matches = s.similarity(1, 2).unwrap().matches(3, 3).unwrap();
        let tokens: Vec<Token> = matches.iter().map(|m| m.token).collect();
        assert_eq!(tokens, vec![2, 3, 1]);
        assert!((matches[0].distance - 0.5).abs() < 1e-6);
        assert_eq!(matches[0].distance, matches[1].distance);
        assert!((matches[2].distance - 2.0).abs() < 1e-6);
    }

    #[test]
    fn analogies_test() {
        // a -> b is the offset (-1, 1, 0); d sits exactly at c + offset
        let d = [-0.4f32, 1.0, 0.8];
        let n = d.iter().map(|x| x * x).sum::<f32>().sqrt();
        let s = searcher(
            vec![1, 2, 3, 4],
            &[&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0], &[0.6, 0.0, 0.8], &[d[0] / n, d[1] / n, d[2] / n]],
        );

        let difference = s.similarity(1, 2).unwrap();
        assert!((difference.offset()[0] + 1.0).abs() < 1e-6);
        let best = difference.matches(3, 1).unwrap();
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].token, 4);
        assert!(best[0].distance.abs() < 1e-5);

        assert!(matches!(s.similarity(1, 77), Err(Word2VecError::UnknownToken(77))));
        assert!(matches!(difference.matches(77, 1), Err(Word2VecError::UnknownToken(77))));
    }

    #[test]
    fn searcher_is_shareable_test() {
        fn assert_sync<T: Send + Sync>() {}
        assert_sync::<Searcher>();
    }
}
