use std::cmp::Reverse;
use std::collections::HashMap;

use crate::error::{Result, Word2VecError};

/// Integer id of a vocabulary unit. The core never sees the string form.
pub type Token = u32;

/// Token -> occurrence count over a corpus. Immutable once built.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrequencyTable {
    counts: HashMap<Token, u64>,
}

impl FrequencyTable {

    pub fn get(&self, token: Token) -> u64 {
        self.counts.get(&token).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Token, u64)> + '_ {
        self.counts.iter().map(|(t, c)| (*t, *c))
    }
}

impl FromIterator<(Token, u64)> for FrequencyTable {
    fn from_iter<I: IntoIterator<Item = (Token, u64)>>(iter: I) -> Self {
        let mut counts: HashMap<Token, u64> = HashMap::new();
        for (token, count) in iter {
            *counts.entry(token).or_insert(0) += count;
        }
        Self { counts }
    }
}


pub struct TokenCounter {}

impl TokenCounter {

    /// Counts how many times each token appears across all sentences.
    pub fn count<S: AsRef<[Token]>>(sentences: &[S]) -> FrequencyTable {

        let mut counts: HashMap<Token, u64> = HashMap::new();
        for sentence in sentences {
            for tok in sentence.as_ref() {
                *counts.entry(*tok).or_insert(0) += 1;
            }
        }
        FrequencyTable { counts }
    }
}


/// One retained token. `rank` is its row in every matrix built from the vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VocabularyEntry {
    pub token: Token,
    pub count: u64,
    pub rank: usize,
}

/// Filtered vocabulary ordered by count descending, then token id ascending.
#[derive(Clone, Debug, Default)]
pub struct Vocabulary {
    entries: Vec<VocabularyEntry>,
    t2i: HashMap<Token, usize>,
}

impl Vocabulary {

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[VocabularyEntry] {
        &self.entries
    }

    pub fn rank_of(&self, token: Token) -> Option<usize> {
        self.t2i.get(&token).copied()
    }

    pub fn tokens(&self) -> Vec<Token> {
        self.entries.iter().map(|e| e.token).collect()
    }

    pub fn counts(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.count).collect()
    }

    /// Sum of the counts of every retained token.
    pub fn total_count(&self) -> u64 {
        self.entries.iter().map(|e| e.count).sum()
    }

    /// Rewrites a sentence as vocabulary ranks, dropping tokens that were filtered out.
    pub fn encode(&self, sentence: &[Token]) -> Vec<usize> {
        sentence.iter().filter_map(|t| self.rank_of(*t)).collect()
    }
}


pub struct VocabularyFilter {
    min_frequency: u64,
}

impl VocabularyFilter {

    pub fn new(min_frequency: u64) -> Self {
        Self { min_frequency }
    }

    pub fn filter_and_sort(&self, table: &FrequencyTable) -> Vocabulary {

        // keep tokens that reach the threshold, then order them by count (desc)
        // and break ties on the token id so identical input gives identical ranks
        let mut tup = table
            .iter()
            .filter(|(_, count)| *count >= self.min_frequency)
            .collect::<Vec<(Token, u64)>>();
        tup.sort_by_key(|(token, count)| (Reverse(*count), *token));

        let entries = tup
            .into_iter()
            .enumerate()
            .map(|(rank, (token, count))| VocabularyEntry { token, count, rank })
            .collect::<Vec<VocabularyEntry>>();
        let t2i = entries.iter().map(|e| (e.token, e.rank)).collect();

        Vocabulary { entries, t2i }
    }

    /// Same as [`filter_and_sort`](Self::filter_and_sort) but an empty result is an error.
    pub fn build(&self, table: &FrequencyTable) -> Result<Vocabulary> {
        let vocab = self.filter_and_sort(table);
        if vocab.is_empty() {
            return Err(Word2VecError::EmptyVocabulary { min_frequency: self.min_frequency });
        }
        Ok(vocab)
    }
}
