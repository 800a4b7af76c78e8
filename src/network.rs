//! Shallow single-projection-layer network trained with lock-free SGD.
//!
//! Workers share the weight matrices and write into them without any locking. The
//! objective is approximate and non-convex and each update is tiny, so lost or
//! interleaved writes only add noise. Cells are relaxed atomics, which keeps the races
//! inside safe Rust without paying for a read-modify-write.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use ndarray::Array2;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use parking_lot::Mutex;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::{prelude::*, ThreadPoolBuilder};
use tracing::debug;

use crate::config::{Architecture, LossMode, NeuralNetworkConfig};
use crate::error::{Result, Word2VecError};
use crate::huffman::HuffmanNode;
use crate::train::{ProgressReporter, Stage};
use crate::vocab::{Token, Vocabulary};

const EXP_TABLE_SIZE: usize = 1000;
const MAX_EXP: f32 = 6.0;
// floor of the learning rate, as a fraction of the initial one
const MIN_LEARNING_RATE: f32 = 1e-4;
// tokens a worker processes between two progress reports
const PROGRESS_INTERVAL: u64 = 10_000;
const NEGATIVE_POWER: f64 = 0.75;


#[derive(Default)]
#[repr(transparent)]
struct AtomicF32 {
    bits: AtomicU32,
}

impl AtomicF32 {

    fn new(value: f32) -> Self {
        Self { bits: AtomicU32::new(value.to_bits()) }
    }

    fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    fn set(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    // load + store, not a CAS loop: concurrent adds to one cell may lose an update
    fn add(&self, x: f32) {
        self.set(self.get() + x);
    }
}

/// Row-major matrix of racy cells.
struct SharedMatrix {
    cells: Box<[AtomicF32]>,
    cols: usize,
}

impl SharedMatrix {

    fn zeros(rows: usize, cols: usize) -> Self {
        let cells = (0..rows * cols).map(|_| AtomicF32::default()).collect();
        Self { cells, cols }
    }

    fn from_array(arr: Array2<f32>) -> Self {
        let cols = arr.ncols();
        let cells = arr.iter().map(|x| AtomicF32::new(*x)).collect();
        Self { cells, cols }
    }

    fn row(&self, i: usize) -> &[AtomicF32] {
        &self.cells[i * self.cols..(i + 1) * self.cols]
    }

    fn into_vec(self) -> Vec<f32> {
        self.cells.iter().map(AtomicF32::get).collect()
    }
}

fn dot(hidden: &[f32], row: &[AtomicF32]) -> f32 {
    hidden.iter().zip(row).map(|(h, w)| h * w.get()).sum()
}

fn add_scaled(dst: &mut [f32], g: f32, row: &[AtomicF32]) {
    dst.iter_mut().zip(row).for_each(|(d, w)| *d += g * w.get());
}


/// Precomputed logistic function over `[-MAX_EXP, MAX_EXP]`.
struct SigmoidTable {
    table: Vec<f32>,
}

impl SigmoidTable {

    fn new() -> Self {
        let table = (0..EXP_TABLE_SIZE).map(|i| {
            let x = (i as f64 / EXP_TABLE_SIZE as f64 * 2.0 - 1.0) * MAX_EXP as f64;
            let e = x.exp();
            (e / (e + 1.0)) as f32
        }).collect();
        Self { table }
    }

    /// Only meaningful for `-MAX_EXP < x < MAX_EXP`; callers handle saturation.
    fn get(&self, x: f32) -> f32 {
        let i = ((x + MAX_EXP) * (EXP_TABLE_SIZE as f32 / MAX_EXP / 2.0)) as usize;
        self.table[i.min(EXP_TABLE_SIZE - 1)]
    }
}


/// Everything the workers share while sweeping the corpus.
struct NetworkState<'a> {
    config: &'a NeuralNetworkConfig,
    huffman: &'a [HuffmanNode],
    tokens: Vec<Token>,
    counts: Vec<u64>,
    /// Input vectors, one row per vocabulary rank. The only matrix that survives.
    syn0: SharedMatrix,
    /// Internal-node vectors (hierarchical softmax) or output vectors (negative sampling).
    syn1: SharedMatrix,
    sigmoid: SigmoidTable,
    negatives: Option<WeightedIndex<f64>>,
    /// Sum of retained counts, the `N` of the subsampling formula.
    train_words: u64,
    /// Tokens to process over all epochs.
    total_work: u64,
    processed: AtomicU64,
    abort: AtomicBool,
    first_error: Mutex<Option<Word2VecError>>,
}

impl<'a> NetworkState<'a> {

    fn new(config: &'a NeuralNetworkConfig, vocab: &Vocabulary, huffman: &'a [HuffmanNode], corpus_tokens: u64) -> Result<Self> {

        let vocab_size = vocab.len();
        let layer_size = config.layer_size;

        // input vectors start small and random, output vectors start at zero
        let mut rng = StdRng::seed_from_u64(config.random_seed);
        let init: Array2<f32> = Array2::random_using((vocab_size, layer_size), Uniform::new(-0.5f32, 0.5), &mut rng) / layer_size as f32;

        let (syn1_rows, negatives) = match config.loss_mode {
            LossMode::HierarchicalSoftmax => (vocab_size.saturating_sub(1), None),
            LossMode::NegativeSampling => {
                let weights = vocab.counts().into_iter().map(|c| (c as f64).powf(NEGATIVE_POWER));
                let table = WeightedIndex::new(weights).map_err(|e| {
                    Word2VecError::InvalidConfig(format!("cannot build negative sampling distribution: {}", e))
                })?;
                (vocab_size, Some(table))
            },
        };

        Ok(Self {
            config,
            huffman,
            tokens: vocab.tokens(),
            counts: vocab.counts(),
            syn0: SharedMatrix::from_array(init),
            syn1: SharedMatrix::zeros(syn1_rows, layer_size),
            sigmoid: SigmoidTable::new(),
            negatives,
            train_words: vocab.total_count(),
            total_work: corpus_tokens * config.num_epochs as u64,
            processed: AtomicU64::new(0),
            abort: AtomicBool::new(false),
            first_error: Mutex::new(None),
        })
    }

    /// Linear decay driven by global progress, shared by every worker.
    fn learning_rate(&self, processed: u64) -> f32 {
        let initial = self.config.initial_learning_rate;
        let left = 1.0 - processed as f64 / (self.total_work + 1) as f64;
        initial * (left as f32).max(MIN_LEARNING_RATE)
    }

    fn fraction_done(&self) -> f64 {
        if self.total_work == 0 {
            return 1.0;
        }
        (self.processed.load(Ordering::Relaxed) as f64 / self.total_work as f64).min(1.0)
    }

    fn fail(&self, e: Word2VecError) {
        self.abort.store(true, Ordering::Relaxed);
        let mut slot = self.first_error.lock();
        if slot.is_none() {
            *slot = Some(e);
        }
    }

    // randomly drops frequent tokens; rarer tokens are always kept
    fn subsample(&self, sentence: &[usize], rng: &mut StdRng, out: &mut Vec<usize>) {
        out.clear();
        match self.config.down_sample_rate {
            None => out.extend_from_slice(sentence),
            Some(rate) => {
                let k = rate * self.train_words as f64;
                for word in sentence {
                    let f = self.counts[*word] as f64;
                    let keep = ((f / k).sqrt() + 1.0) * k / f;
                    if keep >= rng.gen::<f64>() {
                        out.push(*word);
                    }
                }
            },
        }
    }

    fn run_worker(&self, id: usize, partition: &[Vec<usize>], cancel: Option<&AtomicBool>, progress: &ProgressReporter) -> Result<()> {

        let layer_size = self.config.layer_size;
        let mut rng = StdRng::seed_from_u64(self.config.random_seed.wrapping_add(1 + id as u64));
        let mut neu1: Vec<f32> = vec![0.0; layer_size];
        let mut neu1e: Vec<f32> = vec![0.0; layer_size];
        let mut sen: Vec<usize> = Vec::new();
        let mut since_report: u64 = 0;

        for epoch in 0..self.config.num_epochs {
            for sentence in partition {

                if cancel.map_or(false, |c| c.load(Ordering::Relaxed)) {
                    return Err(Word2VecError::InterruptedTraining);
                }
                // another worker failed, its error is the one reported
                if self.abort.load(Ordering::Relaxed) {
                    return Ok(());
                }

                let n = sentence.len() as u64;
                let before = self.processed.fetch_add(n, Ordering::Relaxed);
                let alpha = self.learning_rate(before);

                since_report += n;
                if since_report >= PROGRESS_INTERVAL {
                    since_report = 0;
                    progress.update(Stage::Train, self.fraction_done());
                }

                self.subsample(sentence, &mut rng, &mut sen);
                self.train_sentence(&sen, alpha, epoch, &mut rng, &mut neu1, &mut neu1e)?;
            }
            debug!(worker = id, epoch, "worker finished epoch");
        }
        Ok(())
    }

    fn train_sentence(&self,
        sen: &[usize],
        alpha: f32,
        epoch: usize,
        rng: &mut StdRng,
        neu1: &mut [f32],
        neu1e: &mut [f32]) -> Result<()> {

        let window = self.config.window_size;
        let n = sen.len();

        for pos in 0..n {

            // effective window is shrunk by a random amount at every position
            let reach = window - rng.gen_range(0..window);
            let lo = pos.saturating_sub(reach);
            let hi = (pos + reach).min(n - 1);
            let context = (lo..=hi).filter(|c| *c != pos).map(|c| sen[c]);
            let word = sen[pos];

            match self.config.architecture {
                Architecture::Cbow => {
                    // in -> hidden: average of the context vectors
                    neu1.fill(0.0);
                    let mut cw = 0;
                    for c in context.clone() {
                        neu1.iter_mut().zip(self.syn0.row(c)).for_each(|(h, w)| *h += w.get());
                        cw += 1;
                    }
                    if cw == 0 {
                        continue;
                    }
                    neu1.iter_mut().for_each(|h| *h /= cw as f32);

                    neu1e.fill(0.0);
                    self.output_update(word, neu1, neu1e, alpha, epoch, rng)?;

                    // hidden -> in
                    for c in context {
                        self.syn0.row(c).iter().zip(neu1e.iter()).for_each(|(w, e)| w.add(*e));
                    }
                },
                Architecture::SkipGram => {
                    for c in context {
                        // the centre vector predicts each context token in turn
                        neu1.iter_mut().zip(self.syn0.row(word)).for_each(|(h, w)| *h = w.get());
                        neu1e.fill(0.0);
                        self.output_update(c, neu1, neu1e, alpha, epoch, rng)?;
                        self.syn0.row(word).iter().zip(neu1e.iter()).for_each(|(w, e)| w.add(*e));
                    }
                },
            }
        }
        Ok(())
    }

    /// Updates the output side for one (hidden, target) example and accumulates the
    /// input-side gradient into `neu1e`. The caller applies `neu1e` afterwards.
    fn output_update(&self,
        target: usize,
        neu1: &[f32],
        neu1e: &mut [f32],
        alpha: f32,
        epoch: usize,
        rng: &mut StdRng) -> Result<()> {

        match self.config.loss_mode {
            LossMode::HierarchicalSoftmax => {
                let node = &self.huffman[target];
                for (bit, point) in node.code.iter().zip(node.point.iter()) {
                    let row = self.syn1.row(*point);
                    let f = self.checked_dot(neu1, row, epoch, target)?;
                    if f <= -MAX_EXP || f >= MAX_EXP {
                        continue;
                    }
                    // branch 0 is the positive class
                    let g = (1.0 - *bit as f32 - self.sigmoid.get(f)) * alpha;
                    add_scaled(neu1e, g, row);
                    row.iter().zip(neu1.iter()).for_each(|(w, h)| w.add(g * h));
                }
            },
            LossMode::NegativeSampling => {
                let Some(negatives) = &self.negatives else { return Ok(()) };
                for d in 0..=self.config.negative_samples {
                    let (sample, label) = if d == 0 {
                        (target, 1.0)
                    } else {
                        let sample = negatives.sample(rng);
                        if sample == target {
                            continue;
                        }
                        (sample, 0.0)
                    };

                    let row = self.syn1.row(sample);
                    let f = self.checked_dot(neu1, row, epoch, target)?;
                    let g = if f > MAX_EXP {
                        (label - 1.0) * alpha
                    } else if f < -MAX_EXP {
                        label * alpha
                    } else {
                        (label - self.sigmoid.get(f)) * alpha
                    };
                    add_scaled(neu1e, g, row);
                    row.iter().zip(neu1.iter()).for_each(|(w, h)| w.add(g * h));
                }
            },
        }
        Ok(())
    }

    fn checked_dot(&self, neu1: &[f32], row: &[AtomicF32], epoch: usize, target: usize) -> Result<f32> {
        let f = dot(neu1, row);
        if !f.is_finite() {
            return Err(Word2VecError::NumericCorruption { epoch, token: self.tokens[target] });
        }
        Ok(f)
    }
}


/// Splits sentences into `n` contiguous blocks of near-equal sentence count.
fn partition(sentences: &[Vec<usize>], n: usize) -> Vec<&[Vec<usize>]> {
    if sentences.is_empty() {
        return Vec::new();
    }
    let size = (sentences.len() + n - 1) / n;
    sentences.chunks(size).collect()
}


/// Multi-threaded SGD over an encoded corpus for a fixed vocabulary and Huffman tree.
pub struct NeuralNetworkTrainer<'a> {
    config: &'a NeuralNetworkConfig,
    vocab: &'a Vocabulary,
    huffman: &'a [HuffmanNode],
    progress: &'a ProgressReporter,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> NeuralNetworkTrainer<'a> {

    pub fn new(config: &'a NeuralNetworkConfig, vocab: &'a Vocabulary, huffman: &'a [HuffmanNode], progress: &'a ProgressReporter) -> Self {
        Self { config, vocab, huffman, progress, cancel: None }
    }

    pub fn with_cancel_flag(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Trains and returns the input matrix, row-major, one row per vocabulary rank.
    pub fn train<S: AsRef<[Token]>>(&self, sentences: &[S]) -> Result<Vec<f32>> {

        self.config.validate()?;
        if self.vocab.is_empty() {
            return Err(Word2VecError::NothingToTrain);
        }
        if self.huffman.len() != self.vocab.len() {
            return Err(Word2VecError::DimensionMismatch { expected: self.vocab.len(), got: self.huffman.len() });
        }

        // sentences as vocabulary ranks, out-of-vocabulary tokens removed
        let encoded: Vec<Vec<usize>> = sentences
            .iter()
            .map(|s| self.vocab.encode(s.as_ref()))
            .filter(|s| !s.is_empty())
            .collect();
        let corpus_tokens: u64 = encoded.iter().map(|s| s.len() as u64).sum();

        let state = NetworkState::new(self.config, self.vocab, self.huffman, corpus_tokens)?;
        let partitions = partition(&encoded, self.config.num_threads);
        debug!(partitions = partitions.len(), corpus_tokens, "starting workers");

        let pool = ThreadPoolBuilder::new().num_threads(self.config.num_threads).build()?;
        pool.install(|| {
            partitions.par_iter().enumerate().for_each(|(id, part)| {
                if let Err(e) = state.run_worker(id, part, self.cancel, self.progress) {
                    state.fail(e);
                }
            });
        });

        if let Some(e) = state.first_error.into_inner() {
            return Err(e);
        }
        self.progress.update(Stage::Train, 1.0);
        Ok(state.syn0.into_vec())
    }
}
