use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{info, info_span};

use crate::config::NeuralNetworkConfig;
use crate::error::Result;
use crate::huffman::HuffmanCoding;
use crate::model::TrainedModel;
use crate::network::NeuralNetworkTrainer;
use crate::vocab::{FrequencyTable, Token, TokenCounter, VocabularyFilter};


/// Phases reported to a progress listener, in the order they run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    AcquireVocab,
    FilterSortVocab,
    EncodeHuffman,
    Train,
}

impl Stage {
    fn index(self) -> usize {
        match self {
            Stage::AcquireVocab => 0,
            Stage::FilterSortVocab => 1,
            Stage::EncodeHuffman => 2,
            Stage::Train => 3,
        }
    }
}

/// Called with the current stage and a fraction in `[0, 1]`. May be called from any
/// worker thread.
pub type ProgressListener = Arc<dyn Fn(Stage, f64) + Send + Sync>;

/// Forwards updates to the listener, dropping any value lower than one already
/// reported for the same stage.
pub struct ProgressReporter {
    listener: Option<ProgressListener>,
    last: Mutex<[f64; 4]>,
}

impl ProgressReporter {

    pub fn new(listener: Option<ProgressListener>) -> Self {
        Self { listener, last: Mutex::new([f64::NEG_INFINITY; 4]) }
    }

    pub fn update(&self, stage: Stage, fraction: f64) {
        let Some(listener) = &self.listener else { return };
        let fraction = fraction.clamp(0.0, 1.0);

        // the lock is held across the call so listeners observe values in order
        let mut last = self.last.lock();
        if fraction >= last[stage.index()] {
            last[stage.index()] = fraction;
            listener(stage, fraction);
        }
    }
}


/// Runs counting, filtering, Huffman encoding and network training, in that order.
pub struct Word2VecTrainer {
    min_frequency: u64,
    vocab: Option<FrequencyTable>,
    config: NeuralNetworkConfig,
    listener: Option<ProgressListener>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Word2VecTrainer {

    pub fn new(config: NeuralNetworkConfig) -> Self {
        Self {
            min_frequency: 5,
            vocab: None,
            config,
            listener: None,
            cancel: None,
        }
    }

    /// Tokens seen fewer times than this are left out of the vocabulary.
    pub fn with_min_frequency(mut self, min_frequency: u64) -> Self {
        self.min_frequency = min_frequency;
        self
    }

    /// Skips the counting pass and uses these frequencies instead.
    pub fn with_frequency_table(mut self, table: FrequencyTable) -> Self {
        self.vocab = Some(table);
        self
    }

    pub fn with_progress_listener(mut self, listener: ProgressListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Raising the flag stops every worker before its next sentence.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn train<S: AsRef<[Token]>>(&self, sentences: &[S]) -> Result<TrainedModel> {

        let _span = info_span!("word2vec", min_frequency = self.min_frequency).entered();
        let start = Instant::now();

        // nothing is counted or allocated for a configuration that cannot train
        self.config.validate()?;
        let progress = ProgressReporter::new(self.listener.clone());

        let timer = Instant::now();
        progress.update(Stage::AcquireVocab, 0.0);
        let counted: FrequencyTable;
        let counts = match &self.vocab {
            Some(table) => table,
            None => {
                counted = TokenCounter::count(sentences);
                &counted
            },
        };
        progress.update(Stage::AcquireVocab, 1.0);
        info!(distinct = counts.len(), elapsed_ms = timer.elapsed().as_millis() as u64, "acquired token frequencies");

        let timer = Instant::now();
        progress.update(Stage::FilterSortVocab, 0.0);
        let vocab = VocabularyFilter::new(self.min_frequency).build(counts)?;
        progress.update(Stage::FilterSortVocab, 1.0);
        info!(vocab_size = vocab.len(), elapsed_ms = timer.elapsed().as_millis() as u64, "filtered and sorted vocabulary");

        let timer = Instant::now();
        progress.update(Stage::EncodeHuffman, 0.0);
        let huffman = HuffmanCoding::new(&vocab).encode();
        progress.update(Stage::EncodeHuffman, 1.0);
        info!(elapsed_ms = timer.elapsed().as_millis() as u64, "created huffman encoding");

        let timer = Instant::now();
        progress.update(Stage::Train, 0.0);
        let mut network = NeuralNetworkTrainer::new(&self.config, &vocab, &huffman, &progress);
        if let Some(cancel) = &self.cancel {
            network = network.with_cancel_flag(cancel);
        }
        let vectors = network.train(sentences)?;
        info!(
            architecture = ?self.config.architecture,
            loss_mode = ?self.config.loss_mode,
            elapsed_ms = timer.elapsed().as_millis() as u64,
            "trained network"
        );

        let model = TrainedModel::new(vocab.tokens(), self.config.layer_size, vectors)?;
        info!(elapsed_ms = start.elapsed().as_millis() as u64, "finished training word2vec");
        Ok(model)
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::config::{Architecture, LossMode};
    use crate::error::Word2VecError;
    use crate::similarity::Searcher;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::atomic::Ordering;
    use std::sync::mpsc;
    use std::thread;

    const CLUSTER_A: [Token; 5] = [0, 1, 2, 3, 4];
    const CLUSTER_B: [Token; 5] = [10, 11, 12, 13, 14];

    // sentences alternate between two token sets that never share a window
    fn clustered_corpus() -> Vec<Vec<Token>> {
        let mut rng = StdRng::seed_from_u64(17);
        (0..400).map(|i| {
            let cluster = if i % 2 == 0 { &CLUSTER_A } else { &CLUSTER_B };
            (0..10).map(|_| cluster[rng.gen_range(0..cluster.len())]).collect()
        }).collect()
    }

    fn mean_distance(searcher: &Searcher, xs: &[Token], ys: &[Token]) -> f64 {
        let mut total = 0.0;
        let mut n = 0;
        for x in xs {
            for y in ys {
                if x != y {
                    total += searcher.cosine_distance(*x, *y).unwrap();
                    n += 1;
                }
            }
        }
        total / n as f64
    }

    fn assert_clusters_separate(config: NeuralNetworkConfig) {
        let model = Word2VecTrainer::new(config)
            .with_min_frequency(1)
            .train(&clustered_corpus())
            .unwrap();
        assert_eq!(model.len(), 10);

        let searcher = Searcher::new(model);
        let within = (mean_distance(&searcher, &CLUSTER_A, &CLUSTER_A) + mean_distance(&searcher, &CLUSTER_B, &CLUSTER_B)) / 2.0;
        let across = mean_distance(&searcher, &CLUSTER_A, &CLUSTER_B);
        assert!(within < across, "within {} across {}", within, across);
    }

    #[test]
    fn cbow_hierarchical_softmax_clusters_test() {
        assert_clusters_separate(NeuralNetworkConfig {
            architecture: Architecture::Cbow,
            loss_mode: LossMode::HierarchicalSoftmax,
            layer_size: 16,
            window_size: 4,
            initial_learning_rate: 0.05,
            num_epochs: 20,
            num_threads: 2,
            ..NeuralNetworkConfig::default()
        });
    }

    #[test]
    fn skip_gram_negative_sampling_clusters_test() {
        assert_clusters_separate(NeuralNetworkConfig {
            architecture: Architecture::SkipGram,
            loss_mode: LossMode::NegativeSampling,
            layer_size: 16,
            window_size: 4,
            negative_samples: 5,
            initial_learning_rate: 0.025,
            num_epochs: 20,
            num_threads: 2,
            ..NeuralNetworkConfig::default()
        });
    }

    #[test]
    fn vocabulary_order_test() {
        let sentences: Vec<Vec<Token>> = vec![vec![3, 1, 1, 2], vec![1, 2, 7]];
        let config = NeuralNetworkConfig { layer_size: 4, num_epochs: 1, ..Default::default() };
        let model = Word2VecTrainer::new(config).with_min_frequency(1).train(&sentences).unwrap();
        // 1:3, 2:2, then 3 and 7 tied on 1 and ordered by id
        assert_eq!(model.vocabulary(), &[1, 2, 3, 7]);
        assert_eq!(model.layer_size(), 4);
        assert_eq!(model.raw_vectors().len(), 16);
    }

    #[test]
    fn frequency_table_override_test() {
        let sentences: Vec<Vec<Token>> = vec![vec![1, 2, 3], vec![3, 2, 1]];
        let table: FrequencyTable = vec![(1, 50), (2, 1), (3, 9)].into_iter().collect();
        let config = NeuralNetworkConfig { layer_size: 4, num_epochs: 1, ..Default::default() };
        let model = Word2VecTrainer::new(config)
            .with_min_frequency(5)
            .with_frequency_table(table)
            .train(&sentences)
            .unwrap();
        assert_eq!(model.vocabulary(), &[1, 3]);
    }

    #[test]
    fn empty_vocabulary_fails_before_training_test() {
        let tiny: Vec<Vec<Token>> = vec![vec![1, 2, 3]];
        let seen: Arc<Mutex<Vec<Stage>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let result = Word2VecTrainer::new(NeuralNetworkConfig::default())
            .with_min_frequency(10)
            .with_progress_listener(Arc::new(move |stage, _| sink.lock().push(stage)))
            .train(&tiny);

        assert!(matches!(result, Err(Word2VecError::EmptyVocabulary { min_frequency: 10 })));
        assert!(!seen.lock().contains(&Stage::Train));

        let empty: Vec<Vec<Token>> = Vec::new();
        let result = Word2VecTrainer::new(NeuralNetworkConfig::default()).train(&empty);
        assert!(matches!(result, Err(Word2VecError::EmptyVocabulary { .. })));
    }

    #[test]
    fn invalid_config_fails_fast_test() {
        let tiny: Vec<Vec<Token>> = vec![vec![1, 2, 3]];
        let calls = Arc::new(Mutex::new(0usize));
        let sink = calls.clone();
        for config in [
            NeuralNetworkConfig { layer_size: 0, ..Default::default() },
            NeuralNetworkConfig { window_size: 0, ..Default::default() },
        ] {
            let sink = sink.clone();
            let result = Word2VecTrainer::new(config)
                .with_progress_listener(Arc::new(move |_, _| *sink.lock() += 1))
                .train(&tiny);
            assert!(matches!(result, Err(Word2VecError::InvalidConfig(_))));
        }
        assert_eq!(*calls.lock(), 0);
    }

    #[test]
    fn cancellation_test() {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        // the listener pulls the plug as soon as training starts
        let listener: ProgressListener = Arc::new(move |stage, _| {
            if stage == Stage::Train {
                flag.store(true, Ordering::Relaxed);
            }
        });
        let config = NeuralNetworkConfig { layer_size: 8, num_threads: 3, ..Default::default() };
        let result = Word2VecTrainer::new(config)
            .with_min_frequency(1)
            .with_progress_listener(listener)
            .with_cancel_flag(cancel)
            .train(&clustered_corpus());
        assert!(matches!(result, Err(Word2VecError::InterruptedTraining)));
    }

    #[test]
    fn negative_sampling_without_negatives_test() {
        let config = NeuralNetworkConfig {
            architecture: Architecture::SkipGram,
            loss_mode: LossMode::NegativeSampling,
            negative_samples: 0,
            layer_size: 8,
            num_epochs: 2,
            num_threads: 2,
            ..NeuralNetworkConfig::default()
        };
        let model = Word2VecTrainer::new(config).with_min_frequency(1).train(&clustered_corpus()).unwrap();
        assert_eq!(model.len(), 10);
        assert!(model.raw_vectors().iter().all(|x| x.is_finite()));
    }

    #[test]
    fn worker_failure_surfaces_first_error_test() {
        let vocab: Vec<Token> = CLUSTER_A.iter().chain(CLUSTER_B.iter()).copied().collect();
        let seen: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        // a step this large overflows the weights within a few updates
        let config = NeuralNetworkConfig {
            architecture: Architecture::SkipGram,
            loss_mode: LossMode::NegativeSampling,
            layer_size: 8,
            initial_learning_rate: 1e30,
            num_epochs: 5,
            num_threads: 4,
            ..NeuralNetworkConfig::default()
        };
        let result = Word2VecTrainer::new(config)
            .with_min_frequency(1)
            .with_progress_listener(Arc::new(move |stage, f| {
                if stage == Stage::Train {
                    sink.lock().push(f);
                }
            }))
            .train(&clustered_corpus());

        match result {
            Err(Word2VecError::NumericCorruption { epoch, token }) => {
                assert!(epoch < 5);
                assert!(vocab.contains(&token));
            },
            other => panic!("expected numeric corruption, got {:?}", other),
        }
        assert!(!seen.lock().contains(&1.0));
    }

    #[test]
    fn cancellation_while_running_test() {
        let sentences: Vec<Vec<Token>> = (0..50).flat_map(|_| clustered_corpus()).collect();
        let cancel = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let started_tx = Mutex::new(started_tx);

        // the listener only signals, the flag is raised from a separate thread
        let listener: ProgressListener = Arc::new(move |stage, fraction| {
            if stage == Stage::Train && fraction > 0.0 {
                let _ = started_tx.lock().send(());
            }
        });
        let flag = cancel.clone();
        let canceller = thread::spawn(move || {
            if started_rx.recv().is_ok() {
                flag.store(true, Ordering::Relaxed);
            }
        });

        let config = NeuralNetworkConfig { layer_size: 16, num_epochs: 20, num_threads: 3, ..Default::default() };
        let result = Word2VecTrainer::new(config)
            .with_min_frequency(1)
            .with_progress_listener(listener)
            .with_cancel_flag(cancel.clone())
            .train(&sentences);

        canceller.join().unwrap();
        assert!(cancel.load(Ordering::Relaxed));
        assert!(matches!(result, Err(Word2VecError::InterruptedTraining)));
    }

    #[test]
    fn progress_is_monotonic_test() {
        let seen: Arc<Mutex<Vec<(Stage, f64)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let config = NeuralNetworkConfig { layer_size: 8, num_epochs: 10, num_threads: 4, ..Default::default() };
        Word2VecTrainer::new(config)
            .with_min_frequency(1)
            .with_progress_listener(Arc::new(move |stage, fraction| sink.lock().push((stage, fraction))))
            .train(&clustered_corpus())
            .unwrap();

        let seen = seen.lock();
        let stages: Vec<Stage> = seen.iter().map(|(s, _)| *s).collect();
        for stage in [Stage::AcquireVocab, Stage::FilterSortVocab, Stage::EncodeHuffman, Stage::Train] {
            let values: Vec<f64> = seen.iter().filter(|(s, _)| *s == stage).map(|(_, f)| *f).collect();
            assert!(!values.is_empty());
            assert!(values.windows(2).all(|w| w[0] <= w[1]), "{:?}: {:?}", stage, values);
            assert!(values.iter().all(|f| (0.0..=1.0).contains(f)));
            assert_eq!(*values.last().unwrap(), 1.0);
        }
        // stages run in order
        let first_train = stages.iter().position(|s| *s == Stage::Train).unwrap();
        assert!(stages[..first_train].iter().all(|s| *s != Stage::Train));
        assert!(seen.iter().filter(|(s, _)| *s == Stage::Train).count() > 2);
    }

    #[test]
    fn reporter_drops_stale_values_test() {
        let seen: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reporter = ProgressReporter::new(Some(Arc::new(move |_, f| sink.lock().push(f))));
        reporter.update(Stage::Train, 0.2);
        reporter.update(Stage::Train, 0.1);
        reporter.update(Stage::Train, 0.5);
        reporter.update(Stage::Train, 7.0);
        assert_eq!(*seen.lock(), vec![0.2, 0.5, 1.0]);
    }
}
