use serde_json::Value;
use std::{fmt::Display, fs::File, io::BufReader, str::FromStr};

use crate::error::{Result, Word2VecError};


/// Which side of the window predicts the other.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Architecture {
    /// Averaged context predicts the centre token.
    Cbow,
    /// Centre token predicts every context token.
    SkipGram,
}

/// How the output layer approximates the full softmax.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LossMode {
    HierarchicalSoftmax,
    NegativeSampling,
}

impl FromStr for Architecture {
    type Err = Word2VecError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cbow" => Ok(Self::Cbow),
            "skip_gram" => Ok(Self::SkipGram),
            _ => Err(Word2VecError::InvalidConfig(format!("unknown architecture {:?} (expected \"cbow\" or \"skip_gram\")", s))),
        }
    }
}

impl FromStr for LossMode {
    type Err = Word2VecError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hierarchical_softmax" => Ok(Self::HierarchicalSoftmax),
            "negative_sampling" => Ok(Self::NegativeSampling),
            _ => Err(Word2VecError::InvalidConfig(format!(
                "unknown loss mode {:?} (expected \"hierarchical_softmax\" or \"negative_sampling\")", s
            ))),
        }
    }
}


#[derive(Clone, Debug, PartialEq)]
pub struct NeuralNetworkConfig {
    pub architecture: Architecture,
    pub loss_mode: LossMode,
    pub layer_size: usize,
    pub window_size: usize,
    /// Ignored under hierarchical softmax.
    pub negative_samples: usize,
    pub initial_learning_rate: f32,
    pub num_epochs: usize,
    pub down_sample_rate: Option<f64>,
    pub num_threads: usize,
    pub random_seed: u64,
}

impl Default for NeuralNetworkConfig {
    fn default() -> Self {
        Self {
            architecture: Architecture::Cbow,
            loss_mode: LossMode::HierarchicalSoftmax,
            layer_size: 100,
            window_size: 5,
            negative_samples: 5,
            initial_learning_rate: 0.025,
            num_epochs: 5,
            down_sample_rate: None,
            num_threads: 1,
            random_seed: 1,
        }
    }
}

impl NeuralNetworkConfig {

    /// Rejects settings that would make training meaningless, before any work starts.
    pub fn validate(&self) -> Result<()> {

        let invalid = |msg: &str| Err(Word2VecError::InvalidConfig(msg.to_string()));

        if self.layer_size == 0 {
            return invalid("layer_size must be positive");
        }
        if self.window_size == 0 {
            return invalid("window_size must be positive");
        }
        if !(self.initial_learning_rate.is_finite() && self.initial_learning_rate > 0.0) {
            return invalid("learning_rate must be a positive number");
        }
        if self.num_epochs == 0 {
            return invalid("epochs must be at least 1");
        }
        if self.num_threads == 0 {
            return invalid("num_threads must be at least 1");
        }
        if let Some(rate) = self.down_sample_rate {
            if !(rate.is_finite() && rate > 0.0) {
                return invalid("down_sample_rate must be a positive number");
            }
        }
        Ok(())
    }
}

impl Display for NeuralNetworkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "network hyper parameters:
        architecture: {:?},
        loss_mode: {:?},
        layer_size: {},
        window_size: {},
        negative_samples: {},
        learning_rate: {},
        epochs: {},
        down_sample_rate: {:?},
        num_threads: {},
        seed: {}",
        self.architecture, self.loss_mode, self.layer_size, self.window_size, self.negative_samples,
        self.initial_learning_rate, self.num_epochs, self.down_sample_rate, self.num_threads, self.random_seed
        )
    }
}


#[derive(Clone, Debug)]
pub struct JsonTypes {
    pub corpus_file: String,
    pub output_dir: String,
    pub min_frequency: u64,
    pub network: NeuralNetworkConfig,
}

impl Display for JsonTypes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "using hyper-params:
        corpus_file: {}
        output_dir: {}
        min_frequency: {},
        Using {}",
        self.corpus_file, self.output_dir, self.min_frequency, self.network)
    }
}

pub struct Config {
    params: JsonTypes
}

impl Config {

    pub fn get_params(&self) -> JsonTypes {
        self.params.clone()
    }

    /// Expects exactly one argument after the program name: the path to a json file.
    pub fn new(args: &[String]) -> Result<Config> {

        if args.len() != 2 {
            return Err(Word2VecError::InvalidConfig("input should be a path to json file only".to_string()));
        }

        let f = BufReader::new(File::open(&args[1])?);
        let json: Value = serde_json::from_reader(f)?;
        Config::from_json(&json)
    }

    pub fn from_json(json: &Value) -> Result<Config> {

        // required paths
        let corpus_file = required_str(json, "corpus_file")?;
        let output_dir = required_str(json, "output_dir")?;

        // handle default vs input parameters
        let defaults = NeuralNetworkConfig::default();
        let architecture = match json.get("architecture") {
            Some(v) => as_str(v, "architecture")?.parse()?,
            None => defaults.architecture
        };
        let loss_mode = match json.get("loss_mode") {
            Some(v) => as_str(v, "loss_mode")?.parse()?,
            None => defaults.loss_mode
        };
        let down_sample_rate = match json.get("down_sample_rate") {
            Some(Value::Null) | None => None,
            Some(v) => Some(as_f64(v, "down_sample_rate")?),
        };

        let network = NeuralNetworkConfig {
            architecture,
            loss_mode,
            layer_size: usize_or(json, "layer_size", defaults.layer_size)?,
            window_size: usize_or(json, "window_size", defaults.window_size)?,
            negative_samples: usize_or(json, "negative_samples", defaults.negative_samples)?,
            initial_learning_rate: match json.get("learning_rate") {
                Some(v) => as_f64(v, "learning_rate")? as f32,
                None => defaults.initial_learning_rate
            },
            num_epochs: usize_or(json, "epochs", defaults.num_epochs)?,
            down_sample_rate,
            num_threads: usize_or(json, "num_threads", defaults.num_threads)?,
            random_seed: match json.get("seed") {
                Some(v) => as_u64(v, "seed")?,
                None => defaults.random_seed
            },
        };
        network.validate()?;

        let params = JsonTypes {
            corpus_file,
            output_dir,
            min_frequency: match json.get("min_frequency") {
                Some(v) => as_u64(v, "min_frequency")?,
                None => 5
            },
            network,
        };

        Ok(Self { params })
    }
}

fn required_str(json: &Value, key: &str) -> Result<String> {
    match json.get(key) {
        Some(v) => Ok(as_str(v, key)?.to_owned()),
        None => Err(Word2VecError::InvalidConfig(format!("{} was not supplied through json", key))),
    }
}

fn as_str<'v>(v: &'v Value, key: &str) -> Result<&'v str> {
    v.as_str().ok_or_else(|| Word2VecError::InvalidConfig(format!("given {} is not a string", key)))
}

fn as_f64(v: &Value, key: &str) -> Result<f64> {
    v.as_f64().ok_or_else(|| Word2VecError::InvalidConfig(format!("given {} is not numeric", key)))
}

fn as_u64(v: &Value, key: &str) -> Result<u64> {
    v.as_u64().ok_or_else(|| Word2VecError::InvalidConfig(format!("given {} is not a non-negative integer", key)))
}

fn usize_or(json: &Value, key: &str, default: usize) -> Result<usize> {
    match json.get(key) {
        Some(v) => Ok(as_u64(v, key)? as usize),
        None => Ok(default)
    }
}


pub mod files_handling {

    //! Reading corpora and writing/reading trained artifacts.
    //!
    //! Outputs land in `<output_dir>/<file_name>.<ext>`, the extension picked by the
    //! item type: `.bin` for a whole model, `.npy` for the vector matrix, `.json` for
    //! the vocabulary ordering.

    use std::fs::{self, File};
    use std::io::{BufRead, BufReader, BufWriter, Read, Write};
    use std::path::Path;

    use flate2::read::GzDecoder;
    use ndarray::Array2;
    use ndarray_npy::write_npy;

    use crate::error::{Result, Word2VecError};
    use crate::model::TrainedModel;
    use crate::vocab::Token;

    /// Integer-coded sentences, one per non-empty line.
    pub type Corpus = Vec<Vec<Token>>;

    pub fn read_input<R: ReadFile>(file_path: &str) -> Result<R> {
        R::read_file(file_path)
    }

    pub fn save_output<S: SaveFile>(output_dir: &str, file_name: &str, item: &S) -> Result<()> {
        fs::create_dir_all(output_dir)?;
        item.save_file(output_dir, file_name)
    }

    fn out_path(output_dir: &str, file_name: &str, ext: &str) -> String {
        Path::new(output_dir).join(format!("{}.{}", file_name, ext)).display().to_string()
    }

    pub trait ReadFile: Sized {
        fn read_file(file_path: &str) -> Result<Self>;
    }

    pub trait SaveFile {
        fn save_file(&self, output_dir: &str, file_name: &str) -> Result<()>;
    }

    impl ReadFile for Corpus {
        // whitespace separated token ids; a `.gz` suffix means gzip compressed
        fn read_file(file_path: &str) -> Result<Self> {

            let f = File::open(file_path)?;
            let reader: Box<dyn Read> = if file_path.ends_with(".gz") {
                Box::new(GzDecoder::new(BufReader::new(f)))
            } else {
                Box::new(f)
            };

            let mut sentences: Corpus = Vec::new();
            for (i, line) in BufReader::new(reader).lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let sentence = line
                    .split_whitespace()
                    .map(|tok| tok.parse::<Token>().map_err(|e| Word2VecError::Parse {
                        line: i + 1,
                        msg: format!("{:?}: {}", tok, e),
                    }))
                    .collect::<Result<Vec<Token>>>()?;
                sentences.push(sentence);
            }
            Ok(sentences)
        }
    }

    impl ReadFile for TrainedModel {
        fn read_file(file_path: &str) -> Result<Self> {
            let f = BufReader::new(File::open(file_path.to_string() + ".bin")?);
            Ok(bincode::deserialize_from(f)?)
        }
    }

    impl ReadFile for Vec<Token> {
        fn read_file(file_path: &str) -> Result<Self> {
            let f = BufReader::new(File::open(file_path.to_string() + ".json")?);
            Ok(serde_json::from_reader(f)?)
        }
    }

    impl SaveFile for TrainedModel {
        fn save_file(&self, output_dir: &str, file_name: &str) -> Result<()> {
            let mut f = BufWriter::new(File::create(out_path(output_dir, file_name, "bin"))?);
            bincode::serialize_into(&mut f, self)?;
            f.flush()?;
            Ok(())
        }
    }

    impl SaveFile for Array2<f32> {
        fn save_file(&self, output_dir: &str, file_name: &str) -> Result<()> {
            write_npy(out_path(output_dir, file_name, "npy"), self)?;
            Ok(())
        }
    }

    impl SaveFile for Vec<Token> {
        fn save_file(&self, output_dir: &str, file_name: &str) -> Result<()> {
            let mut f = BufWriter::new(File::create(out_path(output_dir, file_name, "json"))?);
            serde_json::to_writer(&mut f, self)?;
            f.flush()?;
            Ok(())
        }
    }


}
