
// imports
use crate::config::{files_handling, Config};
use crate::config::files_handling::Corpus;
use crate::train::Word2VecTrainer;

use std::env;
use std::error::Error;
use std::time::Instant;
use tracing::info;

pub struct Pipeline {}

impl Pipeline {

    // runs the main procedure of 3 steps -
    // -> configuration of arguments
    // -> corpus loading
    // -> training (vocab, huffman tree, network) and saving

    pub fn run() -> Result<(), Box<dyn Error>> {

        info!("entering program...");
        let args: Vec<String> = env::args().collect();

        info!("building parameters...");
        let params = Config::new(&args)?.get_params();
        info!("{}", params);

        let timer = Instant::now();
        let corpus = files_handling::read_input::<Corpus>(&params.corpus_file)?;
        let tokens: usize = corpus.iter().map(|s| s.len()).sum();
        info!("loaded {} sentences ({} tokens), took {} seconds ...", corpus.len(), tokens, timer.elapsed().as_secs());

        let timer = Instant::now();
        let model = Word2VecTrainer::new(params.network.clone())
            .with_min_frequency(params.min_frequency)
            .train(&corpus)?;
        info!("finished training {} vectors, took {} seconds ...", model.len(), timer.elapsed().as_secs());

        // trained model for the query binary, plus plain vecs and tokens for external tooling
        files_handling::save_output(&params.output_dir, "model", &model)?;
        files_handling::save_output(&params.output_dir, "vecs", &model.to_array())?;
        files_handling::save_output(&params.output_dir, "vocab", &model.vocabulary().to_vec())?;
        info!("saved outputs to {}", params.output_dir);

        Ok(())
    }

}
