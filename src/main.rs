use std::error::Error;

use tracing_subscriber::EnvFilter;
use word2vec_trainer::Pipeline;

// file preprocess (outside this binary):
// tokenize, map every word to an integer id, one sentence per line

fn main() -> Result<(), Box<dyn Error>> {

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("word2vec_trainer=info".parse()?))
        .init();

    Pipeline::run()
}
