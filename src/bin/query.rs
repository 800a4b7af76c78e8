use std::{env, error::Error, fs::File, io::{self, BufRead}};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use word2vec_trainer::{files_handling, Searcher, Token, TrainedModel, Word2VecError};


// checks on trained vectors:
// the K most similar tokens to a given token,
// the K best completions of an analogy between tokens.
// a separate binary so it can be ran against any saved model

fn main() -> Result<(), Box<dyn Error>> {

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("word2vec_trainer=info".parse()?))
        .init();

    // arguments to this executable should be:
    // a letter selector: "a" for analogies, "b" for token similarity
    // path to input based on selector (quads or singles)
    // path to the saved model, without the .bin extension
    // example: ... a Input/analogies.txt Output/model
    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        return Err("expected a selector, a path to inputs and a path to the saved model".into());
    }
    let selector = args[1].as_str();
    if !["a", "b"].contains(&selector) {
        return Err(format!("unrecognized pattern in first argument {}", selector).into());
    }

    // read inputs file, one whitespace separated group of token ids per line
    let lines = io::BufReader::new(File::open(&args[2])?).lines();
    let mut inputs: Vec<Vec<Token>> = Vec::new();
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        inputs.push(line.split_whitespace().map(|t| t.parse::<Token>()).collect::<Result<Vec<Token>, _>>()?);
    }

    let model = files_handling::read_input::<TrainedModel>(&args[3])?;
    let searcher = Searcher::new(model);
    info!(tokens = searcher.model().len(), layer_size = searcher.model().layer_size(), "loaded model from {}", args[3]);

    match selector {
        "a" => run_analogies(&inputs, 10, &searcher),
        _ => run_similarity(&inputs, 10, &searcher),
    }
}


fn run_analogies(inputs: &[Vec<Token>], k: usize, searcher: &Searcher) -> Result<(), Box<dyn Error>> {

    // each input holds 4 tokens, the object is to find the analogy
    // of the combination of the first 3, in hope that it would match the 4th.
    // a is to b as c is to ?  translates to  b - a + c : ?

    for input in inputs {

        if input.len() != 4 {
            return Err(format!("analogy lines hold exactly 4 tokens, got {:?}", input).into());
        }
        let (a, b, c, target) = (input[0], input[1], input[2], input[3]);

        let analogies = match searcher.similarity(a, b).and_then(|diff| diff.matches(c, k)) {
            Ok(analogies) => analogies,
            Err(Word2VecError::UnknownToken(t)) => {
                warn!("token {} is not in the model, skipping {:?}", t, input);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let mut found_target = false;
        for (i, m) in analogies.iter().enumerate() {
            println!("{} : {} - {} + {} ? {} = {:.4}", i, b, a, c, m.token, m.distance);
            if m.token == target {
                found_target = true;
                println!("found target '{}' analogy in place {}", target, 1 + i);
            }
        }

        if !found_target {
            println!("target '{}' was not found within the first {} analogies", target, k);
        }

        println!();
    }
    Ok(())
}

fn run_similarity(inputs: &[Vec<Token>], k: usize, searcher: &Searcher) -> Result<(), Box<dyn Error>> {

    // finding the k nearest tokens to each of the input tokens

    for token in inputs.iter().flatten() {

        println!("searching {} nearest tokens to {}", k, token);
        let matches = match searcher.matches(*token, k) {
            Ok(matches) => matches,
            Err(Word2VecError::UnknownToken(t)) => {
                warn!("token {} is not in the model", t);
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        for (i, m) in matches.iter().enumerate() {
            println!("{} : {} ? {} = {:.4}", i, token, m.token, m.distance);
        }
        println!();
    }

    Ok(())
}
