use log::error;
use rayon::prelude::*;
use selpref_lda::{LdaError, LdaModel, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::{env, process};


// looks into a trained model directory, treated as a binary so it can run independently from main:
// "t" prints the most probable nouns of every topic,
// "v" prints the best topic of every verb,
// "p" scores "verb noun" pairs read from a file, one pair per line.
// example: ... t Output/model 10

fn main() {

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().collect();
    if let Err(e) = inspect(&args) {
        error!("{}", e);
        process::exit(1);
    }
}

fn usage() -> LdaError {
    LdaError::Config("usage: inspect <t|v|p> <model_dir> [top_k | pairs_file]".into())
}

fn inspect(args: &[String]) -> Result<()> {

    if args.len() < 3 {
        return Err(usage());
    }
    let model = LdaModel::load(Path::new(&args[2]))?;

    match args[1].as_str() {
        "t" => {
            let k = match args.get(3) {
                Some(k) => k.parse().map_err(|_| usage())?,
                None => 10,
            };
            run_topics(&model, k)
        }
        "v" => run_verbs(&model),
        "p" => {
            let path = args.get(3).ok_or_else(usage)?;
            run_pairs(&model, Path::new(path))
        }
        _ => Err(usage()),
    }
}

fn run_topics(model: &LdaModel, k: usize) -> Result<()> {

    // summaries are independent per topic
    let summaries: Vec<Vec<(String, f64)>> = (0..model.topic_count())
        .into_par_iter()
        .map(|topic| model.top_nouns(topic, k))
        .collect::<Result<Vec<_>>>()?;

    for (topic, nouns) in summaries.iter().enumerate() {
        let line: Vec<String> = nouns.iter().map(|(noun, p)| format!("{}:{:.4}", noun, p)).collect();
        println!("topic {} : {}", topic, line.join(" "));
    }
    Ok(())
}

fn run_verbs(model: &LdaModel) -> Result<()> {

    for v in 0..model.verb_count() {
        let (topic, p) = model.best_topic(v)?;
        println!("{}\t{}\t{:.4}", model.verb(v)?, topic, p);
    }
    Ok(())
}

fn run_pairs(model: &LdaModel, path: &Path) -> Result<()> {

    let lines = BufReader::new(File::open(path)?).lines();
    for line in lines {
        let line = line?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 2 {
            continue;
        }
        match model.pair_probability(fields[0], fields[1]) {
            Ok(p) => println!("{}\t{}\t{:.6}", fields[0], fields[1], p),
            Err(e @ LdaError::NotFound { .. }) => println!("{}\t{}\t{}", fields[0], fields[1], e),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
