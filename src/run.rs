
// imports
use crate::config::{Config, Engine, InputFormat, RunParams, TrainParams};
use crate::corpus::CorpusIndex;
use crate::engine::{train, Artifact};
use crate::error::Result;
use crate::files_handling::{read_input, save_output, Assignments, SnapshotDir, SnapshotSink};
use crate::gibbs::GibbsSampler;
use crate::model::LdaModel;
use crate::svi::SviTrainer;

use log::info;
use std::path::Path;
use std::time::Instant;

pub struct Run {}

impl Run {

    // runs the main procedure of 3 steps -
    // -> configuration of arguments
    // -> corpus ingestion (or loading the cached corpus)
    // -> training and saving the model

    pub fn run(args: &[String]) -> Result<LdaModel> {

        info!("building parameters...");
        let params = Config::new(args)?.get_params();
        Self::run_params(&params)
    }

    pub fn run_params(params: &RunParams) -> Result<LdaModel> {

        info!("{}", params);
        let output_dir = Path::new(&params.output_dir);
        let layout = &params.snapshot_layout;

        let timer = Instant::now();
        let corpus = Self::corpus(params)?;
        info!("corpus ready, took {} seconds ...", timer.elapsed().as_secs());

        // the index files let consumers map ids back to tokens
        save_output(output_dir, &layout.verbs, corpus.verbs())?;
        save_output(output_dir, &layout.nouns, corpus.nouns())?;
        save_output(output_dir, &layout.tokens, &corpus.token_pairs())?;

        let mut sink = SnapshotDir::create(output_dir, layout.clone())?;
        let initial = match &params.initial_assignments {
            Some(path) => {
                info!("resuming assignments from {}", path);
                let z: Assignments = read_input(Path::new(path))?;
                Some(z.0)
            }
            None => None,
        };
        let artifact = train_corpus(&corpus, params.engine, &params.train, initial, &mut sink)?;
        artifact.save(&mut sink)?;
        info!("saved model to {}", sink.dir().display());

        LdaModel::from_artifact(artifact, corpus.verbs().clone(), corpus.nouns().clone())
    }

    fn corpus(params: &RunParams) -> Result<CorpusIndex> {

        let cache = Path::new(&params.output_dir).join(&params.snapshot_layout.corpus_cache);
        if params.reuse_corpus_cache && cache.exists() {
            info!("loading cached corpus from {}", cache.display());
            return read_input(&cache);
        }

        let corpus = match params.input {
            InputFormat::Corpus => CorpusIndex::load(Path::new(&params.corpus_file))?,
            InputFormat::IndexFiles => {
                let dir = Path::new(&params.corpus_file);
                let layout = &params.snapshot_layout;
                info!("rebuilding corpus from the index files in {}", dir.display());
                CorpusIndex::from_index_files(&dir.join(&layout.verbs), &dir.join(&layout.nouns), &dir.join(&layout.tokens))?
            }
        };
        save_output(Path::new(&params.output_dir), &params.snapshot_layout.corpus_cache, &corpus)?;
        Ok(corpus)
    }
}

/// Trains the selected engine on `corpus`, handing checkpoints to `sink`.
/// `initial` optionally seeds the gibbs chain with saved assignments.
pub fn train_corpus(
    corpus: &CorpusIndex,
    engine: Engine,
    params: &TrainParams,
    initial: Option<Vec<usize>>,
    sink: &mut dyn SnapshotSink,
) -> Result<Artifact> {

    match engine {
        Engine::Svi => train(SviTrainer::new(corpus, params)?, params.iterations, sink),
        Engine::Gibbs => {
            let sampler = match initial {
                Some(z) => GibbsSampler::from_assignments(corpus, params, z)?,
                None => GibbsSampler::new(corpus, params)?,
            };
            train(sampler, params.iterations, sink)
        }
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::engine::ROW_SUM_TOLERANCE;
    use std::fs;

    const CORPUS: &str = "eat\tapple\t5\t1\n\
                          eat\tbread\t2\t1\n\
                          drink\twater\t6\t1\n\
                          drink\tbread\t3\t0\n\
                          \n\
                          drink\tjuice\t1\t1\n";

    fn write_config(dir: &Path, engine: &str, extra: &str) -> Vec<String> {
        let corpus = dir.join("train.tsv");
        fs::write(&corpus, CORPUS).unwrap();
        let config = dir.join("config.json");
        let json = format!(
            r#"{{
                "corpus_file": "{}",
                "output_dir": "{}",
                "engine": "{}",
                {}
                "train": {{"topic_count": 2, "iterations": 20, "burnin": 5, "lag": 2, "num_samps_per_lag": 1,
                           "checkpoint_interval": 10, "seed": 9}}
            }}"#,
            corpus.display(), dir.join("model").display(), engine, extra
        );
        fs::write(&config, json).unwrap();
        vec!["selpref_lda".to_string(), config.display().to_string()]
    }

    #[test]
    fn gibbs_run_writes_a_loadable_model() {

        let dir = tempfile::tempdir().unwrap();
        let args = write_config(dir.path(), "gibbs", "");
        let model = Run::run(&args).unwrap();

        let model_dir = dir.path().join("model");
        for name in ["verbIdx.txt", "nounIdx.txt", "vnIdx.txt", "corpus.bin", "z.txt", "beta.txt", "theta.txt",
                     "betaAtIter10.txt", "thetaAtIter10.txt"] {
            assert!(model_dir.join(name).exists(), "{} is missing", name);
        }

        // the negative record never reaches the token file
        let tokens = fs::read_to_string(model_dir.join("vnIdx.txt")).unwrap();
        assert_eq!(tokens.lines().count(), 14);

        let loaded = LdaModel::load(&model_dir).unwrap();
        assert_eq!(loaded.verb_count(), 2);
        assert_eq!(loaded.noun_count(), 4);
        assert_eq!(loaded.beta(), model.beta());
        let row_sums = loaded.theta().sum_axis(ndarray::Axis(1));
        assert!(row_sums.iter().all(|s| (s - 1.0).abs() < ROW_SUM_TOLERANCE));
    }

    #[test]
    fn svi_run_reuses_the_corpus_cache() {

        let dir = tempfile::tempdir().unwrap();
        let args = write_config(dir.path(), "svi", r#""reuse_corpus_cache": true,"#);
        Run::run(&args).unwrap();
        assert!(dir.path().join("model").join("lambdaAtIter10.txt").exists());

        // with the cache in place the corpus file is no longer read
        fs::write(dir.path().join("train.tsv"), "not a corpus").unwrap();
        let model = Run::run(&args).unwrap();
        assert_eq!(model.verb(0).unwrap(), "eat");
        assert!(model.pair_probability("drink", "water").unwrap() > 0.0);
    }

    #[test]
    fn gibbs_resumes_from_saved_assignments() {

        let dir = tempfile::tempdir().unwrap();
        let args = write_config(dir.path(), "gibbs", "");
        Run::run(&args).unwrap();

        let z_path = dir.path().join("model").join("z.txt");
        let resumed = write_config(
            dir.path(),
            "gibbs",
            &format!(r#""initial_assignments": "{}","#, z_path.display()),
        );
        let model = Run::run(&resumed).unwrap();
        assert_eq!(model.topic_count(), 2);
    }

    #[test]
    fn trains_from_index_files_with_an_idle_verb() {

        let dir = tempfile::tempdir().unwrap();
        let index_dir = dir.path().join("index");
        fs::create_dir(&index_dir).unwrap();
        fs::write(index_dir.join("verbIdx.txt"), "eat\ndrink\nread\n").unwrap();
        fs::write(index_dir.join("nounIdx.txt"), "apple\nwater\n").unwrap();
        fs::write(index_dir.join("vnIdx.txt"), "1,1\n1,1\n2,2\n2,2\n").unwrap();

        for engine in ["gibbs", "svi"] {
            let args = write_config(dir.path(), engine, r#""input": "index_files","#);
            // corpus_file now names the directory of index files
            let config_path = Path::new(&args[1]);
            let json = fs::read_to_string(config_path).unwrap().replace(
                &dir.path().join("train.tsv").display().to_string(),
                &index_dir.display().to_string(),
            );
            fs::write(config_path, json).unwrap();

            let model = Run::run(&args).unwrap();
            assert_eq!(model.verb_count(), 3);
            assert_eq!(model.verb(2).unwrap(), "read");
            for t in 0..2 {
                assert!((model.pr_topic_for_verb(t, "read").unwrap() - 0.5).abs() < 1e-9, "{}", engine);
            }
        }
    }

    #[test]
    fn malformed_corpus_stops_the_run() {

        let dir = tempfile::tempdir().unwrap();
        let args = write_config(dir.path(), "svi", "");
        fs::write(dir.path().join("train.tsv"), "eat\tapple\t5\n").unwrap();
        assert!(matches!(
            Run::run(&args),
            Err(crate::error::LdaError::MalformedRecord { line: 1, .. })
        ));
    }
}
