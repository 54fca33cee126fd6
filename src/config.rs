
use crate::error::{LdaError, Result};
use crate::files_handling::SnapshotKind;

use serde::Deserialize;
use std::fmt::Display;
use std::fs::File;
use std::io::BufReader;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    Svi,
    Gibbs,
}

// what corpus_file points at
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    #[default]
    Corpus,        // the labelled tab separated corpus
    IndexFiles,    // a directory holding the layout's verbs, nouns and tokens files
}

/// How the SVI engine picks the next document of a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentOrder {
    RoundRobin,
    UniformRandom,
}

/// How Dirichlet parameters are turned into a distribution for the artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointEstimate {
    /// the mode, falling back to the mean where the mode is undefined
    Mode,
    Mean,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainParams {
    pub topic_count: usize,
    /// document-topic prior, defaults to 1/K (svi) or 50/K (gibbs)
    pub alpha: Option<f64>,
    /// topic-noun prior (`eta` for svi, the smoothing `gamma` for gibbs), defaults to 1/K (svi) or 0.01 (gibbs)
    pub eta: Option<f64>,
    /// rounds for svi, sweeps for gibbs
    pub iterations: usize,
    pub step_size_exponent: f64,
    pub convergence_threshold: f64,
    pub max_inner_iters: usize,
    pub document_order: DocumentOrder,
    pub reseed_on_every_visit: bool,
    pub strict_convergence: bool,
    pub point_estimate: PointEstimate,
    pub burnin: usize,
    pub lag: usize,
    pub num_samps_per_lag: usize,
    pub checkpoint_interval: usize,
    pub seed: Option<u64>,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            topic_count: 300,
            alpha: None,
            eta: None,
            iterations: 1000,
            step_size_exponent: 0.7,
            convergence_threshold: 0.01,
            max_inner_iters: 100,
            document_order: DocumentOrder::UniformRandom,
            reseed_on_every_visit: false,
            strict_convergence: false,
            point_estimate: PointEstimate::Mode,
            burnin: 750,
            lag: 50,
            num_samps_per_lag: 5,
            checkpoint_interval: 100,
            seed: None,
        }
    }
}

impl TrainParams {

    pub fn svi_alpha(&self) -> f64 {
        self.alpha.unwrap_or(1.0 / self.topic_count as f64)
    }

    pub fn svi_eta(&self) -> f64 {
        self.eta.unwrap_or(1.0 / self.topic_count as f64)
    }

    pub fn gibbs_alpha(&self) -> f64 {
        self.alpha.unwrap_or(50.0 / self.topic_count as f64)
    }

    pub fn gibbs_gamma(&self) -> f64 {
        self.eta.unwrap_or(0.01)
    }

    pub fn validate(&self) -> Result<()> {

        let fail = |msg: String| Err(LdaError::Config(msg));

        if self.topic_count == 0 {
            return fail("topic_count must be positive".into());
        }
        for (name, prior) in [("alpha", self.alpha), ("eta", self.eta)] {
            if let Some(p) = prior {
                if !(p > 0.0 && p.is_finite()) {
                    return fail(format!("{} must be a positive number, got {}", name, p));
                }
            }
        }
        if !(self.step_size_exponent > 0.5 && self.step_size_exponent <= 1.0) {
            return fail(format!("step_size_exponent must lie in (0.5, 1], got {}", self.step_size_exponent));
        }
        if !(self.convergence_threshold > 0.0) {
            return fail(format!("convergence_threshold must be positive, got {}", self.convergence_threshold));
        }
        if self.max_inner_iters == 0 {
            return fail("max_inner_iters must be positive".into());
        }
        if self.lag == 0 {
            return fail("lag must be positive".into());
        }
        if self.num_samps_per_lag == 0 || self.num_samps_per_lag > self.lag {
            return fail(format!("num_samps_per_lag must lie in 1..={}, got {}", self.lag, self.num_samps_per_lag));
        }
        Ok(())
    }
}

impl Display for TrainParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "training hyper parameters:
        topic_count: {},
        alpha: {:?},
        eta: {:?},
        iterations: {},
        step_size_exponent: {},
        convergence_threshold: {},
        max_inner_iters: {},
        document_order: {:?},
        reseed_on_every_visit: {},
        strict_convergence: {},
        point_estimate: {:?},
        burnin: {},
        lag: {},
        num_samps_per_lag: {},
        checkpoint_interval: {},
        seed: {:?}",
        self.topic_count, self.alpha, self.eta, self.iterations, self.step_size_exponent,
        self.convergence_threshold, self.max_inner_iters, self.document_order, self.reseed_on_every_visit,
        self.strict_convergence, self.point_estimate, self.burnin, self.lag, self.num_samps_per_lag,
        self.checkpoint_interval, self.seed
        )
    }
}

/// File names inside a model directory.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnapshotLayout {
    pub verbs: String,
    pub nouns: String,
    pub tokens: String,
    pub corpus_cache: String,
    pub lambda_prefix: String,
    pub beta_prefix: String,
    pub theta_prefix: String,
    pub beta_final: String,
    pub theta_final: String,
    pub assignments: String,
    /// `txt`, `txt.gz` or `npy`
    pub extension: String,
}

impl Default for SnapshotLayout {
    fn default() -> Self {
        Self {
            verbs: "verbIdx.txt".into(),
            nouns: "nounIdx.txt".into(),
            tokens: "vnIdx.txt".into(),
            corpus_cache: "corpus.bin".into(),
            lambda_prefix: "lambdaAtIter".into(),
            beta_prefix: "betaAtIter".into(),
            theta_prefix: "thetaAtIter".into(),
            beta_final: "beta".into(),
            theta_final: "theta".into(),
            assignments: "z".into(),
            extension: "txt".into(),
        }
    }
}

impl SnapshotLayout {

    pub fn matrix_file(&self, kind: SnapshotKind, iteration: Option<usize>) -> String {
        let stem = match (kind, iteration) {
            (SnapshotKind::Lambda, Some(i)) => format!("{}{}", self.lambda_prefix, i),
            (SnapshotKind::Beta, Some(i)) => format!("{}{}", self.beta_prefix, i),
            (SnapshotKind::Theta, Some(i)) => format!("{}{}", self.theta_prefix, i),
            // the final lambda is only ever written as a checkpoint
            (SnapshotKind::Lambda, None) => self.lambda_prefix.clone(),
            (SnapshotKind::Beta, None) => self.beta_final.clone(),
            (SnapshotKind::Theta, None) => self.theta_final.clone(),
        };
        format!("{}.{}", stem, self.extension)
    }

    pub fn assignments_file(&self) -> String {
        format!("{}.txt", self.assignments)
    }

    /// Recovers the iteration from a checkpoint file name, e.g. `thetaAtIter40.txt` -> 40.
    pub fn parse_iteration(&self, kind: SnapshotKind, file_name: &str) -> Option<usize> {
        let prefix = match kind {
            SnapshotKind::Lambda => &self.lambda_prefix,
            SnapshotKind::Beta => &self.beta_prefix,
            SnapshotKind::Theta => &self.theta_prefix,
        };
        file_name
            .strip_prefix(prefix.as_str())?
            .strip_suffix(self.extension.as_str())?
            .strip_suffix('.')?
            .parse()
            .ok()
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunParams {
    pub corpus_file: String,
    pub output_dir: String,
    pub engine: Engine,
    #[serde(default)]
    pub input: InputFormat,
    #[serde(default)]
    pub reuse_corpus_cache: bool,
    /// gibbs only, start the chain from a saved assignment file
    #[serde(default)]
    pub initial_assignments: Option<String>,
    #[serde(default)]
    pub snapshot_layout: SnapshotLayout,
    #[serde(default)]
    pub train: TrainParams,
}

impl Display for RunParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "using hyper-params:
        corpus_file: {}
        output_dir: {}
        engine: {:?}
        input: {:?}
        reuse_corpus_cache: {}
        initial_assignments: {:?}
        snapshot extension: {},
        Using training hyper-params: {}",
        self.corpus_file, self.output_dir, self.engine, self.input, self.reuse_corpus_cache,
        self.initial_assignments, self.snapshot_layout.extension, self.train)
    }
}

pub struct Config {
    params: RunParams
}

impl Config {

    pub fn get_params(&self) -> RunParams {
        self.params.clone()
    }

    pub fn new(args: &[String]) -> Result<Config> {

        if args.len() != 2 {
            return Err(LdaError::Config("input should be a path to json file only".into()));
        }

        // parse input json
        let f = BufReader::new(File::open(&args[1])?);
        let params: RunParams = serde_json::from_reader(f)?;
        Self::checked(params)
    }

    pub fn from_json_str(json: &str) -> Result<Config> {
        let params: RunParams = serde_json::from_str(json)?;
        Self::checked(params)
    }

    fn checked(params: RunParams) -> Result<Config> {
        params.train.validate()?;
        if !["txt", "txt.gz", "npy"].contains(&params.snapshot_layout.extension.as_str()) {
            return Err(LdaError::Config(format!(
                "unsupported snapshot extension '{}'",
                params.snapshot_layout.extension
            )));
        }
        if params.initial_assignments.is_some() && params.engine != Engine::Gibbs {
            return Err(LdaError::Config("initial_assignments only applies to the gibbs engine".into()));
        }
        Ok(Self { params })
    }
}
