
use crate::config::TrainParams;
use crate::corpus::{CorpusIndex, NounId, VerbId};
use crate::engine::{Artifact, InferenceEngine};
use crate::error::{CountTable, LdaError, Result};
use crate::files_handling::{SnapshotKind, SnapshotSink};
use crate::numeric::sample_multinomial;

use log::{info, warn};
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// collapsed gibbs sampler over token level topic assignments.
// the count tables always decompose z: cwt[n][k] counts tokens of noun n assigned topic k,
// cvt[v][k] the same per verb, the two marginals are their row and column sums
pub struct GibbsSampler<'a> {
    corpus: &'a CorpusIndex,
    topic_count: usize,
    alpha: f64,
    gamma: f64,
    burnin: usize,
    lag: usize,
    num_samps_per_lag: usize,
    checkpoint_interval: usize,
    tokens: Vec<(VerbId, NounId)>,
    z: Vec<usize>,
    cwt: Array2<u64>,              // N x K
    cvt: Array2<u64>,              // V x K
    nouns_in_topic: Array1<u64>,   // K
    nouns_with_verb: Array1<u64>,  // V
    cum_beta: Array2<f64>,
    cum_theta: Array2<f64>,
    total_samples: usize,
    sampled_last_sweep: bool,
    weights: Vec<f64>,
    rng: StdRng,
}

fn decrement(cell: &mut u64, table: CountTable, row: usize, topic: usize) -> Result<()> {
    *cell = cell.checked_sub(1).ok_or_else(|| LdaError::ConsistencyViolation {
        table,
        row,
        topic,
        reason: "decrement of a zero count".into(),
    })?;
    Ok(())
}

impl<'a> GibbsSampler<'a> {

    /// Starts the chain from uniformly random assignments.
    pub fn new(corpus: &'a CorpusIndex, params: &TrainParams) -> Result<GibbsSampler<'a>> {
        params.validate()?;
        let mut rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let k = params.topic_count;
        let z: Vec<usize> = (0..corpus.total_tokens()).map(|_| rng.gen_range(0..k)).collect();
        Self::build(corpus, params, z, rng)
    }

    /// Starts the chain from saved assignments, e.g. a burn-in checkpoint of an earlier run.
    pub fn from_assignments(corpus: &'a CorpusIndex, params: &TrainParams, z: Vec<usize>) -> Result<GibbsSampler<'a>> {
        params.validate()?;
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::build(corpus, params, z, rng)
    }

    fn build(corpus: &'a CorpusIndex, params: &TrainParams, z: Vec<usize>, rng: StdRng) -> Result<GibbsSampler<'a>> {

        let k = params.topic_count;
        if corpus.total_tokens() == 0 {
            return Err(LdaError::InvalidCorpus("cannot sample topics for an empty corpus".into()));
        }

        let tokens: Vec<(VerbId, NounId)> = corpus.tokens().collect();
        if z.len() != tokens.len() {
            return Err(LdaError::ShapeMismatch {
                what: "topic assignments",
                expected: tokens.len(),
                found: z.len(),
            });
        }
        if let Some(i) = z.iter().position(|t| *t >= k) {
            return Err(LdaError::malformed(i + 1, format!("topic {} is outside 0..{}", z[i], k)));
        }

        let mut sampler = Self {
            corpus,
            topic_count: k,
            alpha: params.gibbs_alpha(),
            gamma: params.gibbs_gamma(),
            burnin: params.burnin,
            lag: params.lag,
            num_samps_per_lag: params.num_samps_per_lag,
            checkpoint_interval: params.checkpoint_interval,
            tokens,
            z,
            cwt: Array2::zeros((corpus.noun_count(), k)),
            cvt: Array2::zeros((corpus.verb_count(), k)),
            nouns_in_topic: Array1::zeros(k),
            nouns_with_verb: Array1::zeros(corpus.verb_count()),
            cum_beta: Array2::zeros((k, corpus.noun_count())),
            cum_theta: Array2::zeros((corpus.verb_count(), k)),
            total_samples: 0,
            sampled_last_sweep: false,
            weights: vec![0.0; k],
            rng,
        };
        sampler.fill_counts();
        info!(
            "gibbs: initialized {} token assignments over {} topics",
            sampler.z.len(), sampler.topic_count
        );
        Ok(sampler)
    }

    fn fill_counts(&mut self) {
        for (&(v, n), &t) in self.tokens.iter().zip(self.z.iter()) {
            self.cwt[[n, t]] += 1;
            self.cvt[[v, t]] += 1;
            self.nouns_in_topic[t] += 1;
            self.nouns_with_verb[v] += 1;
        }
    }

    pub fn assignments(&self) -> &[usize] {
        &self.z
    }

    pub fn noun_topic_counts(&self) -> &Array2<u64> {
        &self.cwt
    }

    pub fn verb_topic_counts(&self) -> &Array2<u64> {
        &self.cvt
    }

    pub fn total_samples(&self) -> usize {
        self.total_samples
    }

    // resamples the topic of token i given all the others
    pub fn resample_token(&mut self, i: usize) -> Result<()> {

        let (v, n) = self.tokens[i];
        let old = self.z[i];

        // take the token out of every table
        decrement(&mut self.cwt[[n, old]], CountTable::NounTopic, n, old)?;
        decrement(&mut self.cvt[[v, old]], CountTable::VerbTopic, v, old)?;
        decrement(&mut self.nouns_in_topic[old], CountTable::TopicTotals, old, old)?;
        decrement(&mut self.nouns_with_verb[v], CountTable::VerbTotals, v, old)?;

        let n_gamma = self.corpus.noun_count() as f64 * self.gamma;
        let k_alpha = self.topic_count as f64 * self.alpha;
        let verb_total = self.nouns_with_verb[v] as f64 + k_alpha;
        for t in 0..self.topic_count {
            let noun_given_topic = (self.cwt[[n, t]] as f64 + self.gamma) / (self.nouns_in_topic[t] as f64 + n_gamma);
            let topic_given_verb = (self.cvt[[v, t]] as f64 + self.alpha) / verb_total;
            self.weights[t] = noun_given_topic * topic_given_verb;
        }

        let new = sample_multinomial(&self.weights, &mut self.rng);
        self.cwt[[n, new]] += 1;
        self.cvt[[v, new]] += 1;
        self.nouns_in_topic[new] += 1;
        self.nouns_with_verb[v] += 1;
        self.z[i] = new;
        Ok(())
    }

    pub fn sweep(&mut self) -> Result<()> {
        for i in 0..self.tokens.len() {
            self.resample_token(i)?;
        }
        Ok(())
    }

    fn is_sample_sweep(&self, iteration: usize) -> bool {
        iteration >= self.burnin && iteration % self.lag < self.num_samps_per_lag
    }

    // (cwt + gamma) normalized per topic, topics x nouns
    pub fn current_beta(&self) -> Array2<f64> {
        let n_gamma = self.corpus.noun_count() as f64 * self.gamma;
        Array2::from_shape_fn((self.topic_count, self.corpus.noun_count()), |(t, n)| {
            (self.cwt[[n, t]] as f64 + self.gamma) / (self.nouns_in_topic[t] as f64 + n_gamma)
        })
    }

    // (cvt + alpha) normalized per verb, a verb without tokens gets the uniform row
    pub fn current_theta(&self) -> Array2<f64> {
        let k_alpha = self.topic_count as f64 * self.alpha;
        Array2::from_shape_fn((self.corpus.verb_count(), self.topic_count), |(v, t)| {
            (self.cvt[[v, t]] as f64 + self.alpha) / (self.nouns_with_verb[v] as f64 + k_alpha)
        })
    }

    fn accumulate(&mut self) {
        let (beta, theta) = (self.current_beta(), self.current_theta());
        self.cum_beta += &beta;
        self.cum_theta += &theta;
        self.total_samples += 1;
    }

    /// Rebuilds every table from `z` and compares with the live ones.
    pub fn verify_counts(&self) -> Result<()> {

        let k = self.topic_count;
        let mut cwt = Array2::<u64>::zeros(self.cwt.raw_dim());
        let mut cvt = Array2::<u64>::zeros(self.cvt.raw_dim());
        let mut in_topic = Array1::<u64>::zeros(k);
        let mut with_verb = Array1::<u64>::zeros(self.nouns_with_verb.len());
        for (&(v, n), &t) in self.tokens.iter().zip(self.z.iter()) {
            cwt[[n, t]] += 1;
            cvt[[v, t]] += 1;
            in_topic[t] += 1;
            with_verb[v] += 1;
        }

        let mismatch = |table, row, topic, expected: u64, found: u64| LdaError::ConsistencyViolation {
            table,
            row,
            topic,
            reason: format!("expected {} from the assignments, table holds {}", expected, found),
        };

        for ((n, t), expected) in cwt.indexed_iter() {
            if self.cwt[[n, t]] != *expected {
                return Err(mismatch(CountTable::NounTopic, n, t, *expected, self.cwt[[n, t]]));
            }
        }
        for ((v, t), expected) in cvt.indexed_iter() {
            if self.cvt[[v, t]] != *expected {
                return Err(mismatch(CountTable::VerbTopic, v, t, *expected, self.cvt[[v, t]]));
            }
        }
        for (t, expected) in in_topic.iter().enumerate() {
            if self.nouns_in_topic[t] != *expected {
                return Err(mismatch(CountTable::TopicTotals, t, t, *expected, self.nouns_in_topic[t]));
            }
        }
        for (v, expected) in with_verb.iter().enumerate() {
            if self.nouns_with_verb[v] != *expected {
                return Err(mismatch(CountTable::VerbTotals, v, 0, *expected, self.nouns_with_verb[v]));
            }
        }
        Ok(())
    }
}

impl<'a> InferenceEngine for GibbsSampler<'a> {

    fn label(&self) -> &'static str {
        "gibbs"
    }

    fn start(&mut self, sink: &mut dyn SnapshotSink) -> Result<()> {
        if self.burnin == 0 {
            sink.save_assignments(&self.z)?;
        }
        Ok(())
    }

    fn iterate(&mut self, iteration: usize) -> Result<()> {
        self.sweep()?;
        self.sampled_last_sweep = self.is_sample_sweep(iteration);
        if self.sampled_last_sweep {
            self.accumulate();
        }
        Ok(())
    }

    fn checkpoint(&mut self, iteration: usize, sink: &mut dyn SnapshotSink) -> Result<()> {

        // burn-in ends after this sweep
        if self.burnin > 0 && iteration + 1 == self.burnin {
            info!("gibbs: burn-in finished, saving assignments");
            sink.save_assignments(&self.z)?;
        }

        if self.sampled_last_sweep && self.checkpoint_interval > 0 && iteration % self.checkpoint_interval == 0 {
            sink.save_matrix(SnapshotKind::Beta, Some(iteration), &self.current_beta())?;
            sink.save_matrix(SnapshotKind::Theta, Some(iteration), &self.current_theta())?;
        }
        Ok(())
    }

    fn progress(&self, iteration: usize) -> String {
        let phase = if iteration < self.burnin { "burn-in" } else { "sampling" };
        format!("{}, {} samples collected", phase, self.total_samples)
    }

    fn finish(self) -> Result<Artifact> {
        if self.total_samples == 0 {
            warn!("gibbs: no sweep was sampled, using the tables of the last sweep");
            return Artifact::new(self.current_beta(), self.current_theta());
        }
        let samples = self.total_samples as f64;
        Artifact::new(self.cum_beta / samples, self.cum_theta / samples)
    }
}
