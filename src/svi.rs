
use crate::config::{DocumentOrder, PointEstimate, TrainParams};
use crate::corpus::CorpusIndex;
use crate::engine::{stack_rows, Artifact, InferenceEngine};
use crate::error::{LdaError, Result};
use crate::files_handling::{SnapshotKind, SnapshotSink};
use crate::numeric::{digamma, dirichlet_mean, dirichlet_mode, log_sum_exp, squared_distance};

use log::{debug, warn};
use ndarray::prelude::*;
use ndarray_rand::rand_distr::Gamma;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

// shape and scale of the distribution lambda and fresh gamma rows are drawn from
const INIT_SHAPE: f64 = 100.0;
const INIT_SCALE: f64 = 0.01;

pub trait DocumentSelector: Send {
    fn next_document(&mut self, round: usize, document_count: usize, rng: &mut StdRng) -> usize;
}

pub struct RoundRobin;

impl DocumentSelector for RoundRobin {
    fn next_document(&mut self, round: usize, document_count: usize, _rng: &mut StdRng) -> usize {
        round % document_count
    }
}

pub struct UniformRandom;

impl DocumentSelector for UniformRandom {
    fn next_document(&mut self, _round: usize, document_count: usize, rng: &mut StdRng) -> usize {
        rng.gen_range(0..document_count)
    }
}

impl From<DocumentOrder> for Box<dyn DocumentSelector> {
    fn from(order: DocumentOrder) -> Self {
        match order {
            DocumentOrder::RoundRobin => Box::new(RoundRobin),
            DocumentOrder::UniformRandom => Box::new(UniformRandom),
        }
    }
}

// result of the inner loop on one document
pub(crate) struct InnerOutcome {
    pub(crate) iterations: usize,
    pub(crate) converged: bool,
    pub(crate) distance: f64,
    pub(crate) stats: Array2<f64>,  // freq * phi per (position in document, topic)
}

struct SviProgress {
    unconverged: usize,
    last_document: usize,
    last_inner_iters: usize,
    last_distance: f64,
}

pub struct SviTrainer<'a> {
    corpus: &'a CorpusIndex,
    topic_count: usize,
    alpha: f64,
    eta: f64,
    step_size_exponent: f64,
    convergence_threshold: f64,
    max_inner_iters: usize,
    reseed_on_every_visit: bool,
    strict_convergence: bool,
    point_estimate: PointEstimate,
    checkpoint_interval: usize,
    lambda: Array2<f64>,           // K x N
    lambda_row_sums: Array1<f64>,  // K
    gamma: Array2<f64>,            // D x K
    visited: Vec<bool>,
    active: Vec<usize>,            // documents with at least one token
    init_dist: Gamma<f64>,
    rng: StdRng,
    selector: Box<dyn DocumentSelector>,
    progress: SviProgress,
}

impl<'a> SviTrainer<'a> {

    pub fn new(corpus: &'a CorpusIndex, params: &TrainParams) -> Result<SviTrainer<'a>> {

        params.validate()?;

        // verbs without tokens never take part in a round, their theta row stays at the prior
        let active: Vec<usize> = (0..corpus.document_count())
            .filter(|d| !corpus.document(*d).is_empty())
            .collect();
        if active.is_empty() || corpus.noun_count() == 0 {
            return Err(LdaError::InvalidCorpus("cannot run svi on an empty corpus".into()));
        }
        if active.len() < corpus.document_count() {
            warn!("{} verbs have no tokens and are left out of training", corpus.document_count() - active.len());
        }

        let init_dist = Gamma::new(INIT_SHAPE, INIT_SCALE)
            .map_err(|e| LdaError::Config(format!("bad initial distribution: {}", e)))?;
        let mut rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let k = params.topic_count;
        let lambda = Array2::random_using((k, corpus.noun_count()), &init_dist, &mut rng);
        let lambda_row_sums = lambda.sum_axis(Axis(1));

        let mut gamma = Array2::zeros((corpus.document_count(), k));
        let mut visited = vec![false; corpus.document_count()];
        for d in (0..corpus.document_count()).filter(|d| corpus.document(*d).is_empty()) {
            gamma.row_mut(d).fill(params.svi_alpha());
            visited[d] = true;
        }

        Ok(Self {
            corpus,
            topic_count: k,
            alpha: params.svi_alpha(),
            eta: params.svi_eta(),
            step_size_exponent: params.step_size_exponent,
            convergence_threshold: params.convergence_threshold,
            max_inner_iters: params.max_inner_iters,
            reseed_on_every_visit: params.reseed_on_every_visit,
            strict_convergence: params.strict_convergence,
            point_estimate: params.point_estimate,
            checkpoint_interval: params.checkpoint_interval,
            lambda,
            lambda_row_sums,
            gamma,
            visited,
            active,
            init_dist,
            rng,
            selector: params.document_order.into(),
            progress: SviProgress { unconverged: 0, last_document: 0, last_inner_iters: 0, last_distance: 0.0 },
        })
    }

    pub fn with_selector(mut self, selector: Box<dyn DocumentSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn lambda(&self) -> &Array2<f64> {
        &self.lambda
    }

    pub fn gamma(&self) -> &Array2<f64> {
        &self.gamma
    }

    pub fn unconverged_count(&self) -> usize {
        self.progress.unconverged
    }

    fn step_size(&self, round: usize) -> f64 {
        (round as f64 + 1.0).powf(-self.step_size_exponent)
    }

    // solves the local problem of document d against the current lambda, stores gamma[d]
    pub(crate) fn infer_document(&mut self, d: usize) -> Result<InnerOutcome> {

        let corpus = self.corpus;
        let document = corpus.document(d);
        let k = self.topic_count;

        let fresh = !self.visited[d] || self.reseed_on_every_visit;
        if fresh {
            let seeded = Array1::random_using(k, &self.init_dist, &mut self.rng);
            self.gamma.row_mut(d).assign(&seeded);
            self.visited[d] = true;
        }

        // E[log beta] only for the nouns of this document
        let elog_beta = Array2::from_shape_fn((document.len(), k), |(i, t)| {
            digamma(self.lambda[[t, document[i].0]]) - digamma(self.lambda_row_sums[t])
        });

        let mut gamma_d = self.gamma.row(d).to_owned();
        let mut stats = Array2::<f64>::zeros((document.len(), k));
        let mut log_phi = vec![0.0; k];
        let mut distance = f64::INFINITY;
        let mut converged = false;
        let mut iterations = 0;

        while iterations < self.max_inner_iters {
            iterations += 1;

            let gamma_sum = digamma(gamma_d.sum());
            let elog_theta = gamma_d.mapv(|g| digamma(g) - gamma_sum);

            let mut new_gamma = Array1::from_elem(k, self.alpha);
            for (i, &(noun, freq)) in document.iter().enumerate() {
                for t in 0..k {
                    log_phi[t] = elog_theta[t] + elog_beta[[i, t]];
                }
                let norm = log_sum_exp(&log_phi);
                if !norm.is_finite() {
                    return Err(LdaError::DegenerateDocument { document: d, noun });
                }
                for t in 0..k {
                    let r = freq as f64 * (log_phi[t] - norm).exp();
                    stats[[i, t]] = r;
                    new_gamma[t] += r;
                }
            }

            distance = squared_distance(gamma_d.view(), new_gamma.view()).sqrt();
            gamma_d = new_gamma;

            // a freshly seeded gamma says nothing about convergence
            if !(fresh && iterations == 1) && distance < self.convergence_threshold * k as f64 {
                converged = true;
                break;
            }
        }

        debug!("document {}: {} inner iterations, distance {:.6}", d, iterations, distance);
        self.gamma.row_mut(d).assign(&gamma_d);
        Ok(InnerOutcome { iterations, converged, distance, stats })
    }

    fn global_step(&mut self, round: usize, d: usize, stats: &Array2<f64>) {

        let rho = self.step_size(round);
        let eta = self.eta;
        let scale = rho * self.active.len() as f64;

        self.lambda.mapv_inplace(|l| (1.0 - rho) * l + rho * eta);
        let corpus = self.corpus;
        for (i, &(noun, _)) in corpus.document(d).iter().enumerate() {
            for t in 0..self.topic_count {
                self.lambda[[t, noun]] += scale * stats[[i, t]];
            }
        }
        self.lambda_row_sums = self.lambda.sum_axis(Axis(1));
    }

    fn handle_convergence(&mut self, d: usize, outcome: &InnerOutcome) -> Result<()> {
        self.progress.last_document = d;
        self.progress.last_inner_iters = outcome.iterations;
        self.progress.last_distance = outcome.distance;
        if outcome.converged {
            return Ok(());
        }

        let signal = LdaError::ConvergenceNotReached {
            document: d,
            iterations: outcome.iterations,
            distance: outcome.distance,
        };
        if self.strict_convergence {
            return Err(signal);
        }
        warn!("{}", signal);
        self.progress.unconverged += 1;
        Ok(())
    }

    // second value counts the rows that fell back to the mean
    fn point_estimates(&self, params: &Array2<f64>) -> Result<(Array2<f64>, usize)> {
        let mode = self.point_estimate;
        let rows: Vec<(Array1<f64>, bool)> = (0..params.nrows())
            .into_par_iter()
            .map(|r| point_estimate(params.row(r), mode))
            .collect();
        let fallbacks = rows.iter().filter(|(_, fell_back)| *fell_back).count();
        let matrix = stack_rows(rows.into_iter().map(|(row, _)| row).collect(), params.ncols())?;
        Ok((matrix, fallbacks))
    }

    pub fn beta(&self) -> Result<Array2<f64>> {
        Ok(self.point_estimates(&self.lambda)?.0)
    }
}

/// The Dirichlet mode when it lies inside the simplex, else the mean.
fn point_estimate(params: ArrayView1<f64>, estimate: PointEstimate) -> (Array1<f64>, bool) {
    if estimate == PointEstimate::Mode {
        if let Some(mode) = dirichlet_mode(params) {
            if mode.iter().all(|p| *p >= 0.0) {
                return (mode, false);
            }
        }
    }
    let k = params.len();
    let mean = dirichlet_mean(params).unwrap_or_else(|| Array1::from_elem(k, 1.0 / k as f64));
    (mean, estimate == PointEstimate::Mode)
}

impl<'a> InferenceEngine for SviTrainer<'a> {

    fn label(&self) -> &'static str {
        "svi"
    }

    fn iterate(&mut self, round: usize) -> Result<()> {
        let slot = self.selector.next_document(round, self.active.len(), &mut self.rng);
        let d = self.active[slot];
        let outcome = self.infer_document(d)?;
        self.handle_convergence(d, &outcome)?;
        self.global_step(round, d, &outcome.stats);
        Ok(())
    }

    fn checkpoint(&mut self, round: usize, sink: &mut dyn SnapshotSink) -> Result<()> {
        if self.checkpoint_interval == 0 || round == 0 || round % self.checkpoint_interval != 0 {
            return Ok(());
        }
        sink.save_matrix(SnapshotKind::Lambda, Some(round), &self.lambda)?;
        sink.save_matrix(SnapshotKind::Beta, Some(round), &self.beta()?)
    }

    fn progress(&self, round: usize) -> String {
        format!(
            "step size {:.5}, document {} took {} inner iterations (distance {:.5}), {} unconverged so far",
            self.step_size(round), self.progress.last_document, self.progress.last_inner_iters,
            self.progress.last_distance, self.progress.unconverged
        )
    }

    fn finish(mut self) -> Result<Artifact> {

        // verbs the rounds never reached still need a theta row
        let unvisited: Vec<usize> = (0..self.visited.len()).filter(|d| !self.visited[*d]).collect();
        if !unvisited.is_empty() {
            warn!("{} documents were never visited, inferring them against the final lambda", unvisited.len());
        }
        for d in unvisited {
            let outcome = self.infer_document(d)?;
            self.handle_convergence(d, &outcome)?;
        }

        let (beta, beta_fallbacks) = self.point_estimates(&self.lambda)?;
        let (theta, theta_fallbacks) = self.point_estimates(&self.gamma)?;
        if beta_fallbacks + theta_fallbacks > 0 {
            warn!(
                "dirichlet mode undefined for {} topic rows and {} verb rows, used the mean",
                beta_fallbacks, theta_fallbacks
            );
        }
        Artifact::new(beta, theta)
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::corpus::{CorpusRecord, Vocabulary};
    use std::collections::HashMap;
    use crate::engine::{train, ROW_SUM_TOLERANCE};
    use crate::files_handling::DiscardSnapshots;

    fn corpus() -> CorpusIndex {
        let records = vec![
            CorpusRecord::new("eat", "apple", 6, true),
            CorpusRecord::new("eat", "bread", 4, true),
            CorpusRecord::new("eat", "orange", 3, true),
            CorpusRecord::new("drink", "water", 7, true),
            CorpusRecord::new("drink", "juice", 3, true),
            CorpusRecord::new("drink", "milk", 2, true),
            CorpusRecord::new("devour", "bread", 2, true),
            CorpusRecord::new("devour", "apple", 1, true),
        ];
        CorpusIndex::from_records(&records).unwrap()
    }

    fn params() -> TrainParams {
        TrainParams {
            topic_count: 2,
            iterations: 60,
            document_order: DocumentOrder::RoundRobin,
            checkpoint_interval: 0,
            seed: Some(3),
            ..TrainParams::default()
        }
    }

    #[test]
    fn artifact_rows_are_distributions() {

        let corpus = corpus();
        let trainer = SviTrainer::new(&corpus, &params()).unwrap();
        let artifact = train(trainer, 60, &mut DiscardSnapshots).unwrap();

        assert_eq!(artifact.beta.dim(), (2, corpus.noun_count()));
        assert_eq!(artifact.theta.dim(), (corpus.verb_count(), 2));
        assert!(artifact.max_row_sum_error() < ROW_SUM_TOLERANCE);
        assert!(artifact.beta.iter().chain(artifact.theta.iter()).all(|p| *p >= 0.0));
    }

    #[test]
    fn rerunning_a_converged_document_barely_moves_gamma() {

        let corpus = corpus();
        let mut p = params();
        p.convergence_threshold = 1e-4;
        p.max_inner_iters = 500;
        let mut trainer = SviTrainer::new(&corpus, &p).unwrap();

        let first = trainer.infer_document(0).unwrap();
        assert!(first.converged);
        let before = trainer.gamma().row(0).to_owned();

        // the second visit starts from the converged gamma and must stop right away
        let second = trainer.infer_document(0).unwrap();
        let after = trainer.gamma().row(0).to_owned();
        assert!(second.converged);
        assert_eq!(second.iterations, 1);
        assert!(squared_distance(before.view(), after.view()).sqrt() < 1e-4 * 2.0);
    }

    #[test]
    fn gamma_mass_matches_document_length() {

        let corpus = corpus();
        let mut trainer = SviTrainer::new(&corpus, &params()).unwrap();
        trainer.infer_document(1).unwrap();

        // gamma[d] = alpha + sum over tokens of phi, and phi rows sum to one
        let expected = 2.0 * 0.5 + corpus.token_count_for_verb(1) as f64;
        assert!((trainer.gamma().row(1).sum() - expected).abs() < 1e-9);
    }

    #[test]
    fn lambda_stays_positive() {

        let corpus = corpus();
        let mut trainer = SviTrainer::new(&corpus, &params()).unwrap();
        for round in 0..200 {
            trainer.iterate(round).unwrap();
        }
        assert!(trainer.lambda().iter().all(|l| *l > 0.0 && l.is_finite()));

        // cached row sums follow the matrix
        let sums = trainer.lambda().sum_axis(Axis(1));
        for (cached, fresh) in trainer.lambda_row_sums.iter().zip(sums.iter()) {
            assert!((cached - fresh).abs() < 1e-9);
        }
    }

    #[test]
    fn seeded_round_robin_is_reproducible() {

        let corpus = corpus();
        let a = train(SviTrainer::new(&corpus, &params()).unwrap(), 30, &mut DiscardSnapshots).unwrap();
        let b = train(SviTrainer::new(&corpus, &params()).unwrap(), 30, &mut DiscardSnapshots).unwrap();
        assert_eq!(a.beta, b.beta);
        assert_eq!(a.theta, b.theta);
    }

    #[test]
    fn strict_convergence_turns_the_cap_into_an_error() {

        let corpus = corpus();
        let mut p = params();
        p.max_inner_iters = 1;
        p.strict_convergence = true;
        let mut trainer = SviTrainer::new(&corpus, &p).unwrap();

        // a single pass over a freshly seeded gamma never counts as converged
        match trainer.iterate(0) {
            Err(LdaError::ConvergenceNotReached { document: 0, iterations: 1, .. }) => {}
            other => panic!("expected a convergence error, got {:?}", other.err()),
        }

        p.strict_convergence = false;
        let mut lenient = SviTrainer::new(&corpus, &p).unwrap();
        lenient.iterate(0).unwrap();
        assert_eq!(lenient.unconverged_count(), 1);
    }

    #[test]
    fn unvisited_documents_still_get_theta() {

        let corpus = corpus();
        let artifact = train(SviTrainer::new(&corpus, &params()).unwrap(), 0, &mut DiscardSnapshots).unwrap();
        assert_eq!(artifact.theta.nrows(), corpus.verb_count());
        assert!(artifact.max_row_sum_error() < ROW_SUM_TOLERANCE);
    }

    #[test]
    fn uniform_selector_stays_in_range() {

        let mut rng = StdRng::seed_from_u64(5);
        let mut selector = UniformRandom;
        for round in 0..1000 {
            assert!(selector.next_document(round, 3, &mut rng) < 3);
        }
        assert_eq!(RoundRobin.next_document(7, 3, &mut rng), 1);
    }

    struct Recorded(Vec<(SnapshotKind, Option<usize>)>);

    impl SnapshotSink for Recorded {
        fn save_matrix(&mut self, kind: SnapshotKind, iteration: Option<usize>, _matrix: &Array2<f64>) -> Result<()> {
            self.0.push((kind, iteration));
            Ok(())
        }
        fn save_assignments(&mut self, _z: &[usize]) -> Result<()> {
            panic!("svi has no assignments");
        }
    }

    #[test]
    fn checkpoints_follow_the_interval() {

        let corpus = corpus();
        let mut p = params();
        p.checkpoint_interval = 4;
        let mut sink = Recorded(Vec::new());
        let artifact = train(SviTrainer::new(&corpus, &p).unwrap(), 10, &mut sink).unwrap();
        artifact.save(&mut sink).unwrap();

        // round 0 is skipped
        assert_eq!(sink.0, vec![
            (SnapshotKind::Lambda, Some(4)),
            (SnapshotKind::Beta, Some(4)),
            (SnapshotKind::Lambda, Some(8)),
            (SnapshotKind::Beta, Some(8)),
            (SnapshotKind::Beta, None),
            (SnapshotKind::Theta, None),
        ]);
    }

    #[test]
    fn empty_corpus_is_rejected() {

        let corpus = CorpusIndex::from_records(&Vec::<CorpusRecord>::new()).unwrap();
        assert!(matches!(SviTrainer::new(&corpus, &params()), Err(LdaError::InvalidCorpus(_))));
    }

    #[test]
    fn invalid_params_are_rejected() {

        let corpus = corpus();
        for p in [
            TrainParams { topic_count: 0, ..params() },
            TrainParams { step_size_exponent: 0.4, ..params() },
            TrainParams { max_inner_iters: 0, ..params() },
        ] {
            assert!(matches!(SviTrainer::new(&corpus, &p), Err(LdaError::Config(_))));
        }
    }

    #[test]
    fn verb_without_tokens_gets_a_uniform_theta_row() {

        let verbs = Vocabulary::from_tokens(vec!["eat".into(), "drink".into(), "read".into()]).unwrap();
        let nouns = Vocabulary::from_tokens(vec!["apple".into(), "water".into()]).unwrap();
        let counts = HashMap::from([((0, 0), 4), ((1, 1), 3)]);
        let corpus = CorpusIndex::from_counts(verbs, nouns, counts).unwrap();

        let mut p = params();
        p.document_order = DocumentOrder::UniformRandom;
        let trainer = SviTrainer::new(&corpus, &p).unwrap();
        let artifact = train(trainer, 30, &mut DiscardSnapshots).unwrap();

        assert!(artifact.max_row_sum_error() < ROW_SUM_TOLERANCE);
        for t in 0..2 {
            assert!((artifact.theta[[2, t]] - 0.5).abs() < 1e-12);
        }
    }
}
