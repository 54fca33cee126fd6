
// the contract both inference engines satisfy and the loop that drives them.

use crate::error::{LdaError, Result};
use crate::files_handling::{SnapshotKind, SnapshotSink};

use log::info;
use ndarray::{Array1, Array2, Axis};
use std::time::Instant;

// rows of a finished distribution matrix sum to one within this
pub const ROW_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Clone, Debug)]
pub struct Artifact {
    pub beta: Array2<f64>,   // topics x nouns
    pub theta: Array2<f64>,  // verbs x topics
}

impl Artifact {

    pub fn new(beta: Array2<f64>, theta: Array2<f64>) -> Result<Self> {
        if theta.ncols() != beta.nrows() {
            return Err(LdaError::ShapeMismatch {
                what: "topics in theta",
                expected: beta.nrows(),
                found: theta.ncols(),
            });
        }
        Ok(Self { beta, theta })
    }

    pub fn max_row_sum_error(&self) -> f64 {
        [&self.beta, &self.theta]
            .iter()
            .flat_map(|m| m.sum_axis(Axis(1)).to_vec())
            .map(|s| (s - 1.0).abs())
            .fold(0.0, f64::max)
    }

    pub fn save(&self, sink: &mut dyn SnapshotSink) -> Result<()> {
        sink.save_matrix(SnapshotKind::Beta, None, &self.beta)?;
        sink.save_matrix(SnapshotKind::Theta, None, &self.theta)
    }
}

pub(crate) fn stack_rows(rows: Vec<Array1<f64>>, cols: usize) -> Result<Array2<f64>> {
    let n_rows = rows.len();
    let flat: Vec<f64> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    let found = flat.len();
    Array2::from_shape_vec((n_rows, cols), flat).map_err(|_| LdaError::ShapeMismatch {
        what: "stacked rows",
        expected: n_rows * cols,
        found,
    })
}

pub trait InferenceEngine {

    fn label(&self) -> &'static str;

    fn start(&mut self, _sink: &mut dyn SnapshotSink) -> Result<()> {
        Ok(())
    }

    // one svi round or one gibbs sweep
    fn iterate(&mut self, iteration: usize) -> Result<()>;

    fn checkpoint(&mut self, iteration: usize, sink: &mut dyn SnapshotSink) -> Result<()>;

    fn progress(&self, iteration: usize) -> String;

    fn finish(self) -> Result<Artifact>;
}

/// Runs `iterations` iterations of `engine` with checkpoints, then returns the final artifact.
pub fn train<E: InferenceEngine>(mut engine: E, iterations: usize, sink: &mut dyn SnapshotSink) -> Result<Artifact> {

    let log_every = (iterations / 20).max(1);
    let start_time = Instant::now();
    info!("{}: starting {} iterations", engine.label(), iterations);

    engine.start(sink)?;
    for iteration in 0..iterations {
        let my_time = Instant::now();
        engine.iterate(iteration)?;
        engine.checkpoint(iteration, sink)?;

        if (iteration + 1) % log_every == 0 || iteration + 1 == iterations {
            info!(
                "{}: finished iteration {} / {}, {}, took: {} ms...",
                engine.label(), iteration + 1, iterations, engine.progress(iteration),
                my_time.elapsed().as_millis()
            );
        }
    }

    let label = engine.label();
    let artifact = engine.finish()?;
    info!("{}: training done in {} seconds", label, start_time.elapsed().as_secs());
    Ok(artifact)
}
