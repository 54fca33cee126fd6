
use crate::config::SnapshotLayout;
use crate::corpus::{VocabKey, Vocabulary};
use crate::engine::Artifact;
use crate::error::{LdaError, Result};
use crate::files_handling::{read_input, SnapshotKind};

use log::info;
use ndarray::prelude::*;
use ndarray_stats::QuantileExt;
use std::fs;
use std::path::Path;

/// A trained model together with the vocabularies it was trained on.
/// Verbs and nouns can be addressed by id or by token.
#[derive(Clone, Debug)]
pub struct LdaModel {
    beta: Array2<f64>,   // K x N
    theta: Array2<f64>,  // V x K
    verbs: Vocabulary,
    nouns: Vocabulary,
}

impl LdaModel {

    pub fn new(beta: Array2<f64>, theta: Array2<f64>, verbs: Vocabulary, nouns: Vocabulary) -> Result<LdaModel> {

        let checks = [
            ("nouns in beta", nouns.len(), beta.ncols()),
            ("verbs in theta", verbs.len(), theta.nrows()),
            ("topics in theta", beta.nrows(), theta.ncols()),
        ];
        for (what, expected, found) in checks {
            if expected != found {
                return Err(LdaError::ShapeMismatch { what, expected, found });
            }
        }
        Ok(Self { beta, theta, verbs, nouns })
    }

    pub fn from_artifact(artifact: Artifact, verbs: Vocabulary, nouns: Vocabulary) -> Result<LdaModel> {
        Self::new(artifact.beta, artifact.theta, verbs, nouns)
    }

    pub fn load(dir: &Path) -> Result<LdaModel> {
        Self::load_with_layout(dir, &SnapshotLayout::default())
    }

    pub fn load_with_layout(dir: &Path, layout: &SnapshotLayout) -> Result<LdaModel> {
        Self::load_files(dir, layout, None)
    }

    /// Loads the `betaAtIter`/`thetaAtIter` pair written at `iteration`.
    pub fn load_snapshot(dir: &Path, layout: &SnapshotLayout, iteration: usize) -> Result<LdaModel> {
        Self::load_files(dir, layout, Some(iteration))
    }

    fn load_files(dir: &Path, layout: &SnapshotLayout, iteration: Option<usize>) -> Result<LdaModel> {

        let beta_path = dir.join(layout.matrix_file(SnapshotKind::Beta, iteration));
        let theta_path = dir.join(layout.matrix_file(SnapshotKind::Theta, iteration));
        info!("loading model from {} and {}", beta_path.display(), theta_path.display());

        let beta: Array2<f64> = read_input(&beta_path)?;
        let theta: Array2<f64> = read_input(&theta_path)?;
        let verbs: Vocabulary = read_input(&dir.join(&layout.verbs))?;
        let nouns: Vocabulary = read_input(&dir.join(&layout.nouns))?;
        Self::new(beta, theta, verbs, nouns)
    }

    // iterations with both a beta and a theta snapshot, ascending
    pub fn list_snapshots(dir: &Path, layout: &SnapshotLayout) -> Result<Vec<usize>> {

        let mut betas = Vec::new();
        let mut thetas = Vec::new();
        for entry in fs::read_dir(dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(i) = layout.parse_iteration(SnapshotKind::Beta, name) {
                betas.push(i);
            } else if let Some(i) = layout.parse_iteration(SnapshotKind::Theta, name) {
                thetas.push(i);
            }
        }

        let mut both: Vec<usize> = betas.into_iter().filter(|i| thetas.contains(i)).collect();
        both.sort_unstable();
        Ok(both)
    }

    pub fn topic_count(&self) -> usize {
        self.beta.nrows()
    }

    pub fn verb_count(&self) -> usize {
        self.verbs.len()
    }

    pub fn noun_count(&self) -> usize {
        self.nouns.len()
    }

    pub fn beta(&self) -> &Array2<f64> {
        &self.beta
    }

    pub fn theta(&self) -> &Array2<f64> {
        &self.theta
    }

    pub fn verb(&self, id: usize) -> Result<&str> {
        self.verbs.token(id).ok_or_else(|| LdaError::NotFound { kind: "verb", key: id.to_string() })
    }

    pub fn noun(&self, id: usize) -> Result<&str> {
        self.nouns.token(id).ok_or_else(|| LdaError::NotFound { kind: "noun", key: id.to_string() })
    }

    fn topic(&self, topic: usize) -> Result<usize> {
        if topic < self.topic_count() {
            Ok(topic)
        } else {
            Err(LdaError::NotFound { kind: "topic", key: topic.to_string() })
        }
    }

    pub fn pr_noun_for_topic<N: VocabKey>(&self, noun: N, topic: usize) -> Result<f64> {
        let n = noun.resolve(&self.nouns, "noun")?;
        Ok(self.beta[[self.topic(topic)?, n]])
    }

    pub fn pr_topic_for_verb<V: VocabKey>(&self, topic: usize, verb: V) -> Result<f64> {
        let v = verb.resolve(&self.verbs, "verb")?;
        Ok(self.theta[[v, self.topic(topic)?]])
    }

    /// How typical `noun` is as an object of `verb`, summed over topics.
    pub fn pair_probability<V: VocabKey, N: VocabKey>(&self, verb: V, noun: N) -> Result<f64> {
        let v = verb.resolve(&self.verbs, "verb")?;
        let n = noun.resolve(&self.nouns, "noun")?;
        Ok(self.theta.row(v).dot(&self.beta.column(n)))
    }

    pub fn top_nouns(&self, topic: usize, k: usize) -> Result<Vec<(String, f64)>> {

        let row = self.beta.row(self.topic(topic)?);
        let mut indexed_scores: Vec<(usize, f64)> = row.iter().copied().enumerate().collect();

        // sort by most probable in descending order
        indexed_scores.sort_by(|(_i, s), (_j, t)| t.total_cmp(s));

        let mut top = Vec::with_capacity(k.min(indexed_scores.len()));
        for (n, p) in indexed_scores.into_iter().take(k) {
            top.push((self.noun(n)?.to_owned(), p));
        }
        Ok(top)
    }

    pub fn best_topic<V: VocabKey>(&self, verb: V) -> Result<(usize, f64)> {
        let v = verb.resolve(&self.verbs, "verb")?;
        let row = self.theta.row(v);
        let best = row.argmax().map_err(|_| LdaError::NotFound { kind: "topic", key: format!("best of verb {}", v) })?;
        Ok((best, row[best]))
    }
}
