pub mod config;
pub mod corpus;
pub mod engine;
pub mod error;
pub mod files_handling;
pub mod gibbs;
pub mod model;
pub mod numeric;
pub mod run;
pub mod svi;

pub use config::{Config, Engine, InputFormat, RunParams, SnapshotLayout, TrainParams};
pub use corpus::{CorpusIndex, CorpusRecord, VocabKey, Vocabulary};
pub use engine::{train, Artifact, InferenceEngine};
pub use error::{LdaError, Result};
pub use gibbs::GibbsSampler;
pub use model::LdaModel;
pub use run::{train_corpus, Run};
pub use svi::{DocumentSelector, RoundRobin, SviTrainer, UniformRandom};
