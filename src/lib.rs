pub mod config;
pub mod domain;
pub mod error;
pub mod judgment;
pub mod metrics;
pub mod orchestrator;
pub mod persistence;
pub mod ratings;
pub mod search;
pub mod template;

pub use config::Config;
pub use domain::{Evaluation, EvaluationDocument, Query};
pub use error::{RankevalError, Result};
pub use judgment::{Judgment, JudgmentSet};
pub use orchestrator::{EvaluationReport, Evaluator, StrategyKind};
