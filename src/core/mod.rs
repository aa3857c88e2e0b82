pub mod classifier;
pub mod corpus;
pub mod engine;
pub mod extract;
pub mod harness;
pub mod pipeline;
pub mod report;

pub use crate::domain::model::{Fragment, ScoreReport, Verdict};
pub use crate::domain::ports::{ConfigProvider, Pipeline, ReportSettings, Storage};
pub use crate::utils::error::Result;
