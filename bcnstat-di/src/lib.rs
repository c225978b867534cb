//! bcnstat-di (Data Integration) - dataset consolidation engine
//!
//! Pulls heterogeneous public datasets onto the canonical 73-neighborhood
//! dimension, keyed by year and quarter, and assembles the analysis-ready
//! master table. The stages run strictly in order:
//!
//! 1. `extract` - read raw observations from manifest-described sources
//! 2. `resolve` - map location references to canonical entity ids
//! 3. `dedupe` - repair source tags, collapse duplicate series keys
//! 4. `temporal` - expand annual series to interpolated quarters
//! 5. `load` - chunked bulk writes into the fact tables
//! 6. `validate` - integrity checks against configured thresholds
//! 7. `assemble` - wide master table with precedence and derived columns
//!
//! `pipeline` orchestrates the stages; `report` records each run in
//! `run_sessions` and renders the operator summary.

pub mod assemble;
pub mod dedupe;
pub mod dimension;
pub mod error;
pub mod extract;
pub mod load;
pub mod pipeline;
pub mod report;
pub mod resolve;
pub mod temporal;
pub mod types;
pub mod validate;

pub use crate::error::{ExtractionError, PipelineError, Result};
pub use crate::pipeline::{IntegrationPipeline, RunOptions};
pub use crate::report::{RunStatus, RunSummary};
