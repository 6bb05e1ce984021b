#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(clippy::no_effect_underscore_binding)]

//! Simulation and maximum-likelihood inference for two dependent competing risks.
//!
//! Latent event times are coupled by a Frank or Clayton copula; only the earlier time
//! and its cause are observed. The crate simulates such data, fits candidate marginal
//! families per cause, estimates the copula and both margins jointly, and bootstraps
//! the joint estimate.

#[path = "../copula/mod.rs"]
pub mod copula;

#[path = "../margins/mod.rs"]
pub mod margins;

#[path = "../simulate/mod.rs"]
pub mod simulate;

#[path = "../estimate/mod.rs"]
pub mod estimate;

pub mod config;
pub mod pipeline;
pub mod report;

pub use config::StudyConfig;
pub use pipeline::{StudyError, StudyOutcome, run_study};
