//! Shared types and utilities for the billing mirror.
//!
//! This crate contains the mirrored row types, the pipeline error type, and
//! database pool helpers shared between the pipeline and the worker.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
