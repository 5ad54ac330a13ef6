//! Command-line interface for SensorFlow.

pub mod error;
pub mod output;

pub mod extract;
pub mod processed;
pub mod run;
