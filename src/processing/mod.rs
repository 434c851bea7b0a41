// src/processing/mod.rs
pub mod indices;
pub mod parallel;

// Re-export main components
pub use parallel::{evaluate, IndexCalculator, ParallelProcessor, ProcessOptions, ProcessSummary};
