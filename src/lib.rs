// src/lib.rs
pub mod batch;
pub mod cli;
pub mod error;
pub mod io;
pub mod model;
pub mod processing;
pub mod utils;

pub use error::{ModelError, ModelResult};

// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
