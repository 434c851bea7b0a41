// src/io/mod.rs
pub mod reader;
pub mod writer;

pub use reader::{read_bands, GeoInfo};
pub use writer::{create_output, write_block, OutputEncoding, OutputSpec};
