use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::processing::indices::{IndexKind, DEFAULT_OCVI_EXPONENT};

#[derive(Parser)]
#[command(name = "pusa-calc")]
#[command(about = "Spectral indices and GPR biophysical parameters for Sentinel-2 rasters")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output file path
    #[arg(short, long, default_value = "output.tif", global = true)]
    pub output: PathBuf,

    /// Use float32 instead of int16 for index outputs (model outputs are always float32)
    #[arg(long, global = true)]
    pub float: bool,

    /// Scaling factor for fixed-point
    #[arg(long, default_value = "10000", global = true)]
    pub scale_factor: i32,

    /// Divide inputs by this before calculators that need reflectance
    #[arg(long, default_value = "10000", global = true)]
    pub input_scale_factor: f32,

    /// Output compression (DEFLATE, ZSTD, LZW, NONE)
    #[arg(long, default_value = "DEFLATE", global = true)]
    pub compress: String,

    /// Compression level
    #[arg(long, default_value = "6", global = true)]
    pub compress_level: u8,

    /// Write a striped instead of a tiled GeoTIFF
    #[arg(long, global = true)]
    pub no_tiled: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Predict a biophysical parameter with the GPR models of a PUSA script
    Predict {
        /// Script holding the model declarations
        #[arg(short = 'm', long)]
        model_source: PathBuf,

        /// Cw (canopy water), Ccc (chlorophyll), anything else is LAI
        #[arg(short = 'p', long, default_value = "LAI")]
        parameter: String,

        /// Input bands, one file each, in the order the model was trained on
        #[arg(short = 'i', long = "band", required = true, num_args = 1..)]
        bands: Vec<PathBuf>,
    },

    /// Spectral index over Sentinel-2 bands
    Index {
        /// Index to compute
        #[arg(short = 'x', long, value_enum)]
        index: IndexKind,

        /// Input bands, one file each, in the order listed by `bands`
        #[arg(short = 'i', long = "band", required = true, num_args = 1..)]
        bands: Vec<PathBuf>,

        /// Exponent of OCVI
        #[arg(long, default_value_t = DEFAULT_OCVI_EXPONENT)]
        ocvi_exponent: f32,
    },

    /// List the model parameters a script declares and whether each model is usable
    Inspect {
        /// Script holding the model declarations
        #[arg(short = 'm', long)]
        model_source: PathBuf,
    },

    /// Run the operations of a JSON batch file
    Batch {
        /// Batch configuration file
        config: PathBuf,
    },
}
