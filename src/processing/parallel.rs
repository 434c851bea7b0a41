// src/processing/parallel.rs
use std::{
    collections::HashMap,
    mem,
    ops::DerefMut,
    panic,
    sync::Arc,
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use flume::{Receiver, Sender};
use gdal::{raster::Buffer, Dataset};
use parking_lot::Mutex;
use rayon::iter::{IntoParallelIterator, IntoParallelRefIterator as _, ParallelIterator as _};
use serde::Serialize;
use tracing::{debug, info};

use crate::io::reader::{mask_nodata, GeoInfo};
use crate::io::writer::{create_output, write_block, OutputSpec};
use crate::utils::gdal_ext::TypedBuffer;

/// Nodata value of float rasters, inputs included
pub const NODATA_VALUE_FLOAT: f32 = -999.0;

/// Rasters up to this size on both axes are processed in one piece
const SMALL_RASTER_LIMIT: usize = 512;

type BlockResult = std::result::Result<TypedBuffer, String>;
type BlockReadHandler = Box<dyn Fn(usize, usize, HashMap<usize, BlockResult>) + Send + Sync>;

struct BlockReadRequest {
    num_datasets: usize,
    dataset_idx: usize,
    x: usize,
    y: usize,
    state: BlockReadState,
    handler: Arc<BlockReadHandler>,
}

#[derive(Clone)]
struct BlockReadState {
    blocks: Arc<Mutex<HashMap<usize, BlockResult>>>,
    region_size: (usize, usize),
}

/// Settings of one processing run
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub output: OutputSpec,
    /// Inputs are divided by this before calculators that need reflectance
    pub input_scale_factor: f32,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            output: OutputSpec::default(),
            input_scale_factor: 10000.0,
        }
    }
}

/// Statistics of the valid (non-nodata) output pixels
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessSummary {
    pub band: String,
    pub valid_pixels: usize,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ProcessSummary {
    pub fn new(band: &str) -> Self {
        Self {
            band: band.to_string(),
            ..Self::default()
        }
    }

    /// Fold a result block into the running statistics
    pub fn accumulate(&mut self, block: &TypedBuffer) {
        let Some(data) = block.as_f32() else { return };
        let previous = self.valid_pixels as f64;
        let mut count = 0usize;
        let mut sum = 0.0f64;
        for &value in data.data() {
            if value == NODATA_VALUE_FLOAT || !value.is_finite() {
                continue;
            }
            let value = value as f64;
            count += 1;
            sum += value;
            self.min = Some(self.min.map_or(value, |m| m.min(value)));
            self.max = Some(self.max.map_or(value, |m| m.max(value)));
        }
        if count == 0 {
            return;
        }
        let total = previous + count as f64;
        self.mean = Some(self.mean.unwrap_or(0.0) * (previous / total) + sum / total);
        self.valid_pixels += count;
    }
}

pub struct ParallelProcessor {
    io_threads: usize,
}

impl ParallelProcessor {
    pub fn new(io_threads: Option<usize>) -> Self {
        let io_threads = io_threads.unwrap_or_else(|| num_cpus::get().max(4));
        Self { io_threads }
    }

    /// Run `calculator` over the input rasters, write the result to
    /// `output_path` and return statistics of the written band.
    pub fn process(
        &self,
        calculator: &dyn IndexCalculator,
        input_paths: &[String],
        output_path: &str,
        options: &ProcessOptions,
    ) -> Result<ProcessSummary> {
        if input_paths.len() < calculator.required_bands() {
            return Err(anyhow!(
                "Not enough input bands provided. Required: {}, provided: {}",
                calculator.required_bands(),
                input_paths.len()
            ));
        }

        // Get input raster dimensions from the first file
        let dataset = Dataset::open(&input_paths[0])
            .with_context(|| format!("failed to open {}", input_paths[0]))?;
        let geo_info = GeoInfo::from_dataset(&dataset);
        info!(
            calculator = calculator.name(),
            width = geo_info.width,
            height = geo_info.height,
            inputs = input_paths.len(),
            "processing raster"
        );

        if geo_info.width <= SMALL_RASTER_LIMIT && geo_info.height <= SMALL_RASTER_LIMIT {
            return self.process_small_raster(calculator, input_paths, output_path, options);
        }

        let block_reader = ParallelBlockReader::new(input_paths, self.io_threads)?;
        let output = create_output(output_path, &geo_info, &options.output, calculator.name())?;
        let mut summary = ProcessSummary::new(calculator.name());

        // Set up processing pipeline
        let (tx, rx) = flume::unbounded();
        let dataset_indices = (0..input_paths.len()).collect::<Vec<_>>();

        // Request processing of each block
        for y in 0..block_reader.blocks.1 {
            for x in 0..block_reader.blocks.0 {
                let tx = tx.clone();
                block_reader.run(
                    x,
                    y,
                    &dataset_indices,
                    Box::new(move |x, y, blocks| {
                        // the receiver only goes away when processing already failed
                        let _ = tx.send((x, y, blocks));
                    }),
                )?;
            }
        }
        drop(tx);

        // Process blocks as they become available
        for (x, y, mut blocks) in rx {
            let mut inputs = Vec::with_capacity(blocks.len());
            for i in 0..input_paths.len() {
                let block = blocks
                    .remove(&i)
                    .ok_or_else(|| anyhow!("block ({}, {}) is missing input {}", x, y, i))?
                    .map_err(|e| anyhow!("reading {} failed: {}", input_paths[i], e))?;
                inputs.push(block);
            }

            // Skip empty blocks (could happen at edges)
            if inputs.iter().any(TypedBuffer::is_empty) {
                continue;
            }

            let result = evaluate(calculator, inputs, options.input_scale_factor)?;
            summary.accumulate(&result);

            // Calculate actual pixel coordinates
            let start_x = x * block_reader.region_size.0;
            let start_y = y * block_reader.region_size.1;
            if start_x >= geo_info.width || start_y >= geo_info.height {
                continue;
            }

            write_block(
                &output,
                (start_x as isize, start_y as isize),
                &result,
                &options.output,
            )?;
            debug!(x, y, "block written");
        }

        // Finish processing
        block_reader.join();
        info!(
            calculator = calculator.name(),
            valid_pixels = summary.valid_pixels,
            mean = ?summary.mean,
            "processing finished"
        );
        Ok(summary)
    }

    /// Process small rasters (like test images) with a simpler, non-blocked approach
    fn process_small_raster(
        &self,
        calculator: &dyn IndexCalculator,
        input_paths: &[String],
        output_path: &str,
        options: &ProcessOptions,
    ) -> Result<ProcessSummary> {
        let (inputs, geo_info) = crate::io::read_bands(input_paths)?;
        let result = evaluate(calculator, inputs, options.input_scale_factor)?;

        let mut summary = ProcessSummary::new(calculator.name());
        summary.accumulate(&result);

        let output = create_output(output_path, &geo_info, &options.output, calculator.name())?;
        write_block(&output, (0, 0), &result, &options.output)?;
        Ok(summary)
    }
}

/// Apply input scaling if the calculator needs it, then calculate
pub fn evaluate(
    calculator: &dyn IndexCalculator,
    mut inputs: Vec<TypedBuffer>,
    input_scale_factor: f32,
) -> Result<TypedBuffer> {
    let needs_scaling =
        calculator.needs_input_scaling() && (input_scale_factor - 1.0).abs() > f32::EPSILON;

    if needs_scaling {
        debug!(
            calculator = calculator.name(),
            input_scale_factor, "scaling inputs"
        );
        for buffer in &mut inputs {
            if let Some(buf) = buffer.as_f32_mut() {
                for value in buf.data_mut() {
                    if *value != NODATA_VALUE_FLOAT {
                        *value /= input_scale_factor;
                    }
                }
            }
        }
    }

    calculator.calculate(&inputs)
}

struct ParallelBlockReader {
    region_size: (usize, usize),
    blocks: (usize, usize),
    workers: Vec<JoinHandle<()>>,
    req_tx: Sender<BlockReadRequest>,
}

impl ParallelBlockReader {
    pub fn new(paths: &[String], threads: usize) -> Result<Self> {
        // One handle per input and worker, GDAL datasets are not shareable
        let datasets = Arc::new(
            (0..threads)
                .into_par_iter()
                .map(|_| -> gdal::errors::Result<Box<[Arc<Mutex<Dataset>>]>> {
                    Ok(paths
                        .par_iter()
                        .map(|p| -> gdal::errors::Result<Arc<Mutex<Dataset>>> {
                            Ok(Arc::new(Mutex::new(Dataset::open(p)?)))
                        })
                        .collect::<gdal::errors::Result<Vec<_>>>()?
                        .into_boxed_slice())
                })
                .collect::<Result<Vec<_>, _>>()?,
        );

        let (req_tx, req_rx) = flume::unbounded();

        let mut workers = Vec::with_capacity(threads);
        for thread_id in 0..threads {
            let req_rx: Receiver<BlockReadRequest> = req_rx.clone();
            let datasets = Arc::clone(&datasets);

            workers.push(thread::spawn(move || {
                for request in req_rx {
                    let block = {
                        let dataset = datasets[thread_id][request.dataset_idx].lock();
                        read_block(&dataset, request.x, request.y, request.state.region_size)
                            .map_err(|e| e.to_string())
                    };

                    let blocks = {
                        let mut blocks = request.state.blocks.lock();
                        blocks.insert(request.dataset_idx, block);
                        if blocks.len() == request.num_datasets {
                            Some(mem::take(blocks.deref_mut()))
                        } else {
                            None
                        }
                    };

                    if let Some(blocks) = blocks {
                        (request.handler)(request.x, request.y, blocks);
                    }
                }
            }));
        }

        let (raster_size, block_size) = {
            let dataset = datasets[0][0].lock();
            let band = dataset.rasterband(1)?;
            (band.size(), band.block_size())
        };

        // Use a sensible block size, never larger than the image itself
        let region_size = if block_size.0 > 0 && block_size.1 > 0 {
            (
                block_size.0.min(raster_size.0),
                block_size.1.min(raster_size.1),
            )
        } else {
            (256.min(raster_size.0), 256.min(raster_size.1))
        };

        // Calculate number of blocks needed to cover the entire raster
        let blocks = (
            raster_size.0.div_ceil(region_size.0),
            raster_size.1.div_ceil(region_size.1),
        );
        debug!(?region_size, ?blocks, threads, "block reader ready");

        Ok(Self {
            region_size,
            blocks,
            workers,
            req_tx,
        })
    }

    pub fn run(
        &self,
        block_x: usize,
        block_y: usize,
        dataset_indices: &[usize],
        handler: BlockReadHandler,
    ) -> Result<()> {
        let handler = Arc::new(handler);
        let state = BlockReadState {
            region_size: self.region_size,
            blocks: Arc::new(Mutex::new(HashMap::new())),
        };

        for &idx in dataset_indices {
            let request = BlockReadRequest {
                num_datasets: dataset_indices.len(),
                dataset_idx: idx,
                x: block_x,
                y: block_y,
                state: state.clone(),
                handler: handler.clone(),
            };
            self.req_tx
                .send(request)
                .map_err(|_| anyhow!("block reader workers have stopped"))?;
        }
        Ok(())
    }

    pub fn join(self) {
        drop(self.req_tx);

        let mut errors = Vec::new();
        for worker in self.workers {
            if let Err(e) = worker.join() {
                errors.push(e);
            }
        }

        if !errors.is_empty() {
            panic::resume_unwind(Box::new(errors));
        }
    }
}

/// Read block (x, y) of band 1, clipped at the raster edge
fn read_block(
    dataset: &Dataset,
    x: usize,
    y: usize,
    region_size: (usize, usize),
) -> gdal::errors::Result<TypedBuffer> {
    let band = dataset.rasterband(1)?;
    let size = band.size();
    let window = (x * region_size.0, y * region_size.1);

    // Skip if we're completely outside the raster
    if window.0 >= size.0 || window.1 >= size.1 {
        return Ok(TypedBuffer::F32(Buffer::new((0, 0), vec![])));
    }

    let window_size = (
        region_size.0.min(size.0 - window.0),
        region_size.1.min(size.1 - window.1),
    );
    let mut buffer = band.read_as::<f32>(
        (window.0 as isize, window.1 as isize),
        window_size,
        window_size,
        None,
    )?;
    mask_nodata(&mut buffer, band.no_data_value());
    Ok(TypedBuffer::F32(buffer))
}

/// Trait for per-pixel raster calculators (spectral indices and GPR models)
pub trait IndexCalculator: Send + Sync {
    /// Calculate the index from the provided input bands
    fn calculate(&self, inputs: &[TypedBuffer]) -> Result<TypedBuffer>;

    /// Return the number of required input bands
    fn required_bands(&self) -> usize;

    /// Return the name of the index, used as the output band name
    fn name(&self) -> &str;

    /// Return true if this index requires input scaling for proper results
    /// Indices with constants (OSAVI, PISI) and the GPR models need scaling
    /// Pure ratio indices (NDI family, band shares) do not need scaling
    fn needs_input_scaling(&self) -> bool {
        false // Default: most indices are pure ratios that don't need scaling
    }
}
