//! clrunner command-line driver
//!
//! ## Usage
//!
//! ```bash
//! # Add two 1024-element vectors on the first GPU
//! clrunner add
//!
//! # Replace missing values in a 5000-element array, verbose logging
//! clrunner --log-level debug replace-missing 5000
//!
//! # Pick the second device of the first platform, any type
//! clrunner --device-type all --device 1 add 4096
//!
//! # List OpenCL devices
//! clrunner devices
//! ```

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use clrunner::{probe_devices, DeviceContext, DeviceKind, Engine, EngineConfig};
use clrunner_tasks::{
    add_vectors, add_vectors_seq, compare, fill_seq, fill_with_gaps, preview, replace_missing,
    replace_missing_seq, DEFAULT_TOLERANCE, KERNEL_DIR,
};

/// Values printed per array.
const MAX_PRINT: usize = 8;

#[derive(Parser, Debug)]
#[command(name = "clrunner")]
#[command(author = "Daemoniorum LLC")]
#[command(version)]
#[command(about = "Run OpenCL compute kernels and validate them against the host", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file path (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Platform index
    #[arg(long, global = true)]
    platform: Option<usize>,

    /// Device type (gpu, cpu, accelerator, default, all)
    #[arg(long, global = true)]
    device_type: Option<DeviceKind>,

    /// Device index among devices of the selected type
    #[arg(long, global = true)]
    device: Option<usize>,

    /// Options passed to the OpenCL compiler
    #[arg(long, global = true, allow_hyphen_values = true)]
    build_options: Option<String>,

    /// Directory holding the .cl kernel sources
    #[arg(long, global = true, default_value = KERNEL_DIR)]
    kernel_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add two sequences element-wise
    Add {
        /// Number of elements
        #[arg(default_value_t = 1024, value_parser = clap::value_parser!(u32).range(1..))]
        n: u32,
    },

    /// Replace zero-valued samples with the mean of their neighbours
    ReplaceMissing {
        /// Number of elements
        #[arg(default_value_t = 1024, value_parser = clap::value_parser!(u32).range(1..))]
        n: u32,
    },

    /// List OpenCL platforms and devices
    Devices,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(index) = args.platform {
        config.device.platform_index = index;
    }
    if let Some(kind) = args.device_type {
        config.device.device_type = kind;
    }
    if let Some(index) = args.device {
        config.device.device_index = index;
    }
    if let Some(options) = &args.build_options {
        config.build_options = options.clone();
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    // Initialize logging
    let level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Devices => {
            let devices = probe_devices();
            if devices.is_empty() {
                println!("No OpenCL devices found");
            }
            for device in devices {
                println!("{}", device);
            }
            Ok(())
        }
        Command::Add { n } => {
            let device = DeviceContext::acquire(&config.device)?;
            let result = run_add(&device, &config, &args.kernel_dir, n as usize);
            device.release();
            result.map_err(|e| {
                error!("Vector addition failed: {}", e);
                e
            })
        }
        Command::ReplaceMissing { n } => {
            let device = DeviceContext::acquire(&config.device)?;
            let result = run_replace_missing(&device, &config, &args.kernel_dir, n as usize);
            device.release();
            result.map_err(|e| {
                error!("Replace missing failed: {}", e);
                e
            })
        }
    }
}

fn run_add(
    device: &DeviceContext,
    config: &EngineConfig,
    kernel_dir: &Path,
    n: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::with_config(device, config);

    let a = fill_seq(n, 1.0);
    let b = fill_seq(n, 0.5);
    let mut result = vec![0.0f32; n];

    let report = add_vectors(&engine, &a, &b, &mut result, kernel_dir)?;
    info!("add_vectors_kernel finished in {:?}", report.elapsed);

    let mut reference = vec![0.0f32; n];
    add_vectors_seq(&a, &b, &mut reference);
    compare(&result, &reference, DEFAULT_TOLERANCE)?;
    println!("[add_vectors] Validation passed");

    println!("{}", preview("a     ", &a, MAX_PRINT));
    println!("{}", preview("b     ", &b, MAX_PRINT));
    println!("{}", preview("result", &result, MAX_PRINT));
    Ok(())
}

fn run_replace_missing(
    device: &DeviceContext,
    config: &EngineConfig,
    kernel_dir: &Path,
    n: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::with_config(device, config);

    let input = fill_with_gaps(n, 1.0);
    let mut result = vec![0.0f32; n];

    let report = replace_missing(&engine, &input, &mut result, kernel_dir)?;
    info!("replace_missing_kernel finished in {:?}", report.elapsed);

    let mut reference = vec![0.0f32; n];
    replace_missing_seq(&input, &mut reference);
    compare(&result, &reference, DEFAULT_TOLERANCE)?;
    println!("Validation passed");

    println!("{}", preview("input", &input, MAX_PRINT));
    println!("{}", preview("result", &result, MAX_PRINT));
    Ok(())
}
