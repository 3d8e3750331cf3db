use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use ferrous_erate::defaults;
use ferrous_erate::erate_opt::{ReadRange, RefineOpt};
use ferrous_erate::estimate;
use ferrous_erate::overlap::{OverlapStoreReader, OverlapStoreWriter};
use ferrous_erate::read_store::{ReadLengths, ReadStore};

#[derive(Parser)]
#[command(name = "ferrous-erate")]
#[command(about = "Per-read error-rate estimation and overlap filtering", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct InputArgs {
    /// Read lengths table ('read_id<TAB>length' per line)
    #[arg(short = 'S', long, value_name = "READS.TSV")]
    reads: PathBuf,

    /// Input overlap store
    #[arg(short = 'O', long, value_name = "STORE.OVS")]
    overlaps: PathBuf,

    /// Compact overlap cache; mapped if present, written if absent
    #[arg(short = 'C', long, value_name = "FILE")]
    cache: Option<PathBuf>,

    /// First read id to process
    #[arg(short = 'b', long, value_name = "INT")]
    begin: Option<u32>,

    /// Last read id to process
    #[arg(short = 'e', long, value_name = "INT")]
    end: Option<u32>,

    /// Process partition PART of PARTS (ignored if -b or -e is given)
    #[arg(short = 'p', long, num_args = 2, value_names = ["PART", "PARTS"])]
    partition: Option<Vec<u32>>,

    /// Overlaps read from the store per block
    #[arg(long, value_name = "INT", default_value_t = defaults::OVERLAP_BLOCK)]
    overlap_block: usize,

    /// Verbose level: 1=error, 2=warning, 3=message, 4+=debugging
    #[arg(short = 'v', long, value_name = "INT", default_value_t = defaults::VERBOSITY)]
    verbosity: i32,
}

#[derive(Subcommand)]
enum Commands {
    /// Refine read error profiles and write the surviving overlaps
    Refine {
        #[command(flatten)]
        input: InputArgs,

        /// Output overlap store
        #[arg(short = 'o', long, value_name = "FILE", default_value = defaults::OUTPUT_STORE)]
        output: PathBuf,

        /// Number of refinement iterations
        #[arg(short = 'i', long, value_name = "INT", default_value_t = defaults::ITERATIONS)]
        iterations: u32,

        /// Discard an overlap if its error exceeds the estimate by more than FLOAT
        #[arg(short = 'E', long, value_name = "FLOAT", default_value_t = defaults::ERATE_TOLERANCE)]
        tolerance: f64,

        /// Reads per parallel work unit
        #[arg(long, value_name = "INT", default_value_t = defaults::READ_BLOCK)]
        read_block: usize,

        /// Number of threads (default: all available cores)
        #[arg(short = 't', long, value_name = "INT")]
        threads: Option<usize>,
    },

    /// Load overlaps and write the compact cache only
    Cache {
        #[command(flatten)]
        input: InputArgs,
    },
}

fn init_logging(verbosity: i32) {
    let level = match verbosity {
        v if v <= 1 => log::LevelFilter::Error,
        2 => log::LevelFilter::Warn,
        3 => log::LevelFilter::Info,
        4 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false)
        .init();
}

/// Size the global rayon pool used by the per-read refinement pass.
fn configure_threads(threads: Option<usize>) {
    let cores = num_cpus::get();
    let requested = threads.unwrap_or(cores);
    let n = requested.clamp(1, cores * 2);
    if n != requested {
        log::warn!("-t {} out of range 1..={}, refining with {} threads", requested, cores * 2, n);
    }

    if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(n).build_global() {
        log::warn!("Refinement thread pool already set up: {}", e);
    }

    log::info!("Refining with {} thread{}", n, if n == 1 { "" } else { "s" });
}

/// Open the read store and overlap store and resolve the working range.
fn open_inputs(
    input: &InputArgs,
) -> anyhow::Result<(ReadLengths, OverlapStoreReader, ReadRange)> {
    log::info!("Opening '{}'", input.reads.display());
    let reads = ReadLengths::load(&input.reads)?;

    log::info!("Opening '{}'", input.overlaps.display());
    let store = OverlapStoreReader::open(&input.overlaps)?;

    let partition = match input.partition.as_deref() {
        Some([part, parts]) => Some((*part, *parts)),
        Some(other) => anyhow::bail!("-p takes PART PARTS, got {} values", other.len()),
        None => None,
    };
    let range = ReadRange::resolve(input.begin, input.end, partition, reads.read_count())?;

    if let Some((part, parts)) = partition {
        log::info!("  partition = {} of {}", part, parts);
    }
    Ok((reads, store, range))
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Refine {
            input,
            output,
            iterations,
            tolerance,
            read_block,
            threads,
        } => {
            init_logging(input.verbosity);

            let mut opt = RefineOpt::default();
            opt.iterations = iterations;
            opt.erate_tolerance = tolerance;
            opt.read_block = read_block;
            opt.overlap_block = input.overlap_block;
            opt.cache = input.cache.clone();
            configure_threads(threads);

            log::info!(
                "Refining {} iterations, tolerance {}, {} reads per work unit",
                opt.iterations,
                opt.erate_tolerance,
                opt.read_block
            );

            open_inputs(&input).and_then(|(reads, mut store, range)| {
                let mut writer = OverlapStoreWriter::create(&output)?;
                let summary =
                    estimate::main_estimate(&reads, &mut store, &mut writer, range, &opt)?;
                log::info!(
                    "Wrote {} overlaps to '{}' ({} discarded)",
                    summary.survivors.retained,
                    output.display(),
                    summary.survivors.dropped
                );
                Ok(())
            })
        }

        Commands::Cache { input } => {
            init_logging(input.verbosity);

            let mut opt = RefineOpt::default();
            opt.overlap_block = input.overlap_block;
            opt.cache = input.cache.clone();

            open_inputs(&input).and_then(|(_reads, mut store, range)| {
                let n = estimate::main_cache(&mut store, range, &opt)?;
                log::info!("Cached {} overlaps", n);
                Ok(())
            })
        }
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}
