//! nvmkv CLI
//!
//! Command-line access to an nvmkv region: single get/set, a recovery
//! report, and a multi-threaded load harness.

use std::path::PathBuf;
use std::process;
use std::time::Instant;

use clap::{Args as ClapArgs, Parser, Subcommand};
use nvmkv::diag::Diagnostics;
use nvmkv::store::KEY_LEN;
use nvmkv::{Config, Engine, PersistStrategy};
use tracing_subscriber::{fmt, EnvFilter};

/// nvmkv CLI
#[derive(Parser, Debug)]
#[command(name = "nvmkv")]
#[command(about = "Embedded key-value engine over a memory-mapped region")]
#[command(version)]
struct Args {
    #[command(flatten)]
    region: RegionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ClapArgs, Debug)]
struct RegionArgs {
    /// Backing file
    #[arg(short, long, default_value = "./nvmkv.pmem")]
    file: PathBuf,

    /// Region size in MiB
    #[arg(long, default_value = "1024")]
    file_size_mb: u64,

    /// Bytes per block
    #[arg(long, default_value = "64")]
    block_size: u32,

    /// Blocks per segment
    #[arg(long, default_value = "65536")]
    block_per_segment: u32,

    /// Hash directory buckets
    #[arg(long, default_value = "1048576")]
    buckets: u32,

    /// Maximum number of distinct keys
    #[arg(long, default_value = "4194304")]
    key_capacity: u32,

    /// Skip the per-write msync
    #[arg(long)]
    no_sync: bool,

    /// Append diagnostics to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key (at most 16 bytes, zero padded)
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key (at most 16 bytes, zero padded)
        key: String,

        /// The value to set
        value: String,
    },

    /// Open the region and report what recovery found
    Recover,

    /// Run a concurrent set-then-verify workload
    Bench {
        /// Worker threads
        #[arg(short, long, default_value = "4")]
        threads: usize,

        /// Keys written per thread
        #[arg(short, long, default_value = "100000")]
        ops: usize,

        /// Value length in bytes
        #[arg(short, long, default_value = "80")]
        value_len: usize,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,nvmkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("nvmkv v{}", nvmkv::VERSION);

    let config = Config::builder()
        .path(&args.region.file)
        .file_size(args.region.file_size_mb * 1024 * 1024)
        .block_size(args.region.block_size)
        .block_per_segment(args.region.block_per_segment)
        .bucket_count(args.region.buckets)
        .key_capacity(args.region.key_capacity)
        .persist(if args.region.no_sync {
            PersistStrategy::OsManaged
        } else {
            PersistStrategy::EveryWrite
        })
        .build();

    let diagnostics = match &args.region.log_file {
        Some(path) => match Diagnostics::open(path) {
            Ok(diagnostics) => diagnostics,
            Err(e) => {
                tracing::error!("Failed to open log file {}: {}", path.display(), e);
                process::exit(1);
            }
        },
        None => Diagnostics::disabled(),
    };

    let engine: Engine = match Engine::open_with(config, diagnostics) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            process::exit(1);
        }
    };

    let outcome = match args.command {
        Commands::Get { key } => run_get(&engine, &key),
        Commands::Set { key, value } => run_set(&engine, &key, &value),
        Commands::Recover => {
            match engine.recovery_result() {
                Some(result) => println!("{:#?}", result),
                None => println!("region was newly created; nothing to recover"),
            }
            Ok(())
        }
        Commands::Bench {
            threads,
            ops,
            value_len,
        } => run_bench(&engine, threads, ops, value_len),
    };

    if let Err(e) = outcome.and_then(|_| engine.close().map_err(|e| e.to_string())) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

/// Pad a CLI key to the fixed key width
fn cli_key(key: &str) -> Result<[u8; KEY_LEN], String> {
    let bytes = key.as_bytes();
    if bytes.len() > KEY_LEN {
        return Err(format!("key longer than {} bytes", KEY_LEN));
    }
    let mut padded = [0u8; KEY_LEN];
    padded[..bytes.len()].copy_from_slice(bytes);
    Ok(padded)
}

fn run_get(engine: &Engine, key: &str) -> Result<(), String> {
    let key = cli_key(key)?;
    match engine.get(&key).map_err(|e| e.to_string())? {
        Some(value) => println!("{}", String::from_utf8_lossy(&value)),
        None => println!("(not found)"),
    }
    Ok(())
}

fn run_set(engine: &Engine, key: &str, value: &str) -> Result<(), String> {
    let key = cli_key(key)?;
    engine
        .set(&key, value.as_bytes())
        .map_err(|e| e.to_string())?;
    println!("OK");
    Ok(())
}

/// xorshift64*, seeded per thread
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 >> 12;
        self.0 ^= self.0 << 25;
        self.0 ^= self.0 >> 27;
        self.0.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn fill(&mut self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(8) {
            let word = self.next().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
}

fn run_bench(engine: &Engine, threads: usize, ops: usize, value_len: usize) -> Result<(), String> {
    let start = Instant::now();

    let mismatches = crossbeam::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                s.spawn(move |_| -> Result<usize, String> {
                    let mut worker = engine.worker();
                    let seed = 0x9E37_79B9_7F4A_7C15 ^ (t as u64 + 1);
                    let mut key = [0u8; KEY_LEN];
                    let mut value = vec![0u8; value_len];

                    let mut rng = Rng(seed);
                    for _ in 0..ops {
                        rng.fill(&mut key);
                        rng.fill(&mut value);
                        worker.set(&key, &value).map_err(|e| e.to_string())?;
                    }

                    // Replay the same stream and verify
                    let mut rng = Rng(seed);
                    let mut wrong = 0;
                    for _ in 0..ops {
                        rng.fill(&mut key);
                        rng.fill(&mut value);
                        if worker.get(&key).map_err(|e| e.to_string())?.as_deref()
                            != Some(value.as_slice())
                        {
                            wrong += 1;
                        }
                    }
                    Ok(wrong)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| "bench worker panicked".to_string())?)
            .sum::<Result<usize, String>>()
    })
    .map_err(|_| "bench scope panicked".to_string())??;

    let elapsed = start.elapsed();
    let total = threads * ops;
    println!(
        "{} sets + {} gets in {:.2?} ({:.0} ops/s), {} mismatches",
        total,
        total,
        elapsed,
        (2 * total) as f64 / elapsed.as_secs_f64(),
        mismatches
    );
    if mismatches > 0 {
        return Err(format!("{} keys read back wrong", mismatches));
    }
    Ok(())
}
