//! chunkstore admin tool
//!
//! Offline inspection and maintenance of a chunkstore data directory.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chunkstore::cache::FdCache;
use chunkstore::storage::{ChunkSource, FileChunkSource, Manifest, StorageManager};
use chunkstore::{Config, Engine, Result, Stats};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// chunkstore admin
#[derive(Parser, Debug)]
#[command(name = "chunkstore-admin")]
#[command(about = "Inspect and maintain a chunkstore data directory")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./chunkstore_data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the live tables (read only)
    Inspect,

    /// Read every chunk and check its checksum (read only)
    Verify,

    /// Merge all tables into one
    Compact,

    /// Delete orphaned temp files and unreferenced tables
    Clean,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chunkstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    tracing::info!("chunkstore admin v{}", chunkstore::VERSION);
    tracing::info!("Data directory: {}", args.data_dir.display());

    let result = match args.command {
        Commands::Inspect => inspect(&args.data_dir),
        Commands::Verify => verify(&args.data_dir),
        Commands::Compact => compact(&args.data_dir),
        Commands::Clean => clean(&args.data_dir),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Open the tables listed in the manifest without touching anything else
fn open_tables(dir: &Path) -> Result<(Manifest, Vec<Arc<dyn ChunkSource>>)> {
    let manifest = Manifest::load(dir)?;
    let fd_cache = Arc::new(FdCache::new(dir, 16));
    let stats = Stats::new();

    let mut sources: Vec<Arc<dyn ChunkSource>> = Vec::with_capacity(manifest.tables.len());
    for spec in &manifest.tables {
        let source =
            FileChunkSource::open(spec.name, spec.chunk_count, Arc::clone(&fd_cache), None, &stats)?;
        sources.push(Arc::new(source));
    }
    Ok((manifest, sources))
}

fn inspect(dir: &Path) -> Result<bool> {
    let (manifest, sources) = open_tables(dir)?;

    println!("manifest version {}", manifest.version);
    println!("{} tables, {} chunks", sources.len(), manifest.chunk_count());
    for source in &sources {
        println!(
            "  {}  chunks={:<8} data_bytes={}",
            source.name(),
            source.chunk_count(),
            source.data_len()
        );
    }
    Ok(true)
}

fn verify(dir: &Path) -> Result<bool> {
    let (_, sources) = open_tables(dir)?;
    let stats = Stats::new();
    let mut failures = 0usize;

    for source in &sources {
        let index = source.index()?;
        for address in index.addresses() {
            match source.get(&address, &stats) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    failures += 1;
                    println!("  {}: chunk {} missing", source.name(), address);
                }
                Err(e) => {
                    failures += 1;
                    println!("  {}: {}", source.name(), e);
                }
            }
        }
    }

    let snapshot = stats.snapshot();
    println!(
        "verified {} chunks ({} bytes) in {} tables, {} failures",
        snapshot.chunks_read,
        snapshot.bytes_read,
        sources.len(),
        failures
    );
    Ok(failures == 0)
}

fn compact(dir: &Path) -> Result<bool> {
    let engine = Engine::open(Config::builder().data_dir(dir).build())?;
    let before = engine.table_count();

    match engine.compact()? {
        Some(table) => println!(
            "merged {} tables into {} ({} chunks)",
            before,
            table.name(),
            table.chunk_count()
        ),
        None => println!("nothing to compact ({} tables)", before),
    }

    engine.close()?;
    Ok(true)
}

fn clean(dir: &Path) -> Result<bool> {
    let storage = StorageManager::open(&Config::builder().data_dir(dir).build())?;
    let report = storage.cleanup_report();
    println!(
        "removed {} temp files and {} unreferenced tables",
        report.temp_files, report.tables
    );
    storage.close();
    Ok(true)
}
