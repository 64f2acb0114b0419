//! tally - reproducible hash inventories of files, folders and zip archives.
//!
//! Usage:
//!   tally [OPTIONS] <PATHS>...     Catalog the given files, folders and archives
//!   tally --list-algorithms        Show supported hash algorithms
//!   tally --help                   Show help

use std::fmt::Write as _;
use std::path::PathBuf;
use std::thread;

use chrono::Local;
use clap::{Parser, ValueEnum};
use color_eyre::eyre::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use tally_core::{Catalog, CatalogConfig, HashAlgorithm};
use tally_scan::{CatalogProgress, Cataloger};

#[derive(Parser)]
#[command(
    name = "tally",
    version,
    about = "Reproducible hash inventories of files, folders and nested zip archives",
    long_about = "tally walks the selected files, folders and zip archives (including \
                  zips inside zips), hashes every file it finds and reports duplicates, \
                  empty files, empty containers and anything it could not read."
)]
struct Cli {
    /// Files, folders or zip archives to catalog, in order
    #[arg(required_unless_present = "list_algorithms")]
    paths: Vec<PathBuf>,

    /// Hash algorithm (see --list-algorithms)
    #[arg(short, long, default_value = "sha256")]
    algorithm: String,

    /// Maximum entries expanded from one archive and the archives inside it
    #[arg(long, default_value_t = tally_core::DEFAULT_ARCHIVE_ENTRY_BUDGET)]
    budget: usize,

    /// Expand archives without an entry limit
    #[arg(long, conflicts_with = "budget")]
    no_budget: bool,

    /// Also hash each archive's own bytes as a file
    #[arg(long)]
    include_archives: bool,

    /// Directory for temporary copies of nested archives
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Worker threads (0 = one per core, 1 = sequential)
    #[arg(short = 'j', long, default_value = "0")]
    threads: usize,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log progress details to stderr
    #[arg(short, long)]
    verbose: bool,

    /// List supported hash algorithms and exit
    #[arg(long)]
    list_algorithms: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.list_algorithms {
        for algorithm in HashAlgorithm::all() {
            println!("{:<10} {} hex digits", algorithm.name(), algorithm.hex_len());
        }
        return Ok(());
    }

    let algorithm = HashAlgorithm::from_name(&cli.algorithm)?;
    let config = CatalogConfig::builder()
        .roots(cli.paths.clone())
        .hash_algorithm(algorithm)
        .archive_entry_budget(if cli.no_budget { usize::MAX } else { cli.budget })
        .catalog_archive_files(cli.include_archives)
        .staging_dir(cli.staging_dir.clone())
        .threads(cli.threads)
        .build()
        .context("Invalid arguments")?;
    tracing::debug!(?config, "configuration");

    let catalog = run_catalog(&config)?;

    let rendered = match cli.format {
        OutputFormat::Text => render_text(&catalog),
        OutputFormat::Json => render_json(&catalog)?,
    };

    match cli.output {
        Some(output_path) => {
            std::fs::write(&output_path, rendered)
                .with_context(|| format!("Failed to write {}", output_path.display()))?;
            eprintln!("Report written to {}", output_path.display());
        }
        None => {
            print!("{}", rendered);
        }
    }

    Ok(())
}

/// Install the stderr log subscriber. `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "error" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Run the cataloger while a helper thread prints progress to stderr.
fn run_catalog(config: &CatalogConfig) -> Result<Catalog> {
    let cataloger = Cataloger::new();
    let mut progress_rx = cataloger.subscribe();

    eprintln!("Cataloging {} root(s)...", config.roots.len());

    let reporter = thread::spawn(move || {
        loop {
            match progress_rx.blocking_recv() {
                Ok(progress) => print_progress(&progress),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
        eprintln!();
    });

    let result = cataloger.catalog(config);
    drop(cataloger);
    let _ = reporter.join();

    result.context("Cataloging failed")
}

fn print_progress(progress: &CatalogProgress) {
    eprint!(
        "\r {} files, {} hashed, {} error(s) in {:.1}s",
        progress.files_processed,
        format_size(progress.bytes_processed),
        progress.errors_count,
        progress.elapsed.as_secs_f64()
    );
}

/// Render the catalog as a sectioned text report.
fn render_text(catalog: &Catalog) -> String {
    let mut out = String::new();
    let rule = "─".repeat(70);
    let stats = catalog.stats();

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, " tally report");
    let _ = writeln!(out, " Generated: {}", Local::now().format("%Y-%m-%d %H:%M:%S %Z"));
    let _ = writeln!(out, " Algorithm: {}", catalog.algorithm());
    for root in catalog.roots() {
        let _ = writeln!(out, " Root:      {}", root.display());
    }
    let _ = writeln!(
        out,
        " {} files ({}), {} folders, {} archives",
        stats.total_files,
        format_size(stats.total_bytes),
        stats.directories,
        stats.archives
    );
    let _ = writeln!(out, "{rule}");

    section(&mut out, "Files", catalog.files().len());
    for file in catalog.files() {
        let _ = writeln!(
            out,
            "   {}  {:>10}  {}",
            file.hash,
            format_size(file.size),
            file.path.display()
        );
        let _ = writeln!(
            out,
            "     in {} ({})",
            file.folder_name(),
            file.folder_path.display()
        );
    }

    section(&mut out, "Errors", catalog.errors().len());
    for error in catalog.errors() {
        let _ = writeln!(out, "   {}", error);
    }

    section(&mut out, "Empty Files", catalog.empty_files().len());
    for path in catalog.empty_files() {
        let _ = writeln!(out, "   {}", path.display());
    }

    section(
        &mut out,
        "Empty Folders and Archives",
        catalog.empty_containers().len(),
    );
    for container in catalog.empty_containers() {
        let _ = writeln!(
            out,
            "   [{}] {}",
            container.kind,
            container.provenance_string()
        );
    }

    let groups = catalog.duplicate_groups();
    let wasted: u64 = groups.iter().map(|g| g.wasted_bytes()).sum();
    section(&mut out, "Duplicate Groups", groups.len());
    if !groups.is_empty() {
        let _ = writeln!(out, "   Total wasted space: {}", format_size(wasted));
    }
    for (i, group) in groups.iter().enumerate() {
        let _ = writeln!(
            out,
            "   Group {} ({} files, {} each) {}",
            i + 1,
            group.count(),
            format_size(group.size()),
            group.key
        );
        for record in &group.records {
            let _ = writeln!(out, "     {}", record.path.display());
        }
    }

    out
}

fn section(out: &mut String, title: &str, count: usize) {
    let _ = writeln!(out);
    let _ = writeln!(out, " {} ({})", title, count);
    if count == 0 {
        let _ = writeln!(out, "   none");
    }
}

/// Render the catalog plus its duplicate groups as JSON.
fn render_json(catalog: &Catalog) -> Result<String> {
    let mut report = serde_json::Map::new();
    report.insert(
        "generated_at".to_string(),
        serde_json::Value::String(Local::now().to_rfc3339()),
    );
    report.insert("catalog".to_string(), serde_json::to_value(catalog)?);
    report.insert(
        "duplicate_groups".to_string(),
        serde_json::to_value(catalog.duplicate_groups())?,
    );
    let mut json = serde_json::to_string_pretty(&serde_json::Value::Object(report))?;
    json.push('\n');
    Ok(json)
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}
