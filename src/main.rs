use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use wis_forensics::export::{json, sql, sqlite};
use wis_forensics::{
    run, EntityClass, ExtractionResult, PatternConfig, RunOptions, SourceDescriptor, StopPolicy,
};

#[derive(Parser)]
#[command(name = "wis_forensics", about = "Recover catalog records from raw WIS/Transbase dumps")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan files (or every file in a directory) and export what was recovered
    Scan {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Read fixed-size pages of N bytes
        #[arg(long, conflicts_with = "chunk_size")]
        page_size: Option<usize>,
        /// Read chunks of N bytes
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Pattern configuration file (TOML or JSON)
        #[arg(long)]
        patterns: Option<PathBuf>,
        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
        /// Export formats, repeatable
        #[arg(long = "format", value_enum, default_values_t = [Format::Json])]
        formats: Vec<Format>,
        /// Stop after this many distinct parts
        #[arg(long)]
        max_entities: Option<usize>,
        /// Stop after this many procedures and bulletins
        #[arg(long)]
        max_text: Option<usize>,
        /// Read at most N windows per source
        #[arg(long)]
        max_windows: Option<usize>,
    },
    /// Print the effective pattern configuration as JSON
    Patterns {
        #[arg(long)]
        patterns: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Sql,
    Sqlite,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let t0 = Instant::now();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            paths,
            page_size,
            chunk_size,
            patterns,
            out,
            formats,
            max_entities,
            max_text,
            max_windows,
        } => {
            let config = load_patterns(patterns.as_deref())?;
            let set = config.compile().context("compiling pattern configuration")?;

            let files = expand_paths(&paths)?;
            let sources: Vec<SourceDescriptor> = files
                .into_iter()
                .map(|path| {
                    let source = match (page_size, chunk_size) {
                        (Some(n), _) => SourceDescriptor::paged(path, n),
                        (None, Some(n)) => SourceDescriptor::chunked(path, n),
                        (None, None) => SourceDescriptor::whole(path),
                    };
                    match max_windows {
                        Some(max) => source.with_max_windows(max),
                        None => source,
                    }
                })
                .collect();

            println!("WIS forensic extraction");
            println!("=======================\n");
            println!("Patterns: {}", set.version());
            println!("Sources:  {}\n", sources.len());

            let pb = ProgressBar::new(sources.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} sources")?
                    .progress_chars("#>-"),
            );
            let options = RunOptions {
                stop: StopPolicy {
                    max_entities,
                    max_text,
                },
                progress: Some(pb.clone()),
            };
            let result = run(&sources, &set, &options)?;
            pb.finish_and_clear();

            print_summary(&result);
            fs::create_dir_all(&out).with_context(|| format!("creating {:?}", out))?;
            for format in formats {
                export(&result, format, &out)?;
            }
            println!("\nDone in {:.1}s", t0.elapsed().as_secs_f64());
            Ok(())
        }
        Commands::Patterns { patterns } => {
            let config = load_patterns(patterns.as_deref())?;
            let set = config.compile().context("compiling pattern configuration")?;
            for class in EntityClass::ALL {
                tracing::info!(class = class.as_str(), patterns = set.pattern_count(class), "compiled");
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn load_patterns(path: Option<&Path>) -> Result<PatternConfig> {
    PatternConfig::load(path).with_context(|| match path {
        Some(p) => format!("loading patterns from {:?}", p),
        None => "loading built-in patterns".to_string(),
    })
}

/// Directories expand to the regular files directly inside them, sorted.
fn expand_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(path)
                .with_context(|| format!("listing {:?}", path))?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

fn export(result: &ExtractionResult, format: Format, out: &Path) -> Result<()> {
    match format {
        Format::Json => {
            let path = out.join("wis_export.json");
            json::write(result, &path).with_context(|| format!("writing {:?}", path))?;
            println!("JSON:   {}", path.display());
        }
        Format::Sql => {
            let path = out.join("wis_import.sql");
            sql::write(result, &path).with_context(|| format!("writing {:?}", path))?;
            println!("SQL:    {}", path.display());
        }
        Format::Sqlite => {
            let path = out.join("wis.sqlite");
            let counts = sqlite::write(result, &path).with_context(|| format!("writing {:?}", path))?;
            println!(
                "SQLite: {} ({} parts, {} procedures, {} bulletins, {} models written)",
                path.display(),
                counts.parts,
                counts.procedures,
                counts.bulletins,
                counts.models
            );
        }
    }
    Ok(())
}

fn print_summary(result: &ExtractionResult) {
    let stats = &result.stats;
    println!(
        "Scanned {} windows ({} blank, {} noise), {} bytes",
        stats.windows, stats.blank_windows, stats.noise_windows, stats.bytes_scanned
    );
    for class in EntityClass::ALL {
        let c = stats.class(class);
        println!(
            "  {:<10} {:>8} candidates {:>8} accepted {:>8} rejected",
            class.as_str(),
            c.candidates,
            c.accepted,
            c.rejected
        );
    }
    println!(
        "Recovered {} parts, {} procedures, {} bulletins, {} models",
        result.entities.len(),
        result.procedures().count(),
        result.bulletins().count(),
        result.models.len()
    );
    for failure in &stats.sources_failed {
        println!("  skipped {}: {}", failure.source, failure.reason);
    }
    if stats.stopped_early {
        println!("Stopped early: stop policy reached");
    }
}
