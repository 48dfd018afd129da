mod capture;
mod collector;
mod error;
mod index;
mod record;
mod settings;
mod source;
mod store;

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Args, Parser, Subcommand};

use settings::{Overrides, Settings};

#[derive(Parser)]
#[command(name = "resume_collector", about = "Incremental, deduplicated resume collection into CSV")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect resumes for every query from a recorded search session
    Collect {
        /// JSON capture of search pages and resume pages
        #[arg(short, long)]
        capture: PathBuf,
        #[command(flatten)]
        target: Target,
        /// Max new resumes per query (0 = no limit)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Skip queries whose file already has this many rows
        #[arg(long)]
        threshold: Option<usize>,
        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },
    /// Show row, id and column counts for the combined and per-query files
    Stats {
        #[command(flatten)]
        target: Target,
    },
    /// Print the per-query file each query is stored in
    Slug {
        #[command(flatten)]
        target: Target,
    },
}

#[derive(Args)]
struct Target {
    /// Search query (repeatable, comma-separated lists allowed; default: SEARCH_QUERY)
    #[arg(short, long = "query")]
    queries: Vec<String>,
    /// Combined output file (default: OUTPUT_PATH or data/resumes.csv)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl Target {
    fn overrides(self) -> Overrides {
        Overrides {
            queries: self.queries,
            output_path: self.output,
            ..Default::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Collect {
            capture,
            target,
            limit,
            threshold,
            no_progress,
        } => {
            let settings = Settings::load(Overrides {
                resume_limit: limit,
                existing_record_threshold: threshold,
                show_progress: no_progress.then_some(false),
                ..target.overrides()
            })?;
            let (search, resumes) = capture::Capture::load(&capture)?.split();
            let summary = collector::Collector::new(&settings, search, resumes).run()?;
            summary.print();
            Ok(())
        }
        Commands::Stats { target } => {
            let settings = Settings::load(target.overrides())?;
            print_stats("combined", &settings.output_path);
            for query in &settings.queries {
                print_stats(query, &store::query_output_path(&settings.output_path, query));
            }
            Ok(())
        }
        Commands::Slug { target } => {
            let settings = Settings::load(target.overrides())?;
            if settings.queries.is_empty() {
                return Err(error::CollectError::NoQueries.into());
            }
            for query in &settings.queries {
                let path = store::query_output_path(&settings.output_path, query);
                println!("{} -> {}", query, path.display());
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn print_stats(label: &str, path: &Path) {
    if !path.exists() {
        println!("{:<24} {} (missing)", label, path.display());
        return;
    }
    let table = store::read_table(path);
    let ids = store::load_identifiers(path);
    println!(
        "{:<24} {} | rows: {} | unique ids: {} | columns: {}",
        truncate(label, 24),
        path.display(),
        table.rows.len(),
        ids.len(),
        table.headers.len()
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max - 3).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
