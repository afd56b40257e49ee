mod detail;
mod discover;
mod error;
mod export;
mod orchestrator;
mod place;
mod recorder;
mod selectors;
mod session;
mod settings;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::orchestrator::Orchestrator;
use crate::place::PlaceRecord;
use crate::recorder::{Recorder, RunState};
use crate::selectors::SelectorSet;
use crate::session::ChromeSession;
use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "places_scraper", about = "Saved-places scraper driving a Chromium session")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the saved list in a browser and record every place on it
    Scrape {
        /// Settings file (default: ./places.toml if present)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Saved-list URL (overrides start_url / start_url_file)
        #[arg(long)]
        url: Option<String>,
        /// Output store (default: outputs/places_<timestamp>.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Built-in selector set name or path to a selector file
        #[arg(short, long)]
        selectors: Option<String>,
        /// Run the browser without a window
        #[arg(long)]
        headless: bool,
        /// Keep places already in --output and skip them
        #[arg(long)]
        resume: bool,
        /// Attempts per place when no contact details render
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        max_attempts: Option<u32>,
    },
    /// Show places from an output store
    Inspect {
        file: PathBuf,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Write an output store as CSV
    Export {
        file: PathBuf,
        /// CSV path (default: the store's path with a .csv extension)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Scrape {
            config,
            url,
            output,
            selectors,
            headless,
            resume,
            max_attempts,
        } => {
            let mut settings = settings::load(config.as_deref())?;
            if url.is_some() {
                settings.start_url = url;
            }
            if output.is_some() {
                settings.output = output;
            }
            if let Some(s) = selectors {
                settings.selectors = s;
            }
            if headless {
                settings.browser.headless = true;
            }
            if let Some(n) = max_attempts {
                settings.retry.max_attempts = n;
            }
            scrape(settings, resume).await
        }
        Commands::Inspect { file, limit } => {
            let places = recorder::load(&file)?;
            if places.is_empty() {
                println!("No places in {}.", file.display());
                return Ok(());
            }
            print_places(&places, limit);
            Ok(())
        }
        Commands::Export { file, out } => {
            let places = recorder::load(&file)?;
            let out = out.unwrap_or_else(|| file.with_extension("csv"));
            export::export_file(&places, &out)?;
            println!("Exported {} places to {}", places.len(), out.display());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn scrape(settings: Settings, resume: bool) -> Result<()> {
    let selectors = SelectorSet::resolve(&settings.selectors)?;
    let start_url = settings.start_url(&selectors)?;

    if resume && settings.output.is_none() {
        bail!("--resume needs --output pointing at the store to continue");
    }
    let output = settings.output_path();
    let state = if resume {
        resume_state(&output)?
    } else {
        RunState::new()
    };

    let mut session = ChromeSession::launch(&settings.browser)
        .await
        .context("Browser session setup failed")?;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current place");
            token.cancel();
        }
    });

    println!("Scraping saved places from {}", start_url);
    let report = Orchestrator::new(&mut session, &selectors, &settings, Recorder::new(&output))
        .start_url(start_url)
        .resume_from(state)
        .cancel_token(cancel)
        .show_progress(true)
        .run()
        .await;

    session.shutdown().await;
    report.print();

    if report.exit_code() != 0 {
        bail!("Run {}", report.outcome);
    }
    Ok(())
}

fn resume_state(path: &Path) -> Result<RunState> {
    if !path.exists() {
        info!("{} does not exist yet, starting fresh", path.display());
        return Ok(RunState::new());
    }
    let previous = recorder::load(path)
        .with_context(|| format!("Cannot resume from {}", path.display()))?;
    info!("Resuming with {} places from {}", previous.len(), path.display());
    Ok(RunState::resume(previous))
}

fn print_places(places: &[PlaceRecord], limit: usize) {
    println!(
        "{:>3} | {:<28} | {:<16} | {:>6} | {:>7} | {:<16} | {:<30}",
        "#", "Name", "Category", "Rating", "Reviews", "Phone", "Address"
    );
    println!("{}", "-".repeat(124));

    for (i, p) in places.iter().take(limit).enumerate() {
        println!(
            "{:>3} | {:<28} | {:<16} | {:>6} | {:>7} | {:<16} | {:<30}",
            i + 1,
            truncate(&p.name, 28),
            truncate(p.category.as_deref().unwrap_or("-"), 16),
            p.rating.as_deref().unwrap_or("-"),
            p.review_count.as_deref().unwrap_or("-"),
            truncate(p.phone.as_deref().unwrap_or("-"), 16),
            truncate(p.address.as_deref().unwrap_or("-"), 30),
        );
    }

    let with_address = places.iter().filter(|p| p.address.is_some()).count();
    let with_phone = places.iter().filter(|p| p.phone.is_some()).count();
    let with_website = places.iter().filter(|p| p.website.is_some()).count();
    println!(
        "\n{} places | address: {} | phone: {} | website: {}",
        places.len(),
        with_address,
        with_phone,
        with_website
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
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
