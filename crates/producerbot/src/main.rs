use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use producerbot_core::config::load_config;
use producerbot_core::mediawiki::{MediaWikiClient, MediaWikiClientConfig, ProducerWikiApi};
use producerbot_core::orchestrator::{PageAction, RunOptions, RunReport, run_producer_pages};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "producerbot",
    version,
    about = "Add missing songs and albums to producer page discography tables"
)]
struct Cli {
    #[arg(long, value_name = "PATH", default_value = "producerbot.toml")]
    config: PathBuf,
    #[arg(long, value_name = "TITLE", help = "Process a single producer page")]
    page: Option<String>,
    #[arg(
        long,
        value_name = "PREFIX",
        conflicts_with = "page",
        help = "Start the category walk at this sort key prefix"
    )]
    from: Option<String>,
    #[arg(long, help = "Compute edits without saving them")]
    dry_run: bool,
    #[arg(long, help = "Print a unified diff for every changed page")]
    diff: bool,
    #[arg(long, help = "Print the run report as JSON")]
    json: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let mut client = MediaWikiClient::new(MediaWikiClientConfig::from_config(&config))?;
    match config.credentials() {
        Some(credentials) => {
            client
                .login(&credentials.username, &credentials.password)
                .context("bot login failed")?;
            info!(user = %credentials.username, api = client.api_url(), "logged in");
        }
        None if cli.dry_run => {
            info!(api = client.api_url(), "no credentials set, running anonymously");
        }
        None => bail!("BOT_USERNAME and BOT_PASSWORD are required unless --dry-run is set"),
    }

    let mut options = RunOptions::from_config(&config);
    options.only_page = cli.page.clone();
    options.start_from = cli.from.clone();
    options.dry_run = cli.dry_run;
    options.capture_diffs = cli.diff;

    let report = run_producer_pages(&mut client, &options)?;
    info!(requests = client.request_count(), "run finished");

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("producer pages");
    println!("dry_run: {}", format_flag(report.dry_run));
    println!("scanned: {}", report.scanned);
    println!("saved: {}", report.saved);
    println!("would_save: {}", report.would_save);
    println!("unchanged: {}", report.unchanged);
    println!("failed: {}", report.failures.len());
    println!("request_count: {}", report.request_count);

    let changed: Vec<_> = report
        .pages
        .iter()
        .filter(|page| page.action != PageAction::Unchanged)
        .collect();
    if !changed.is_empty() {
        println!("pages:");
        for page in &changed {
            println!(
                "  - {} (songs: {}, albums: {})",
                page.title,
                page.songs_added.len(),
                page.albums_added.len()
            );
        }
    }
    for page in &changed {
        if let Some(diff) = &page.diff {
            println!("\n{diff}");
        }
    }

    if !report.failures.is_empty() {
        println!("failures:");
        for failure in &report.failures {
            println!("  - {}: {}", failure.title, failure.message);
        }
    }
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
