// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use arrgate::backends::{BackendClient, LibraryClient, MovieClient, SeriesClient};
use arrgate::config::{load_config, load_config_from, Config, ConfigError};
use arrgate::errors::{ApiError, ApiErrorKind};
use arrgate::health::HealthStatus;
use arrgate::monitoring::{
    AddMovieRequest, EpisodeSelection, MonitorRequest, MonitoringOutcome, MovieOrchestrator, MovieOutcome,
    RemoveMovieRequest, SeriesOrchestrator, UnmonitorRequest,
};
use arrgate::types::BackendKind;
use arrgate::utils::OperationContext;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes following sysexits.h conventions
mod exit_codes {
    pub const SUCCESS: i32 = 0;
    /// General error, or an orchestration that did not succeed
    pub const ERROR: i32 = 1;
    /// Data error - invalid input (bad selection, short search term)
    pub const DATA_ERR: i32 = 65;
    /// Service unavailable - a backend is down or unreachable
    pub const SERVICE_UNAVAILABLE: i32 = 69;
    /// Internal software error
    pub const SOFTWARE: i32 = 70;
    /// Temporary failure - rate limited, try again later
    pub const TEMP_FAIL: i32 = 75;
    /// Configuration error - missing backend, bad URL, rejected API key
    pub const CONFIG: i32 = 78;
}

use exit_codes::*;

#[derive(Parser)]
#[command(name = "arrgate")]
#[command(version = VERSION)]
#[command(about = "Resilient gateway for series, movie and media-library backends.")]
#[command(long_about = "arrgate - Resilient gateway for self-hosted media managers\n\n\
    Check backends:      arrgate health\n\
    Find a show:         arrgate search series \"the expanse\"\n\
    Get seasons 1 and 2: arrgate monitor 280619 --season 1 --season 2\n\
    Get two episodes:    arrgate monitor 280619 --season 3:1,2\n\
    Stop a season:       arrgate unmonitor 280619 --season 1 --delete-files\n\
    Add a movie:         arrgate add-movie 603")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.arrgate/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overall deadline for the command, in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Quiet mode: warnings and errors only
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Verbose mode: per-attempt request logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every configured backend
    Health,

    /// Show detected API versions
    Version {
        /// Probe again instead of using the cached result
        #[arg(long)]
        refresh: bool,
    },

    /// Search one backend
    ///
    /// Examples:
    ///   arrgate search series "doctor who"
    ///   arrgate search movies matrix
    Search {
        #[arg(value_enum)]
        target: SearchTarget,
        query: String,
    },

    /// Monitor a series (or some seasons/episodes) and start downloading
    Monitor {
        /// TVDB id of the series
        tvdb_id: u64,
        /// Season to monitor, as N or N:e,e (repeatable)
        #[arg(long = "season", value_name = "N[:E,E]")]
        seasons: Vec<EpisodeSelection>,
        #[arg(long)]
        quality_profile: Option<u32>,
        #[arg(long)]
        root_folder: Option<String>,
    },

    /// Stop monitoring a series (or some seasons/episodes)
    Unmonitor {
        /// TVDB id of the series
        tvdb_id: u64,
        /// Season to unmonitor, as N or N:e,e (repeatable). Omit to delete the series.
        #[arg(long = "season", value_name = "N[:E,E]")]
        seasons: Vec<EpisodeSelection>,
        /// Delete files if the series ends up removed
        #[arg(long)]
        delete_files: bool,
    },

    /// Add a movie and search for it
    AddMovie {
        /// TMDB id of the movie
        tmdb_id: u64,
        #[arg(long)]
        quality_profile: Option<u32>,
        #[arg(long)]
        root_folder: Option<String>,
    },

    /// Remove a movie and cancel its downloads
    RemoveMovie {
        /// TMDB id of the movie
        tmdb_id: u64,
        /// Keep downloaded files on disk
        #[arg(long)]
        keep_files: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SearchTarget {
    Series,
    Movies,
    Library,
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else if quiet {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} Failed to start async runtime: {}", "[X]".red(), e);
            std::process::exit(SOFTWARE);
        }
    };

    let code = match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "[X]".red(), e);
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

/// Map a failure to a sysexits code by its root cause.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if cause.downcast_ref::<ConfigError>().is_some() {
            return CONFIG;
        }
        if let Some(api) = cause.downcast_ref::<ApiError>() {
            return match api.kind {
                ApiErrorKind::Authentication => CONFIG,
                ApiErrorKind::Validation { .. } => DATA_ERR,
                ApiErrorKind::RateLimit { .. } => TEMP_FAIL,
                ApiErrorKind::ServiceUnavailable { .. } | ApiErrorKind::Network { .. } => SERVICE_UNAVAILABLE,
                ApiErrorKind::NotFound { .. } | ApiErrorKind::MalformedResponse { .. } => ERROR,
            };
        }
    }
    ERROR
}

async fn run(cli: Cli) -> Result<i32> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    }
    .context("Failed to load configuration")?;

    if let Some(secs) = cli.timeout {
        config.operation_timeout_secs = secs;
    }
    let ctx = OperationContext::with_timeout(config.operation_timeout());
    tracing::debug!(correlation_id = %ctx.correlation_id, "Starting command");

    match cli.command {
        Commands::Health => handle_health(&config, &ctx).await,
        Commands::Version { refresh } => handle_version(&config, &ctx, refresh).await,
        Commands::Search { target, query } => handle_search(&config, &ctx, target, &query).await,
        Commands::Monitor {
            tvdb_id,
            seasons,
            quality_profile,
            root_folder,
        } => {
            let orchestrator = SeriesOrchestrator::new(Arc::new(series_client(&config)?));
            let mut request = MonitorRequest::new(tvdb_id);
            request.quality_profile_id = quality_profile;
            request.root_folder_path = root_folder;
            if !seasons.is_empty() {
                request = request.with_selection(seasons);
            }
            let outcome = orchestrator.monitor_and_download(&ctx, request).await;
            Ok(print_monitoring_outcome(&outcome))
        }
        Commands::Unmonitor {
            tvdb_id,
            seasons,
            delete_files,
        } => {
            let orchestrator = SeriesOrchestrator::new(Arc::new(series_client(&config)?));
            let mut request = UnmonitorRequest::new(tvdb_id);
            request.delete_files = delete_files;
            if !seasons.is_empty() {
                request = request.with_selection(seasons);
            }
            let outcome = orchestrator.unmonitor_and_delete(&ctx, request).await;
            Ok(print_monitoring_outcome(&outcome))
        }
        Commands::AddMovie {
            tmdb_id,
            quality_profile,
            root_folder,
        } => {
            let orchestrator = MovieOrchestrator::new(Arc::new(movie_client(&config)?));
            let mut request = AddMovieRequest::new(tmdb_id);
            request.quality_profile_id = quality_profile;
            request.root_folder_path = root_folder;
            let outcome = orchestrator.add_and_download(&ctx, request).await;
            Ok(print_movie_outcome(&outcome))
        }
        Commands::RemoveMovie { tmdb_id, keep_files } => {
            let orchestrator = MovieOrchestrator::new(Arc::new(movie_client(&config)?));
            let request = RemoveMovieRequest {
                tmdb_id,
                delete_files: !keep_files,
            };
            let outcome = orchestrator.remove(&ctx, request).await;
            Ok(print_movie_outcome(&outcome))
        }
    }
}

// =============================================================================
// CLIENT CONSTRUCTION
// =============================================================================

fn series_client(config: &Config) -> Result<SeriesClient> {
    let kind = BackendKind::SeriesManager;
    let settings = config.backend(kind)?;
    Ok(SeriesClient::new(settings.to_client_config(kind)?, settings.auth_strategy(kind)?)?)
}

fn movie_client(config: &Config) -> Result<MovieClient> {
    let kind = BackendKind::MovieManager;
    let settings = config.backend(kind)?;
    Ok(MovieClient::new(settings.to_client_config(kind)?, settings.auth_strategy(kind)?)?)
}

fn library_client(config: &Config) -> Result<LibraryClient> {
    let kind = BackendKind::LibraryServer;
    let settings = config.backend(kind)?;
    Ok(LibraryClient::new(settings.to_client_config(kind)?, settings.auth_strategy(kind)?)?)
}

/// Every backend present in the config file.
fn configured_clients(config: &Config) -> Result<Vec<Box<dyn BackendClient>>> {
    let mut clients: Vec<Box<dyn BackendClient>> = Vec::new();
    if config.series.is_some() {
        clients.push(Box::new(series_client(config).context("Series manager settings")?));
    }
    if config.movies.is_some() {
        clients.push(Box::new(movie_client(config).context("Movie manager settings")?));
    }
    if config.library.is_some() {
        clients.push(Box::new(library_client(config).context("Library server settings")?));
    }
    if clients.is_empty() {
        anyhow::bail!("No backends configured. Add at least one to ~/.arrgate/config.json");
    }
    Ok(clients)
}

// =============================================================================
// COMMAND HANDLERS
// =============================================================================

async fn handle_health(config: &Config, ctx: &OperationContext) -> Result<i32> {
    let clients = configured_clients(config)?;
    let mut any_critical = false;

    for client in &clients {
        let status = client.health_check(ctx).await;
        any_critical |= status.has_critical_issues();
        print_health(&status);
    }

    Ok(if any_critical { SERVICE_UNAVAILABLE } else { SUCCESS })
}

fn print_health(status: &HealthStatus) {
    let name = status.backend.display_name();
    if status.is_healthy() {
        let latency = status
            .response_time
            .map(|d| format!(" ({} ms)", d.as_millis()))
            .unwrap_or_default();
        println!("{} {}{}", "[OK]".green(), name.bold(), latency.dimmed());
    } else {
        println!("{} {}", "[X]".red(), name.bold());
    }

    if let Some(version) = &status.version {
        println!("     version {}", version.version);
    }
    for issue in &status.issues {
        println!("     {}", issue);
    }
}

async fn handle_version(config: &Config, ctx: &OperationContext, refresh: bool) -> Result<i32> {
    let clients = configured_clients(config)?;
    for client in &clients {
        let result = if refresh {
            client.refresh_api_version(ctx).await
        } else {
            client.api_version(ctx).await
        };

        let marker = match (result.is_supported, result.is_compatible) {
            (true, _) => "[OK]".green(),
            (false, true) => "[!]".yellow(),
            (false, false) => "[X]".red(),
        };
        let source = if result.detected { "detected" } else { "fallback" };
        println!(
            "{} {} {} {}",
            marker,
            client.kind().display_name().bold(),
            result.version,
            format!("({})", source).dimmed()
        );
        for warning in &result.warnings {
            println!("     {}", warning.yellow());
        }
    }
    Ok(SUCCESS)
}

async fn handle_search(config: &Config, ctx: &OperationContext, target: SearchTarget, query: &str) -> Result<i32> {
    match target {
        SearchTarget::Series => {
            let results = series_client(config)?.lookup(ctx, query).await?;
            if results.is_empty() {
                println!("{}", "No series found.".dimmed());
            }
            for series in results {
                let year = series
                    .extra
                    .get("year")
                    .and_then(|y| y.as_u64())
                    .map(|y| format!(" ({})", y))
                    .unwrap_or_default();
                let marker = if series.id.is_some() { "*".green() } else { " ".normal() };
                println!("{} {:>8}  {}{}", marker, series.tvdb_id, series.title.bold(), year);
            }
        }
        SearchTarget::Movies => {
            let results = movie_client(config)?.lookup(ctx, query).await?;
            if results.is_empty() {
                println!("{}", "No movies found.".dimmed());
            }
            for movie in results {
                let year = movie.year.map(|y| format!(" ({})", y)).unwrap_or_default();
                let marker = if movie.id.is_some() { "*".green() } else { " ".normal() };
                println!("{} {:>8}  {}{}", marker, movie.tmdb_id, movie.title.bold(), year);
            }
        }
        SearchTarget::Library => {
            let results = library_client(config)?.search(ctx, query, 25).await?;
            if results.is_empty() {
                println!("{}", "Nothing in the library matches.".dimmed());
            }
            for item in results {
                let year = item.production_year.map(|y| format!(" ({})", y)).unwrap_or_default();
                println!("  {:<7} {}{}", item.item_type.dimmed(), item.name.bold(), year);
            }
        }
    }
    Ok(SUCCESS)
}

// =============================================================================
// OUTCOME RENDERING
// =============================================================================

fn print_warnings_and_error(warnings: &[String], error: Option<&str>) {
    for warning in warnings {
        println!("{} {}", "[!]".yellow(), warning);
    }
    if let Some(error) = error {
        println!("{} {}", "[X]".red(), error);
    }
}

fn print_monitoring_outcome(outcome: &MonitoringOutcome) -> i32 {
    if let Some(title) = &outcome.title {
        println!("{}", title.bold());
    }
    if outcome.series_added {
        println!("{} Added to the series manager", "[OK]".green());
    }
    for change in &outcome.changes {
        let scope = match (change.season, &change.episodes) {
            (None, _) => "series".to_string(),
            (Some(season), None) => format!("season {}", season),
            (Some(season), Some(episodes)) => format!("season {} episodes {:?}", season, episodes),
        };
        let action = serde_json::to_value(change.action)
            .ok()
            .and_then(|v| v.as_str().map(|s| s.replace('_', " ")))
            .unwrap_or_default();
        println!("{} {}: {}", "[OK]".green(), scope, action);
    }
    if let Some(command) = outcome.command_id {
        println!("{} Search started (command {})", "[OK]".green(), command);
    }
    print_warnings_and_error(&outcome.warnings, outcome.error.as_deref());

    if outcome.success {
        SUCCESS
    } else {
        ERROR
    }
}

fn print_movie_outcome(outcome: &MovieOutcome) -> i32 {
    if let Some(title) = &outcome.title {
        println!("{}", title.bold());
    }
    if outcome.added {
        println!("{} Added to the movie manager", "[OK]".green());
    }
    if let Some(command) = outcome.command_id {
        println!("{} Search started (command {})", "[OK]".green(), command);
    }
    if outcome.deleted {
        let files = if outcome.files_deleted { " with its files" } else { "" };
        println!("{} Removed{}", "[OK]".green(), files);
    }
    print_warnings_and_error(&outcome.warnings, outcome.error.as_deref());

    if outcome.success {
        SUCCESS
    } else {
        ERROR
    }
}
