//! HTTP Simulator - CLI Entry Point

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use httpsim::effect::MeasuringSleeper;
use httpsim::random::{ChaCha8Source, Seed};
use httpsim::{
    Config, Handler, MatchOutcome, Middleware, RequestDescriptor, ResponseRecorder, ResponseSink,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "httpsim",
    about = "HTTP simulator middleware - latency injection and response replacement",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "httpsim.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Method of the simulated request
    #[arg(short, long, default_value = "GET")]
    method: String,

    /// Simulate one request to this target (`/path?query` or a full URL)
    #[arg(short, long)]
    target: Option<String>,

    /// Request header of the simulated request, as "Name: value"
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// 32-byte seed for delay sampling
    #[arg(long)]
    seed: Option<String>,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected \"Name: value\", got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in {raw:?}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Stands in for the real handler during a dry run.
#[derive(Default)]
struct Upstream {
    forwarded: AtomicBool,
}

#[async_trait]
impl<S: ResponseSink> Handler<S> for Upstream {
    async fn serve(
        &self,
        _request: &RequestDescriptor,
        _outcome: MatchOutcome,
        _response: &mut S,
    ) -> Result<(), S::Error> {
        self.forwarded.store(true, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Serialize)]
struct Report {
    matched: Option<usize>,
    delay: String,
    replaced: bool,
    forwarded: bool,
    status: i64,
    headers: Vec<(String, String)>,
    body: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Print default config if requested
    if args.print_config {
        let default_config = include_str!("../demos/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    // Load configuration
    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        Config::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no resources)");
        Config::default()
    };

    // Validate and exit if requested
    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} resources defined)",
            config.resources.len()
        );
        return Ok(());
    }

    let Some(target) = args.target else {
        info!(
            resources = config.resources.len(),
            "No --target given, nothing to simulate"
        );
        return Ok(());
    };

    let seed = match &args.seed {
        Some(raw) => Seed::from_bytes(raw.as_bytes()).context("invalid --seed")?,
        None => Seed::from_entropy(),
    };
    info!(%seed, "Simulating request");

    let upstream = Arc::new(Upstream::default());
    let sleeper = Arc::new(MeasuringSleeper::new());
    let simulator = Middleware::new(upstream.clone(), config)
        .with_rand(Arc::new(ChaCha8Source::new(seed)))
        .with_sleeper(sleeper);

    let mut request = RequestDescriptor::from_target(args.method, &target);
    for (name, value) in &args.headers {
        request.append_header(name, value.as_str());
    }

    let mut response = ResponseRecorder::new();
    let outcome = simulator.handle(&request, &mut response).await?;

    let report = Report {
        matched: outcome.matched,
        delay: httpsim::duration::format_duration(outcome.delay),
        replaced: outcome.replaced,
        forwarded: upstream.forwarded.load(Ordering::Relaxed),
        status: response.status().as_i64(),
        headers: response.headers().to_vec(),
        body: response.body_string(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
