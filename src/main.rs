use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use resload::loader::ImageLoader;
use resload::resource::{LoadRequest, Payload};
use resload::{Resource, ResourceEntry, ResourceLoader};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;

const IMAGE_MIDDLEWARE: &str = "image";

fn setup_logging(log_level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("resload")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("resload.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins over the configured level
    let env = env_logger::Env::default().default_filter_or(log_level.unwrap_or("info"));
    env_logger::Builder::from_env(env)
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Fetch {
            urls,
            image,
            concurrency,
        } => handle_fetch_command(urls, *image, *concurrency, cli.is_verbose(), config),
        Commands::Config => handle_config_command(config),
    }
}

fn handle_fetch_command(
    urls: &[String],
    image: bool,
    concurrency: Option<usize>,
    verbose: bool,
    config: &Config,
) -> Result<()> {
    info!("Fetching {} url(s), image={}", urls.len(), image);

    // A failed URL must not stall the command, so failures always settle here.
    let loader_config = config.loader_config(concurrency).with_settle_on_error(true);
    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;

    runtime.block_on(async {
        let loader =
            ResourceLoader::new(loader_config, &config.http_config()).context("Failed to create resource loader")?;

        loader.on_error().subscribe(|event| {
            let url = event.url.as_deref().unwrap_or("<unknown>");
            eprintln!("{} {} {}", "error".red(), url, event.error);
        });
        if verbose {
            loader.on_load_start().subscribe(|event| {
                println!("{} {}", "start".cyan(), event.url);
            });
            loader.on_progress().subscribe(|event| match event.total {
                Some(total) => println!("{} {} {}/{} bytes", "progress".dimmed(), event.resource, event.loaded, total),
                None => println!("{} {} {} bytes", "progress".dimmed(), event.resource, event.loaded),
            });
        }

        let mut resources: Vec<Arc<Resource>> = Vec::new();
        if image {
            loader.add_middleware(IMAGE_MIDDLEWARE, Arc::new(ImageLoader));
            for url in urls {
                let handle = loader
                    .add_to(IMAGE_MIDDLEWARE, url.clone(), vec![json!(url)])
                    .context(format!("Failed to add {}", url))?;
                resources.extend(handle.resources().iter().cloned());
            }
        } else {
            let entries = urls
                .iter()
                .map(|url| ResourceEntry::parse(LoadRequest::new(url.clone()).to_args()))
                .collect::<resload::Result<Vec<_>>>()
                .context("Invalid URL")?;
            let handle = loader.add_batch(entries, |_| {}).context("Failed to add batch")?;
            resources.extend(handle.resources().iter().cloned());
        }

        let started = Instant::now();
        loader.load_all().await;
        print_results(&resources, started);
        Ok::<(), eyre::Report>(())
    })
}

fn print_results(resources: &[Arc<Resource>], started: Instant) {
    let mut loaded = 0;
    for resource in resources {
        let url = resource.url().unwrap_or_default();
        match resource.payload() {
            Some(payload) => {
                loaded += 1;
                println!("{} {} {}", "ok".green(), url, describe(&payload));
            }
            None => {
                let reason = resource.error().map(|e| e.to_string()).unwrap_or_default();
                println!("{} {} {}", "failed".red(), url, reason);
            }
        }
    }

    let failed = resources.len() - loaded;
    let summary = format!(
        "{} loaded, {} failed in {:.2}s",
        loaded,
        failed,
        started.elapsed().as_secs_f64()
    );
    if failed == 0 {
        println!("{}", summary.green().bold());
    } else {
        println!("{}", summary.yellow().bold());
    }
}

fn describe(payload: &Payload) -> String {
    match payload {
        Payload::Image(image) => match (image.width, image.height) {
            (Some(w), Some(h)) => format!("image {}x{}", w, h),
            _ => "image (unknown size)".to_string(),
        },
        Payload::Json(_) => format!("json, {} bytes", payload.len()),
        Payload::Text(_) => format!("text, {} bytes", payload.len()),
        Payload::Bytes(_) => format!("{} bytes", payload.len()),
    }
}

fn handle_config_command(config: &Config) -> Result<()> {
    info!("Printing effective configuration");
    let yaml = serde_yaml::to_string(config).context("Failed to serialize configuration")?;
    println!("{}", yaml);
    Ok(())
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging at the configured level
    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}
