//! detectd - object detection service
//!
//! This daemon:
//! 1. Scans the models directory and builds the engine registry
//! 2. Loads the first engine that works (synthetic if none do)
//! 3. Serves the HTTP and WebSocket API until Ctrl-C

use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use anyhow::{anyhow, Result};
use clap::Parser;

use swiftdetect::api::{ApiConfig, ApiServer};
use swiftdetect::config::DetectdConfig;
use swiftdetect::{CatalogScanner, DefaultEngineLoader, EngineRegistry, InferencePipeline};

#[derive(Parser, Debug)]
#[command(name = "detectd", version, about = "Object detection over HTTP and WebSocket")]
struct Args {
    /// Config file (.toml or JSON)
    #[arg(long, env = "SWIFTDETECT_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(long, env = "SWIFTDETECT_ADDR")]
    addr: Option<String>,

    /// Models directory, overrides the config file
    #[arg(long, env = "SWIFTDETECT_MODELS_DIR")]
    models_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = DetectdConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.api_addr = addr;
    }
    if let Some(dir) = args.models_dir {
        config.models.dir = dir;
    }

    let scanner = CatalogScanner::new(&config.models.dir).with_hints(config.models.hints.clone());
    let loader = DefaultEngineLoader::new(&config.models.dir, config.inference.input_size)
        .with_weights_url(config.models.weights_url.clone());
    let registry = Arc::new(EngineRegistry::from_scanner(&scanner, loader));
    log::info!(
        "catalog has {} engines under {}",
        registry.list_available().len(),
        config.models.dir.display()
    );

    registry.ensure_selected();
    let active = registry.active();
    match &active.last_error {
        Some(err) => log::warn!("serving {} after load failure: {}", active.descriptor, err),
        None => log::info!("serving {}", active.descriptor),
    }

    let pipeline = InferencePipeline::new(registry).with_placeholder(
        config.inference.placeholder_width,
        config.inference.placeholder_height,
    );
    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        max_body_bytes: config.max_upload_bytes(),
        cors_origins: config.cors_origins.clone(),
    };
    let api_handle = ApiServer::new(api_config, pipeline).spawn()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("detectd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
