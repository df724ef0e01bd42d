//! detect_once - run the detection pipeline over one image file
//!
//! Prints the resulting batch as JSON on stdout. Degradations (fallback engine,
//! undecodable input, stale class names) are logged, never fatal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;

use swiftdetect::config::DetectdConfig;
use swiftdetect::detect::ClassFilter;
use swiftdetect::{
    CatalogScanner, DefaultEngineLoader, EngineDescriptor, EngineRegistry, InferenceParams,
    InferencePipeline,
};

#[derive(Parser, Debug)]
#[command(name = "detect_once", version, about = "Run detection over a single image")]
struct Args {
    /// Image file (JPEG or PNG)
    image: PathBuf,

    /// Models directory
    #[arg(long, env = "SWIFTDETECT_MODELS_DIR")]
    models_dir: Option<PathBuf>,

    /// Engine kind to select; needs --model
    #[arg(long, requires = "model")]
    engine: Option<String>,

    /// Model name to select
    #[arg(long, requires = "engine")]
    model: Option<String>,

    #[arg(long)]
    conf: Option<f32>,

    #[arg(long)]
    iou: Option<f32>,

    #[arg(long)]
    max_results: Option<usize>,

    /// Comma-separated class names
    #[arg(long)]
    include_classes: Option<String>,

    #[arg(long)]
    min_area_ratio: Option<f32>,

    /// Pretty-print the output
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = DetectdConfig::load()?;
    if let Some(dir) = args.models_dir {
        config.models.dir = dir;
    }

    let scanner = CatalogScanner::new(&config.models.dir).with_hints(config.models.hints.clone());
    let loader = DefaultEngineLoader::new(&config.models.dir, config.inference.input_size)
        .with_weights_url(config.models.weights_url.clone());
    let registry = Arc::new(EngineRegistry::from_scanner(&scanner, loader));

    if let (Some(engine), Some(model)) = (args.engine, args.model) {
        let selection = registry.select(&EngineDescriptor::new(engine, model));
        if let Some(err) = selection.last_error {
            log::warn!("requested engine unavailable, using {}: {}", selection.descriptor, err);
        }
    }

    let raw = std::fs::read(&args.image)
        .map_err(|e| anyhow!("failed to read {}: {}", args.image.display(), e))?;
    let params = InferenceParams {
        confidence_threshold: args.conf,
        iou_threshold: args.iou,
        max_results: args.max_results,
        class_filter: args.include_classes.as_deref().and_then(ClassFilter::from_csv),
        min_area_ratio: args.min_area_ratio,
    };

    let pipeline = InferencePipeline::new(registry).with_placeholder(
        config.inference.placeholder_width,
        config.inference.placeholder_height,
    );
    let report = pipeline.run(&raw, &params);
    for recovered in &report.recovered {
        log::warn!("{}", recovered);
    }

    let json = if args.pretty {
        serde_json::to_string_pretty(&report.batch)?
    } else {
        serde_json::to_string(&report.batch)?
    };
    println!("{}", json);
    Ok(())
}
