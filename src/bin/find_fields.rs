//! Command-line field extraction over a directory of Landsat archives

use anyhow::{Context, Result};
use clap::Parser;
use fieldmap::{FieldPipeline, PipelineConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "find_fields")]
#[command(about = "Find crop field boundaries from multi-year Landsat scenes")]
struct Args {
    /// Pipeline configuration (JSON)
    #[arg(short, long, required_unless_present = "print_default_config")]
    config: Option<PathBuf>,

    /// Override the configured output directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Override the configured scene extraction directory
    #[arg(short, long)]
    work_dir: Option<PathBuf>,

    /// Extract into the default persistent cache instead of a temporary directory
    #[arg(long)]
    keep_work_dir: bool,

    /// Print the default configuration as JSON and exit
    #[arg(long)]
    print_default_config: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.print_default_config {
        println!("{}", PipelineConfig::default().to_json()?);
        return Ok(());
    }

    let config_path = args
        .config
        .context("--config is required unless --print-default-config is given")?;
    let mut config = PipelineConfig::from_json_file(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(dir) = args.work_dir {
        config.work_dir = Some(dir);
    } else if args.keep_work_dir && config.work_dir.is_none() {
        config.work_dir = Some(fieldmap::SceneRepository::default_work_dir());
    }

    let pipeline = FieldPipeline::new(config).context("Failed to set up pipeline")?;
    let result = pipeline.run().context("Field extraction failed")?;
    for (archive, reason) in &result.excluded {
        log::warn!("Excluded {}: {}", archive.display(), reason);
    }

    let paths = pipeline
        .write_outputs(&result)
        .context("Failed to write outputs")?;
    log::info!("Field mask: {}", paths.field_mask.display());
    log::info!("Composite: {}", paths.composite.display());
    log::info!(
        "Field records ({}): {}",
        result.segmentation.fields.records.len(),
        paths.field_props.display()
    );
    if let Some(samples) = &paths.field_samples {
        log::info!("Field samples: {}", samples.display());
    }

    pipeline.finish()?;
    Ok(())
}
