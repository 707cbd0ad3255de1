use anyhow::{ensure, Context, Result};
use clap::Parser;
use rayon::ThreadPoolBuilder;
use tracing_subscriber::EnvFilter;

use leaf_seg_rs::{
    api,
    config::{Cli, Command, PreprocessRunConfig, SegmentConfig, ServeConfig},
    BatchSummary, DirectoryProcessor, LeafAnalyzer,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("leaf_seg_rs=info,tower_http=info")),
        )
        .init();

    match Cli::parse().command {
        Command::Serve(config) => serve(config),
        Command::Segment(config) => segment(config),
        Command::Preprocess(config) => preprocess(config),
    }
}

fn serve(config: ServeConfig) -> Result<()> {
    let analyzer = LeafAnalyzer::from_config(&config.model, config.preprocess.clone())
        .context("Failed to load models")?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(api::serve(analyzer, &config))
}

fn segment(config: SegmentConfig) -> Result<()> {
    ensure!(
        config.input_dir.is_dir(),
        "Input directory does not exist: {}",
        config.input_dir.display()
    );

    let analyzer = LeafAnalyzer::from_config(&config.model, config.preprocess.clone())
        .context("Failed to load models")?
        .skip_leaf_check(config.skip_leaf_check);
    ThreadPoolBuilder::new()
        .num_threads(config.model.num_threads)
        .build_global()?;

    let summary = DirectoryProcessor::new(&config.input_dir, &config.output_dir)
        .segment(&analyzer, config.overlay_alpha)?;
    finish(summary)
}

fn preprocess(config: PreprocessRunConfig) -> Result<()> {
    ensure!(
        config.input_dir.is_dir(),
        "Input directory does not exist: {}",
        config.input_dir.display()
    );

    let summary = DirectoryProcessor::new(&config.input_dir, &config.output_dir)
        .preprocess(&config.preprocess, &config.format)?;
    finish(summary)
}

fn finish(summary: BatchSummary) -> Result<()> {
    tracing::info!(
        processed = summary.processed,
        skipped = summary.skipped,
        failed = summary.failed,
        "done"
    );
    ensure!(summary.failed == 0, "{} image(s) failed", summary.failed);
    Ok(())
}
