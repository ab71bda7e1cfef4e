//! `data/raw` の画像をリサイズして `data/interim/<dataset>` に保存する

use anyhow::Result;
use clap::Parser;
use fruit_classifier_lib::cli::CommonArgs;
use fruit_classifier_lib::dataset::preprocess_dataset;
use tracing::{info, warn};

#[derive(Parser)]
#[command(about = "Clean and resize raw images into the interim dataset")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// データセット名
    #[arg(short, long, default_value = "fruits")]
    dataset: String,

    #[arg(long)]
    height: Option<u32>,

    #[arg(long)]
    width: Option<u32>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.common.init_logging()?;
    let config = cli.common.app_config();

    let height = cli.height.unwrap_or(config.training.height);
    let width = cli.width.unwrap_or(config.training.width);
    let raw_dir = config.paths.raw_dir();
    let interim_dir = config.paths.interim_dir(&cli.dataset);

    let report = preprocess_dataset(&raw_dir, &interim_dir, height, width)?;
    if report.skipped() > 0 {
        warn!("読み込めない画像を {} 枚スキップしました", report.skipped());
    }
    info!("{}x{} の画像 {} 枚を保存しました", height, width, report.kept());
    Ok(())
}
