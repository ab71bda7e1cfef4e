//! 1枚の画像を分類し、注釈付き画像を保存する
#![recursion_limit = "256"]

use anyhow::{Context, Result};
use clap::Parser;
use fruit_classifier_lib::cli::CommonArgs;
use fruit_classifier_lib::ml::{Annotator, InferenceEngine};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(about = "Classify a single image with a trained model")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// 分類する画像
    image: PathBuf,

    /// モデル名（省略時は設定ファイルの値）
    #[arg(short = 'n', long)]
    model_name: Option<String>,

    /// 注釈付き画像の出力先（省略時は `<image>_annotated.png`）
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn default_output(image: &std::path::Path) -> PathBuf {
    let stem = image.file_stem().and_then(|s| s.to_str()).unwrap_or("image");
    image.with_file_name(format!("{}_annotated.png", stem))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.common.init_logging()?;
    let config = cli.common.app_config();

    let mut settings = config.inference.clone();
    if let Some(name) = &cli.model_name {
        settings.model_name = name.clone();
    }

    let engine = InferenceEngine::load(&config.paths, &settings.model_name, cli.common.device_type(&config))?;
    let annotator = Annotator::from_settings(&settings)?;

    let (image, prediction) = engine.classify_path(&cli.image)?;
    println!("{}", prediction.display_text());

    let output = cli.output.clone().unwrap_or_else(|| default_output(&cli.image));
    annotator
        .annotate(&image, &prediction)
        .save(&output)
        .context(format!("注釈付き画像を保存できません: {:?}", output))?;
    info!("注釈付き画像を保存しました: {}", output.display());
    Ok(())
}
