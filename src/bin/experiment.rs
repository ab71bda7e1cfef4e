//! 実験ファイルに従って前処理・学習・評価を行い、結果を `runs/` に記録する
#![recursion_limit = "256"]

use anyhow::Result;
use burn::backend::wgpu::WgpuDevice;
use burn::backend::Wgpu;
use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use clap::Parser;
use fruit_classifier_lib::cli::CommonArgs;
use fruit_classifier_lib::experiment::{run_experiment_config, ExperimentConfig, FileTracker};
use fruit_classifier_lib::model::config::DeviceType;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(about = "Run an experiment file end to end")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// 実験ファイル（相対パスは `<root>/experiment_files/` から探す）
    experiment: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.common.init_logging()?;
    let config = cli.common.app_config();
    let paths = &config.paths;

    let experiment_path = if cli.experiment.is_file() {
        cli.experiment.clone()
    } else {
        paths.experiment_files_dir().join(&cli.experiment)
    };
    let experiment = ExperimentConfig::load(&experiment_path)?;
    let mut tracker = FileTracker::new(&paths.runs_dir(), &experiment.train.model_name)?;

    let outcome = match cli.common.device_type(&config) {
        DeviceType::Wgpu => {
            run_experiment_config::<Autodiff<Wgpu>>(experiment, paths, &mut tracker, &WgpuDevice::default())?
        }
        DeviceType::Cpu => {
            run_experiment_config::<Autodiff<NdArray<f32>>>(experiment, paths, &mut tracker, &NdArrayDevice::Cpu)?
        }
    };

    info!("記録: {}", tracker.run_file().display());
    println!("accuracy: {:.4}", outcome.accuracy());
    Ok(())
}
