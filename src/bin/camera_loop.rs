//! カメラ映像を1フレームずつ分類し、同じラベルが続いたらアラームを出す
#![recursion_limit = "256"]

use anyhow::Result;
use clap::Parser;
use fruit_classifier_lib::cli::CommonArgs;
use fruit_classifier_lib::ml::{Annotator, InferenceEngine};
use fruit_classifier_lib::video::{
    AlarmState, Camera, CameraContext, CameraSource, CaptureConfig, LoopControl, DEFAULT_THRESHOLD,
};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(about = "Classify camera frames and raise an alarm on a steady label")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// V4L2デバイスまたは動画ファイル
    #[arg(long, default_value = "/dev/video0")]
    source: String,

    #[arg(short = 'n', long)]
    model_name: Option<String>,

    /// アラーム対象のラベル（省略時はすべて）
    #[arg(long)]
    alarm_on: Option<String>,

    /// アラームまでの連続フレーム数
    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    threshold: u32,

    /// 注釈付きフレームの出力先（毎フレーム上書き）
    #[arg(short, long, default_value = "frame.png")]
    output: PathBuf,

    /// 処理する最大フレーム数（0なら無制限）
    #[arg(long, default_value_t = 0)]
    max_frames: u32,
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
    let alarm = AlarmState::new(cli.threshold, cli.alarm_on.clone());
    let mut context = CameraContext::new(engine, annotator, alarm, cli.output.clone());

    let mut capture = CaptureConfig::new(CameraSource::detect(&cli.source));
    capture.max_frames = cli.max_frames;
    let camera = Camera::new(capture);

    let mut alarms = 0u32;
    let frames = camera.run(|frame, index| {
        if context.process_frame(frame, index)?.alarm {
            alarms += 1;
        }
        Ok(LoopControl::Continue)
    })?;

    info!("{} フレームを処理しました（アラーム {} 回）", frames, alarms);
    Ok(())
}
