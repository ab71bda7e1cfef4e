//! 前処理済みデータでモデルを学習し、保持データで評価する
#![recursion_limit = "256"]

use anyhow::Result;
use burn::backend::wgpu::WgpuDevice;
use burn::backend::Wgpu;
use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use clap::Parser;
use fruit_classifier_lib::cli::CommonArgs;
use fruit_classifier_lib::dataset::SplitSettings;
use fruit_classifier_lib::ml::{
    evaluate_held_out, parse_setup, train_model, AugmentationPolicy, Strictness, TrainRequest,
};
use fruit_classifier_lib::model::config::{AppConfig, DeviceType};
use tracing::info;

#[derive(Parser)]
#[command(about = "Train a model on the interim dataset")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(short, long, default_value = "fruits")]
    dataset: String,

    /// モデルの種類
    #[arg(short = 't', long, default_value = "leNet")]
    model_type: String,

    /// 保存するモデル名
    #[arg(short = 'n', long, default_value = "basic")]
    model_name: String,

    /// モデル固有の設定（例: `conv1_filters=20,dense_units=500`）
    #[arg(short = 's', long, default_value = "")]
    setup: String,

    /// 未知の設定キーをエラーにする
    #[arg(long)]
    strict: bool,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    /// 入力画像の高さ（preprocess と同じ値を指定する）
    #[arg(long)]
    height: Option<u32>,

    /// 入力画像の幅
    #[arg(long)]
    width: Option<u32>,

    /// データ拡張を無効にする
    #[arg(long)]
    no_augment: bool,
}

fn build_request(cli: &Cli, config: &AppConfig) -> Result<TrainRequest> {
    let training = &config.training;
    let mut request = TrainRequest::new(&cli.dataset, &cli.model_name);
    request.model_type = cli.model_type.clone();
    request.setup_params = parse_setup(&cli.setup)?;
    request.strictness = if cli.strict { Strictness::Strict } else { Strictness::Lenient };

    let mut optimizer = training.optimizer_setup();
    if let Some(epochs) = cli.epochs {
        optimizer.epochs = epochs;
    }
    if let Some(batch_size) = cli.batch_size {
        optimizer.batch_size = batch_size;
    }
    if let Some(lr) = cli.learning_rate {
        optimizer.initial_learning_rate = lr;
    }
    optimizer.validate()?;
    request.optimizer = optimizer;

    request.split = SplitSettings {
        validation: training.validation_ratio,
        test: training.test_ratio,
        seed: training.seed,
    };
    request.augmentation = if cli.no_augment || !training.augment {
        AugmentationPolicy::none()
    } else {
        AugmentationPolicy::default()
    };
    request.height = cli.height.unwrap_or(training.height);
    request.width = cli.width.unwrap_or(training.width);
    request.font_path = config.inference.font_path.clone();
    Ok(request)
}

fn run<B: AutodiffBackend>(config: &AppConfig, request: &TrainRequest, device: &B::Device) -> Result<()> {
    let outcome = train_model::<B>(&config.paths, request, device)?;
    info!("モデルを保存しました: {}", outcome.artifacts.model.display());
    info!("学習履歴: {}", outcome.history_plot.display());

    let report = evaluate_held_out::<B::InnerBackend>(
        &outcome.model.valid(),
        &outcome.split,
        &outcome.encoder,
        &config.paths,
        &request.model_name,
        request.optimizer.batch_size,
        request.font_path.as_deref(),
        device,
    )?;
    info!(
        "評価: accuracy={:.4} kappa={:.4} ({})",
        report.accuracy,
        report.cohens_kappa,
        report.plot_path.display()
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.common.init_logging()?;
    let config = cli.common.app_config();
    let request = build_request(&cli, &config)?;
    info!("入力サイズ: {}x{}", request.height, request.width);

    let device_type = cli.common.device_type(&config);
    info!("使用デバイス: {}", device_type);
    match device_type {
        DeviceType::Wgpu => run::<Autodiff<Wgpu>>(&config, &request, &WgpuDevice::default()),
        DeviceType::Cpu => run::<Autodiff<NdArray<f32>>>(&config, &request, &NdArrayDevice::Cpu),
    }
}
