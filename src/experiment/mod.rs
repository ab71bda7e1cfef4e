//! 実験の実行
//!
//! 実験ファイルに従って前処理 → 学習 → 評価を順に行い、各段階の値をトラッカーに記録します。

pub mod config;
pub mod tracker;

pub use config::{ExperimentConfig, PreprocessingSection, TrainSection};
pub use tracker::{ExperimentTracker, FileTracker, RunRecord, ScalarPoint};

use anyhow::{Context, Result};
use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use std::path::Path;
use tracing::{info, warn};

use crate::dataset::preprocess_dataset;
use crate::evaluate::EvaluationReport;
use crate::ml::{evaluate_held_out, train_model};
use crate::model::config::ProjectPaths;

/// 実験の結果
#[derive(Debug, Clone)]
pub struct ExperimentOutcome {
    pub config: ExperimentConfig,
    pub evaluation: EvaluationReport,
}

impl ExperimentOutcome {
    pub fn accuracy(&self) -> f64 {
        self.evaluation.accuracy
    }
}

/// 実験ファイルを読み込んで実行し、正解率を返す
pub fn run_experiment<B: AutodiffBackend>(
    config_path: &Path,
    paths: &ProjectPaths,
    tracker: &mut dyn ExperimentTracker,
    device: &B::Device,
) -> Result<ExperimentOutcome> {
    let config = ExperimentConfig::load(config_path)?;
    run_experiment_config::<B>(config, paths, tracker, device)
}

/// 読み込み済みの実験設定で実行
pub fn run_experiment_config<B: AutodiffBackend>(
    config: ExperimentConfig,
    paths: &ProjectPaths,
    tracker: &mut dyn ExperimentTracker,
    device: &B::Device,
) -> Result<ExperimentOutcome> {
    tracker.log_config(&serde_json::to_value(&config)?)?;
    let pre = &config.preprocessing;

    // 前処理（生データがなければ既存の中間データを使う）
    let raw_dir = paths.raw_dir();
    let interim_dir = paths.interim_dir(&pre.dataset_name);
    if raw_dir.is_dir() {
        let report = preprocess_dataset(&raw_dir, &interim_dir, pre.height, pre.width)
            .context("Preprocessing failed")?;
        info!("前処理: {} 枚を保存, {} 枚をスキップ", report.kept(), report.skipped());
        tracker.log_scalar("preprocess_kept", report.kept() as f64, None)?;
    } else {
        warn!(
            "{} がないため前処理をスキップし、{} を使用します",
            raw_dir.display(),
            interim_dir.display()
        );
    }

    let request = config.train_request();
    let outcome = train_model::<B>(paths, &request, device)?;

    for epoch in &outcome.history.epochs {
        let step = Some(epoch.epoch);
        tracker.log_scalar("loss", epoch.loss, step)?;
        tracker.log_scalar("acc", epoch.accuracy, step)?;
        if let Some(v) = epoch.val_loss {
            tracker.log_scalar("val_loss", v, step)?;
        }
        if let Some(v) = epoch.val_accuracy {
            tracker.log_scalar("val_acc", v, step)?;
        }
    }

    let evaluation = evaluate_held_out::<B::InnerBackend>(
        &outcome.model.valid(),
        &outcome.split,
        &outcome.encoder,
        paths,
        &request.model_name,
        request.optimizer.batch_size,
        request.font_path.as_deref(),
        device,
    )?;

    tracker.log_scalar("accuracy", evaluation.accuracy, None)?;
    tracker.log_scalar("cohens_kappa", evaluation.cohens_kappa, None)?;
    for artifact in [
        &outcome.artifacts.model,
        &outcome.artifacts.encoder,
        &outcome.history_csv,
        &outcome.history_plot,
        &evaluation.plot_path,
    ] {
        tracker.add_artifact(artifact)?;
    }
    tracker.finish(Some(evaluation.accuracy))?;

    info!(
        "実験完了: {} accuracy={:.4} kappa={:.4}",
        request.model_name, evaluation.accuracy, evaluation.cohens_kappa
    );
    Ok(ExperimentOutcome { config, evaluation })
}
