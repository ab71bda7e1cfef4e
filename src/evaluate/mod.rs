//! 評価モジュール
//!
//! 予測コードをクラス名に戻し、正解ラベル順に並べ替えてから
//! 混同行列と要約指標を計算し、ヒートマップを保存します。

pub mod history;
pub mod metrics;
pub mod plots;

pub use history::{EpochMetrics, TrainingHistory};
pub use metrics::{accuracy, cohen_kappa, sort_by_truth, ConfusionMatrix};
pub use plots::{plot_confusion_matrix, plot_training_history};

use ab_glyph::FontVec;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::dataset::LabelEncoder;

/// 評価結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub accuracy: f64,
    pub cohens_kappa: f64,
    pub confusion: ConfusionMatrix,
    pub plot_path: PathBuf,
}

/// 予測コードを評価し、`<plot_dir>/<plot_name>_confusion.png` を書き出す
pub fn evaluate_predictions(
    encoder: &LabelEncoder,
    y_true: &[usize],
    y_pred: &[usize],
    plot_dir: &Path,
    plot_name: &str,
    font: Option<&FontVec>,
) -> anyhow::Result<EvaluationReport> {
    let truth = encoder.decode(y_true).context("Failed to decode ground-truth codes")?;
    let predicted = encoder.decode(y_pred).context("Failed to decode predicted codes")?;
    let (truth, predicted) = sort_by_truth(&truth, &predicted)?;

    let confusion = ConfusionMatrix::from_labels(&truth, &predicted)?;
    let accuracy = confusion.accuracy();
    let cohens_kappa = confusion.cohen_kappa();
    let plot_path = plot_confusion_matrix(&confusion, plot_dir, plot_name, font)?;

    info!(
        "評価: {} 件, accuracy={:.4}, kappa={:.4}",
        confusion.total(),
        accuracy,
        cohens_kappa
    );

    Ok(EvaluationReport {
        accuracy,
        cohens_kappa,
        confusion,
        plot_path,
    })
}
