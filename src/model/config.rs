//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、ディレクトリ構成、学習ハイパーパラメータをJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{ClassifierError, Result as ClassifierResult};

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// プロジェクトのディレクトリ構成
///
/// すべてのパスは `root` からの相対で決まります。
/// ```text
/// data/raw/<category>/*
/// data/interim/<dataset>/<category>/*
/// data/processed/<dataset>/{x_train,x_val,x_test,y_train,y_val,y_test}.json.gz
/// model_files/models/<model>/model.tar.gz
/// model_files/encoders/<model>/encoder.json
/// reports/figures/<model>/*
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectPaths {
    pub root: PathBuf,
}

impl Default for ProjectPaths {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
        }
    }
}

impl ProjectPaths {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("data").join("raw")
    }

    pub fn interim_dir(&self, dataset_name: &str) -> PathBuf {
        self.root.join("data").join("interim").join(dataset_name)
    }

    pub fn processed_dir(&self, dataset_name: &str) -> PathBuf {
        self.root.join("data").join("processed").join(dataset_name)
    }

    pub fn model_dir(&self, model_name: &str) -> PathBuf {
        self.root.join("model_files").join("models").join(model_name)
    }

    pub fn encoder_dir(&self, model_name: &str) -> PathBuf {
        self.root.join("model_files").join("encoders").join(model_name)
    }

    pub fn figures_dir(&self, model_name: &str) -> PathBuf {
        self.root.join("reports").join("figures").join(model_name)
    }

    /// Webフロントエンドのアップロード先
    pub fn upload_dir(&self) -> PathBuf {
        self.root.join("app").join("uploads")
    }

    pub fn experiment_files_dir(&self) -> PathBuf {
        self.root.join("experiment_files")
    }

    /// 実験トラッカーの出力先
    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }
}

/// オプティマイザ設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OptimizerSetup {
    /// 初期学習率
    pub initial_learning_rate: f64,
    /// エポック数
    pub epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
}

impl Default for OptimizerSetup {
    fn default() -> Self {
        Self {
            initial_learning_rate: 1e-3,
            epochs: 25,
            batch_size: 32,
        }
    }
}

impl OptimizerSetup {
    /// 値の妥当性を検証
    pub fn validate(&self) -> ClassifierResult<()> {
        if !(self.initial_learning_rate > 0.0) || !self.initial_learning_rate.is_finite() {
            return Err(ClassifierError::config(format!(
                "initial_learning_rate must be positive, got {}",
                self.initial_learning_rate
            )));
        }
        if self.epochs == 0 {
            return Err(ClassifierError::config("epochs must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(ClassifierError::config("batch_size must be at least 1"));
        }
        Ok(())
    }

    /// 時間減衰の係数（初期学習率 / エポック数）
    pub fn decay(&self) -> f64 {
        self.initial_learning_rate / self.epochs as f64
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード
    pub seed: u64,
    /// 検証データの割合
    pub validation_ratio: f64,
    /// テストデータの割合
    pub test_ratio: f64,
    /// 学習時のデータ拡張
    pub augment: bool,
    /// 入力画像の高さ
    pub height: u32,
    /// 入力画像の幅
    pub width: u32,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 25,
            batch_size: 32,
            learning_rate: 1e-3,
            seed: 42,
            validation_ratio: 0.25,
            test_ratio: 0.0,
            augment: true,
            height: 28,
            width: 28,
        }
    }
}

impl TrainingSettings {
    pub fn optimizer_setup(&self) -> OptimizerSetup {
        OptimizerSetup {
            initial_learning_rate: self.learning_rate,
            epochs: self.num_epochs,
            batch_size: self.batch_size,
        }
    }
}

/// 推論設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    /// 使用するモデル名
    pub model_name: String,
    /// 注釈描画用フォント（未指定ならシステムフォントを探す）
    pub font_path: Option<PathBuf>,
    /// 注釈画像の幅
    pub annotate_width: u32,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            model_name: "basic".to_string(),
            font_path: None,
            annotate_width: 400,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// ディレクトリ構成
    pub paths: ProjectPaths,
    /// トレーニング設定
    pub training: TrainingSettings,
    /// 推論設定
    pub inference: InferenceSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 設定を読み込む、存在しない・壊れている場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("設定ファイルが存在しません。デフォルト設定を使用します");
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => {
                info!("設定ファイルを読み込みました: {}", path.display());
                config
            }
            Err(e) => {
                warn!(
                    "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// プロジェクトルートを上書き
    pub fn with_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.paths = ProjectPaths::new(root);
        self
    }

    /// `--cpu` が指定されていればCPUを強制
    pub fn resolve_device(&self, force_cpu: bool) -> DeviceType {
        if force_cpu {
            DeviceType::Cpu
        } else {
            self.device_type
        }
    }
}
