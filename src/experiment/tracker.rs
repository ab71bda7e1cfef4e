//! 実験の記録
//!
//! 設定・スカラー値・成果物パスを記録し、`runs/<timestamp>_<model>/run.json` に書き出します。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 実験記録のインターフェース
pub trait ExperimentTracker {
    /// 実験設定を記録
    fn log_config(&mut self, config: &serde_json::Value) -> Result<()>;

    /// スカラー値を記録（`step` はエポック番号など）
    fn log_scalar(&mut self, name: &str, value: f64, step: Option<usize>) -> Result<()>;

    /// 成果物のパスを記録
    fn add_artifact(&mut self, path: &Path) -> Result<()>;

    /// 記録を確定する
    fn finish(&mut self, result: Option<f64>) -> Result<()>;
}

/// 1点分のスカラー値
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarPoint {
    pub step: Option<usize>,
    pub value: f64,
}

/// `run.json` の内容
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub model_name: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config: serde_json::Value,
    pub scalars: BTreeMap<String, Vec<ScalarPoint>>,
    pub artifacts: Vec<PathBuf>,
    pub result: Option<f64>,
}

/// ファイルに書き出すトラッカー
#[derive(Debug)]
pub struct FileTracker {
    run_dir: PathBuf,
    record: RunRecord,
}

impl FileTracker {
    pub const RUN_FILE_NAME: &'static str = "run.json";

    /// `runs_dir/<timestamp>_<model_name>/` を作成して記録を開始
    ///
    /// タイムスタンプはミリ秒まで含め、同名のディレクトリがあれば `_1`, `_2`, ... を付ける。
    pub fn new(runs_dir: &Path, model_name: &str) -> Result<Self> {
        let now = chrono::Local::now();
        std::fs::create_dir_all(runs_dir)
            .context(format!("Failed to create runs directory: {:?}", runs_dir))?;
        let run_dir = Self::create_unique_dir(
            runs_dir,
            &format!("{}_{}", now.format("%Y%m%d_%H%M%S_%3f"), model_name),
        )?;
        info!("実験記録: {}", run_dir.display());

        Ok(Self {
            run_dir,
            record: RunRecord {
                model_name: model_name.to_string(),
                started_at: now.to_rfc3339(),
                ..RunRecord::default()
            },
        })
    }

    fn create_unique_dir(runs_dir: &Path, base: &str) -> Result<PathBuf> {
        let mut candidate = runs_dir.join(base);
        let mut suffix = 1;
        loop {
            match std::fs::create_dir(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    candidate = runs_dir.join(format!("{}_{}", base, suffix));
                    suffix += 1;
                }
                Err(e) => {
                    return Err(e).context(format!("Failed to create run directory: {:?}", candidate));
                }
            }
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn run_file(&self) -> PathBuf {
        self.run_dir.join(Self::RUN_FILE_NAME)
    }

    pub fn record(&self) -> &RunRecord {
        &self.record
    }

    /// 書き出し済みの記録を読み込む
    pub fn read_run(path: &Path) -> Result<RunRecord> {
        let text = std::fs::read_to_string(path).context(format!("Failed to read run file: {:?}", path))?;
        Ok(serde_json::from_str(&text)?)
    }

    fn write(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.record)?;
        std::fs::write(self.run_file(), json).context("Failed to write run.json")?;
        Ok(())
    }
}

impl ExperimentTracker for FileTracker {
    fn log_config(&mut self, config: &serde_json::Value) -> Result<()> {
        self.record.config = config.clone();
        self.write()
    }

    fn log_scalar(&mut self, name: &str, value: f64, step: Option<usize>) -> Result<()> {
        debug!("scalar {} = {} (step {:?})", name, value, step);
        self.record
            .scalars
            .entry(name.to_string())
            .or_default()
            .push(ScalarPoint { step, value });
        Ok(())
    }

    fn add_artifact(&mut self, path: &Path) -> Result<()> {
        self.record.artifacts.push(path.to_path_buf());
        Ok(())
    }

    fn finish(&mut self, result: Option<f64>) -> Result<()> {
        self.record.result = result;
        self.record.finished_at = Some(chrono::Local::now().to_rfc3339());
        self.write()?;
        info!("実験記録を保存しました: {}", self.run_file().display());
        Ok(())
    }
}
