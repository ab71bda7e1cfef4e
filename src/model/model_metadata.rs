//! モデルマニフェストの定義
//!
//! tar.gz 内の `metadata.json` として保存され、アーキテクチャ設定と学習時のクラス一覧を記録します。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ml::LeNetConfig;

/// マニフェストの形式バージョン
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// モデルマニフェスト
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このマニフェスト（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    /// 形式バージョン
    pub format_version: u32,

    /// モデル名（保存先ディレクトリ名）
    pub model_name: String,

    /// モデル種別（例: "leNet"）
    pub model_type: String,

    /// アーキテクチャ設定（入力形状とクラス数を含む）
    pub config: LeNetConfig,

    /// 学習時のクラス名（コード順）
    /// エンコーダと一致しない場合は読み込みエラーになる
    pub class_names: Vec<String>,

    /// 学習エポック数
    pub num_epochs: usize,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelManifest {
    /// 新しいマニフェストを作成
    pub fn new(
        model_name: &str,
        model_type: &str,
        config: LeNetConfig,
        class_names: Vec<String>,
        num_epochs: usize,
    ) -> Self {
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            model_name: model_name.to_string(),
            model_type: model_type.to_string(),
            config,
            class_names,
            num_epochs,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// マニフェストをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize manifest to JSON")
    }

    /// JSON文字列からマニフェストを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        let manifest: Self =
            serde_json::from_str(json).context("Failed to deserialize manifest from JSON")?;
        if manifest.format_version > MANIFEST_FORMAT_VERSION {
            anyhow::bail!(
                "manifest format version {} is newer than supported ({})",
                manifest.format_version,
                MANIFEST_FORMAT_VERSION
            );
        }
        Ok(manifest)
    }

    /// 入力形状 [height, width, channels]
    pub fn input_shape(&self) -> [usize; 3] {
        [self.config.height, self.config.width, self.config.channels]
    }
}
