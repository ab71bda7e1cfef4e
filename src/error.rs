//! パイプライン全体のエラー型
//!
//! 画像の読み込み失敗、成果物の欠落、設定ミスなどを区別して扱います。
//! 上位のオーケストレーション層は `anyhow` でコンテキストを付与し、
//! 必要に応じて `downcast_ref::<ClassifierError>()` で分類します。

use std::path::PathBuf;
use thiserror::Error;

/// 分類パイプラインのエラー
#[derive(Error, Debug)]
pub enum ClassifierError {
    /// 画像としてデコードできないファイル（スキップ対象）
    #[error("unreadable image {path:?}: {reason}")]
    UnreadableImage { path: PathBuf, reason: String },

    /// モデルまたはエンコーダのファイルが存在しない
    #[error("missing artifact: {0:?}")]
    MissingArtifact(PathBuf),

    /// 未登録のモデル種別
    #[error("unsupported model type '{name}' (available: {available})")]
    UnsupportedModel { name: String, available: String },

    /// エンコーダが知らないラベル、または範囲外のコード
    #[error("unknown label: {0}")]
    UnknownLabel(String),

    /// モデルとエンコーダの組み合わせが一致しない
    #[error("encoder does not match model '{model_name}': {detail}")]
    EncoderMismatch { model_name: String, detail: String },

    /// 設定値が不正
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// 画像が1枚も見つからない
    #[error("no images found under {0:?}")]
    EmptyCorpus(PathBuf),

    /// クラスディレクトリの直下にない画像
    #[error("image is not inside a class directory: {0:?}")]
    InvalidLayout(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClassifierError>;

impl ClassifierError {
    /// 設定エラーを作成
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// 存在しなければ `MissingArtifact` を返す
    pub fn require_file(path: &std::path::Path) -> Result<()> {
        if path.is_file() {
            Ok(())
        } else {
            Err(Self::MissingArtifact(path.to_path_buf()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_file_reports_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("model.tar.gz");
        match ClassifierError::require_file(&missing) {
            Err(ClassifierError::MissingArtifact(p)) => assert_eq!(p, missing),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_model_message_lists_available() {
        let err = ClassifierError::UnsupportedModel {
            name: "resNet".to_string(),
            available: "leNet".to_string(),
        };
        assert!(err.to_string().contains("leNet"));
    }
}
