//! モデルとエンコーダの永続化
//!
//! モデルは tar.gz 形式で1ファイルにまとめます。
//!
//! ファイル構成:
//! - `model_files/models/<name>/model.tar.gz`
//!   - metadata.json - マニフェスト（設定、クラス一覧など）
//!   - model.bin     - モデルの重み（バイナリ）
//! - `model_files/encoders/<name>/encoder.json` - ラベルエンコーダ
//!
//! 2つは必ず組で保存・読み込みし、クラス一覧が一致しなければエラーにします。

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};
use tracing::info;

use crate::dataset::{LabelEncoder, ENCODER_FILE_NAME};
use crate::error::ClassifierError;
use crate::model::config::ProjectPaths;
use crate::model::model_metadata::ModelManifest;

/// モデルファイル名
pub const MODEL_FILE_NAME: &str = "model.tar.gz";

/// マニフェストと共にモデルをTar.gz形式で保存
pub fn save_model_with_metadata(
    output_path: &Path,
    manifest: &ModelManifest,
    model_binary: &[u8],
) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create parent directory: {:?}", parent))?;
    }

    let tar_gz_file = File::create(output_path)
        .context(format!("Failed to create tar.gz file: {:?}", output_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = manifest.to_json_string()?;
    append_entry(&mut tar_builder, "metadata.json", json_str.as_bytes())
        .context("Failed to add metadata.json to tar")?;
    append_entry(&mut tar_builder, "model.bin", model_binary)
        .context("Failed to add model.bin to tar")?;

    tar_builder
        .into_inner()
        .context("Failed to finalize tar.gz archive")?
        .finish()
        .context("Failed to finish gzip stream")?;

    Ok(())
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, bytes)?;
    Ok(())
}

/// マニフェストとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelManifest, Vec<u8>)> {
    ClassifierError::require_file(tar_gz_path)?;
    let tar_gz_file = File::open(tar_gz_path)
        .context(format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;

    let decoder = GzDecoder::new(tar_gz_file);
    let mut archive = Archive::new(decoder);

    let mut manifest_opt: Option<ModelManifest> = None;
    let mut model_binary_opt: Option<Vec<u8>> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_path_buf();

        match path.to_str() {
            Some("metadata.json") => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                manifest_opt = Some(ModelManifest::from_json_string(&json_str)?);
            }
            Some("model.bin") => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                model_binary_opt = Some(buffer);
            }
            _ => {}
        }
    }

    match (manifest_opt, model_binary_opt) {
        (Some(manifest), Some(binary)) => Ok((manifest, binary)),
        (None, _) => Err(anyhow::anyhow!("metadata.json not found in {:?}", tar_gz_path)),
        (_, None) => Err(anyhow::anyhow!("model.bin not found in {:?}", tar_gz_path)),
    }
}

/// 成果物の保存先
#[derive(Debug, Clone, PartialEq)]
pub struct BundlePaths {
    pub model: PathBuf,
    pub encoder: PathBuf,
}

impl BundlePaths {
    pub fn for_model(paths: &ProjectPaths, model_name: &str) -> Self {
        Self {
            model: paths.model_dir(model_name).join(MODEL_FILE_NAME),
            encoder: paths.encoder_dir(model_name).join(ENCODER_FILE_NAME),
        }
    }
}

/// モデルとエンコーダの組
#[derive(Debug, Clone)]
pub struct ArtifactBundle {
    pub manifest: ModelManifest,
    pub encoder: LabelEncoder,
    pub weights: Vec<u8>,
}

impl ArtifactBundle {
    /// 組を作成（クラス一覧を検証）
    pub fn new(manifest: ModelManifest, encoder: LabelEncoder, weights: Vec<u8>) -> crate::error::Result<Self> {
        let bundle = Self {
            manifest,
            encoder,
            weights,
        };
        bundle.verify()?;
        Ok(bundle)
    }

    /// マニフェストのクラス一覧とエンコーダの一致を確認
    pub fn verify(&self) -> crate::error::Result<()> {
        if self.manifest.class_names.as_slice() != self.encoder.classes() {
            return Err(ClassifierError::EncoderMismatch {
                model_name: self.manifest.model_name.clone(),
                detail: format!(
                    "model classes {:?}, encoder classes {:?}",
                    self.manifest.class_names,
                    self.encoder.classes()
                ),
            });
        }
        if self.manifest.config.num_classes != self.encoder.num_classes() {
            return Err(ClassifierError::EncoderMismatch {
                model_name: self.manifest.model_name.clone(),
                detail: format!(
                    "model outputs {} classes, encoder has {}",
                    self.manifest.config.num_classes,
                    self.encoder.num_classes()
                ),
            });
        }
        Ok(())
    }

    /// モデルとエンコーダを保存
    pub fn save(&self, paths: &ProjectPaths) -> Result<BundlePaths> {
        let targets = BundlePaths::for_model(paths, &self.manifest.model_name);
        save_model_with_metadata(&targets.model, &self.manifest, &self.weights)?;
        self.encoder
            .save(&targets.encoder)
            .context(format!("Failed to save encoder: {:?}", targets.encoder))?;
        info!(
            "モデルを保存しました: {} / {}",
            targets.model.display(),
            targets.encoder.display()
        );
        Ok(targets)
    }

    /// モデル名から組を読み込む
    pub fn load(paths: &ProjectPaths, model_name: &str) -> Result<Self> {
        let targets = BundlePaths::for_model(paths, model_name);
        ClassifierError::require_file(&targets.model)?;
        ClassifierError::require_file(&targets.encoder)?;

        let (manifest, weights) = load_model_with_metadata(&targets.model)?;
        let encoder = LabelEncoder::load(&targets.encoder)?;
        Ok(Self::new(manifest, encoder, weights)?)
    }
}

/// マニフェストをログに出す
pub fn log_manifest_info(manifest: &ModelManifest) {
    info!("=== モデルマニフェスト ===");
    info!("モデル: {} ({})", manifest.model_name, manifest.model_type);
    info!("クラス: {}", manifest.class_names.join(", "));
    info!(
        "入力サイズ: {}x{}x{}",
        manifest.config.height, manifest.config.width, manifest.config.channels
    );
    info!("学習エポック数: {}", manifest.num_epochs);
    info!("学習日時: {}", manifest.trained_at);
}
