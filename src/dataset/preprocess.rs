//! 生画像の前処理（raw → interim）
//!
//! クラスごとのディレクトリ構成を保ったまま、デコードできない画像を除外し、
//! 指定サイズにリサイズしたPNGとして書き出します。

use image::imageops::FilterType;
use image::DynamicImage;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::dataset::corpus::{decode_image, list_class_files, PixelArray};
use crate::error::{ClassifierError, Result};

/// 出力ファイル名（拡張子除く）の最大文字数
pub const MAX_FILE_STEM: usize = 100;

/// クラスごとの処理結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassReport {
    pub kept: usize,
    pub skipped: usize,
}

/// 前処理の結果
#[derive(Debug, Clone, Default)]
pub struct PreprocessReport {
    pub per_class: BTreeMap<String, ClassReport>,
}

impl PreprocessReport {
    pub fn kept(&self) -> usize {
        self.per_class.values().map(|c| c.kept).sum()
    }

    pub fn skipped(&self) -> usize {
        self.per_class.values().map(|c| c.skipped).sum()
    }
}

/// 長すぎるファイル名を切り詰める（文字単位）
pub fn truncate_file_stem(stem: &str) -> String {
    stem.chars().take(MAX_FILE_STEM).collect()
}

/// 同じ実行内で未使用の出力ファイル名を選ぶ（衝突時は `_1`, `_2`, ... を付ける）
fn unique_output_name(stem: &str, taken: &mut BTreeSet<String>) -> String {
    let mut name = format!("{}.png", stem);
    let mut suffix = 1;
    while taken.contains(&name) {
        name = format!("{}_{}.png", stem, suffix);
        suffix += 1;
    }
    taken.insert(name.clone());
    name
}

/// 画像をリサイズ
pub fn resize_image(img: &DynamicImage, height: u32, width: u32) -> DynamicImage {
    img.resize_exact(width, height, FilterType::Triangle)
}

/// 1枚の画像をモデル入力用の配列に変換（リサイズして [0, 1] に正規化）
pub fn preprocess_image(
    img: &DynamicImage,
    height: u32,
    width: u32,
    channels: usize,
) -> Result<PixelArray> {
    PixelArray::from_image(&resize_image(img, height, width), channels)
}

/// `raw_dir` 以下のクラスツリーを `interim_dir` にリサイズして書き出す
///
/// 既存の `interim_dir` にはそのまま上書きで追加します。
pub fn preprocess_dataset(
    raw_dir: &Path,
    interim_dir: &Path,
    height: u32,
    width: u32,
) -> Result<PreprocessReport> {
    if height == 0 || width == 0 {
        return Err(ClassifierError::config(format!(
            "target size must be positive, got {}x{}",
            height, width
        )));
    }

    let mut report = PreprocessReport::default();
    let mut written: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for (path, label) in list_class_files(raw_dir)? {
        let entry = report.per_class.entry(label.clone()).or_default();

        let img = match decode_image(&path) {
            Ok(img) => img,
            Err(e) => {
                warn!("{}", e);
                entry.skipped += 1;
                continue;
            }
        };

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(truncate_file_stem)
            .unwrap_or_else(|| format!("image_{}", entry.kept));

        let class_dir = interim_dir.join(&label);
        fs::create_dir_all(&class_dir)?;
        let taken = written.entry(label.clone()).or_default();
        let output = class_dir.join(unique_output_name(&stem, taken));

        resize_image(&img, height, width)
            .to_rgb8()
            .save(&output)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        entry.kept += 1;
    }

    for (label, stats) in &report.per_class {
        info!("  クラス '{}': {} 枚 (除外 {} 枚)", label, stats.kept, stats.skipped);
    }
    info!(
        "前処理完了: {} 枚を {} に書き出しました",
        report.kept(),
        interim_dir.display()
    );
    Ok(report)
}
