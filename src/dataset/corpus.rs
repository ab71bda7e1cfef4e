//! 画像コーパスの読み込み
//!
//! `<root>/<class>/<file>` の構成を辞書順に走査し、親ディレクトリ名をラベルとして
//! (画素配列, ラベル) の列を作ります。

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{ClassifierError, Result};

/// CHW順に並んだ [0, 1] の画素配列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelArray {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl PixelArray {
    /// 画像を変換（1チャネルならグレースケール、それ以外はRGB）
    pub fn from_image(img: &DynamicImage, channels: usize) -> Result<Self> {
        let (width, height) = (img.width() as usize, img.height() as usize);
        let raw: Vec<u8> = match channels {
            1 => img.to_luma8().into_raw(),
            3 => img.to_rgb8().into_raw(),
            other => {
                return Err(ClassifierError::config(format!(
                    "images can only be loaded with 1 or 3 channels, got {}",
                    other
                )))
            }
        };

        // HWC -> CHW
        let mut data = Vec::with_capacity(raw.len());
        for c in 0..channels {
            for y in 0..height {
                for x in 0..width {
                    data.push(raw[(y * width + x) * channels + c] as f32 / 255.0);
                }
            }
        }

        Ok(Self {
            height,
            width,
            channels,
            data,
        })
    }

    /// [height, width, channels]
    pub fn shape(&self) -> [usize; 3] {
        [self.height, self.width, self.channels]
    }

    /// 1チャネル分のスライス
    pub fn plane(&self, channel: usize) -> &[f32] {
        let size = self.height * self.width;
        &self.data[channel * size..(channel + 1) * size]
    }
}

/// 読み込めない画像の扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnreadablePolicy {
    /// ログを出してスキップ
    #[default]
    Skip,
    /// 読み込み全体を中断
    Abort,
}

/// 読み込みオプション
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub policy: UnreadablePolicy,
    /// 指定時は (height, width) にリサイズ
    pub target_size: Option<(u32, u32)>,
    pub channels: usize,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            policy: UnreadablePolicy::Skip,
            target_size: None,
            channels: 3,
        }
    }
}

/// 1枚分の画像レコード
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub path: PathBuf,
    pub pixels: PixelArray,
    pub label: String,
}

/// 読み込んだコーパス
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    pub records: Vec<ImageRecord>,
    /// スキップした読み込み不能ファイル
    pub skipped: Vec<PathBuf>,
}

impl Corpus {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn labels(&self) -> Vec<String> {
        self.records.iter().map(|r| r.label.clone()).collect()
    }

    /// (画素配列, ラベル) の並列列に分解
    pub fn into_parts(self) -> (Vec<PixelArray>, Vec<String>) {
        self.records
            .into_iter()
            .map(|r| (r.pixels, r.label))
            .unzip()
    }
}

/// 画像をデコード（形式は拡張子ではなくファイルの中身から判定）
pub fn decode_image(path: &Path) -> Result<DynamicImage> {
    let unreadable = |reason: String| ClassifierError::UnreadableImage {
        path: path.to_path_buf(),
        reason,
    };
    image::ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| unreadable(e.to_string()))?
        .decode()
        .map_err(|e| unreadable(e.to_string()))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// クラスディレクトリ直下のファイルを辞書順に列挙
///
/// ルート直下のファイルは `InvalidLayout`、2階層以上深いディレクトリは警告してスキップします。
pub fn list_class_files(root: &Path) -> Result<Vec<(PathBuf, String)>> {
    if !root.is_dir() {
        return Err(ClassifierError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("directory not found: {}", root.display()),
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(2)
        .sort_by_file_name()
    {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        if is_hidden(path) {
            continue;
        }

        match (entry.depth(), entry.file_type().is_dir()) {
            (1, true) => {}
            (1, false) => return Err(ClassifierError::InvalidLayout(path.to_path_buf())),
            (_, true) => warn!("ネストしたディレクトリはスキップします: {}", path.display()),
            (_, false) => {
                let label = path
                    .parent()
                    .and_then(|p| p.file_name())
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| ClassifierError::InvalidLayout(path.to_path_buf()))?
                    .to_string();
                files.push((path.to_path_buf(), label));
            }
        }
    }

    Ok(files)
}

/// ディレクトリツリーからコーパスを読み込む
pub fn load_corpus(root: &Path, options: &LoaderOptions) -> Result<Corpus> {
    let files = list_class_files(root)?;
    let mut corpus = Corpus::default();

    for (path, label) in files {
        let img = match decode_image(&path) {
            Ok(img) => img,
            Err(e) => match options.policy {
                UnreadablePolicy::Skip => {
                    warn!("{}", e);
                    corpus.skipped.push(path);
                    continue;
                }
                UnreadablePolicy::Abort => return Err(e),
            },
        };

        let img = match options.target_size {
            Some((h, w)) if img.height() != h || img.width() != w => {
                img.resize_exact(w, h, image::imageops::FilterType::Triangle)
            }
            _ => img,
        };

        debug!("{} -> {}", path.display(), label);
        corpus.records.push(ImageRecord {
            pixels: PixelArray::from_image(&img, options.channels)?,
            path,
            label,
        });
    }

    if corpus.is_empty() {
        return Err(ClassifierError::EmptyCorpus(root.to_path_buf()));
    }

    info!(
        "{} 枚の画像を読み込みました（スキップ {} 枚）: {}",
        corpus.len(),
        corpus.skipped.len(),
        root.display()
    );
    Ok(corpus)
}
