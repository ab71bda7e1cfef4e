//! データセット分割とディスクキャッシュ
//!
//! シード固定でインデックスをシャッフルし、テスト → 検証 → 学習の順に切り出します。
//! 分割結果は `data/processed/<dataset>/` に gzip 圧縮 JSON として保存され、
//! 次回以降は読み込みをスキップして再利用されます。コーパスが変わった場合の
//! 無効化は呼び出し側の責任です。

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::dataset::corpus::{load_corpus, LoaderOptions, PixelArray};
use crate::dataset::encoder::{LabelEncoder, ENCODER_FILE_NAME};
use crate::error::{ClassifierError, Result};

/// 分割比率
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitSettings {
    /// 検証データの割合
    pub validation: f64,
    /// テストデータの割合（0なら保持しない）
    pub test: f64,
    /// シャッフルのシード
    pub seed: u64,
}

impl Default for SplitSettings {
    fn default() -> Self {
        Self {
            validation: 0.25,
            test: 0.0,
            seed: 42,
        }
    }
}

impl SplitSettings {
    pub fn validate(&self) -> Result<()> {
        let ok = |r: f64| r.is_finite() && (0.0..1.0).contains(&r);
        if !ok(self.validation) || !ok(self.test) || self.validation + self.test >= 1.0 {
            return Err(ClassifierError::config(format!(
                "split ratios must be in [0, 1) and sum below 1 (validation={}, test={})",
                self.validation, self.test
            )));
        }
        Ok(())
    }
}

/// 分割後のインデックス集合
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    pub test: Vec<usize>,
}

/// 決定的な分割器
#[derive(Debug, Clone, Default)]
pub struct Partitioner {
    settings: SplitSettings,
}

impl Partitioner {
    pub fn new(settings: SplitSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &SplitSettings {
        &self.settings
    }

    /// `n` 件を分割（件数は切り上げ、残りが学習用）
    pub fn split_indices(&self, n: usize) -> Result<SplitIndices> {
        let n_test = (n as f64 * self.settings.test).ceil() as usize;
        let n_val = (n as f64 * self.settings.validation).ceil() as usize;
        if n_test + n_val >= n {
            return Err(ClassifierError::config(format!(
                "{} samples leave no training data (validation={}, test={})",
                n, n_val, n_test
            )));
        }

        let mut indices: Vec<usize> = (0..n).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.settings.seed);
        indices.shuffle(&mut rng);

        let train = indices.split_off(n_test + n_val);
        let validation = indices.split_off(n_test);
        Ok(SplitIndices {
            train,
            validation,
            test: indices,
        })
    }

    /// サンプルとコードを分割
    pub fn partition(&self, samples: Vec<PixelArray>, codes: Vec<usize>) -> Result<DatasetSplit> {
        if samples.len() != codes.len() {
            return Err(ClassifierError::config(format!(
                "{} samples but {} labels",
                samples.len(),
                codes.len()
            )));
        }
        let indices = self.split_indices(samples.len())?;

        let mut slots: Vec<Option<PixelArray>> = samples.into_iter().map(Some).collect();
        let mut take = |idx: &[usize]| -> (Vec<PixelArray>, Vec<usize>) {
            idx.iter()
                .filter_map(|&i| slots[i].take().map(|s| (s, codes[i])))
                .unzip()
        };

        let (x_train, y_train) = take(&indices.train);
        let (x_val, y_val) = take(&indices.validation);
        let (x_test, y_test) = take(&indices.test);

        Ok(DatasetSplit {
            x_train,
            y_train,
            x_val,
            y_val,
            x_test,
            y_test,
        })
    }
}

/// 学習・検証・テストに分割されたデータ
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetSplit {
    pub x_train: Vec<PixelArray>,
    pub y_train: Vec<usize>,
    pub x_val: Vec<PixelArray>,
    pub y_val: Vec<usize>,
    pub x_test: Vec<PixelArray>,
    pub y_test: Vec<usize>,
}

impl DatasetSplit {
    pub fn len(&self) -> usize {
        self.x_train.len() + self.x_val.len() + self.x_test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 評価に使うデータ（テストが空なら検証データ）
    pub fn held_out(&self) -> (&[PixelArray], &[usize]) {
        if self.x_test.is_empty() {
            (&self.x_val, &self.y_val)
        } else {
            (&self.x_test, &self.y_test)
        }
    }

    /// 入力形状 [height, width, channels]
    pub fn input_shape(&self) -> Option<[usize; 3]> {
        self.x_train.first().map(PixelArray::shape)
    }
}

const CACHE_PARTS: [&str; 6] = ["x_train", "x_val", "x_test", "y_train", "y_val", "y_test"];

/// `data/processed/<dataset>/` 上の分割キャッシュ
#[derive(Debug, Clone)]
pub struct PartitionCache {
    dir: PathBuf,
}

impl PartitionCache {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn part_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json.gz", name))
    }

    fn encoder_path(&self) -> PathBuf {
        self.dir.join(ENCODER_FILE_NAME)
    }

    /// すべてのファイルが揃っているか
    pub fn exists(&self) -> bool {
        CACHE_PARTS.iter().all(|p| self.part_path(p).is_file()) && self.encoder_path().is_file()
    }

    fn write_part<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let file = File::create(self.part_path(name))?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut encoder, value)?;
        encoder.finish()?;
        Ok(())
    }

    fn read_part<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.part_path(name);
        ClassifierError::require_file(&path)?;
        let reader = GzDecoder::new(BufReader::new(File::open(path)?));
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn store(&self, split: &DatasetSplit, encoder: &LabelEncoder) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        self.write_part("x_train", &split.x_train)?;
        self.write_part("x_val", &split.x_val)?;
        self.write_part("x_test", &split.x_test)?;
        self.write_part("y_train", &split.y_train)?;
        self.write_part("y_val", &split.y_val)?;
        self.write_part("y_test", &split.y_test)?;
        encoder.save(&self.encoder_path())?;
        Ok(())
    }

    pub fn load(&self) -> Result<(DatasetSplit, LabelEncoder)> {
        let split = DatasetSplit {
            x_train: self.read_part("x_train")?,
            y_train: self.read_part("y_train")?,
            x_val: self.read_part("x_val")?,
            y_val: self.read_part("y_val")?,
            x_test: self.read_part("x_test")?,
            y_test: self.read_part("y_test")?,
        };
        let encoder = LabelEncoder::load(&self.encoder_path())?;
        Ok((split, encoder))
    }
}

/// キャッシュがあれば読み込み、なければコーパスを読み込んで分割・保存する
pub fn load_or_partition(
    interim_dir: &Path,
    cache: &PartitionCache,
    partitioner: &Partitioner,
    options: &LoaderOptions,
) -> Result<(DatasetSplit, LabelEncoder)> {
    if cache.exists() {
        info!("分割キャッシュを使用します: {}", cache.dir().display());
        return cache.load();
    }

    let (samples, labels) = load_corpus(interim_dir, options)?.into_parts();
    let encoder = LabelEncoder::fit(&labels);
    let codes = encoder.encode(&labels)?;
    let split = partitioner.partition(samples, codes)?;

    info!(
        "分割: 学習 {} / 検証 {} / テスト {}",
        split.x_train.len(),
        split.x_val.len(),
        split.x_test.len()
    );
    cache.store(&split, &encoder)?;
    Ok((split, encoder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::corpus::tests::write_class_tree;
    use std::collections::BTreeSet;

    fn sample(v: f32) -> PixelArray {
        PixelArray {
            height: 1,
            width: 1,
            channels: 1,
            data: vec![v],
        }
    }

    #[test]
    fn test_split_is_deterministic() {
        let partitioner = Partitioner::new(SplitSettings {
            validation: 0.2,
            test: 0.1,
            seed: 7,
        })
        .unwrap();
        let a = partitioner.split_indices(50).unwrap();
        let b = partitioner.split_indices(50).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.test.len(), 5);
        assert_eq!(a.validation.len(), 10);
        assert_eq!(a.train.len(), 35);
    }

    #[test]
    fn test_partitions_are_disjoint_and_complete() {
        let partitioner = Partitioner::new(SplitSettings {
            validation: 0.25,
            test: 0.25,
            seed: 42,
        })
        .unwrap();
        let idx = partitioner.split_indices(17).unwrap();
        let mut all: Vec<usize> = idx
            .train
            .iter()
            .chain(&idx.validation)
            .chain(&idx.test)
            .copied()
            .collect();
        let unique: BTreeSet<usize> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len());
        all.sort_unstable();
        assert_eq!(all, (0..17).collect::<Vec<_>>());
    }

    #[test]
    fn test_counts_round_up() {
        let partitioner = Partitioner::default();
        let idx = partitioner.split_indices(2).unwrap();
        assert_eq!(idx.validation.len(), 1);
        assert_eq!(idx.train.len(), 1);
        assert!(idx.test.is_empty());
        assert!(partitioner.split_indices(1).is_err());
    }

    #[test]
    fn test_invalid_ratios() {
        let bad = SplitSettings {
            validation: 0.6,
            test: 0.5,
            seed: 0,
        };
        assert!(matches!(Partitioner::new(bad), Err(ClassifierError::InvalidConfig(_))));
    }

    #[test]
    fn test_partition_keeps_sample_label_pairs() {
        let samples: Vec<PixelArray> = (0..8).map(|i| sample(i as f32)).collect();
        let codes: Vec<usize> = (0..8).map(|i| i % 3).collect();
        let split = Partitioner::default().partition(samples, codes).unwrap();
        assert_eq!(split.len(), 8);
        for (x, y) in split.x_train.iter().zip(&split.y_train).chain(split.x_val.iter().zip(&split.y_val)) {
            assert_eq!(x.data[0] as usize % 3, *y);
        }
        let (held_x, held_y) = split.held_out();
        assert_eq!(held_x.len(), 2);
        assert_eq!(held_y.len(), 2);
    }

    #[test]
    fn test_cache_round_trip_and_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let interim = dir.path().join("interim");
        write_class_tree(&interim, &[("apple", 3), ("banana", 3)]);
        let cache = PartitionCache::new(dir.path().join("processed"));
        let options = LoaderOptions {
            target_size: Some((8, 8)),
            ..LoaderOptions::default()
        };

        let (first, encoder) =
            load_or_partition(&interim, &cache, &Partitioner::default(), &options).unwrap();
        assert!(cache.exists());
        assert_eq!(encoder.classes(), &["apple", "banana"]);

        // コーパスを消してもキャッシュから読める
        fs::remove_dir_all(&interim).unwrap();
        let (second, _) =
            load_or_partition(&interim, &cache, &Partitioner::default(), &options).unwrap();
        assert_eq!(first, second);
    }
}
