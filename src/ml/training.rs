//! モデル学習
//!
//! 分割済みデータからバッチを作り、Adam（時間減衰付き）でLeNetを学習します。
//! 学習後はモデルとエンコーダを組で保存し、学習履歴をCSVとPNGで書き出します。

use anyhow::{Context, Result};
use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::{AutodiffModule, Module},
    optim::{AdamConfig, GradientsParams, Optimizer},
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::dataset::{
    load_or_partition, DatasetSplit, LabelEncoder, LoaderOptions, PartitionCache, Partitioner, PixelArray,
    SplitSettings,
};
use crate::evaluate::history::{EpochMetrics, TrainingHistory};
use crate::evaluate::plots::{history_plot_path, plot_training_history};
use crate::evaluate::{evaluate_predictions, EvaluationReport};
use crate::ml::augmentation::AugmentationPolicy;
use crate::ml::factory::{ModelFactory, ModelSetup, Strictness};
use crate::ml::inference::predict_probabilities;
use crate::ml::ml_model::{LeNet, LeNetConfig};
use crate::model::config::{OptimizerSetup, ProjectPaths};
use crate::model::model_metadata::ModelManifest;
use crate::model::model_storage::{ArtifactBundle, BundlePaths};
use crate::render::resolve_font;

/// データセットアイテム
#[derive(Clone, Debug)]
pub struct FruitItem {
    pub pixels: PixelArray,
    pub label: usize,
}

/// 分割の1区分をburnのデータセットとして扱う
#[derive(Debug, Clone, Default)]
pub struct SplitDataset {
    items: Vec<FruitItem>,
}

impl SplitDataset {
    pub fn new(samples: &[PixelArray], codes: &[usize]) -> Self {
        let items = samples
            .iter()
            .zip(codes)
            .map(|(pixels, &label)| FruitItem {
                pixels: pixels.clone(),
                label,
            })
            .collect();
        Self { items }
    }
}

impl Dataset<FruitItem> for SplitDataset {
    fn get(&self, index: usize) -> Option<FruitItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// バッチャー
#[derive(Clone, Debug, Default)]
pub struct FruitBatcher;

impl FruitBatcher {
    /// バックエンドを明示してバッチを作る
    pub fn to_batch<B: Backend>(&self, items: Vec<FruitItem>, device: &B::Device) -> FruitBatch<B> {
        <Self as Batcher<B, FruitItem, FruitBatch<B>>>::batch(self, items, device)
    }
}

impl<B: Backend> Batcher<B, FruitItem, FruitBatch<B>> for FruitBatcher {
    fn batch(&self, items: Vec<FruitItem>, device: &B::Device) -> FruitBatch<B> {
        let batch_size = items.len();
        let [height, width, channels] = items
            .first()
            .map(|item| item.pixels.shape())
            .unwrap_or([0, 0, 0]);

        let mut all_pixels = Vec::with_capacity(batch_size * channels * height * width);
        let mut targets_vec = Vec::with_capacity(batch_size);
        for item in items {
            all_pixels.extend_from_slice(&item.pixels.data);
            targets_vec.push(item.label as i64);
        }

        // バッチ全体を1回で転送
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), device)
            .reshape([batch_size, channels, height, width]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), device);

        FruitBatch { images, targets }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct FruitBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// 1エポックあたりのステップ数（最低1）
pub fn steps_per_epoch(train_size: usize, batch_size: usize) -> usize {
    (train_size / batch_size.max(1)).max(1)
}

/// 時間減衰した学習率 `lr0 / (1 + decay * step)`
pub fn decayed_learning_rate(initial: f64, decay: f64, step: usize) -> f64 {
    initial / (1.0 + decay * step as f64)
}

/// 学習ループのオプション
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub optimizer: OptimizerSetup,
    pub augmentation: AugmentationPolicy,
    pub seed: u64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            optimizer: OptimizerSetup::default(),
            augmentation: AugmentationPolicy::default(),
            seed: 42,
        }
    }
}

/// 損失と正解数を集計
#[derive(Debug, Default, Clone, Copy)]
struct EpochTotals {
    loss_sum: f64,
    correct: usize,
    seen: usize,
}

impl EpochTotals {
    fn add(&mut self, loss: f64, correct: usize, batch_len: usize) {
        self.loss_sum += loss * batch_len as f64;
        self.correct += correct;
        self.seen += batch_len;
    }

    fn loss(&self) -> f64 {
        if self.seen == 0 {
            0.0
        } else {
            self.loss_sum / self.seen as f64
        }
    }

    fn accuracy(&self) -> f64 {
        if self.seen == 0 {
            0.0
        } else {
            self.correct as f64 / self.seen as f64
        }
    }
}

fn count_correct<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _] = output.dims();
    let correct: i64 = output
        .argmax(1)
        .reshape([batch_size])
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem();
    correct.max(0) as usize
}

/// 検証データの損失と精度（勾配なし）
fn validate<B: Backend>(
    model: &LeNet<B>,
    dataset: &SplitDataset,
    batch_size: usize,
    device: &B::Device,
) -> (f64, f64) {
    let mut totals = EpochTotals::default();
    let indices: Vec<usize> = (0..dataset.len()).collect();
    for chunk in indices.chunks(batch_size.max(1)) {
        let items: Vec<FruitItem> = chunk.iter().filter_map(|&i| dataset.get(i)).collect();
        let batch = FruitBatcher.to_batch::<B>(items, device);
        let output = model.forward_classification(batch.images, batch.targets);
        let loss: f64 = output.loss.into_scalar().elem();
        let correct = count_correct(output.output, output.targets);
        totals.add(loss, correct, chunk.len());
    }
    (totals.loss(), totals.accuracy())
}

/// 学習ループ
///
/// 各ステップで学習データから1バッチを取り出し、拡張をかけて1回更新する。
/// 学習率はステップごとに `lr0 / (1 + decay * t)` で減衰する。
/// 検証データは拡張せず、各エポックの終わりに評価する。
pub fn fit<B: AutodiffBackend>(
    mut model: LeNet<B>,
    split: &DatasetSplit,
    options: &FitOptions,
    device: &B::Device,
) -> Result<(LeNet<B>, TrainingHistory)> {
    options.optimizer.validate()?;
    let setup = &options.optimizer;
    let train = SplitDataset::new(&split.x_train, &split.y_train);
    let valid = SplitDataset::new(&split.x_val, &split.y_val);
    if train.len() == 0 {
        anyhow::bail!("training partition is empty");
    }

    let mut optim = AdamConfig::new().init::<B, LeNet<B>>();
    let mut rng = ChaCha8Rng::seed_from_u64(options.seed);
    let steps = steps_per_epoch(train.len(), setup.batch_size);
    let decay = setup.decay();
    let mut history = TrainingHistory::default();
    let mut global_step = 0usize;

    info!(
        "学習開始: {} 件, バッチ {} x {} ステップ, {} エポック",
        train.len(),
        setup.batch_size,
        steps,
        setup.epochs
    );

    for epoch in 1..=setup.epochs {
        let mut order: Vec<usize> = (0..train.len()).collect();
        order.shuffle(&mut rng);

        let mut totals = EpochTotals::default();
        let mut learning_rate = setup.initial_learning_rate;

        for step in 0..steps {
            let start = step * setup.batch_size;
            let end = (start + setup.batch_size).min(order.len());
            let items: Vec<FruitItem> = order[start..end]
                .iter()
                .filter_map(|&i| train.get(i))
                .map(|item| FruitItem {
                    pixels: options.augmentation.apply(&item.pixels, &mut rng),
                    label: item.label,
                })
                .collect();
            let batch_len = items.len();

            let batch = FruitBatcher.to_batch::<B>(items, device);
            let output = model.forward_classification(batch.images, batch.targets);
            let loss_value: f64 = output.loss.clone().into_scalar().elem();
            let correct = count_correct(output.output.clone(), output.targets.clone());
            totals.add(loss_value, correct, batch_len);

            learning_rate = decayed_learning_rate(setup.initial_learning_rate, decay, global_step);
            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(learning_rate, model, grads);
            global_step += 1;

            debug!("epoch {} step {}/{} loss={:.4}", epoch, step + 1, steps, loss_value);
        }

        let (val_loss, val_accuracy) = if valid.len() == 0 {
            (None, None)
        } else {
            let (loss, acc) = validate::<B::InnerBackend>(&model.valid(), &valid, setup.batch_size, device);
            (Some(loss), Some(acc))
        };

        let metrics = EpochMetrics {
            epoch,
            loss: totals.loss(),
            accuracy: totals.accuracy(),
            val_loss,
            val_accuracy,
            learning_rate,
        };
        info!(
            "Epoch {}/{} - loss: {:.4} - acc: {:.4}{}",
            epoch,
            setup.epochs,
            metrics.loss,
            metrics.accuracy,
            match (val_loss, val_accuracy) {
                (Some(l), Some(a)) => format!(" - val_loss: {:.4} - val_acc: {:.4}", l, a),
                _ => String::new(),
            }
        );
        history.push(metrics);
    }

    Ok((model, history))
}

/// 学習リクエスト
#[derive(Debug, Clone)]
pub struct TrainRequest {
    pub dataset_name: String,
    pub model_name: String,
    pub model_type: String,
    /// モデル固有のハイパーパラメータ（`key=value`）
    pub setup_params: BTreeMap<String, String>,
    pub strictness: Strictness,
    pub optimizer: OptimizerSetup,
    pub split: SplitSettings,
    pub augmentation: AugmentationPolicy,
    pub height: u32,
    pub width: u32,
    pub channels: usize,
    pub font_path: Option<PathBuf>,
}

impl TrainRequest {
    pub fn new(dataset_name: &str, model_name: &str) -> Self {
        Self {
            dataset_name: dataset_name.to_string(),
            model_name: model_name.to_string(),
            model_type: "leNet".to_string(),
            setup_params: BTreeMap::new(),
            strictness: Strictness::default(),
            optimizer: OptimizerSetup::default(),
            split: SplitSettings::default(),
            augmentation: AugmentationPolicy::default(),
            height: 28,
            width: 28,
            channels: 3,
            font_path: None,
        }
    }
}

/// 学習結果
pub struct TrainOutcome<B: AutodiffBackend> {
    pub model: LeNet<B>,
    pub config: LeNetConfig,
    pub history: TrainingHistory,
    pub split: DatasetSplit,
    pub encoder: LabelEncoder,
    pub artifacts: BundlePaths,
    pub history_csv: PathBuf,
    pub history_plot: PathBuf,
}

/// モデルの重みをバイト列に変換
pub fn weights_to_bytes<B: Backend>(model: LeNet<B>) -> Result<Vec<u8>> {
    BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(model.into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みのシリアライズエラー: {:?}", e))
}

/// データ読み込みから保存までの学習処理全体
///
/// 1. `data/interim/<dataset>` を読み込み分割（キャッシュがあれば再利用）
/// 2. データ形状からモデルを構築
/// 3. 学習ループ
/// 4. モデル・エンコーダ・学習履歴を保存
pub fn train_model<B: AutodiffBackend>(
    paths: &ProjectPaths,
    request: &TrainRequest,
    device: &B::Device,
) -> Result<TrainOutcome<B>> {
    let interim_dir = paths.interim_dir(&request.dataset_name);
    let cache = PartitionCache::new(paths.processed_dir(&request.dataset_name));
    let partitioner = Partitioner::new(request.split)?;
    let loader = LoaderOptions {
        target_size: Some((request.height, request.width)),
        channels: request.channels,
        ..LoaderOptions::default()
    };

    let (split, encoder) = load_or_partition(&interim_dir, &cache, &partitioner, &loader)
        .context(format!("Failed to load dataset '{}'", request.dataset_name))?;
    let input_shape = split
        .input_shape()
        .ok_or_else(|| anyhow::anyhow!("dataset '{}' has no training samples", request.dataset_name))?;

    let setup = ModelSetup::new(input_shape, encoder.num_classes())
        .with_params(request.setup_params.clone())
        .with_strictness(request.strictness);
    let (model, config) = ModelFactory::create::<B>(&request.model_type, &setup, device)?;
    info!(
        "モデル '{}' ({}) を構築: 入力 {:?}, {} クラス",
        request.model_name,
        request.model_type,
        input_shape,
        encoder.num_classes()
    );

    let options = FitOptions {
        optimizer: request.optimizer.clone(),
        augmentation: request.augmentation.clone(),
        seed: request.split.seed,
    };
    let (model, history) = fit(model, &split, &options, device)?;

    let manifest = ModelManifest::new(
        &request.model_name,
        &request.model_type,
        config.clone(),
        encoder.classes().to_vec(),
        history.len(),
    );
    let weights = weights_to_bytes(model.clone())?;
    let bundle = ArtifactBundle::new(manifest, encoder.clone(), weights)?;
    let artifacts = bundle.save(paths)?;

    let figures_dir = paths.figures_dir(&request.model_name);
    let history_csv = figures_dir.join(format!("{}_training_history.csv", request.model_name));
    history.write_csv(&history_csv)?;
    let history_plot = history_plot_path(&figures_dir, &request.model_name);
    let font = resolve_font(request.font_path.as_deref())?;
    plot_training_history(&history, &history_plot, font.as_ref())?;

    Ok(TrainOutcome {
        model,
        config,
        history,
        split,
        encoder,
        artifacts,
        history_csv,
        history_plot,
    })
}

/// 学習済みモデルを保留データ（テスト、なければ検証）で評価
pub fn evaluate_held_out<B: Backend>(
    model: &LeNet<B>,
    split: &DatasetSplit,
    encoder: &LabelEncoder,
    paths: &ProjectPaths,
    model_name: &str,
    batch_size: usize,
    font_path: Option<&std::path::Path>,
    device: &B::Device,
) -> Result<EvaluationReport> {
    let (samples, truth) = split.held_out();
    if samples.is_empty() {
        anyhow::bail!("no held-out data to evaluate model '{}'", model_name);
    }
    let predicted: Vec<usize> = predict_probabilities(model, samples, batch_size, device)?
        .iter()
        .map(|p| argmax(p))
        .collect();
    let font = resolve_font(font_path)?;
    evaluate_predictions(
        encoder,
        truth,
        &predicted,
        &paths.figures_dir(model_name),
        model_name,
        font.as_ref(),
    )
}

/// 最大値のインデックス
pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_autodiff::Autodiff;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = Autodiff<NdArray<f32>>;

    fn pixels(v: f32) -> PixelArray {
        PixelArray {
            height: 8,
            width: 8,
            channels: 3,
            data: vec![v; 3 * 8 * 8],
        }
    }

    #[test]
    fn test_steps_per_epoch_floors_to_one() {
        assert_eq!(steps_per_epoch(1, 32), 1);
        assert_eq!(steps_per_epoch(0, 32), 1);
        assert_eq!(steps_per_epoch(64, 32), 2);
        assert_eq!(steps_per_epoch(70, 32), 2);
    }

    #[test]
    fn test_time_decay() {
        assert_eq!(decayed_learning_rate(1e-3, 1e-4, 0), 1e-3);
        let lr = decayed_learning_rate(1e-3, 1e-4, 10);
        assert!((lr - 1e-3 / 1.001).abs() < 1e-15);
    }

    #[test]
    fn test_batcher_shapes() {
        let device = NdArrayDevice::Cpu;
        let items = vec![
            FruitItem { pixels: pixels(0.1), label: 0 },
            FruitItem { pixels: pixels(0.9), label: 1 },
        ];
        let batch = FruitBatcher.to_batch::<NdArray<f32>>(items, &device);
        assert_eq!(batch.images.dims(), [2, 3, 8, 8]);
        assert_eq!(batch.targets.dims(), [2]);
    }

    #[test]
    fn test_fit_records_each_epoch() {
        let device = NdArrayDevice::Cpu;
        let split = DatasetSplit {
            x_train: vec![pixels(0.0), pixels(1.0), pixels(0.1)],
            y_train: vec![0, 1, 0],
            x_val: vec![pixels(0.9)],
            y_val: vec![1],
            ..DatasetSplit::default()
        };
        let model = LeNetConfig::new(8, 8, 3, 2)
            .with_conv1_filters(4)
            .with_conv2_filters(4)
            .with_dense_units(8)
            .init::<TestBackend>(&device);
        let options = FitOptions {
            optimizer: OptimizerSetup {
                initial_learning_rate: 1e-3,
                epochs: 2,
                batch_size: 32,
            },
            augmentation: AugmentationPolicy::none(),
            seed: 1,
        };

        let (_, history) = fit(model, &split, &options, &device).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.epochs.iter().all(|e| e.loss.is_finite()));
        assert_eq!(history.val_accuracy().len(), 2);
        assert!(history.epochs[1].learning_rate < 1e-3);
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), 1);
        assert_eq!(argmax(&[0.5]), 0);
    }
}
