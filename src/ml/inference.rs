//! モデル推論
//!
//! 保存済みのモデルとエンコーダを組で読み込み、画像をクラス名と確率に変換します。
//! 表示用に、ラベルと確信度を書き込んだ画像も作れます。

use ab_glyph::FontVec;
use anyhow::{Context, Result};
use burn::{
    backend::{wgpu::WgpuDevice, Wgpu},
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use burn_ndarray::{NdArray, NdArrayDevice};
use image::{imageops::FilterType, DynamicImage, RgbImage};
use imageproc::drawing::draw_text_mut;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::dataset::{corpus::decode_image, preprocess_image, LabelEncoder, PixelArray};
use crate::ml::ml_model::LeNet;
use crate::ml::training::argmax;
use crate::model::config::{DeviceType, InferenceSettings, ProjectPaths};
use crate::model::model_metadata::ModelManifest;
use crate::model::model_storage::{log_manifest_info, ArtifactBundle};
use crate::render::{resolve_font, GREEN};

/// 1枚分の予測結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// 最も確率の高いクラス名
    pub label: String,
    /// そのクラスの確率
    pub probability: f32,
    /// 全クラスの確率（エンコーダのコード順）
    pub probabilities: Vec<f32>,
}

impl Prediction {
    /// `label: 97.12%` 形式の表示文字列
    pub fn display_text(&self) -> String {
        format!("{}: {:.2}%", self.label, self.probability * 100.0)
    }
}

fn to_tensor<B: Backend>(samples: &[PixelArray], device: &B::Device) -> Tensor<B, 4> {
    let [height, width, channels] = samples.first().map(PixelArray::shape).unwrap_or([0, 0, 0]);
    let mut all_pixels = Vec::with_capacity(samples.len() * channels * height * width);
    for sample in samples {
        all_pixels.extend_from_slice(&sample.data);
    }
    Tensor::<B, 1>::from_floats(all_pixels.as_slice(), device).reshape([samples.len(), channels, height, width])
}

/// 各サンプルのクラス確率をバッチ単位で計算
pub fn predict_probabilities<B: Backend>(
    model: &LeNet<B>,
    samples: &[PixelArray],
    batch_size: usize,
    device: &B::Device,
) -> Result<Vec<Vec<f32>>> {
    let mut results = Vec::with_capacity(samples.len());
    for chunk in samples.chunks(batch_size.max(1)) {
        let probs = model.probabilities(to_tensor::<B>(chunk, device));
        let [_, num_classes] = probs.dims();
        let values = probs
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))?;
        results.extend(values.chunks(num_classes).map(<[f32]>::to_vec));
    }
    Ok(results)
}

/// 読み込み済みモデルとエンコーダの組
pub struct Predictor<B: Backend> {
    model: LeNet<B>,
    encoder: LabelEncoder,
    manifest: ModelManifest,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    pub fn new(model: LeNet<B>, encoder: LabelEncoder, manifest: ModelManifest, device: B::Device) -> Self {
        Self {
            model,
            encoder,
            manifest,
            device,
        }
    }

    /// 成果物の組から重みを復元
    pub fn from_bundle(bundle: ArtifactBundle, device: &B::Device) -> Result<Self> {
        bundle.verify()?;
        let ArtifactBundle {
            manifest,
            encoder,
            weights,
        } = bundle;

        let model = manifest.config.init::<B>(device);
        let record = BinBytesRecorder::<FullPrecisionSettings>::default()
            .load(weights, device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
        let model = model.load_record(record);

        Ok(Self::new(model, encoder, manifest, device.clone()))
    }

    /// モデル名から読み込む
    pub fn load(paths: &ProjectPaths, model_name: &str, device: &B::Device) -> Result<Self> {
        let bundle = ArtifactBundle::load(paths, model_name)
            .context(format!("Failed to load model '{}'", model_name))?;
        log_manifest_info(&bundle.manifest);
        Self::from_bundle(bundle, device)
    }

    pub fn encoder(&self) -> &LabelEncoder {
        &self.encoder
    }

    pub fn manifest(&self) -> &ModelManifest {
        &self.manifest
    }

    /// 前処理済みの配列をまとめて分類
    pub fn classify_pixels(&self, samples: &[PixelArray]) -> Result<Vec<Prediction>> {
        let expected = self.manifest.input_shape();
        if let Some(bad) = samples.iter().find(|s| s.shape() != expected) {
            anyhow::bail!("input shape {:?} does not match model input {:?}", bad.shape(), expected);
        }
        predict_probabilities(&self.model, samples, samples.len().max(1), &self.device)?
            .into_iter()
            .map(|probabilities| {
                let code = argmax(&probabilities);
                Ok(Prediction {
                    label: self.encoder.decode_one(code)?.to_string(),
                    probability: probabilities.get(code).copied().unwrap_or(0.0),
                    probabilities,
                })
            })
            .collect()
    }

    /// 画像をモデルの入力サイズにリサイズして分類
    pub fn classify(&self, images: &[DynamicImage]) -> Result<Vec<Prediction>> {
        let [height, width, channels] = self.manifest.input_shape();
        let samples = images
            .iter()
            .map(|img| preprocess_image(img, height as u32, width as u32, channels))
            .collect::<crate::error::Result<Vec<_>>>()?;
        self.classify_pixels(&samples)
    }
}

/// バックエンドを実行時に選ぶ推論エンジン
pub enum InferenceEngine {
    Wgpu(Predictor<Wgpu>),
    NdArray(Predictor<NdArray<f32>>),
}

impl InferenceEngine {
    /// 設定されたデバイスでモデルを読み込む
    pub fn load(paths: &ProjectPaths, model_name: &str, device_type: DeviceType) -> Result<Self> {
        info!("モデル '{}' を {} で読み込みます", model_name, device_type);
        match device_type {
            DeviceType::Wgpu => Ok(Self::Wgpu(Predictor::load(paths, model_name, &WgpuDevice::default())?)),
            DeviceType::Cpu => Ok(Self::NdArray(Predictor::load(paths, model_name, &NdArrayDevice::Cpu)?)),
        }
    }

    pub fn classify(&self, images: &[DynamicImage]) -> Result<Vec<Prediction>> {
        match self {
            Self::Wgpu(p) => p.classify(images),
            Self::NdArray(p) => p.classify(images),
        }
    }

    /// 1枚を分類
    pub fn classify_one(&self, image: &DynamicImage) -> Result<Prediction> {
        self.classify(std::slice::from_ref(image))?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("no prediction returned"))
    }

    /// ファイルを読み込んで分類
    pub fn classify_path(&self, path: &Path) -> Result<(DynamicImage, Prediction)> {
        let image = decode_image(path)?;
        let prediction = self.classify_one(&image)?;
        Ok((image, prediction))
    }

    pub fn manifest(&self) -> &ModelManifest {
        match self {
            Self::Wgpu(p) => p.manifest(),
            Self::NdArray(p) => p.manifest(),
        }
    }
}

/// 予測結果を画像に書き込む
pub struct Annotator {
    font: Option<FontVec>,
    width: u32,
}

impl Annotator {
    const TEXT_X: i32 = 10;
    /// 文字のベースライン位置
    const TEXT_BASELINE: i32 = 25;
    const FONT_SCALE: f32 = 22.0;

    pub fn new(font: Option<FontVec>, width: u32) -> Self {
        Self { font, width }
    }

    pub fn from_settings(settings: &InferenceSettings) -> Result<Self> {
        let font = resolve_font(settings.font_path.as_deref())?;
        Ok(Self::new(font, settings.annotate_width))
    }

    /// 幅を揃えた画像の左上に `label: xx.xx%` を緑で描く
    pub fn annotate(&self, image: &DynamicImage, prediction: &Prediction) -> RgbImage {
        let width = self.width.max(1);
        let height = ((image.height() as u64 * width as u64) / image.width().max(1) as u64).max(1) as u32;
        let mut output = image.resize_exact(width, height, FilterType::Triangle).to_rgb8();

        if let Some(font) = &self.font {
            let top = Self::TEXT_BASELINE - (Self::FONT_SCALE * 0.8) as i32;
            draw_text_mut(
                &mut output,
                GREEN,
                Self::TEXT_X,
                top,
                Self::FONT_SCALE,
                font,
                &prediction.display_text(),
            );
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ml_model::LeNetConfig;

    fn predictor(classes: &[&str]) -> Predictor<NdArray<f32>> {
        let device = NdArrayDevice::Cpu;
        let encoder = LabelEncoder::fit(classes);
        let config = LeNetConfig::new(8, 8, 3, encoder.num_classes())
            .with_conv1_filters(4)
            .with_conv2_filters(4)
            .with_dense_units(8);
        let model = config.init::<NdArray<f32>>(&device);
        let manifest = ModelManifest::new("basic", "leNet", config, encoder.classes().to_vec(), 1);
        Predictor::new(model, encoder, manifest, device)
    }

    fn image(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| image::Rgb([(x * 7) as u8, (y * 5) as u8, 90])))
    }

    #[test]
    fn test_classify_returns_probabilities_per_image() {
        let predictor = predictor(&["apple", "banana", "orange"]);
        let predictions = predictor.classify(&[image(115, 73), image(20, 20)]).unwrap();
        assert_eq!(predictions.len(), 2);
        for p in &predictions {
            assert_eq!(p.probabilities.len(), 3);
            let sum: f32 = p.probabilities.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4);
            assert!(["apple", "banana", "orange"].contains(&p.label.as_str()));
            assert_eq!(p.probability, p.probabilities[argmax(&p.probabilities)]);
        }
    }

    #[test]
    fn test_weights_survive_bundle_round_trip() {
        let device = NdArrayDevice::Cpu;
        let original = predictor(&["apple", "banana"]);
        let weights = crate::ml::training::weights_to_bytes(original.model.clone()).unwrap();
        let bundle = ArtifactBundle::new(original.manifest.clone(), original.encoder.clone(), weights).unwrap();
        let restored = Predictor::<NdArray<f32>>::from_bundle(bundle, &device).unwrap();

        let input = [image(8, 8)];
        let a = original.classify(&input).unwrap();
        let b = restored.classify(&input).unwrap();
        for (x, y) in a[0].probabilities.iter().zip(&b[0].probabilities) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_wrong_shape_is_rejected() {
        let predictor = predictor(&["apple", "banana"]);
        let sample = PixelArray {
            height: 4,
            width: 4,
            channels: 3,
            data: vec![0.0; 48],
        };
        assert!(predictor.classify_pixels(&[sample]).is_err());
    }

    #[test]
    fn test_annotation_width_and_text() {
        let prediction = Prediction {
            label: "apple".to_string(),
            probability: 0.97123,
            probabilities: vec![0.97123, 0.02877],
        };
        assert_eq!(prediction.display_text(), "apple: 97.12%");

        let annotated = Annotator::new(None, 400).annotate(&image(200, 100), &prediction);
        assert_eq!(annotated.dimensions(), (400, 200));
    }
}
