//! 推論専用スレッド
//!
//! モデルは1本のスレッドだけが所有します。ハンドラはチャネル経由でジョブを送り、
//! oneshot で結果を待ちます。スレッド間でモデルの状態は共有しません。

use anyhow::Result;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use crate::ml::{Annotator, InferenceEngine, Prediction};
use crate::model::config::{DeviceType, InferenceSettings, ProjectPaths};

/// 分類結果と注釈付きPNG
#[derive(Debug, Clone)]
pub struct ClassifiedImage {
    pub prediction: Prediction,
    pub annotated_png: Vec<u8>,
}

/// 画像ファイルを分類する処理
pub trait ImageClassifier {
    fn classify_file(&mut self, path: &Path) -> Result<ClassifiedImage>;
}

/// 画像をPNGにエンコード
pub fn encode_png(image: DynamicImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    image.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
    Ok(buffer)
}

/// 保存済みモデルによる分類
pub struct EngineClassifier {
    engine: InferenceEngine,
    annotator: Annotator,
}

impl EngineClassifier {
    pub fn load(
        paths: &ProjectPaths,
        settings: &InferenceSettings,
        device_type: DeviceType,
    ) -> Result<Self> {
        Ok(Self {
            engine: InferenceEngine::load(paths, &settings.model_name, device_type)?,
            annotator: Annotator::from_settings(settings)?,
        })
    }
}

impl ImageClassifier for EngineClassifier {
    fn classify_file(&mut self, path: &Path) -> Result<ClassifiedImage> {
        let (image, prediction) = self.engine.classify_path(path)?;
        let annotated = self.annotator.annotate(&image, &prediction);
        Ok(ClassifiedImage {
            prediction,
            annotated_png: encode_png(DynamicImage::ImageRgb8(annotated))?,
        })
    }
}

struct Job {
    path: PathBuf,
    reply: oneshot::Sender<std::result::Result<ClassifiedImage, String>>,
}

/// 推論スレッドへのハンドル
#[derive(Clone)]
pub struct InferenceWorker {
    sender: mpsc::UnboundedSender<Job>,
}

impl InferenceWorker {
    /// スレッドを起動し、`init` で分類器を作る
    ///
    /// 分類器の初期化に失敗した場合はエラーを返す。
    pub fn spawn<F, C>(init: F) -> Result<Self>
    where
        F: FnOnce() -> Result<C> + Send + 'static,
        C: ImageClassifier + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<std::result::Result<(), String>>();

        std::thread::Builder::new()
            .name("inference".to_string())
            .spawn(move || {
                let mut classifier = match init() {
                    Ok(c) => {
                        let _ = ready_tx.send(Ok(()));
                        c
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("{:#}", e)));
                        return;
                    }
                };
                info!("推論スレッドを開始しました");

                while let Some(job) = receiver.blocking_recv() {
                    let result = classifier.classify_file(&job.path).map_err(|e| {
                        error!("分類に失敗しました {}: {:#}", job.path.display(), e);
                        format!("{:#}", e)
                    });
                    let _ = job.reply.send(result);
                }
                info!("推論スレッドを終了しました");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { sender }),
            Ok(Err(e)) => Err(anyhow::anyhow!("推論モデルの初期化に失敗しました: {}", e)),
            Err(_) => Err(anyhow::anyhow!("推論スレッドが初期化前に終了しました")),
        }
    }

    /// 保存済みモデルを読み込んで起動
    pub fn spawn_engine(
        paths: ProjectPaths,
        settings: InferenceSettings,
        device_type: DeviceType,
    ) -> Result<Self> {
        Self::spawn(move || EngineClassifier::load(&paths, &settings, device_type))
    }

    /// 画像ファイルを分類
    pub async fn classify(&self, path: PathBuf) -> Result<ClassifiedImage> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Job { path, reply })
            .map_err(|_| anyhow::anyhow!("推論スレッドが停止しています"))?;
        response
            .await
            .map_err(|_| anyhow::anyhow!("推論スレッドから応答がありません"))?
            .map_err(|e| anyhow::anyhow!(e))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// ファイル名で結果を決める分類器
    pub(crate) struct NameClassifier;

    impl ImageClassifier for NameClassifier {
        fn classify_file(&mut self, path: &Path) -> Result<ClassifiedImage> {
            let image = crate::dataset::corpus::decode_image(path)?;
            let label = if path.to_string_lossy().contains("apple") { "apple" } else { "banana" };
            Ok(ClassifiedImage {
                prediction: Prediction {
                    label: label.to_string(),
                    probability: 0.9,
                    probabilities: vec![0.9, 0.1],
                },
                annotated_png: encode_png(image)?,
            })
        }
    }

    #[tokio::test]
    async fn test_worker_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apple.png");
        image::RgbImage::new(4, 4).save(&path).unwrap();

        let worker = InferenceWorker::spawn(|| Ok(NameClassifier)).unwrap();
        let result = worker.classify(path).await.unwrap();
        assert_eq!(result.prediction.label, "apple");
        assert!(result.annotated_png.starts_with(&[0x89, b'P', b'N', b'G']));

        let missing = worker.classify(dir.path().join("none.png")).await;
        assert!(missing.is_err());
    }

    #[test]
    fn test_failed_init_is_reported() {
        let result = InferenceWorker::spawn(|| -> Result<NameClassifier> { anyhow::bail!("no model") });
        let err = result.err().unwrap();
        assert!(err.to_string().contains("no model"));
    }
}
