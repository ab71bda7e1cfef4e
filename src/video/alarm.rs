//! 連続フレームによるアラームとフレームごとの処理

use anyhow::{Context, Result};
use image::{DynamicImage, RgbImage};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::ml::{Annotator, InferenceEngine, Prediction};

/// アラームが鳴るまでの連続フレーム数
pub const DEFAULT_THRESHOLD: u32 = 20;

/// 同じラベルが続いたフレーム数を数える
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmState {
    pub threshold: u32,
    /// None ならどのラベルでも鳴る
    pub watched_label: Option<String>,
    last_label: Option<String>,
    count: u32,
    fired: bool,
}

impl Default for AlarmState {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, None)
    }
}

impl AlarmState {
    pub fn new(threshold: u32, watched_label: Option<String>) -> Self {
        Self {
            threshold: threshold.max(1),
            watched_label,
            last_label: None,
            count: 0,
            fired: false,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn fired(&self) -> bool {
        self.fired
    }

    /// ラベルを1フレーム分記録し、このフレームでアラームが鳴ったら true
    ///
    /// ラベルが変わるとカウントを1に戻し、再びアラームを鳴らせる状態にする。
    pub fn observe(&mut self, label: &str) -> bool {
        if self.last_label.as_deref() == Some(label) {
            self.count = self.count.saturating_add(1);
        } else {
            self.last_label = Some(label.to_string());
            self.count = 1;
            self.fired = false;
        }

        let watched = self.watched_label.as_deref().map_or(true, |w| w == label);
        if watched && !self.fired && self.count >= self.threshold {
            self.fired = true;
            return true;
        }
        false
    }
}

/// 1フレームを分類する処理
pub trait FrameClassifier {
    fn classify_frame(&mut self, frame: &DynamicImage) -> Result<Prediction>;
}

impl FrameClassifier for InferenceEngine {
    fn classify_frame(&mut self, frame: &DynamicImage) -> Result<Prediction> {
        self.classify_one(frame)
    }
}

/// フレームの処理結果
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    pub prediction: Prediction,
    pub alarm: bool,
}

/// カメラループの状態（分類器、注釈、アラーム、出力先）
pub struct CameraContext<C> {
    classifier: C,
    annotator: Annotator,
    alarm: AlarmState,
    output_path: PathBuf,
}

impl<C: FrameClassifier> CameraContext<C> {
    pub fn new(classifier: C, annotator: Annotator, alarm: AlarmState, output_path: PathBuf) -> Self {
        Self {
            classifier,
            annotator,
            alarm,
            output_path,
        }
    }

    pub fn alarm(&self) -> &AlarmState {
        &self.alarm
    }

    pub fn output_path(&self) -> &std::path::Path {
        &self.output_path
    }

    /// 分類 → アラーム判定 → 注釈付きフレームを出力先へ上書き保存
    pub fn process_frame(&mut self, frame: &RgbImage, index: u32) -> Result<FrameOutcome> {
        let image = DynamicImage::ImageRgb8(frame.clone());
        let prediction = self.classifier.classify_frame(&image)?;
        let alarm = self.alarm.observe(&prediction.label);
        debug!(
            "フレーム {}: {} (連続 {})",
            index,
            prediction.display_text(),
            self.alarm.count()
        );
        if alarm {
            warn!(
                "アラーム: {} が {} フレーム連続しました",
                prediction.label,
                self.alarm.count()
            );
        }

        let annotated = self.annotator.annotate(&image, &prediction);
        if let Some(parent) = self.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        annotated
            .save(&self.output_path)
            .context(format!("フレームの保存に失敗しました: {:?}", self.output_path))?;

        Ok(FrameOutcome { prediction, alarm })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alarm_fires_once_at_threshold() {
        let mut alarm = AlarmState::new(3, None);
        assert!(!alarm.observe("apple"));
        assert!(!alarm.observe("apple"));
        assert!(alarm.observe("apple"));
        assert!(alarm.fired());
        assert!(!alarm.observe("apple"));
        assert_eq!(alarm.count(), 4);
    }

    #[test]
    fn test_alarm_rearms_on_label_change() {
        let mut alarm = AlarmState::new(2, None);
        alarm.observe("apple");
        assert!(alarm.observe("apple"));
        assert!(!alarm.observe("banana"));
        assert!(!alarm.fired());
        assert_eq!(alarm.count(), 1);
        assert!(alarm.observe("banana"));
    }

    #[test]
    fn test_alarm_ignores_unwatched_labels() {
        let mut alarm = AlarmState::new(2, Some("apple".to_string()));
        for _ in 0..5 {
            assert!(!alarm.observe("banana"));
        }
        alarm.observe("apple");
        assert!(alarm.observe("apple"));
    }

    struct Fixed(&'static str);

    impl FrameClassifier for Fixed {
        fn classify_frame(&mut self, _frame: &DynamicImage) -> Result<Prediction> {
            Ok(Prediction {
                label: self.0.to_string(),
                probability: 0.75,
                probabilities: vec![0.75, 0.25],
            })
        }
    }

    #[test]
    fn test_process_frame_writes_annotated_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out").join("frame.png");
        let mut context = CameraContext::new(
            Fixed("apple"),
            Annotator::new(None, 200),
            AlarmState::new(2, None),
            output.clone(),
        );

        let frame = RgbImage::new(640, 480);
        let first = context.process_frame(&frame, 0).unwrap();
        assert!(!first.alarm);
        let second = context.process_frame(&frame, 1).unwrap();
        assert!(second.alarm);

        let saved = image::open(&output).unwrap();
        assert_eq!(saved.width(), 200);
        assert_eq!(saved.height(), 150);
    }
}
