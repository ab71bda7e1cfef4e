//! カメラ入力とフレームごとの分類

pub mod alarm;
pub mod camera;

pub use alarm::{AlarmState, CameraContext, FrameClassifier, FrameOutcome, DEFAULT_THRESHOLD};
pub use camera::{Camera, CameraSource, CaptureConfig, LoopControl};
