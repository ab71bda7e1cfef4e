//! 果物画像の分類パイプライン
//!
//! 画像収集 → 前処理 → 学習 → 評価 → 推論（CLI / Web / カメラ）の各段階を提供します。

pub mod cli;
pub mod dataset;
pub mod error;
pub mod evaluate;
pub mod logging;
pub mod model;
pub mod render;
pub mod scrape;

// 機械学習を使う機能
#[cfg(feature = "ml")]
pub mod experiment;
#[cfg(feature = "ml")]
pub mod ml;
#[cfg(feature = "ml")]
pub mod video;
#[cfg(feature = "ml")]
pub mod web;

pub use error::{ClassifierError, Result};
