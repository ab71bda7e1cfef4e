//! 実験ファイル
//!
//! `experiment_files/*.ini` を TOML として読み込みます。値はリテラル型
//! （`'basic'`, `28`, `1e-3`, `true`）で書き、省略したセクションは既定値になります。
//!
//! ```toml
//! [preprocessing]
//! dataset_name = 'fruits'
//! height = 28
//! width = 28
//!
//! [train]
//! model_type = 'leNet'
//! model_name = 'basic'
//!
//! [model_setup]
//! conv1_filters = 20
//! dense_units = 500
//!
//! [optimizer_setup]
//! initial_learning_rate = 1e-3
//! epochs = 25
//! batch_size = 32
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::dataset::SplitSettings;
use crate::ml::{AugmentationPolicy, Strictness, TrainRequest};
use crate::model::config::OptimizerSetup;

/// `[preprocessing]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingSection {
    pub dataset_name: String,
    pub height: u32,
    pub width: u32,
}

impl Default for PreprocessingSection {
    fn default() -> Self {
        Self {
            dataset_name: "fruits".to_string(),
            height: 28,
            width: 28,
        }
    }
}

/// `[train]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainSection {
    pub model_type: String,
    pub model_name: String,
    /// 学習時のデータ拡張
    pub augment: bool,
    /// 未知のハイパーパラメータをエラーにする
    pub strict: bool,
}

impl Default for TrainSection {
    fn default() -> Self {
        Self {
            model_type: "leNet".to_string(),
            model_name: "basic".to_string(),
            augment: true,
            strict: false,
        }
    }
}

/// 実験設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExperimentConfig {
    pub preprocessing: PreprocessingSection,
    pub train: TrainSection,
    /// モデル固有のハイパーパラメータ
    pub model_setup: BTreeMap<String, toml::Value>,
    pub optimizer_setup: OptimizerSetup,
    pub split: SplitSettings,
}

impl ExperimentConfig {
    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Failed to parse experiment file")?;
        config.optimizer_setup.validate()?;
        config.split.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .context(format!("Failed to read experiment file: {:?}", path))?;
        Self::parse(&text).context(format!("Invalid experiment file: {:?}", path))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize experiment config")
    }

    /// `model_setup` を `key -> 文字列` に変換（文字列値は引用符なし）
    pub fn setup_params(&self) -> BTreeMap<String, String> {
        self.model_setup
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect()
    }

    /// 学習リクエストに変換
    pub fn train_request(&self) -> TrainRequest {
        TrainRequest {
            dataset_name: self.preprocessing.dataset_name.clone(),
            model_name: self.train.model_name.clone(),
            model_type: self.train.model_type.clone(),
            setup_params: self.setup_params(),
            strictness: if self.train.strict {
                Strictness::Strict
            } else {
                Strictness::Lenient
            },
            optimizer: self.optimizer_setup.clone(),
            split: self.split,
            augmentation: if self.train.augment {
                AugmentationPolicy::default()
            } else {
                AugmentationPolicy::none()
            },
            height: self.preprocessing.height,
            width: self.preprocessing.width,
            ..TrainRequest::new(&self.preprocessing.dataset_name, &self.train.model_name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[preprocessing]
dataset_name = 'fruits_small'
height = 32
width = 32

[train]
model_type = 'leNet'
model_name = 'wide'
augment = false

[model_setup]
conv1_filters = 10
dense_units = 128
note = 'baseline'

[optimizer_setup]
initial_learning_rate = 5e-4
epochs = 3
batch_size = 16
"#;

    #[test]
    fn test_parse_sections() {
        let config = ExperimentConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.preprocessing.dataset_name, "fruits_small");
        assert_eq!(config.preprocessing.height, 32);
        assert_eq!(config.train.model_name, "wide");
        assert_eq!(config.optimizer_setup.epochs, 3);
        assert_eq!(config.optimizer_setup.initial_learning_rate, 5e-4);
        // [split] 省略時は既定値
        assert_eq!(config.split, SplitSettings::default());

        let params = config.setup_params();
        assert_eq!(params["conv1_filters"], "10");
        assert_eq!(params["note"], "baseline");

        let request = config.train_request();
        assert_eq!(request.dataset_name, "fruits_small");
        assert_eq!(request.width, 32);
        assert_eq!(request.augmentation, AugmentationPolicy::none());
        assert_eq!(request.strictness, Strictness::Lenient);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = ExperimentConfig::parse("").unwrap();
        assert_eq!(config.train.model_type, "leNet");
        assert_eq!(config.optimizer_setup, OptimizerSetup::default());
    }

    #[test]
    fn test_zero_epochs_rejected() {
        assert!(ExperimentConfig::parse("[optimizer_setup]\nepochs = 0\n").is_err());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = ExperimentConfig::parse(SAMPLE).unwrap();
        let text = config.to_toml_string().unwrap();
        assert_eq!(ExperimentConfig::parse(&text).unwrap(), config);
    }
}
