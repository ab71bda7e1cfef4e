//! モデルファクトリ
//!
//! モデル種別名とハイパーパラメータから未学習のモデルを作ります。
//! ハイパーパラメータは `conv1_filters=20, dense_units=500` のような平坦な
//! key=value テキスト、または実験ファイルのマッピングから型付きの設定に変換されます。

use burn::tensor::backend::Backend;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::warn;

use crate::error::{ClassifierError, Result};
use crate::ml::ml_model::{LeNet, LeNetConfig};

/// 未知のハイパーパラメータの扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// 警告して無視
    #[default]
    Lenient,
    /// `InvalidConfig` で拒否
    Strict,
}

/// 登録済みのモデル種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    LeNet,
}

impl ModelKind {
    pub const AVAILABLE: &'static [&'static str] = &["leNet"];

    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::LeNet => "leNet",
        }
    }
}

impl FromStr for ModelKind {
    type Err = ClassifierError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "leNet" | "lenet" | "LeNet" => Ok(ModelKind::LeNet),
            other => Err(ClassifierError::UnsupportedModel {
                name: other.to_string(),
                available: Self::AVAILABLE.join(", "),
            }),
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// モデル構築に必要な情報
///
/// 入力形状とクラス数は必須。`params` はアーキテクチャ固有のハイパーパラメータ。
#[derive(Debug, Clone)]
pub struct ModelSetup {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub num_classes: usize,
    pub params: BTreeMap<String, String>,
    pub strictness: Strictness,
}

impl ModelSetup {
    pub fn new(input_shape: [usize; 3], num_classes: usize) -> Self {
        let [height, width, channels] = input_shape;
        Self {
            height,
            width,
            channels,
            num_classes,
            params: BTreeMap::new(),
            strictness: Strictness::default(),
        }
    }

    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }
}

/// `key=value` を `,` `;` 改行区切りで並べたテキストをパース
pub fn parse_setup(text: &str) -> Result<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    for item in text.split(|c| c == ',' || c == ';' || c == '\n') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (key, value) = item
            .split_once('=')
            .or_else(|| item.split_once(':'))
            .ok_or_else(|| ClassifierError::config(format!("expected key=value, got '{}'", item)))?;
        let unquote = |s: &str| s.trim().trim_matches(|c| c == '\'' || c == '"').to_string();
        params.insert(unquote(key), unquote(value));
    }
    Ok(params)
}

fn parse_positive(key: &str, value: &str) -> Result<usize> {
    match value.parse::<usize>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(ClassifierError::config(format!(
            "{} must be a positive integer, got '{}'",
            key, value
        ))),
    }
}

/// ハイパーパラメータからLeNetの設定を作る
pub fn lenet_config(setup: &ModelSetup) -> Result<LeNetConfig> {
    let mut config = LeNetConfig::new(setup.height, setup.width, setup.channels, setup.num_classes);

    for (key, value) in &setup.params {
        match key.as_str() {
            "conv1_filters" => config.conv1_filters = parse_positive(key, value)?,
            "conv2_filters" => config.conv2_filters = parse_positive(key, value)?,
            "kernel_size" => config.kernel_size = parse_positive(key, value)?,
            "dense_units" => config.dense_units = parse_positive(key, value)?,
            // 形状は ModelSetup 側で与えられるので一致だけ確認
            "height" | "width" | "channels" | "classes" | "num_classes" => {
                let expected = match key.as_str() {
                    "height" => setup.height,
                    "width" => setup.width,
                    "channels" => setup.channels,
                    _ => setup.num_classes,
                };
                if parse_positive(key, value)? != expected {
                    return Err(ClassifierError::config(format!(
                        "{}={} conflicts with the data shape ({})",
                        key, value, expected
                    )));
                }
            }
            unknown => match setup.strictness {
                Strictness::Lenient => warn!("未知のハイパーパラメータを無視します: {}={}", unknown, value),
                Strictness::Strict => {
                    return Err(ClassifierError::config(format!(
                        "unknown hyperparameter '{}' for leNet",
                        unknown
                    )))
                }
            },
        }
    }

    config.validate()?;
    Ok(config)
}

/// モデルファクトリ
pub struct ModelFactory;

impl ModelFactory {
    /// 設定だけを解決する（重みは作らない）
    pub fn resolve(model_type: &str, setup: &ModelSetup) -> Result<(ModelKind, LeNetConfig)> {
        let kind: ModelKind = model_type.parse()?;
        let config = match kind {
            ModelKind::LeNet => lenet_config(setup)?,
        };
        Ok((kind, config))
    }

    /// 未学習のモデルを作成
    pub fn create<B: Backend>(
        model_type: &str,
        setup: &ModelSetup,
        device: &B::Device,
    ) -> Result<(LeNet<B>, LeNetConfig)> {
        let (_, config) = Self::resolve(model_type, setup)?;
        Ok((config.init(device), config))
    }
}
