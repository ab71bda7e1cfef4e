//! LeNet型CNNの定義
//!
//! 任意サイズ・任意チャネル数の画像を任意のクラス数に分類します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};

use crate::error::ClassifierError;

/// モデル設定
#[derive(Config, Debug)]
pub struct LeNetConfig {
    /// 入力画像の高さ
    pub height: usize,
    /// 入力画像の幅
    pub width: usize,
    /// 入力チャネル数
    pub channels: usize,
    /// 分類クラス数
    pub num_classes: usize,
    /// 第1畳み込み層のフィルタ数
    #[config(default = 20)]
    pub conv1_filters: usize,
    /// 第2畳み込み層のフィルタ数
    #[config(default = 50)]
    pub conv2_filters: usize,
    /// 畳み込みカーネルサイズ（奇数）
    #[config(default = 5)]
    pub kernel_size: usize,
    /// 全結合層のユニット数
    #[config(default = 500)]
    pub dense_units: usize,
}

impl LeNetConfig {
    /// 2回のプーリング後の特徴マップサイズ (h, w)
    ///
    /// 畳み込みは same パディングなのでサイズを変えず、プーリングで半分（切り捨て）になる。
    pub fn feature_map_size(&self) -> (usize, usize) {
        (self.height / 4, self.width / 4)
    }

    /// Flatten後の特徴次元
    pub fn flattened_dim(&self) -> usize {
        let (h, w) = self.feature_map_size();
        self.conv2_filters * h * w
    }

    /// 構築前に値を検証
    pub fn validate(&self) -> crate::error::Result<()> {
        let positive = [
            ("height", self.height),
            ("width", self.width),
            ("channels", self.channels),
            ("num_classes", self.num_classes),
            ("conv1_filters", self.conv1_filters),
            ("conv2_filters", self.conv2_filters),
            ("kernel_size", self.kernel_size),
            ("dense_units", self.dense_units),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ClassifierError::config(format!("{} must be positive", name)));
        }
        if self.kernel_size % 2 == 0 {
            return Err(ClassifierError::config(format!(
                "kernel_size must be odd for same padding, got {}",
                self.kernel_size
            )));
        }
        let (h, w) = self.feature_map_size();
        if h == 0 || w == 0 {
            return Err(ClassifierError::config(format!(
                "input {}x{} is too small (minimum 4x4)",
                self.height, self.width
            )));
        }
        Ok(())
    }

    /// モデルを初期化
    ///
    /// `validate()` を通った設定で呼び出すこと。
    pub fn init<B: Backend>(&self, device: &B::Device) -> LeNet<B> {
        let k = self.kernel_size;
        tracing::debug!(
            "[Model] 入力 {}x{}x{} -> 特徴 {} -> FC {} -> {} クラス",
            self.height,
            self.width,
            self.channels,
            self.flattened_dim(),
            self.dense_units,
            self.num_classes
        );

        LeNet {
            conv1: Conv2dConfig::new([self.channels, self.conv1_filters], [k, k])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            pool1: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            conv2: Conv2dConfig::new([self.conv1_filters, self.conv2_filters], [k, k])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            pool2: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            fc1: LinearConfig::new(self.flattened_dim(), self.dense_units).init(device),
            fc2: LinearConfig::new(self.dense_units, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

/// LeNet型CNN
///
/// # アーキテクチャ
/// - Conv k×k (same) + ReLU + MaxPool 2×2
/// - Conv k×k (same) + MaxPool 2×2（活性化なし）
/// - Flatten
/// - FC + ReLU
/// - FC -> num_classes
/// - Softmax (推論時)
#[derive(Module, Debug)]
pub struct LeNet<B: Backend> {
    conv1: Conv2d<B>,
    pool1: MaxPool2d,
    conv2: Conv2d<B>,
    pool2: MaxPool2d,
    fc1: Linear<B>,
    fc2: Linear<B>,
    activation: Relu,
}

impl<B: Backend> LeNet<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, channels, height, width]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.pool2.forward(x);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);
        self.fc2.forward(x)
    }

    /// クラス確率 [batch_size, num_classes]
    pub fn probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 順伝播と損失計算
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_feature_map_size() {
        let config = LeNetConfig::new(28, 28, 3, 3);
        assert_eq!(config.feature_map_size(), (7, 7));
        assert_eq!(config.flattened_dim(), 50 * 7 * 7);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(LeNetConfig::new(3, 28, 3, 2).validate().is_err());
        assert!(LeNetConfig::new(28, 28, 3, 2).with_kernel_size(4).validate().is_err());
        assert!(LeNetConfig::new(28, 28, 3, 0).validate().is_err());
        assert!(LeNetConfig::new(28, 28, 3, 2).validate().is_ok());
    }

    #[test]
    fn test_forward_shape_odd_input() {
        let device = NdArrayDevice::Cpu;
        let config = LeNetConfig::new(7, 8, 5, 4);
        config.validate().unwrap();
        let model = config.init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::zeros([2, 5, 7, 8], &device);
        assert_eq!(model.forward(images.clone()).dims(), [2, 4]);

        let probs = model.probabilities(images);
        let sums = probs.sum_dim(1).into_data().to_vec::<f32>().unwrap();
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));
    }
}
