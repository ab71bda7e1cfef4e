//! 各バイナリ共通のコマンドライン引数

use clap::Args;
use std::path::PathBuf;

use crate::logging::{init_logging, LogConfig};
use crate::model::config::{AppConfig, DeviceType};

#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// プロジェクトのルートディレクトリ
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// 設定ファイル（省略時は `<root>/config.json`）
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// デバッグログを表示
    #[arg(short, long)]
    pub verbose: bool,

    /// CPU（NdArray）バックエンドを使う
    #[arg(long)]
    pub cpu: bool,
}

impl CommonArgs {
    pub fn init_logging(&self) -> anyhow::Result<()> {
        init_logging(&LogConfig::from_verbose(self.verbose))
    }

    /// 設定を読み込み、プロジェクトルートを引数で上書きする
    pub fn app_config(&self) -> AppConfig {
        let path = self
            .config
            .clone()
            .unwrap_or_else(|| self.root.join(AppConfig::default_path()));
        AppConfig::load_or_default(path).with_root(self.root.clone())
    }

    pub fn device_type(&self, config: &AppConfig) -> DeviceType {
        config.resolve_device(self.cpu)
    }
}
