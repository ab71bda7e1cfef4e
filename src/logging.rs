//! ログ初期化
//!
//! `tracing` の fmt サブスクライバを設定します。`RUST_LOG` が設定されていれば
//! そちらを優先します。

use tracing_subscriber::EnvFilter;

/// ログ設定
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 表示する最小レベル
    pub level: LogLevel,
    /// モジュールパスを表示するか
    pub include_target: bool,
    /// ANSIカラー
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// デバッグ用の詳細設定
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            ansi_colors: true,
        }
    }

    /// CLIの `--verbose` フラグから設定を選ぶ
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            Self::verbose()
        } else {
            Self::default()
        }
    }
}

/// ログレベル
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// 文字列から変換（不明な値は Info）
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_directive().to_uppercase())
    }
}

/// グローバルサブスクライバを設定する
///
/// 2回目以降の呼び出しはエラーになります。
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("ログの初期化に失敗しました: {}", e))?;

    Ok(())
}
