//! 画像アップロードと分類のWebサーバー
#![recursion_limit = "256"]

use anyhow::{Context, Result};
use clap::Parser;
use fruit_classifier_lib::cli::CommonArgs;
use fruit_classifier_lib::web::{router, InferenceWorker, WebState};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(about = "Serve the upload-and-classify web front end")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, default_value = "127.0.0.1:5000")]
    addr: SocketAddr,

    /// モデル名（省略時は設定ファイルの値）
    #[arg(short = 'n', long)]
    model_name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.common.init_logging()?;
    let config = cli.common.app_config();

    let mut settings = config.inference.clone();
    if let Some(name) = &cli.model_name {
        settings.model_name = name.clone();
    }
    let device_type = cli.common.device_type(&config);
    info!("モデル {} を読み込みます ({})", settings.model_name, device_type);
    let worker = InferenceWorker::spawn_engine(config.paths.clone(), settings, device_type)?;

    let state = Arc::new(WebState {
        upload_dir: config.paths.upload_dir(),
        worker,
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(cli.addr)
        .await
        .context(format!("{} にバインドできません", cli.addr))?;
    info!("http://{} で待ち受けます", cli.addr);
    axum::serve(listener, app).await?;
    Ok(())
}
