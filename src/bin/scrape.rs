//! マニフェストに記載された画像を `data/raw/<category>/` に収集する

use anyhow::Result;
use clap::Parser;
use fruit_classifier_lib::cli::CommonArgs;
use fruit_classifier_lib::scrape::{load_manifest, scrape, HttpFetcher, DEFAULT_LIMIT};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(about = "Download images listed in a category,url manifest")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// `category,url` 形式のCSV
    #[arg(short, long)]
    manifest: PathBuf,

    /// 収集するカテゴリ（省略時はすべて）
    #[arg(short, long, num_args = 1..)]
    categories: Vec<String>,

    /// カテゴリごとの最大枚数
    #[arg(short, long, default_value_t = DEFAULT_LIMIT)]
    limit: usize,

    /// タイムアウト（秒）
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.common.init_logging()?;
    let config = cli.common.app_config();

    let entries = load_manifest(&cli.manifest)?;
    let fetcher = HttpFetcher::new(Duration::from_secs(cli.timeout))?;
    let raw_dir = config.paths.raw_dir();
    let report = scrape(&fetcher, &entries, &cli.categories, cli.limit, &raw_dir)?;

    info!("{} 枚を {} に保存しました", report.total_saved(), raw_dir.display());
    Ok(())
}
