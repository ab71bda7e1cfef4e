//! 画像の収集
//!
//! `category,url` 形式のCSVマニフェストを読み込み、カテゴリごとに最大 `limit` 枚を
//! `data/raw/<category>/` にダウンロードします。

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// カテゴリごとの既定の上限
pub const DEFAULT_LIMIT: usize = 700;

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// マニフェストの1行
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestEntry {
    pub category: String,
    pub url: String,
}

/// マニフェストを読み込む（1行目はヘッダー `category,url`）
pub fn read_manifest<R: std::io::Read>(reader: R) -> Result<Vec<ManifestEntry>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut entries = Vec::new();
    for (i, record) in rdr.deserialize::<ManifestEntry>().enumerate() {
        let entry = record.context(format!("マニフェストの {} 行目を読み込めません", i + 2))?;
        if entry.category.is_empty() || entry.url.is_empty() {
            warn!("空の項目をスキップ: {} 行目", i + 2);
            continue;
        }
        entries.push(entry);
    }
    Ok(entries)
}

pub fn load_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    let file = std::fs::File::open(path).context(format!("マニフェストを開けません: {:?}", path))?;
    read_manifest(file)
}

/// カテゴリごとにまとめ、`categories` が空でなければそのカテゴリだけ残す
pub fn group_by_category(entries: &[ManifestEntry], categories: &[String]) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in entries {
        if !categories.is_empty() && !categories.contains(&entry.category) {
            continue;
        }
        groups.entry(entry.category.clone()).or_default().push(entry.url.clone());
    }
    groups
}

/// URLから保存ファイル名を作る（`0001.jpg` の形式）
pub fn file_name_for(index: usize, url: &str) -> String {
    let path = url.split(&['?', '#'][..]).next().unwrap_or_default();
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|segment| segment.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or_else(|| "jpg".to_string());
    format!("{:04}.{}", index + 1, ext)
}

/// URLの内容を取得する処理
pub trait Fetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// reqwest（blocking）による取得
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fruit_classifier/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("HTTPクライアントの作成に失敗しました")?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .context(format!("ダウンロードに失敗しました: {}", url))?
            .error_for_status()
            .context(format!("サーバーがエラーを返しました: {}", url))?;
        let bytes = response.bytes().context(format!("レスポンスを読み込めません: {}", url))?;
        Ok(bytes.to_vec())
    }
}

/// 収集結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapeReport {
    pub saved: BTreeMap<String, usize>,
    pub failed: BTreeMap<String, usize>,
}

impl ScrapeReport {
    pub fn total_saved(&self) -> usize {
        self.saved.values().sum()
    }
}

/// マニフェストの画像をカテゴリごとに `limit` 枚まで保存
///
/// 取得に失敗したURLは警告を出してスキップし、次のURLで上限を埋める。
pub fn scrape<F: Fetcher>(
    fetcher: &F,
    entries: &[ManifestEntry],
    categories: &[String],
    limit: usize,
    raw_dir: &Path,
) -> Result<ScrapeReport> {
    let mut report = ScrapeReport::default();

    for (category, urls) in group_by_category(entries, categories) {
        let category_dir: PathBuf = raw_dir.join(&category);
        std::fs::create_dir_all(&category_dir)
            .context(format!("ディレクトリを作成できません: {:?}", category_dir))?;

        let mut saved = 0usize;
        let mut failed = 0usize;
        for url in &urls {
            if saved >= limit {
                break;
            }
            match fetcher.fetch(url) {
                Ok(bytes) if !bytes.is_empty() => {
                    let path = category_dir.join(file_name_for(saved, url));
                    std::fs::write(&path, &bytes).context(format!("保存に失敗しました: {:?}", path))?;
                    debug!("保存: {} -> {}", url, path.display());
                    saved += 1;
                }
                Ok(_) => {
                    warn!("空のレスポンスをスキップ: {}", url);
                    failed += 1;
                }
                Err(e) => {
                    warn!("{:#}", e);
                    failed += 1;
                }
            }
        }

        info!("{}: {} 枚を保存 ({} 件失敗)", category, saved, failed);
        report.saved.insert(category.clone(), saved);
        report.failed.insert(category, failed);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = "category,url\n\
apples, https://example.com/a/1.png\n\
apples,https://example.com/a/2.JPG?size=large\n\
apples,https://example.com/a/3\n\
bananas,https://example.com/b/1.jpg\n\
oranges,https://example.com/fail.jpg\n";

    struct FakeFetcher;

    impl Fetcher for FakeFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            if url.contains("fail") {
                anyhow::bail!("404: {}", url);
            }
            Ok(url.as_bytes().to_vec())
        }
    }

    #[test]
    fn test_read_manifest_trims_fields() {
        let entries = read_manifest(MANIFEST.as_bytes()).unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(
            entries[0],
            ManifestEntry {
                category: "apples".to_string(),
                url: "https://example.com/a/1.png".to_string(),
            }
        );
    }

    #[test]
    fn test_file_name_for_url() {
        assert_eq!(file_name_for(0, "https://x/y/1.PNG"), "0001.png");
        assert_eq!(file_name_for(9, "https://x/y/z.jpeg?w=100"), "0010.jpeg");
        assert_eq!(file_name_for(2, "https://x/image"), "0003.jpg");
    }

    #[test]
    fn test_scrape_respects_limit_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        let entries = read_manifest(MANIFEST.as_bytes()).unwrap();

        let report = scrape(&FakeFetcher, &entries, &[], 2, dir.path()).unwrap();
        assert_eq!(report.saved["apples"], 2);
        assert_eq!(report.saved["bananas"], 1);
        assert_eq!(report.saved["oranges"], 0);
        assert_eq!(report.failed["oranges"], 1);
        assert!(dir.path().join("apples").join("0002.jpg").is_file());
        assert!(!dir.path().join("apples").join("0003.jpg").exists());

        let other = tempfile::tempdir().unwrap();
        let report = scrape(&FakeFetcher, &entries, &["bananas".to_string()], 10, other.path()).unwrap();
        assert_eq!(report.total_saved(), 1);
        assert!(!other.path().join("apples").exists());
    }
}
