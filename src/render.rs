//! 描画まわりの共通処理
//!
//! フォントの読み込みと、注釈・グラフ描画で使う色の定義。

use ab_glyph::FontVec;
use image::Rgb;
use std::path::Path;
use tracing::{debug, info};

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const GRID: Rgb<u8> = Rgb([220, 220, 220]);

/// 折れ線の色（系列ごとに循環）
pub const SERIES_COLORS: [Rgb<u8>; 4] = [
    Rgb([31, 119, 180]),
    Rgb([255, 127, 14]),
    Rgb([44, 160, 44]),
    Rgb([214, 39, 40]),
];

const SYSTEM_FONT_PATHS: [&str; 5] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// 指定パスからフォントを読み込む
pub fn load_font(path: &Path) -> anyhow::Result<FontVec> {
    let data = std::fs::read(path)?;
    FontVec::try_from_vec(data)
        .map_err(|_| anyhow::anyhow!("Failed to parse font file: {}", path.display()))
}

/// システムフォントを探す（見つからなければ None で文字描画をスキップ）
pub fn system_font() -> Option<FontVec> {
    for path in SYSTEM_FONT_PATHS {
        if let Ok(font) = load_font(Path::new(path)) {
            info!("Loaded system font: {}", path);
            return Some(font);
        }
    }
    debug!("No system font found, text rendering will be skipped");
    None
}

/// 明示パスがあればそれを、なければシステムフォントを使う
pub fn resolve_font(path: Option<&Path>) -> anyhow::Result<Option<FontVec>> {
    match path {
        Some(p) => Ok(Some(load_font(p)?)),
        None => Ok(system_font()),
    }
}

/// 白(0) → 青(1) のカラーマップ
pub fn blues(t: f64) -> Rgb<u8> {
    let t = t.clamp(0.0, 1.0);
    let lerp = |a: f64, b: f64| (a + (b - a) * t).round() as u8;
    Rgb([lerp(247.0, 8.0), lerp(251.0, 48.0), lerp(255.0, 107.0)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blues_endpoints() {
        assert_eq!(blues(0.0), Rgb([247, 251, 255]));
        assert_eq!(blues(1.0), Rgb([8, 48, 107]));
        assert_eq!(blues(5.0), blues(1.0));
    }

    #[test]
    fn test_missing_font_path_is_error() {
        assert!(resolve_font(Some(Path::new("/nonexistent/font.ttf"))).is_err());
    }
}
