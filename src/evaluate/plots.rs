//! 評価結果の画像出力
//!
//! 混同行列のヒートマップと学習曲線をPNGとして描画します。
//! フォントが見つからない場合は文字なしで描画します。

use ab_glyph::FontVec;
use image::RgbImage;
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::evaluate::history::TrainingHistory;
use crate::evaluate::metrics::ConfusionMatrix;
use crate::render::{blues, BLACK, GRID, SERIES_COLORS, WHITE};

const CELL: u32 = 64;
const MARGIN_LEFT: u32 = 140;
const MARGIN_TOP: u32 = 50;
const MARGIN_BOTTOM: u32 = 110;
const MARGIN_RIGHT: u32 = 30;
const FONT_SCALE: f32 = 16.0;

/// `<plot_dir>/<plot_name>_confusion.png`
pub fn confusion_plot_path(plot_dir: &Path, plot_name: &str) -> PathBuf {
    plot_dir.join(format!("{}_confusion.png", plot_name))
}

/// `<figures_dir>/<model_name>_training_history.png`
pub fn history_plot_path(figures_dir: &Path, model_name: &str) -> PathBuf {
    figures_dir.join(format!("{}_training_history.png", model_name))
}

fn save(img: &RgbImage, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    img.save(path)?;
    info!("図を保存しました: {}", path.display());
    Ok(())
}

fn label_text(img: &mut RgbImage, font: Option<&FontVec>, x: i32, y: i32, text: &str) {
    if let Some(font) = font {
        draw_text_mut(img, BLACK, x, y, FONT_SCALE, font, text);
    }
}

fn text_width(font: Option<&FontVec>, text: &str) -> i32 {
    font.map(|f| text_size(FONT_SCALE, f, text).0 as i32).unwrap_or(0)
}

/// 混同行列のヒートマップを描画
pub fn render_confusion_matrix(cm: &ConfusionMatrix, title: &str, font: Option<&FontVec>) -> RgbImage {
    let n = cm.labels.len().max(1) as u32;
    let width = MARGIN_LEFT + n * CELL + MARGIN_RIGHT;
    let height = MARGIN_TOP + n * CELL + MARGIN_BOTTOM;
    let mut img = RgbImage::from_pixel(width, height, WHITE);
    let max = cm.max_count().max(1) as f64;

    label_text(&mut img, font, MARGIN_LEFT as i32, 15, title);

    for (row, counts) in cm.counts.iter().enumerate() {
        for (col, &count) in counts.iter().enumerate() {
            let x = (MARGIN_LEFT + col as u32 * CELL) as i32;
            let y = (MARGIN_TOP + row as u32 * CELL) as i32;
            let rect = Rect::at(x, y).of_size(CELL, CELL);
            let t = count as f64 / max;
            draw_filled_rect_mut(&mut img, rect, blues(t));
            draw_hollow_rect_mut(&mut img, rect, GRID);

            if let Some(font) = font {
                let text = count.to_string();
                let color = if t > 0.5 { WHITE } else { BLACK };
                let tw = text_width(Some(font), &text);
                draw_text_mut(
                    &mut img,
                    color,
                    x + CELL as i32 / 2 - tw / 2,
                    y + CELL as i32 / 2 - FONT_SCALE as i32 / 2,
                    FONT_SCALE,
                    font,
                    &text,
                );
            }
        }
    }

    // 行ラベル（予測）と列ラベル（正解）
    for (i, label) in cm.labels.iter().enumerate() {
        let offset = (i as u32 * CELL + CELL / 2) as i32;
        let tw = text_width(font, label);
        label_text(&mut img, font, MARGIN_LEFT as i32 - tw - 8, MARGIN_TOP as i32 + offset - 8, label);
        label_text(
            &mut img,
            font,
            MARGIN_LEFT as i32 + offset - tw / 2,
            (MARGIN_TOP + n * CELL) as i32 + 8,
            label,
        );
    }
    label_text(
        &mut img,
        font,
        MARGIN_LEFT as i32 + (n * CELL) as i32 / 2 - text_width(font, "True label") / 2,
        (MARGIN_TOP + n * CELL) as i32 + 50,
        "True label",
    );
    label_text(&mut img, font, 8, MARGIN_TOP as i32 - 24, "Predicted label");

    img
}

/// 混同行列を `<plot_dir>/<plot_name>_confusion.png` に保存
pub fn plot_confusion_matrix(
    cm: &ConfusionMatrix,
    plot_dir: &Path,
    plot_name: &str,
    font: Option<&FontVec>,
) -> anyhow::Result<PathBuf> {
    let path = confusion_plot_path(plot_dir, plot_name);
    let title = format!("Confusion matrix ({})", plot_name);
    save(&render_confusion_matrix(cm, &title, font), &path)?;
    Ok(path)
}

/// 学習曲線を描画
pub fn render_training_history(history: &TrainingHistory, font: Option<&FontVec>) -> RgbImage {
    let (width, height) = (640u32, 480u32);
    let (left, right, top, bottom) = (60.0f32, 130.0f32, 30.0f32, 50.0f32);
    let mut img = RgbImage::from_pixel(width, height, WHITE);

    let series = history.series();
    let y_max = series
        .iter()
        .flat_map(|(_, v)| v.iter().copied())
        .filter(|v| v.is_finite())
        .fold(1.0f64, f64::max);
    let epochs = history.len().max(2) as f32;

    let plot_w = width as f32 - left - right;
    let plot_h = height as f32 - top - bottom;
    let to_px = |i: usize, v: f64| {
        let x = left + plot_w * i as f32 / (epochs - 1.0);
        let y = top + plot_h * (1.0 - (v / y_max).clamp(0.0, 1.0) as f32);
        (x, y)
    };

    // 軸と目盛り
    for k in 0..=4 {
        let y = top + plot_h * k as f32 / 4.0;
        draw_line_segment_mut(&mut img, (left, y), (left + plot_w, y), GRID);
        let value = y_max * (1.0 - k as f64 / 4.0);
        label_text(&mut img, font, 8, y as i32 - 8, &format!("{:.2}", value));
    }
    draw_line_segment_mut(&mut img, (left, top), (left, top + plot_h), BLACK);
    draw_line_segment_mut(&mut img, (left, top + plot_h), (left + plot_w, top + plot_h), BLACK);

    for (s, (name, values)) in series.iter().enumerate() {
        let color = SERIES_COLORS[s % SERIES_COLORS.len()];
        for (i, pair) in values.windows(2).enumerate() {
            draw_line_segment_mut(&mut img, to_px(i, pair[0]), to_px(i + 1, pair[1]), color);
        }
        if values.len() == 1 {
            let (x, y) = to_px(0, values[0]);
            draw_filled_rect_mut(&mut img, Rect::at(x as i32 - 2, y as i32 - 2).of_size(5, 5), color);
        }

        // 凡例
        let ly = top as i32 + 20 * s as i32;
        let lx = (left + plot_w) as i32 + 15;
        draw_filled_rect_mut(&mut img, Rect::at(lx, ly + 4).of_size(12, 12), color);
        label_text(&mut img, font, lx + 18, ly, name);
    }

    label_text(&mut img, font, left as i32 + plot_w as i32 / 2 - 20, height as i32 - 30, "Epoch #");
    label_text(&mut img, font, left as i32, 6, "Training Loss and Accuracy");
    img
}

/// 学習曲線をPNGに保存
pub fn plot_training_history(
    history: &TrainingHistory,
    path: &Path,
    font: Option<&FontVec>,
) -> anyhow::Result<()> {
    save(&render_training_history(history, font), path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluate::history::EpochMetrics;

    #[test]
    fn test_confusion_plot_path_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let truth = vec!["apple".to_string(), "banana".to_string()];
        let pred = vec!["apple".to_string(), "apple".to_string()];
        let cm = ConfusionMatrix::from_labels(&truth, &pred).unwrap();

        let path = plot_confusion_matrix(&cm, dir.path(), "basic", None).unwrap();
        assert_eq!(path, dir.path().join("basic_confusion.png"));
        let img = image::open(&path).unwrap();
        assert_eq!(img.width(), MARGIN_LEFT + 2 * CELL + MARGIN_RIGHT);
    }

    #[test]
    fn test_history_plot() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = TrainingHistory::default();
        for epoch in 1..=3 {
            history.push(EpochMetrics {
                epoch,
                loss: 2.0 / epoch as f64,
                accuracy: 0.3 * epoch as f64,
                val_loss: Some(2.5 / epoch as f64),
                val_accuracy: Some(0.25 * epoch as f64),
                learning_rate: 1e-3,
            });
        }
        let path = history_plot_path(dir.path(), "basic");
        plot_training_history(&history, &path, None).unwrap();
        assert!(path.ends_with("basic_training_history.png"));
        assert_eq!(image::open(&path).unwrap().height(), 480);
    }
}
