//! 学習時のデータ拡張
//!
//! 回転・平行移動・せん断・ズーム・左右反転をランダムに組み合わせて適用します。
//! 画像外の画素は最も近い端の画素で埋めます。

use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{warp_with, Interpolation, Projection};
use rand::Rng;

use crate::dataset::PixelArray;

/// データ拡張の設定
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentationPolicy {
    /// 回転角の範囲（度, ±）
    pub rotation_degrees: f32,
    /// 横方向シフト（幅に対する割合, ±）
    pub width_shift: f32,
    /// 縦方向シフト（高さに対する割合, ±）
    pub height_shift: f32,
    /// せん断角（度, ±）
    pub shear_degrees: f32,
    /// ズーム範囲 [1 - zoom, 1 + zoom]
    pub zoom: f32,
    /// 左右反転
    pub horizontal_flip: bool,
}

impl Default for AugmentationPolicy {
    fn default() -> Self {
        Self {
            rotation_degrees: 30.0,
            width_shift: 0.1,
            height_shift: 0.1,
            shear_degrees: 0.2,
            zoom: 0.2,
            horizontal_flip: true,
        }
    }
}

impl AugmentationPolicy {
    /// 拡張なし
    pub fn none() -> Self {
        Self {
            rotation_degrees: 0.0,
            width_shift: 0.0,
            height_shift: 0.0,
            shear_degrees: 0.0,
            zoom: 0.0,
            horizontal_flip: false,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::none()
    }

    /// 1枚にランダムな変換を適用
    pub fn apply<R: Rng>(&self, pixels: &PixelArray, rng: &mut R) -> PixelArray {
        if self.is_identity() {
            return pixels.clone();
        }

        let (w, h) = (pixels.width as f32, pixels.height as f32);
        let symmetric = |rng: &mut R, range: f32| {
            if range > 0.0 {
                rng.gen_range(-range..=range)
            } else {
                0.0
            }
        };

        let theta = symmetric(rng, self.rotation_degrees).to_radians();
        let tx = symmetric(rng, self.width_shift) * w;
        let ty = symmetric(rng, self.height_shift) * h;
        let shear = symmetric(rng, self.shear_degrees).to_radians();
        let zx = 1.0 + symmetric(rng, self.zoom);
        let zy = 1.0 + symmetric(rng, self.zoom);
        let flip = self.horizontal_flip && rng.gen_bool(0.5);

        let (cx, cy) = (w / 2.0, h / 2.0);
        let shear_projection = Projection::from_matrix([1.0, -shear.sin(), 0.0, 0.0, shear.cos(), 0.0, 0.0, 0.0, 1.0])
            .unwrap_or_else(|| Projection::scale(1.0, 1.0));
        let forward = Projection::translate(-cx, -cy)
            .and_then(Projection::rotate(theta))
            .and_then(shear_projection)
            .and_then(Projection::scale(zx, zy))
            .and_then(Projection::translate(cx + tx, cy + ty));
        let inverse = forward.invert();

        let (max_x, max_y) = (w - 1.0, h - 1.0);
        let mapping = move |x: f32, y: f32| {
            let x = if flip { max_x - x } else { x };
            let (sx, sy) = inverse * (x, y);
            (sx.clamp(0.0, max_x), sy.clamp(0.0, max_y))
        };

        let mut data = Vec::with_capacity(pixels.data.len());
        for c in 0..pixels.channels {
            let plane = to_gray(pixels, c);
            let warped = warp_with(&plane, mapping, Interpolation::Nearest, Luma([0]));
            data.extend(warped.into_raw().into_iter().map(|v| v as f32 / 255.0));
        }

        PixelArray {
            height: pixels.height,
            width: pixels.width,
            channels: pixels.channels,
            data,
        }
    }
}

fn to_gray(pixels: &PixelArray, channel: usize) -> GrayImage {
    let raw = pixels
        .plane(channel)
        .iter()
        .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect();
    GrayImage::from_raw(pixels.width as u32, pixels.height as u32, raw)
        .unwrap_or_else(|| GrayImage::new(pixels.width as u32, pixels.height as u32))
}
