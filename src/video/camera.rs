//! GStreamerによるフレーム取得
//!
//! V4L2カメラまたは動画ファイルからRGBフレームを取り出し、同じスレッドで
//! コールバックに渡します。

use anyhow::{Context, Result};
use gstreamer::prelude::*;
use gstreamer::{self as gst, ElementFactory};
use gstreamer_app::AppSink;
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 行ごとの stride を詰めて連続したRGBバイト列にする
///
/// 足りない部分はゼロで埋める。
pub fn contiguous_rows(src: &[u8], row_bytes: usize, height: usize, stride: usize) -> Vec<u8> {
    if stride == row_bytes && src.len() >= row_bytes * height {
        return src[..row_bytes * height].to_vec();
    }

    let mut out = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        let end = start + row_bytes;
        if end <= src.len() {
            out.extend_from_slice(&src[start..end]);
        } else if start < src.len() {
            out.extend_from_slice(&src[start..]);
            out.extend(std::iter::repeat(0).take(end - src.len()));
        } else {
            out.extend(std::iter::repeat(0).take(row_bytes));
        }
    }
    out
}

fn sample_to_rgb(sample: &gst::Sample) -> Result<RgbImage> {
    let buffer = sample.buffer().context("バッファの取得に失敗しました")?;
    let caps = sample.caps().context("capsの取得に失敗しました")?;
    let video_info = gstreamer_video::VideoInfo::from_caps(caps).context("VideoInfoの作成に失敗しました")?;
    let map = buffer.map_readable().context("バッファのマップに失敗しました")?;

    let width = video_info.width() as usize;
    let height = video_info.height() as usize;
    let stride = video_info.stride().first().copied().unwrap_or((width * 3) as i32) as usize;
    let contiguous = contiguous_rows(map.as_slice(), width * 3, height, stride);

    RgbImage::from_raw(width as u32, height as u32, contiguous).context("RgbImageの作成に失敗しました")
}

/// フレームの取得元
#[derive(Debug, Clone, PartialEq)]
pub enum CameraSource {
    /// V4L2デバイス（例: `/dev/video0`）
    Device(String),
    /// 動画ファイル
    File(PathBuf),
}

impl CameraSource {
    /// 既存の通常ファイルなら動画ファイル、それ以外はデバイスとして扱う
    pub fn detect(spec: &str) -> Self {
        let path = Path::new(spec);
        if path.is_file() && !spec.starts_with("/dev/") {
            Self::File(path.to_path_buf())
        } else {
            Self::Device(spec.to_string())
        }
    }
}

impl std::fmt::Display for CameraSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Device(d) => write!(f, "device {}", d),
            Self::File(p) => write!(f, "file {}", p.display()),
        }
    }
}

/// コールバックの戻り値
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Stop,
}

/// フレーム取得の設定
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub source: CameraSource,
    pub width: u32,
    pub height: u32,
    /// 0なら無制限
    pub max_frames: u32,
}

impl CaptureConfig {
    pub fn new(source: CameraSource) -> Self {
        Self {
            source,
            width: 640,
            height: 480,
            max_frames: 0,
        }
    }
}

/// カメラ入力
pub struct Camera {
    config: CaptureConfig,
}

impl Camera {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    fn make(factory: &str, name: &str) -> Result<gst::Element> {
        ElementFactory::make(factory)
            .name(name)
            .build()
            .context(format!("{}の作成に失敗しました", factory))
    }

    /// パイプラインを構築（source -> [decodebin] -> videoconvert -> videoscale -> appsink）
    fn build_pipeline(&self) -> Result<(gst::Pipeline, AppSink)> {
        gst::init().context("GStreamerの初期化に失敗しました")?;
        let pipeline = gst::Pipeline::new();

        let videoconvert = Self::make("videoconvert", "converter")?;
        let videoscale = Self::make("videoscale", "scaler")?;
        let appsink = Self::make("appsink", "sink")?
            .dynamic_cast::<AppSink>()
            .map_err(|_| anyhow::anyhow!("appsinkへのキャストに失敗しました"))?;

        appsink.set_caps(Some(
            &gst::Caps::builder("video/x-raw")
                .field("format", "RGB")
                .field("width", self.config.width as i32)
                .field("height", self.config.height as i32)
                .build(),
        ));
        appsink.set_property("emit-signals", false);
        appsink.set_property("sync", false);
        // 処理が追いつかない場合は古いフレームを捨てる
        appsink.set_property("max-buffers", 1u32);
        appsink.set_property("drop", true);

        match &self.config.source {
            CameraSource::Device(device) => {
                let source = Self::make("v4l2src", "source")?;
                source.set_property("device", device.as_str());
                pipeline
                    .add_many(&[&source, &videoconvert, &videoscale, appsink.upcast_ref::<gst::Element>()])
                    .context("エレメントの追加に失敗しました")?;
                gst::Element::link_many([&source, &videoconvert, &videoscale, appsink.upcast_ref::<gst::Element>()])
                    .context("エレメントのリンクに失敗しました")?;
            }
            CameraSource::File(path) => {
                if !path.exists() {
                    anyhow::bail!("動画ファイルが見つかりません: {:?}", path);
                }
                let source = Self::make("filesrc", "source")?;
                let location = path.canonicalize()?;
                source.set_property("location", location.to_string_lossy().to_string());
                let decodebin = Self::make("decodebin", "decoder")?;

                pipeline
                    .add_many(&[
                        &source,
                        &decodebin,
                        &videoconvert,
                        &videoscale,
                        appsink.upcast_ref::<gst::Element>(),
                    ])
                    .context("エレメントの追加に失敗しました")?;
                source.link(&decodebin).context("sourceとdecoderのリンクに失敗しました")?;
                gst::Element::link_many([&videoconvert, &videoscale, appsink.upcast_ref::<gst::Element>()])
                    .context("converterとsinkのリンクに失敗しました")?;

                // decodebinの動的パッドをリンク
                let videoconvert_clone = videoconvert.clone();
                decodebin.connect_pad_added(move |_src, src_pad| {
                    let Some(sink_pad) = videoconvert_clone.static_pad("sink") else {
                        warn!("videoconvertのsinkパッドが見つかりません");
                        return;
                    };
                    if !sink_pad.is_linked() {
                        if let Err(e) = src_pad.link(&sink_pad) {
                            debug!("パッドのリンクをスキップ: {:?}", e);
                        }
                    }
                });
            }
        }

        Ok((pipeline, appsink))
    }

    /// フレームを同期的に処理する
    ///
    /// ストリーム終端、`max_frames` 到達、またはコールバックが `Stop` を返すまで続ける。
    /// 処理したフレーム数を返す。
    pub fn run<F>(&self, mut callback: F) -> Result<u32>
    where
        F: FnMut(&RgbImage, u32) -> Result<LoopControl>,
    {
        let (pipeline, appsink) = self.build_pipeline()?;
        info!("フレーム取得を開始します: {}", self.config.source);
        pipeline
            .set_state(gst::State::Playing)
            .context("パイプラインの開始に失敗しました")?;

        let result = self.pump(&pipeline, &appsink, &mut callback);

        pipeline
            .set_state(gst::State::Null)
            .context("パイプラインの停止に失敗しました")?;
        let processed = result?;
        info!("フレーム取得を終了しました: {} フレーム", processed);
        Ok(processed)
    }

    fn pump<F>(&self, pipeline: &gst::Pipeline, appsink: &AppSink, callback: &mut F) -> Result<u32>
    where
        F: FnMut(&RgbImage, u32) -> Result<LoopControl>,
    {
        let bus = pipeline.bus().context("パイプラインにバスがありません")?;
        let mut frame_count = 0u32;

        loop {
            while let Some(msg) = bus.pop() {
                use gst::MessageView;
                match msg.view() {
                    MessageView::Eos(..) => return Ok(frame_count),
                    MessageView::Error(err) => {
                        anyhow::bail!(
                            "エラーが発生しました: {} (デバッグ情報: {:?})",
                            err.error(),
                            err.debug()
                        );
                    }
                    _ => (),
                }
            }

            if let Some(sample) = appsink.try_pull_sample(gst::ClockTime::from_mseconds(100)) {
                let frame = sample_to_rgb(&sample)?;
                let control = callback(&frame, frame_count)?;
                frame_count += 1;

                if control == LoopControl::Stop
                    || (self.config.max_frames > 0 && frame_count >= self.config.max_frames)
                {
                    return Ok(frame_count);
                }
            } else if appsink.is_eos() {
                return Ok(frame_count);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_rows_strips_padding() {
        // 幅2px(6バイト) + パディング2バイト, 2行
        let src = [1, 2, 3, 4, 5, 6, 0, 0, 7, 8, 9, 10, 11, 12, 0, 0];
        let out = contiguous_rows(&src, 6, 2, 8);
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_contiguous_rows_pads_short_buffer() {
        let src = [1, 2, 3, 4];
        let out = contiguous_rows(&src, 3, 2, 3);
        assert_eq!(out, vec![1, 2, 3, 4, 0, 0]);
    }

    #[test]
    fn test_source_detection() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"").unwrap();
        assert_eq!(
            CameraSource::detect(video.to_str().unwrap()),
            CameraSource::File(video.clone())
        );
        assert_eq!(
            CameraSource::detect("/dev/video0"),
            CameraSource::Device("/dev/video0".to_string())
        );
    }
}
