use bytes::Bytes;
use openh264::encoder::{Encoder, EncoderConfig, RateControlMode};
use openh264::formats::YUVBuffer;
use openh264::{OpenH264API, Timestamp};
use thiserror::Error;

use replay_core::models::chunk::{FrameFormat, RawFrame};
use replay_core::models::decoder_config::{DecoderConfig, VideoCodec, VideoDecoderConfig};
use replay_core::models::error::ReplayError;
use replay_core::processing::h264;
use replay_core::traits::track_encoder::{EncodedOutput, EncoderFactory, TrackEncoder, TrackParameters, VideoParameters};

/// Failures specific to the OpenH264 backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OpenH264Error {
    #[error("frame dimensions {width}x{height} must be even")]
    OddDimensions { width: u32, height: u32 },

    #[error("frame holds {actual} bytes, {expected} expected for BGRA")]
    ShortFrame { expected: usize, actual: usize },

    #[error("frame size changed from {expected_width}x{expected_height} to {width}x{height}")]
    SizeChanged {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },

    #[error("openh264: {0}")]
    Native(String),
}

impl From<OpenH264Error> for ReplayError {
    fn from(e: OpenH264Error) -> Self {
        ReplayError::EncodingFailed(e.to_string())
    }
}

/// Convert a BGRA frame to planar I420 (BT.601, studio range).
///
/// Chroma is averaged over each 2×2 block.
pub fn bgra_to_i420(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, OpenH264Error> {
    if width % 2 != 0 || height % 2 != 0 {
        return Err(OpenH264Error::OddDimensions { width, height });
    }
    let (w, h) = (width as usize, height as usize);
    let expected = w * h * 4;
    if data.len() < expected {
        return Err(OpenH264Error::ShortFrame {
            expected,
            actual: data.len(),
        });
    }

    let luma_len = w * h;
    let chroma_len = luma_len / 4;
    let mut out = vec![0u8; luma_len + 2 * chroma_len];
    let (luma, chroma) = out.split_at_mut(luma_len);
    let (u_plane, v_plane) = chroma.split_at_mut(chroma_len);

    let rgb = |x: usize, y: usize| -> (i32, i32, i32) {
        let i = (y * w + x) * 4;
        (data[i + 2] as i32, data[i + 1] as i32, data[i] as i32)
    };

    for y in 0..h {
        for x in 0..w {
            let (r, g, b) = rgb(x, y);
            luma[y * w + x] = (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16).clamp(0, 255) as u8;
        }
    }

    for by in 0..h / 2 {
        for bx in 0..w / 2 {
            let (mut r, mut g, mut b) = (0, 0, 0);
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let (pr, pg, pb) = rgb(bx * 2 + dx, by * 2 + dy);
                r += pr;
                g += pg;
                b += pb;
            }
            let (r, g, b) = (r / 4, g / 4, b / 4);
            let i = by * (w / 2) + bx;
            u_plane[i] = (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128).clamp(0, 255) as u8;
            v_plane[i] = (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128).clamp(0, 255) as u8;
        }
    }
    Ok(out)
}

const DEFAULT_FRAME_RATE: f32 = 30.0;

/// Native encoder settings for a track: bitrate-mode rate control at the
/// requested target, paced at the source frame rate when it is known.
///
/// Frame skipping is disabled so every raw frame yields an access unit.
pub fn encoder_config(params: &VideoParameters) -> EncoderConfig {
    let frame_rate = params
        .frame_rate
        .filter(|fps| fps.is_finite() && *fps > 0.0)
        .map_or(DEFAULT_FRAME_RATE, |fps| fps as f32);
    EncoderConfig::new()
        .rate_control_mode(RateControlMode::Bitrate)
        .set_bitrate_bps(params.bitrate_bps)
        .max_frame_rate(frame_rate)
        .enable_skip_frame(false)
}

/// H.264 encoder producing length-prefixed access units for Matroska.
pub struct OpenH264Encoder {
    params: VideoParameters,
    encoder: Option<Encoder>,
    config: Option<DecoderConfig>,
    config_reported: bool,
}

impl OpenH264Encoder {
    pub fn new(params: VideoParameters) -> Result<Self, ReplayError> {
        if params.codec != VideoCodec::H264 {
            return Err(ReplayError::UnsupportedCodec(params.codec.to_string()));
        }
        if params.width % 2 != 0 || params.height % 2 != 0 {
            return Err(OpenH264Error::OddDimensions {
                width: params.width,
                height: params.height,
            }
            .into());
        }
        if params.bitrate_bps == 0 {
            return Err(ReplayError::ConfigurationFailed("h264 bitrate must be positive".into()));
        }
        let encoder = Encoder::with_api_config(OpenH264API::from_source(), encoder_config(&params))
            .map_err(|e| OpenH264Error::Native(e.to_string()))?;
        log::debug!(
            "openh264 encoder ready for {}x{} at {} bps",
            params.width,
            params.height,
            params.bitrate_bps
        );
        Ok(Self {
            params,
            encoder: Some(encoder),
            config: None,
            config_reported: false,
        })
    }

    /// Build the `avcC` configuration from an IDR access unit's SPS/PPS.
    fn capture_config(&mut self, annex_b: &[u8]) {
        if self.config.is_some() {
            return;
        }
        let Some((sps, pps)) = h264::extract_parameter_sets(annex_b) else {
            return;
        };
        match h264::avc_decoder_configuration(&sps, &pps) {
            Some(avcc) => {
                self.config = Some(DecoderConfig::Video(VideoDecoderConfig {
                    codec: VideoCodec::H264,
                    width: self.params.width,
                    height: self.params.height,
                    description: Some(Bytes::from(avcc)),
                }));
            }
            None => log::warn!("keyframe carried an unusable SPS"),
        }
    }
}

impl TrackEncoder for OpenH264Encoder {
    fn encode(&mut self, frame: &RawFrame, force_keyframe: bool) -> Result<Option<EncodedOutput>, ReplayError> {
        let FrameFormat::Bgra { width, height } = frame.format else {
            return Err(ReplayError::EncodingFailed("h264 encoder received an audio frame".into()));
        };
        if (width, height) != (self.params.width, self.params.height) {
            return Err(OpenH264Error::SizeChanged {
                expected_width: self.params.width,
                expected_height: self.params.height,
                width,
                height,
            }
            .into());
        }
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| ReplayError::InvalidState("h264 encoder is closed".into()))?;

        let i420 = bgra_to_i420(&frame.data, width, height)?;
        let yuv = YUVBuffer::from_vec(i420, width as usize, height as usize);
        if force_keyframe {
            encoder.force_intra_frame();
        }
        let bitstream = encoder
            .encode_at(&yuv, Timestamp::from_millis(frame.timestamp_us / 1_000))
            .map_err(|e| OpenH264Error::Native(e.to_string()))?;

        let mut annex_b = Vec::new();
        for layer_index in 0..bitstream.num_layers() {
            let Some(layer) = bitstream.layer(layer_index) else {
                continue;
            };
            for nal_index in 0..layer.nal_count() {
                if let Some(nal) = layer.nal_unit(nal_index) {
                    annex_b.extend_from_slice(nal);
                }
            }
        }
        if annex_b.is_empty() {
            // Skipped by rate control.
            return Ok(None);
        }

        let is_keyframe = h264::contains_idr(&annex_b);
        if is_keyframe {
            self.capture_config(&annex_b);
        }
        let decoder_config = if self.config_reported {
            None
        } else {
            self.config_reported = self.config.is_some();
            self.config.clone()
        };

        Ok(Some(EncodedOutput {
            payload: Bytes::from(h264::annex_b_to_length_prefixed(&annex_b)),
            source_timestamp_us: frame.timestamp_us,
            duration_us: frame.duration_us,
            is_keyframe,
            decoder_config,
        }))
    }

    fn close(&mut self) {
        if self.encoder.take().is_some() {
            log::debug!("openh264 encoder released");
        }
    }
}

/// `EncoderFactory` for H.264 via OpenH264.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenH264Factory;

impl EncoderFactory for OpenH264Factory {
    fn name(&self) -> &str {
        "openh264"
    }

    fn create(&self, params: &TrackParameters) -> Result<Box<dyn TrackEncoder>, ReplayError> {
        match params {
            TrackParameters::Video(video) if video.codec == VideoCodec::H264 => {
                Ok(Box::new(OpenH264Encoder::new(video.clone())?))
            }
            other => Err(ReplayError::UnsupportedCodec(other.codec_name())),
        }
    }
}
