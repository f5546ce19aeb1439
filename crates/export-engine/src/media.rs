//! Media collaborator interfaces.
//!
//! Decoding, compositing, encoding and muxing are delegated to a media
//! backend. The engine only drives sample flow between a reader (one
//! output per track) and a writer (one input per track).

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use reframe_common::error::{ReframeResult, TrackKind};
use reframe_media_model::{ContainerFormat, MediaTime};
use serde::{Deserialize, Serialize};

use crate::composition::{Composition, ResolvedSettings};
use crate::geometry::RenderDescription;

/// Default audio output sample rate when the backend has no device rate.
pub const DEFAULT_AUDIO_SAMPLE_RATE: u32 = 44_100;

/// One decoded (reader side) or encodable (writer side) sample.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaSample {
    pub kind: TrackKind,

    /// Presentation timestamp on the composition timeline.
    pub presentation_time: MediaTime,

    pub duration: MediaTime,

    /// Opaque payload; the engine never inspects it.
    pub data: Bytes,
}

impl MediaSample {
    pub fn new(
        kind: TrackKind,
        presentation_time: MediaTime,
        duration: MediaTime,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            kind,
            presentation_time,
            duration,
            data: data.into(),
        }
    }
}

/// Decoded pixel layout requested from the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Bi-planar 4:2:0 Y'CbCr, full range.
    #[default]
    #[serde(rename = "420YpCbCr8BiPlanarFullRange")]
    Nv12FullRange,
}

/// Reader-side settings for the composited video output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoOutputSettings {
    pub track_id: u32,
    pub pixel_format: PixelFormat,
    pub always_copies_sample_data: bool,
    pub render: RenderDescription,
}

impl VideoOutputSettings {
    pub fn new(track_id: u32, render: RenderDescription) -> Self {
        Self {
            track_id,
            pixel_format: PixelFormat::Nv12FullRange,
            always_copies_sample_data: false,
            render,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioSampleFormat {
    #[default]
    LinearPcm,
}

/// Reader-side settings for the audio output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioOutputSettings {
    pub track_id: u32,
    pub format: AudioSampleFormat,
    pub always_copies_sample_data: bool,
}

impl AudioOutputSettings {
    pub fn new(track_id: u32) -> Self {
        Self {
            track_id,
            format: AudioSampleFormat::LinearPcm,
            always_copies_sample_data: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    #[default]
    H264,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    /// Scale to fill the output, preserving aspect, cropping overflow.
    #[default]
    ResizeAspectFill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanAperture {
    pub width: u32,
    pub height: u32,
    pub horizontal_offset: u32,
    pub vertical_offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelAspectRatio {
    pub horizontal_spacing: u32,
    pub vertical_spacing: u32,
}

impl PixelAspectRatio {
    pub const SQUARE: PixelAspectRatio = PixelAspectRatio {
        horizontal_spacing: 1,
        vertical_spacing: 1,
    };
}

/// Writer-side video encoder settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoEncodeSettings {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub scaling_mode: ScalingMode,
    /// Bits per second.
    pub average_bit_rate: u64,
    pub profile_level: String,
    pub clean_aperture: CleanAperture,
    pub pixel_aspect_ratio: PixelAspectRatio,
}

impl VideoEncodeSettings {
    /// Encoder settings for the resolved export settings.
    pub fn from_settings(settings: &ResolvedSettings, aperture_offset: u32) -> Self {
        let (width, height) = settings.output_dimensions();
        Self {
            codec: VideoCodec::H264,
            width,
            height,
            scaling_mode: ScalingMode::ResizeAspectFill,
            average_bit_rate: settings.bit_rate,
            profile_level: settings.profile.clone(),
            clean_aperture: CleanAperture {
                width,
                height,
                horizontal_offset: aperture_offset,
                vertical_offset: aperture_offset,
            },
            pixel_aspect_ratio: PixelAspectRatio::SQUARE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioCodec {
    #[default]
    Aac,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelLayout {
    #[default]
    Mono,
}

/// Writer-side audio encoder settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioEncodeSettings {
    pub codec: AudioCodec,
    pub sample_rate: u32,
    pub channel_layout: ChannelLayout,
    pub channels: u32,
}

impl AudioEncodeSettings {
    /// Mono AAC at the given sample rate.
    pub fn mono_aac(sample_rate: u32) -> Self {
        Self {
            codec: AudioCodec::Aac,
            sample_rate,
            channel_layout: ChannelLayout::Mono,
            channels: 1,
        }
    }
}

/// One reader output. Pulls decoded samples in decode order.
#[async_trait::async_trait]
pub trait ReaderOutput: Send {
    /// Next sample, or `None` once the output is exhausted.
    async fn copy_next_sample(&mut self) -> ReframeResult<Option<MediaSample>>;
}

/// Decodes a composition.
pub trait MediaReader: Send + Sync {
    fn add_video_output(&self, settings: VideoOutputSettings)
        -> ReframeResult<Box<dyn ReaderOutput>>;

    fn add_audio_output(&self, settings: AudioOutputSettings)
        -> ReframeResult<Box<dyn ReaderOutput>>;

    fn start_reading(&self) -> ReframeResult<()>;

    /// Stop decoding. Must be safe to call at any time, more than once.
    fn cancel_reading(&self);
}

/// One writer input. Accepts samples while it reports readiness.
#[async_trait::async_trait]
pub trait WriterInput: Send {
    /// Resolves when the input may accept more data or has been finished.
    async fn ready(&mut self);

    fn is_ready_for_more_data(&self) -> bool;

    async fn append(&mut self, sample: MediaSample) -> ReframeResult<()>;

    fn mark_as_finished(&mut self);
}

/// Encodes and muxes into one output file.
#[async_trait::async_trait]
pub trait MediaWriter: Send + Sync {
    fn add_video_input(&self, settings: VideoEncodeSettings) -> ReframeResult<Box<dyn WriterInput>>;

    fn add_audio_input(&self, settings: AudioEncodeSettings) -> ReframeResult<Box<dyn WriterInput>>;

    fn start_writing(&self) -> ReframeResult<()>;

    fn start_session(&self, at: MediaTime) -> ReframeResult<()>;

    /// Flush and close the output file.
    async fn finish_writing(&self) -> ReframeResult<()>;

    /// Abort writing. Must be safe to call at any time, more than once.
    fn cancel_writing(&self);
}

/// Factory for readers and writers.
pub trait MediaBackend: Send + Sync {
    /// Backend name.
    fn name(&self) -> &str;

    /// Check if this backend can be used on this system.
    fn is_available(&self) -> bool {
        true
    }

    fn open_reader(&self, composition: &Composition) -> ReframeResult<Arc<dyn MediaReader>>;

    fn open_writer(
        &self,
        destination: &Path,
        container: ContainerFormat,
    ) -> ReframeResult<Arc<dyn MediaWriter>>;

    /// Output audio sample rate of the current device.
    fn audio_sample_rate(&self) -> u32 {
        DEFAULT_AUDIO_SAMPLE_RATE
    }
}
