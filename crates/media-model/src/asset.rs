//! Source asset and track descriptions.
//!
//! A [`SourceAsset`] describes what a demuxer found in a media file; the
//! export engine builds its composition from these descriptions and hands
//! the actual sample I/O to a media backend.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use kurbo::{Affine, Size};
use reframe_common::error::{ReframeError, TrackKind};
use serde::{Deserialize, Serialize};

use crate::orientation::Orientation;
use crate::time::{MediaTime, TimeRange};

/// One track of a source asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetTrack {
    /// Track identifier within the asset.
    pub id: u32,

    /// Video or audio.
    pub kind: TrackKind,

    /// Stored (unrotated) frame size. Zero for audio.
    pub natural_size: Size,

    /// Transform that displays stored frames upright.
    pub preferred_transform: Affine,

    /// Estimated data rate in bits per second.
    pub estimated_data_rate: f64,

    /// Range of the track on the asset timeline.
    pub time_range: TimeRange,

    /// Nominal frame rate (0 when unknown or for audio).
    pub nominal_frame_rate: f32,

    /// Whether the track's samples can be read at all.
    pub playable: bool,
}

impl AssetTrack {
    /// A playable, upright video track starting at zero.
    pub fn video(id: u32, natural_size: Size, duration: MediaTime) -> Self {
        Self {
            id,
            kind: TrackKind::Video,
            natural_size,
            preferred_transform: Affine::IDENTITY,
            estimated_data_rate: 0.0,
            time_range: TimeRange::with_duration(duration),
            nominal_frame_rate: 30.0,
            playable: true,
        }
    }

    /// A playable audio track starting at zero.
    pub fn audio(id: u32, duration: MediaTime) -> Self {
        Self {
            id,
            kind: TrackKind::Audio,
            natural_size: Size::ZERO,
            preferred_transform: Affine::IDENTITY,
            estimated_data_rate: 0.0,
            time_range: TimeRange::with_duration(duration),
            nominal_frame_rate: 0.0,
            playable: true,
        }
    }

    pub fn with_transform(mut self, transform: Affine) -> Self {
        self.preferred_transform = transform;
        self
    }

    /// Use the canonical preferred transform for `orientation`.
    pub fn with_orientation(self, orientation: Orientation) -> Self {
        let transform = orientation.display_transform(self.natural_size);
        self.with_transform(transform)
    }

    pub fn with_data_rate(mut self, bits_per_sec: f64) -> Self {
        self.estimated_data_rate = bits_per_sec;
        self
    }

    pub fn with_frame_rate(mut self, fps: f32) -> Self {
        self.nominal_frame_rate = fps;
        self
    }

    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = range;
        self
    }

    /// Mark the track as unreadable.
    pub fn unplayable(mut self) -> Self {
        self.playable = false;
        self
    }

    pub fn orientation(&self) -> Orientation {
        Orientation::from_transform(&self.preferred_transform)
    }

    /// Frame size once the preferred rotation is applied.
    pub fn corrected_size(&self) -> Size {
        self.orientation().corrected_size(self.natural_size)
    }
}

/// A media file and the tracks found in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAsset {
    /// Where the asset lives.
    pub location: PathBuf,

    /// Tracks in container order.
    pub tracks: Vec<AssetTrack>,
}

impl SourceAsset {
    pub fn new(location: impl Into<PathBuf>, tracks: Vec<AssetTrack>) -> Self {
        Self {
            location: location.into(),
            tracks,
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Tracks of one kind, in container order.
    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &AssetTrack> {
        self.tracks.iter().filter(move |track| track.kind == kind)
    }

    /// First track of the given kind.
    pub fn first_track(&self, kind: TrackKind) -> Option<&AssetTrack> {
        self.tracks_of(kind).next()
    }
}

/// Output container file type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    /// MPEG-4 (`.mp4`).
    #[default]
    Mp4,
    /// QuickTime movie (`.mov`).
    QuickTime,
    /// MPEG-4 video with Apple extensions (`.m4v`).
    M4v,
}

impl ContainerFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::QuickTime => "mov",
            ContainerFormat::M4v => "m4v",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "video/mp4",
            ContainerFormat::QuickTime => "video/quicktime",
            ContainerFormat::M4v => "video/x-m4v",
        }
    }
}

impl FromStr for ContainerFormat {
    type Err = ReframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp4" | "mpeg4" | "mpeg-4" => Ok(ContainerFormat::Mp4),
            "mov" | "quicktime" => Ok(ContainerFormat::QuickTime),
            "m4v" => Ok(ContainerFormat::M4v),
            other => Err(ReframeError::config(format!(
                "Unknown container: {other}. Use: mp4, mov, m4v"
            ))),
        }
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_asset() -> SourceAsset {
        SourceAsset::new(
            "/media/clip.mov",
            vec![
                AssetTrack::audio(2, MediaTime::from_secs(10.0)).with_data_rate(128_000.0),
                AssetTrack::video(1, Size::new(1920.0, 1080.0), MediaTime::from_secs(10.0))
                    .with_orientation(Orientation::Right)
                    .with_data_rate(8_000_000.0),
                AssetTrack::audio(3, MediaTime::from_secs(10.0)),
            ],
        )
    }

    #[test]
    fn test_first_track_respects_container_order() {
        let asset = sample_asset();
        assert_eq!(asset.first_track(TrackKind::Video).unwrap().id, 1);
        assert_eq!(asset.first_track(TrackKind::Audio).unwrap().id, 2);
        assert_eq!(asset.tracks_of(TrackKind::Audio).count(), 2);
    }

    #[test]
    fn test_track_orientation_and_corrected_size() {
        let asset = sample_asset();
        let video = asset.first_track(TrackKind::Video).unwrap();
        assert_eq!(video.orientation(), Orientation::Right);
        assert_eq!(video.corrected_size(), Size::new(1080.0, 1920.0));
    }

    #[test]
    fn test_container_parsing() {
        assert_eq!("MP4".parse::<ContainerFormat>().unwrap(), ContainerFormat::Mp4);
        assert_eq!(
            "quicktime".parse::<ContainerFormat>().unwrap(),
            ContainerFormat::QuickTime
        );
        assert!("avi".parse::<ContainerFormat>().is_err());
        assert_eq!(ContainerFormat::M4v.to_string(), "m4v");
    }

    #[test]
    fn test_asset_serializes() {
        let asset = sample_asset();
        let json = serde_json::to_string(&asset).unwrap();
        let parsed: SourceAsset = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.tracks.len(), 3);
        assert_eq!(parsed.tracks[1].kind, TrackKind::Video);
    }
}
