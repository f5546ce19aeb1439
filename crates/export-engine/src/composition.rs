//! Export requests and composition building.
//!
//! A composition is the trimmed, track-isolated view of a source asset that
//! the reader decodes: at most one video and one audio track, both copied
//! from the requested time range, which maps to time zero.

use std::path::{Path, PathBuf};

use kurbo::{Affine, Size};
use reframe_common::config::ExportDefaults;
use reframe_common::error::{ReframeError, ReframeResult, TrackKind};
use reframe_media_model::{
    AssetTrack, ContainerFormat, CropRect, MediaTime, Orientation, SourceAsset, TimeRange,
};
use serde::{Deserialize, Serialize};

/// Composition track id used for the video copy.
pub const VIDEO_TRACK_ID: u32 = 1;
/// Composition track id used for the audio copy.
pub const AUDIO_TRACK_ID: u32 = 2;

/// Everything needed to export one asset. Unset options are resolved
/// against the source when the composition is built.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// Source to read from.
    pub asset: SourceAsset,

    /// Crop within the upright source frame. Defaults to the full frame.
    pub crop: Option<CropRect>,

    /// Output pixel size. Defaults to the upright source size.
    pub output_size: Option<Size>,

    /// Range of the source to export. Defaults to the whole video track.
    pub time_range: Option<TimeRange>,

    /// Target bit rate in bits per second. Defaults to the sum of the
    /// source tracks' estimated data rates.
    pub bit_rate: Option<u64>,

    /// Encoder profile/level.
    pub profile: Option<String>,

    /// Output container.
    pub container: Option<ContainerFormat>,

    /// Output file.
    pub destination: PathBuf,
}

impl ExportRequest {
    /// Re-encode the whole asset with source defaults.
    pub fn new(asset: SourceAsset, destination: impl Into<PathBuf>) -> Self {
        Self {
            asset,
            crop: None,
            output_size: None,
            time_range: None,
            bit_rate: None,
            profile: None,
            container: None,
            destination: destination.into(),
        }
    }

    /// Crop and resize the whole asset.
    pub fn cropped(
        asset: SourceAsset,
        crop: CropRect,
        output_size: Size,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self::new(asset, destination)
            .with_crop(crop)
            .with_output_size(output_size)
    }

    /// Trim without cropping.
    pub fn trimmed(
        asset: SourceAsset,
        time_range: TimeRange,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self::new(asset, destination).with_time_range(time_range)
    }

    /// Crop, resize, and trim.
    pub fn cropped_and_trimmed(
        asset: SourceAsset,
        crop: CropRect,
        time_range: TimeRange,
        output_size: Size,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self::cropped(asset, crop, output_size, destination).with_time_range(time_range)
    }

    pub fn with_crop(mut self, crop: CropRect) -> Self {
        self.crop = Some(crop);
        self
    }

    pub fn with_output_size(mut self, size: Size) -> Self {
        self.output_size = Some(size);
        self
    }

    pub fn with_time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn with_bit_rate(mut self, bits_per_sec: u64) -> Self {
        self.bit_rate = Some(bits_per_sec);
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_container(mut self, container: ContainerFormat) -> Self {
        self.container = Some(container);
        self
    }
}

/// Export settings with every default filled in. Fixed for the lifetime
/// of one export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSettings {
    pub bit_rate: u64,
    pub time_range: TimeRange,
    pub output_size: Size,
    pub crop: CropRect,
    pub profile: String,
    pub container: ContainerFormat,
    pub destination: PathBuf,
}

impl ResolvedSettings {
    /// Output size in whole pixels.
    pub fn output_dimensions(&self) -> (u32, u32) {
        (
            self.output_size.width.round() as u32,
            self.output_size.height.round() as u32,
        )
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

/// A source track's samples copied into the composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionTrack {
    /// Id within the composition.
    pub id: u32,

    pub kind: TrackKind,

    /// Id of the source track the samples come from.
    pub source_track_id: u32,

    /// Range of the source track that was copied.
    pub source_range: TimeRange,

    /// Range on the composition timeline, offset from the requested start.
    pub time_range: TimeRange,

    /// Stored frame size of the source (zero for audio).
    pub natural_size: Size,

    /// Source preferred transform, carried over unchanged.
    pub preferred_transform: Affine,

    /// Orientation matched from the preferred transform at insertion.
    pub orientation: Orientation,

    pub nominal_frame_rate: f32,
}

impl CompositionTrack {
    /// Upright display size of the track.
    pub fn corrected_size(&self) -> Size {
        self.orientation.corrected_size(self.natural_size)
    }

    #[cfg(test)]
    pub(crate) fn test_video(fps: f32) -> Self {
        Self {
            id: VIDEO_TRACK_ID,
            kind: TrackKind::Video,
            source_track_id: 1,
            source_range: TimeRange::from_secs(0.0, 10.0),
            time_range: TimeRange::from_secs(0.0, 10.0),
            natural_size: Size::new(1920.0, 1080.0),
            preferred_transform: Affine::IDENTITY,
            orientation: Orientation::Up,
            nominal_frame_rate: fps,
        }
    }
}

/// Trimmed multi-track assembly fed to the reader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    video: Option<CompositionTrack>,
    audio: Option<CompositionTrack>,
}

impl Composition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `range` of `source` into the composition at time zero,
    /// replacing any track of the same kind.
    ///
    /// The range is clipped to the source track's own range and the clipped
    /// part keeps its offset from `range.start`. A track that cannot be read
    /// or a range with no overlap fails.
    pub fn insert_time_range(
        &mut self,
        range: TimeRange,
        source: &AssetTrack,
        orientation: Orientation,
    ) -> ReframeResult<&CompositionTrack> {
        let kind = source.kind;
        if !source.playable {
            return Err(ReframeError::track_insertion(
                kind,
                format!("source track {} is not playable", source.id),
            ));
        }
        if range.is_empty() {
            return Err(ReframeError::track_insertion(
                kind,
                format!("requested range {range} is empty"),
            ));
        }
        let copied = range.intersection(&source.time_range).ok_or_else(|| {
            ReframeError::track_insertion(
                kind,
                format!(
                    "requested range {range} lies outside source track range {}",
                    source.time_range
                ),
            )
        })?;

        let track = CompositionTrack {
            id: match kind {
                TrackKind::Video => VIDEO_TRACK_ID,
                TrackKind::Audio => AUDIO_TRACK_ID,
            },
            kind,
            source_track_id: source.id,
            source_range: copied,
            time_range: TimeRange::new(copied.start - range.start, copied.duration),
            natural_size: source.natural_size,
            preferred_transform: source.preferred_transform,
            orientation,
            nominal_frame_rate: source.nominal_frame_rate,
        };

        let slot = match kind {
            TrackKind::Video => &mut self.video,
            TrackKind::Audio => &mut self.audio,
        };
        Ok(slot.insert(track))
    }

    pub fn video_track(&self) -> Option<&CompositionTrack> {
        self.video.as_ref()
    }

    pub fn audio_track(&self) -> Option<&CompositionTrack> {
        self.audio.as_ref()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn tracks(&self) -> impl Iterator<Item = &CompositionTrack> {
        self.video.iter().chain(self.audio.iter())
    }

    /// Length of the longest track.
    pub fn duration(&self) -> MediaTime {
        self.tracks()
            .map(|track| track.time_range.end())
            .max()
            .unwrap_or(MediaTime::ZERO)
    }
}

/// A composition together with the settings it was built for.
#[derive(Debug, Clone)]
pub struct BuiltComposition {
    pub composition: Composition,
    pub settings: ResolvedSettings,
}

impl BuiltComposition {
    pub fn has_audio(&self) -> bool {
        self.composition.has_audio()
    }

    pub fn video_track(&self) -> ReframeResult<&CompositionTrack> {
        self.composition
            .video_track()
            .ok_or_else(|| ReframeError::setup("Composition has no video track"))
    }
}

/// Build the composition for a request and resolve its defaults.
///
/// Fails when the source has no usable video. A missing or unusable audio
/// track only drops audio from the export.
pub fn build_composition(
    request: &ExportRequest,
    defaults: &ExportDefaults,
) -> ReframeResult<BuiltComposition> {
    let asset = &request.asset;
    let source_video = asset.first_track(TrackKind::Video).ok_or_else(|| {
        ReframeError::setup(format!(
            "Source {} has no video track",
            asset.location().display()
        ))
    })?;
    let source_audio = asset.first_track(TrackKind::Audio);

    let natural = source_video.natural_size;
    if natural.width <= 0.0 || natural.height <= 0.0 {
        return Err(ReframeError::setup(format!(
            "Source video track has no frame size ({}x{})",
            natural.width, natural.height
        )));
    }

    let orientation = source_video.orientation();

    let bit_rate = match request.bit_rate {
        Some(rate) => rate,
        None => {
            let estimated = source_video.estimated_data_rate
                + source_audio.map_or(0.0, |track| track.estimated_data_rate);
            estimated.max(0.0).round() as u64
        }
    };
    let time_range = request.time_range.unwrap_or(source_video.time_range);
    let output_size = request
        .output_size
        .unwrap_or_else(|| orientation.corrected_size(natural));
    let crop = request.crop.unwrap_or_default();
    let profile = request
        .profile
        .clone()
        .unwrap_or_else(|| defaults.video_profile.clone());
    let container = match request.container {
        Some(container) => container,
        None => defaults.container.parse()?,
    };

    let settings = ResolvedSettings {
        bit_rate,
        time_range,
        output_size,
        crop,
        profile,
        container,
        destination: request.destination.clone(),
    };
    validate_settings(&settings)?;

    let mut composition = Composition::new();
    composition
        .insert_time_range(time_range, source_video, orientation)
        .map_err(|e| ReframeError::setup(e.to_string()))?;

    match source_audio {
        Some(track) => {
            if let Err(err) = composition.insert_time_range(time_range, track, Orientation::Up) {
                tracing::warn!(error = %err, "Audio track unusable; exporting video only");
            }
        }
        None => tracing::debug!("Source has no audio track"),
    }

    tracing::info!(
        bit_rate = settings.bit_rate,
        time_range = %settings.time_range,
        output_width = settings.output_size.width,
        output_height = settings.output_size.height,
        rotation = orientation.degrees(),
        has_audio = composition.has_audio(),
        "Composition built"
    );

    Ok(BuiltComposition {
        composition,
        settings,
    })
}

fn validate_settings(settings: &ResolvedSettings) -> ReframeResult<()> {
    let (width, height) = settings.output_dimensions();
    if width == 0 || height == 0 {
        return Err(ReframeError::config(format!(
            "Output size must be at least 1x1 pixels, got {}x{}",
            settings.output_size.width, settings.output_size.height
        )));
    }
    if !settings.crop.is_valid() {
        return Err(ReframeError::config(format!(
            "Crop rectangle {:?} is outside the unit square",
            settings.crop
        )));
    }
    if settings.time_range.is_empty() {
        return Err(ReframeError::config(format!(
            "Time range {} is empty",
            settings.time_range
        )));
    }
    if settings.bit_rate == 0 {
        return Err(ReframeError::config(
            "Bit rate resolved to zero; the source reports no data rate, set one explicitly",
        ));
    }
    Ok(())
}
