//! Source probing with ffprobe.

use std::path::Path;
use std::process::Command;

use kurbo::Size;
use reframe_common::error::{ReframeError, ReframeResult, TrackKind};
use reframe_media_model::{AssetTrack, MediaTime, Orientation, SourceAsset, TimeRange};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeStream {
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    start_time: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
    #[serde(default)]
    tags: ProbeTags,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
    #[serde(default)]
    disposition: ProbeDisposition,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeDisposition {
    #[serde(default)]
    attached_pic: u8,
}

/// Describe the media file at `path` by running ffprobe on it.
pub fn probe_asset(path: &Path) -> ReframeResult<SourceAsset> {
    if !path.exists() {
        return Err(ReframeError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_streams",
            "-show_format",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .map_err(|e| ReframeError::probe(format!("Failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ReframeError::probe(format!(
            "ffprobe failed on {}: {}",
            path.display(),
            stderr.trim()
        )));
    }

    let raw = String::from_utf8_lossy(&output.stdout);
    parse_probe_output(&raw, path)
}

/// Build an asset description from ffprobe's JSON output.
pub fn parse_probe_output(json: &str, path: &Path) -> ReframeResult<SourceAsset> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| ReframeError::probe(format!("Invalid ffprobe output: {e}")))?;

    let format_duration = probe
        .format
        .as_ref()
        .and_then(|format| parse_number(format.duration.as_deref()));
    let format_bit_rate = probe
        .format
        .as_ref()
        .and_then(|format| parse_number(format.bit_rate.as_deref()));

    let mut tracks = Vec::new();
    for stream in &probe.streams {
        let kind = match stream.codec_type.as_deref() {
            Some("video") if stream.disposition.attached_pic == 0 => TrackKind::Video,
            Some("audio") => TrackKind::Audio,
            _ => continue,
        };
        tracks.push(track_from_stream(stream, kind, format_duration));
    }

    // Streams without their own bit rate share whatever the container
    // reports beyond the streams that do.
    if let Some(total) = format_bit_rate {
        let known: f64 = tracks.iter().map(|t| t.estimated_data_rate).sum();
        let remainder = (total - known).max(0.0);
        if let Some(video) = tracks
            .iter_mut()
            .find(|t| t.kind == TrackKind::Video && t.estimated_data_rate == 0.0)
        {
            video.estimated_data_rate = remainder;
        }
    }

    if tracks.is_empty() {
        return Err(ReframeError::probe(format!(
            "{} has no audio or video streams",
            path.display()
        )));
    }

    tracing::debug!(
        path = %path.display(),
        tracks = tracks.len(),
        "Probed source asset"
    );

    Ok(SourceAsset::new(path, tracks))
}

fn track_from_stream(stream: &ProbeStream, kind: TrackKind, fallback_duration: Option<f64>) -> AssetTrack {
    let duration = parse_number(stream.duration.as_deref())
        .or(fallback_duration)
        .unwrap_or(0.0);
    let start = parse_number(stream.start_time.as_deref())
        .filter(|s| *s > 0.0)
        .unwrap_or(0.0);
    let range = TimeRange::new(MediaTime::from_secs(start), MediaTime::from_secs(duration));
    let data_rate = parse_number(stream.bit_rate.as_deref()).unwrap_or(0.0);
    let id = stream.index + 1;

    let mut track = match kind {
        TrackKind::Video => {
            let size = Size::new(
                stream.width.unwrap_or(0) as f64,
                stream.height.unwrap_or(0) as f64,
            );
            let fps = parse_frame_rate(stream.avg_frame_rate.as_deref())
                .or_else(|| parse_frame_rate(stream.r_frame_rate.as_deref()))
                .unwrap_or(0.0);
            AssetTrack::video(id, size, MediaTime::ZERO)
                .with_orientation(stream_orientation(stream))
                .with_frame_rate(fps as f32)
        }
        TrackKind::Audio => AssetTrack::audio(id, MediaTime::ZERO),
    }
    .with_time_range(range)
    .with_data_rate(data_rate);

    if stream.codec_name.is_none() {
        track = track.unplayable();
    }
    track
}

/// Clockwise display rotation of a video stream.
fn stream_orientation(stream: &ProbeStream) -> Orientation {
    // The display matrix stores a counter-clockwise angle.
    let degrees = stream
        .side_data_list
        .iter()
        .find_map(|side| side.rotation)
        .map(|rotation| -rotation.round() as i32)
        .or_else(|| {
            stream
                .tags
                .rotate
                .as_deref()
                .and_then(|r| r.trim().parse::<i32>().ok())
        })
        .unwrap_or(0);

    Orientation::from_degrees(degrees).unwrap_or_else(|| {
        tracing::warn!(degrees, "Unsupported stream rotation; treating as upright");
        Orientation::Up
    })
}

fn parse_number(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Parse `"30000/1001"` or `"25"`.
fn parse_frame_rate(value: Option<&str>) -> Option<f64> {
    let value = value?.trim();
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num = num.parse::<f64>().ok()?;
            let den = den.parse::<f64>().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => value.parse::<f64>().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// Whether `ffprobe` is on the `PATH`.
pub fn ffprobe_available() -> bool {
    Command::new("sh")
        .arg("-c")
        .arg("command -v ffprobe >/dev/null 2>&1")
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
