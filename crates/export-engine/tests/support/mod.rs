//! In-memory media backend for driving export sessions in tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use kurbo::Size;
use reframe_common::error::{ReframeError, ReframeResult, TrackKind};
use reframe_export_engine::{
    AudioEncodeSettings, AudioOutputSettings, Composition, ExportEvent, MediaBackend,
    MediaReader, MediaSample, MediaWriter, ReaderOutput, VideoEncodeSettings,
    VideoOutputSettings, WriterInput,
};
use reframe_media_model::{AssetTrack, ContainerFormat, MediaTime, SourceAsset};

const TIMESCALE: u32 = 90_000;

/// Knobs for the fake pipeline.
#[derive(Debug, Clone)]
pub struct FakeOptions {
    /// Video presentation times in seconds, in decode order.
    pub video_pts: Vec<f64>,
    pub audio_samples: usize,
    /// Video output never yields past this many samples.
    pub hold_video_after: Option<usize>,
    /// Video append fails at this sample index.
    pub fail_video_append_at: Option<usize>,
    /// Audio read fails at this sample index.
    pub fail_audio_read_at: Option<usize>,
    /// Each video append takes this long.
    pub video_append_delay: Option<Duration>,
    pub fail_open_reader: bool,
    pub fail_finish: bool,
    pub available: bool,
    /// Samples accepted per readiness signal.
    pub ready_burst: usize,
}

impl FakeOptions {
    /// `frames` video frames at `fps` plus `audio_samples` audio buffers.
    pub fn frames(frames: usize, fps: u32, audio_samples: usize) -> Self {
        Self {
            video_pts: (0..frames).map(|i| i as f64 / fps as f64).collect(),
            audio_samples,
            hold_video_after: None,
            fail_video_append_at: None,
            fail_audio_read_at: None,
            video_append_delay: None,
            fail_open_reader: false,
            fail_finish: false,
            available: true,
            ready_burst: 8,
        }
    }
}

/// Everything the fake backend saw.
#[derive(Debug, Default)]
pub struct Recorder {
    pub open_reader: AtomicUsize,
    pub open_writer: AtomicUsize,
    pub start_reading: AtomicUsize,
    pub start_writing: AtomicUsize,
    pub start_session: AtomicUsize,
    pub finish_writing: AtomicUsize,
    pub cancel_reading: AtomicUsize,
    pub cancel_writing: AtomicUsize,
    pub video_output: Mutex<Option<VideoOutputSettings>>,
    pub video_input: Mutex<Option<VideoEncodeSettings>>,
    pub audio_input: Mutex<Option<AudioEncodeSettings>>,
    pub destination: Mutex<Option<PathBuf>>,
    pub appended: Mutex<Vec<(TrackKind, MediaTime)>>,
}

impl Recorder {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn appended(&self, kind: TrackKind) -> Vec<MediaTime> {
        self.appended
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, t)| *t)
            .collect()
    }

    pub fn backend_calls(&self) -> usize {
        Self::count(&self.open_reader) + Self::count(&self.open_writer)
    }
}

pub struct FakeBackend {
    options: FakeOptions,
    pub recorder: Arc<Recorder>,
}

impl FakeBackend {
    pub fn new(options: FakeOptions) -> Arc<Self> {
        Arc::new(Self {
            options,
            recorder: Arc::new(Recorder::default()),
        })
    }
}

impl MediaBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn is_available(&self) -> bool {
        self.options.available
    }

    fn open_reader(&self, _composition: &Composition) -> ReframeResult<Arc<dyn MediaReader>> {
        self.recorder.open_reader.fetch_add(1, Ordering::SeqCst);
        if self.options.fail_open_reader {
            return Err(ReframeError::reader("no decoder for source"));
        }
        Ok(Arc::new(FakeReader {
            options: self.options.clone(),
            recorder: Arc::clone(&self.recorder),
        }))
    }

    fn open_writer(
        &self,
        destination: &Path,
        _container: ContainerFormat,
    ) -> ReframeResult<Arc<dyn MediaWriter>> {
        self.recorder.open_writer.fetch_add(1, Ordering::SeqCst);
        *self.recorder.destination.lock().unwrap() = Some(destination.to_path_buf());
        Ok(Arc::new(FakeWriter {
            options: self.options.clone(),
            recorder: Arc::clone(&self.recorder),
            cancelled: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct FakeReader {
    options: FakeOptions,
    recorder: Arc<Recorder>,
}

impl MediaReader for FakeReader {
    fn add_video_output(
        &self,
        settings: VideoOutputSettings,
    ) -> ReframeResult<Box<dyn ReaderOutput>> {
        *self.recorder.video_output.lock().unwrap() = Some(settings);
        Ok(Box::new(FakeOutput {
            kind: TrackKind::Video,
            pts: self.options.video_pts.iter().copied().collect(),
            hold_after: self.options.hold_video_after,
            fail_at: None,
            emitted: 0,
        }))
    }

    fn add_audio_output(
        &self,
        _settings: AudioOutputSettings,
    ) -> ReframeResult<Box<dyn ReaderOutput>> {
        Ok(Box::new(FakeOutput {
            kind: TrackKind::Audio,
            pts: (0..self.options.audio_samples)
                .map(|i| i as f64 * 1024.0 / 44_100.0)
                .collect(),
            hold_after: None,
            fail_at: self.options.fail_audio_read_at,
            emitted: 0,
        }))
    }

    fn start_reading(&self) -> ReframeResult<()> {
        self.recorder.start_reading.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cancel_reading(&self) {
        self.recorder.cancel_reading.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeOutput {
    kind: TrackKind,
    pts: VecDeque<f64>,
    hold_after: Option<usize>,
    fail_at: Option<usize>,
    emitted: usize,
}

#[async_trait::async_trait]
impl ReaderOutput for FakeOutput {
    async fn copy_next_sample(&mut self) -> ReframeResult<Option<MediaSample>> {
        if self.hold_after == Some(self.emitted) {
            std::future::pending::<()>().await;
        }
        tokio::task::yield_now().await;
        if self.fail_at == Some(self.emitted) {
            return Err(ReframeError::reader("corrupt packet"));
        }
        Ok(self.pts.pop_front().map(|secs| {
            self.emitted += 1;
            MediaSample::new(
                self.kind,
                MediaTime::from_secs_with_timescale(secs, TIMESCALE),
                MediaTime::new(1, 30),
                Bytes::from_static(b"sample"),
            )
        }))
    }
}

struct FakeWriter {
    options: FakeOptions,
    recorder: Arc<Recorder>,
    cancelled: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl MediaWriter for FakeWriter {
    fn add_video_input(&self, settings: VideoEncodeSettings) -> ReframeResult<Box<dyn WriterInput>> {
        *self.recorder.video_input.lock().unwrap() = Some(settings);
        Ok(Box::new(FakeInput::new(
            TrackKind::Video,
            &self.options,
            Arc::clone(&self.recorder),
        )))
    }

    fn add_audio_input(&self, settings: AudioEncodeSettings) -> ReframeResult<Box<dyn WriterInput>> {
        *self.recorder.audio_input.lock().unwrap() = Some(settings);
        Ok(Box::new(FakeInput::new(
            TrackKind::Audio,
            &self.options,
            Arc::clone(&self.recorder),
        )))
    }

    fn start_writing(&self) -> ReframeResult<()> {
        self.recorder.start_writing.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn start_session(&self, _at: MediaTime) -> ReframeResult<()> {
        self.recorder.start_session.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn finish_writing(&self) -> ReframeResult<()> {
        self.recorder.finish_writing.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.options.fail_finish {
            return Err(ReframeError::writer("disk full"));
        }
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(ReframeError::writer("writing was cancelled"));
        }
        Ok(())
    }

    fn cancel_writing(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.recorder.cancel_writing.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeInput {
    kind: TrackKind,
    burst: usize,
    budget: usize,
    finished: bool,
    fail_at: Option<usize>,
    delay: Option<Duration>,
    appended: usize,
    recorder: Arc<Recorder>,
}

impl FakeInput {
    fn new(kind: TrackKind, options: &FakeOptions, recorder: Arc<Recorder>) -> Self {
        Self {
            kind,
            burst: options.ready_burst.max(1),
            budget: 0,
            finished: false,
            fail_at: match kind {
                TrackKind::Video => options.fail_video_append_at,
                TrackKind::Audio => None,
            },
            delay: match kind {
                TrackKind::Video => options.video_append_delay,
                TrackKind::Audio => None,
            },
            appended: 0,
            recorder,
        }
    }
}

#[async_trait::async_trait]
impl WriterInput for FakeInput {
    async fn ready(&mut self) {
        tokio::task::yield_now().await;
        self.budget = self.burst;
    }

    fn is_ready_for_more_data(&self) -> bool {
        !self.finished && self.budget > 0
    }

    async fn append(&mut self, sample: MediaSample) -> ReframeResult<()> {
        if self.fail_at == Some(self.appended) {
            return Err(ReframeError::writer("encoder rejected sample"));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.budget = self.budget.saturating_sub(1);
        self.appended += 1;
        self.recorder
            .appended
            .lock()
            .unwrap()
            .push((self.kind, sample.presentation_time));
        Ok(())
    }

    fn mark_as_finished(&mut self) {
        self.finished = true;
    }
}

/// 1920x1080 source, 10 s at 30 fps, optionally with an audio track.
pub fn hd_asset(audio: Option<AssetTrack>) -> SourceAsset {
    let mut tracks = vec![AssetTrack::video(
        1,
        Size::new(1920.0, 1080.0),
        MediaTime::from_secs(10.0),
    )
    .with_data_rate(8_000_000.0)
    .with_frame_rate(30.0)];
    tracks.extend(audio);
    SourceAsset::new("/media/source.mov", tracks)
}

pub fn stereo_audio() -> AssetTrack {
    AssetTrack::audio(2, MediaTime::from_secs(10.0)).with_data_rate(128_000.0)
}

pub fn drain(events: &mut reframe_export_engine::EventReceiver) -> Vec<ExportEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

pub fn progress_values(events: &[ExportEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|event| match event {
            ExportEvent::Progress(value) => Some(*value),
            _ => None,
        })
        .collect()
}

pub fn terminal_events(events: &[ExportEvent]) -> Vec<&ExportEvent> {
    events.iter().filter(|event| event.is_terminal()).collect()
}
