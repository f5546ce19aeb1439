//! The transcode pump.
//!
//! One worker task per track moves samples from a reader output to the
//! matching writer input, paced by the input's readiness. The worker that
//! drains the last track finalizes the output file.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use reframe_common::error::{ReframeError, ReframeResult, TrackKind};
use reframe_media_model::MediaTime;
use tokio::task::JoinHandle;

use crate::control::ExportControl;
use crate::media::{MediaReader, MediaWriter, ReaderOutput, WriterInput};

const VIDEO_FINISHED: u8 = 0b01;
const AUDIO_FINISHED: u8 = 0b10;
const ALL_FINISHED: u8 = VIDEO_FINISHED | AUDIO_FINISHED;

fn finished_bit(kind: TrackKind) -> u8 {
    match kind {
        TrackKind::Video => VIDEO_FINISHED,
        TrackKind::Audio => AUDIO_FINISHED,
    }
}

/// Result of marking a track finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The track had already been marked.
    AlreadyFinished,
    /// Another track is still draining.
    Pending,
    /// This call finished the last track.
    Complete,
}

/// Per-track completion flags packed into one atomic word.
#[derive(Debug)]
pub struct PipelineState {
    flags: AtomicU8,
}

impl PipelineState {
    /// Without audio the audio flag starts set, so video alone completes.
    pub fn new(has_audio: bool) -> Self {
        let initial = if has_audio { 0 } else { AUDIO_FINISHED };
        Self {
            flags: AtomicU8::new(initial),
        }
    }

    pub fn mark_finished(&self, kind: TrackKind) -> Completion {
        let bit = finished_bit(kind);
        let previous = self.flags.fetch_or(bit, Ordering::AcqRel);
        if previous & bit != 0 {
            Completion::AlreadyFinished
        } else if previous | bit == ALL_FINISHED {
            Completion::Complete
        } else {
            Completion::Pending
        }
    }

    pub fn is_finished(&self, kind: TrackKind) -> bool {
        self.flags.load(Ordering::Acquire) & finished_bit(kind) != 0
    }

    pub fn is_complete(&self) -> bool {
        self.flags.load(Ordering::Acquire) == ALL_FINISHED
    }
}

/// Phase of one track's worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackPhase {
    Idle,
    Draining,
    Finished,
}

/// A reader output paired with the writer input it feeds.
pub struct TrackLane {
    kind: TrackKind,
    output: Box<dyn ReaderOutput>,
    input: Box<dyn WriterInput>,
    phase: TrackPhase,
}

impl TrackLane {
    pub fn new(kind: TrackKind, output: Box<dyn ReaderOutput>, input: Box<dyn WriterInput>) -> Self {
        Self {
            kind,
            output,
            input,
            phase: TrackPhase::Idle,
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn phase(&self) -> TrackPhase {
        self.phase
    }

    fn begin_draining(&mut self) {
        if self.phase == TrackPhase::Idle {
            self.phase = TrackPhase::Draining;
        }
    }

    /// Returns false when the lane was not draining.
    fn finish(&mut self) -> bool {
        if self.phase != TrackPhase::Draining {
            return false;
        }
        self.input.mark_as_finished();
        self.phase = TrackPhase::Finished;
        true
    }
}

struct PumpShared {
    control: Arc<ExportControl>,
    writer: Arc<dyn MediaWriter>,
    pipeline: PipelineState,
    destination: PathBuf,
    duration_secs: f64,
}

impl PumpShared {
    fn report_progress(&self, presentation_time: MediaTime) {
        if self.duration_secs > 0.0 {
            let fraction = presentation_time.as_secs_f64() / self.duration_secs;
            self.control.notifier().progress(fraction);
        }
    }

    async fn track_finished(&self, kind: TrackKind) {
        match self.pipeline.mark_finished(kind) {
            Completion::Complete => self.finalize().await,
            Completion::Pending => tracing::debug!(track = %kind, "Track drained; waiting for the other track"),
            Completion::AlreadyFinished => tracing::warn!(track = %kind, "Track finished twice"),
        }
    }

    async fn finalize(&self) {
        if !self.control.begin_finalize() {
            tracing::debug!("Finalize skipped; session already ended");
            return;
        }
        tracing::debug!(output = %self.destination.display(), "Finalizing output");

        let token = self.control.token();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            result = self.writer.finish_writing() => result,
        };

        match result {
            Ok(()) => {
                self.control.complete(self.destination.clone());
            }
            Err(err @ ReframeError::Writer { .. }) => {
                self.control.fail(err);
            }
            Err(err) => {
                self.control
                    .fail(ReframeError::writer(format!("Failed to finish writing: {err}")));
            }
        }
    }
}

/// Running workers of one export.
pub struct TranscodePump {
    workers: Vec<JoinHandle<()>>,
}

impl TranscodePump {
    /// Start reading and writing, then spawn one worker per lane.
    ///
    /// `duration` is the requested export length used for progress.
    pub fn start(
        reader: Arc<dyn MediaReader>,
        writer: Arc<dyn MediaWriter>,
        lanes: Vec<TrackLane>,
        control: Arc<ExportControl>,
        destination: PathBuf,
        duration: MediaTime,
    ) -> ReframeResult<Self> {
        let has_audio = lanes.iter().any(|lane| lane.kind == TrackKind::Audio);
        if !lanes.iter().any(|lane| lane.kind == TrackKind::Video) {
            return Err(ReframeError::setup("No video lane to pump"));
        }

        reader
            .start_reading()
            .map_err(|e| ReframeError::setup(format!("Reader failed to start: {e}")))?;
        writer
            .start_writing()
            .map_err(|e| ReframeError::setup(format!("Writer failed to start: {e}")))?;
        writer
            .start_session(MediaTime::ZERO)
            .map_err(|e| ReframeError::setup(format!("Writer session failed to start: {e}")))?;

        let shared = Arc::new(PumpShared {
            control,
            writer,
            pipeline: PipelineState::new(has_audio),
            destination,
            duration_secs: duration.as_secs_f64(),
        });

        tracing::debug!(lanes = lanes.len(), has_audio, "Starting transcode workers");

        let workers = lanes
            .into_iter()
            .map(|lane| tokio::spawn(drive(lane, Arc::clone(&shared))))
            .collect();

        Ok(Self { workers })
    }

    /// Wait for every worker to exit.
    pub async fn join(self) -> ReframeResult<()> {
        for worker in self.workers {
            worker
                .await
                .map_err(|e| ReframeError::Other(anyhow::anyhow!("Transcode worker panicked: {e}")))?;
        }
        Ok(())
    }
}

async fn drive(mut lane: TrackLane, shared: Arc<PumpShared>) {
    let kind = lane.kind;
    let token = shared.control.token();
    lane.begin_draining();
    let mut appended: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(track = %kind, appended, "Worker stopped");
                return;
            }
            _ = lane.input.ready() => {}
        }

        while lane.input.is_ready_for_more_data() {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!(track = %kind, appended, "Worker stopped");
                    return;
                }
                next = lane.output.copy_next_sample() => next,
            };

            match next {
                Ok(Some(sample)) => {
                    let presentation_time = sample.presentation_time;
                    let result = tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            tracing::debug!(track = %kind, appended, "Worker stopped mid-append");
                            return;
                        }
                        result = lane.input.append(sample) => result,
                    };
                    if let Err(err) = result {
                        shared.control.fail(match err {
                            err @ ReframeError::Writer { .. } => err,
                            other => ReframeError::writer(format!(
                                "Failed to append {kind} sample: {other}"
                            )),
                        });
                        return;
                    }
                    appended += 1;
                    if token.is_cancelled() {
                        return;
                    }
                    if kind == TrackKind::Video {
                        shared.report_progress(presentation_time);
                    }
                }
                Ok(None) => {
                    if lane.finish() {
                        tracing::debug!(track = %kind, appended, "Track drained");
                        shared.track_finished(kind).await;
                    }
                    return;
                }
                Err(err) => {
                    shared.control.fail(match err {
                        err @ ReframeError::Reader { .. } => err,
                        other => ReframeError::reader(format!(
                            "Failed to read {kind} sample: {other}"
                        )),
                    });
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    #[test]
    fn test_video_only_completes_on_video() {
        let state = PipelineState::new(false);
        assert!(state.is_finished(TrackKind::Audio));
        assert_eq!(state.mark_finished(TrackKind::Video), Completion::Complete);
        assert!(state.is_complete());
    }

    #[test]
    fn test_second_mark_is_reported() {
        let state = PipelineState::new(true);
        assert_eq!(state.mark_finished(TrackKind::Audio), Completion::Pending);
        assert_eq!(
            state.mark_finished(TrackKind::Audio),
            Completion::AlreadyFinished
        );
        assert!(!state.is_complete());
        assert_eq!(state.mark_finished(TrackKind::Video), Completion::Complete);
    }

    #[test]
    fn test_concurrent_completion_reported_once() {
        for _ in 0..500 {
            let state = Arc::new(PipelineState::new(true));
            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = [TrackKind::Video, TrackKind::Audio]
                .into_iter()
                .map(|kind| {
                    let state = Arc::clone(&state);
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        state.mark_finished(kind)
                    })
                })
                .collect();

            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            let completions = results
                .iter()
                .filter(|c| **c == Completion::Complete)
                .count();
            assert_eq!(completions, 1, "{results:?}");
        }
    }
}
