//! Single-owner engine around the segmenter.
//!
//! Frame delivery and result consumption may happen on different threads.
//! `FormEngine` puts the segmenter behind one `Mutex` so frames are always
//! processed one at a time, in order, by exactly one owner. The scorer itself
//! is shared read-only and needs no lock.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::model::{ClassificationResult, HmmClassifier, SequenceScorer};
use crate::pose::{PoseFrame, PoseProvider};
use crate::segment::{RepSegmenter, SegmentEvent, SegmentationState, SegmenterConfig, SegmenterStats};

/// Totals for one `FormEngine::run`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub reps_classified: u64,
    pub reps_correct: u64,
    /// True when the stop flag ended the run before the provider was exhausted.
    pub stopped: bool,
}

pub struct FormEngine<S: SequenceScorer = HmmClassifier> {
    segmenter: Mutex<RepSegmenter<S>>,
}

impl<S: SequenceScorer> FormEngine<S> {
    /// Build an engine. Refuses invalid configuration.
    pub fn new(config: SegmenterConfig, scorer: Arc<S>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            segmenter: Mutex::new(RepSegmenter::new(config, scorer)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, RepSegmenter<S>>> {
        self.segmenter
            .lock()
            .map_err(|_| anyhow!("segmenter lock poisoned"))
    }

    /// Feed one frame.
    pub fn process(&self, frame: &PoseFrame) -> Result<Option<SegmentEvent>> {
        Ok(self.lock()?.process(frame))
    }

    pub fn reset(&self) -> Result<()> {
        self.lock()?.reset();
        Ok(())
    }

    pub fn state(&self) -> Result<SegmentationState> {
        Ok(self.lock()?.state())
    }

    pub fn stats(&self) -> Result<SegmenterStats> {
        Ok(self.lock()?.stats().clone())
    }

    /// Pull frames from `provider` until it is exhausted or `stop` is set.
    ///
    /// Every classified repetition is handed to `on_result`. With a
    /// `frame_interval`, frames are paced to at most one per interval.
    pub fn run<P, F>(
        &self,
        provider: &mut P,
        stop: &AtomicBool,
        frame_interval: Option<Duration>,
        mut on_result: F,
    ) -> Result<RunSummary>
    where
        P: PoseProvider + ?Sized,
        F: FnMut(&ClassificationResult),
    {
        provider.warm_up()?;
        log::info!("engine: reading frames from provider '{}'", provider.name());

        let mut summary = RunSummary::default();
        loop {
            if stop.load(Ordering::Relaxed) {
                summary.stopped = true;
                break;
            }
            let started = Instant::now();
            let Some(frame) = provider.next_frame()? else {
                break;
            };
            summary.frames += 1;

            if let Some(SegmentEvent::RepClassified(result)) = self.process(&frame)? {
                summary.reps_classified += 1;
                if result.is_correct {
                    summary.reps_correct += 1;
                }
                on_result(&result);
            }

            if let Some(interval) = frame_interval {
                if let Some(remaining) = interval.checked_sub(started.elapsed()) {
                    std::thread::sleep(remaining);
                }
            }
        }

        if summary.stopped {
            log::warn!(
                "engine: stopped after {} frames ({} reps)",
                summary.frames,
                summary.reps_classified
            );
        } else {
            log::info!(
                "engine: provider exhausted after {} frames ({} reps, {} correct)",
                summary.frames,
                summary.reps_classified,
                summary.reps_correct
            );
        }
        Ok(summary)
    }
}
