//! Channel registry and the catalog recorder
//!
//! The hub owns one ingestion queue per channel and spawns that channel's
//! worker thread the first time a frame for it arrives. Workers publish
//! [`PipelineEvent`]s on a broadcast channel; the catalog recorder is one
//! subscriber, cataloguing finished clips and enforcing the quota after
//! each one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use camwatch_capture::{AdaptiveSampler, ChannelId, Frame, FrameQueue};
use camwatch_processing::{ClipEncoder, MotionDetector, VideoWriter};

use crate::config::Config;
use crate::controller::{RecordingController, RecordingLimits};
use crate::events::{PipelineEvent, EVENT_BUFFER};
use crate::pipeline::{ChannelPipeline, PipelineStats};
use crate::quota::QuotaManager;

struct ChannelHandle {
    queue: Arc<FrameQueue>,
    worker: JoinHandle<PipelineStats>,
}

pub struct ChannelHub {
    config: Config,
    encoder: Arc<dyn ClipEncoder>,
    channels: Mutex<HashMap<ChannelId, ChannelHandle>>,
    events: broadcast::Sender<PipelineEvent>,
    running: Arc<AtomicBool>,
}

impl ChannelHub {
    pub fn new(config: Config, encoder: Arc<dyn ClipEncoder>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            config,
            encoder,
            channels: Mutex::new(HashMap::new()),
            events,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Receive events from every channel, including ones created later
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ChannelId, ChannelHandle>> {
        self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a frame, creating the channel's pipeline on first sight.
    ///
    /// Never blocks on the pipeline; a full queue drops its oldest frame.
    pub fn submit(&self, frame: Frame) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            debug!("hub stopped, dropping frame for {}", frame.channel);
            return Ok(());
        }

        let mut channels = self.lock();
        let queue = match channels.get(&frame.channel) {
            Some(handle) => handle.queue.clone(),
            None => {
                let handle = self.spawn_channel(frame.channel.clone())?;
                let queue = handle.queue.clone();
                channels.insert(frame.channel.clone(), handle);
                queue
            }
        };
        drop(channels);

        queue.push(frame);
        Ok(())
    }

    fn spawn_channel(&self, channel: ChannelId) -> Result<ChannelHandle> {
        info!("new channel {}, starting pipeline", channel);

        let queue = Arc::new(FrameQueue::new(self.config.ingest.queue_capacity));
        let writer = VideoWriter::new(channel.as_str(), self.config.writer(), self.encoder.clone());
        let detector = MotionDetector::new(self.config.detection.detector());
        let limits = RecordingLimits {
            max_clip_secs: self.config.recording.max_clip_secs,
            motionless_frame_cap: self.config.recording.motionless_frame_cap,
        };
        let controller = RecordingController::new(channel.as_str(), detector, writer, limits);
        let pipeline = ChannelPipeline::new(
            channel.clone(),
            queue.clone(),
            AdaptiveSampler::new(self.config.ingest.sampler()),
            controller,
            self.events.clone(),
            self.config.ingest.idle_poll(),
        );

        let running = self.running.clone();
        let worker = thread::Builder::new()
            .name(format!("channel-{}", channel))
            .spawn(move || pipeline.run(running))?;

        Ok(ChannelHandle { queue, worker })
    }

    /// Current channels and their backlog
    pub fn backlogs(&self) -> Vec<(ChannelId, usize)> {
        let mut out: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, handle)| (id.clone(), handle.queue.len()))
            .collect();
        out.sort();
        out
    }

    /// Stop every worker and wait for them. In-flight recordings are
    /// discarded.
    pub fn shutdown(&self) -> Vec<(ChannelId, PipelineStats)> {
        self.running.store(false, Ordering::SeqCst);
        let channels: Vec<_> = self.lock().drain().collect();

        let mut stats = Vec::with_capacity(channels.len());
        for (id, handle) in channels {
            match handle.worker.join() {
                Ok(s) => stats.push((id, s)),
                Err(_) => error!("worker for channel {} panicked", id),
            }
        }
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }
}

/// Catalog finished clips and enforce the quota after each one.
///
/// Runs until every event sender is gone.
pub fn spawn_catalog_recorder(
    mut events: broadcast::Receiver<PipelineEvent>,
    quota: Arc<QuotaManager>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("catalog-recorder".into())
        .spawn(move || loop {
            match events.blocking_recv() {
                Ok(PipelineEvent::ClipFinalized(clip)) => {
                    if let Err(e) = quota.record_clip(&clip) {
                        error!("failed to catalog clip from {}: {}", clip.channel, e);
                        continue;
                    }
                    match quota.enforce_quota() {
                        Ok(report) if !report.evicted.is_empty() => {
                            info!("evicted after new clip: {}", report.evicted.join(", "))
                        }
                        Ok(_) => {}
                        Err(e) => error!("quota enforcement failed: {}", e),
                    }
                }
                Ok(PipelineEvent::MotionDetected { channel, at }) => {
                    debug!("motion on {} at {}", channel, at.format("%H:%M:%S"));
                }
                Ok(PipelineEvent::ClipDiscarded { channel }) => {
                    debug!("recording on {} discarded", channel);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("catalog recorder lagged, {} event(s) lost; run `camwatch sync`", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("event stream closed, catalog recorder exiting");
                    break;
                }
            }
        })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{block_png, FakeEncoder};
    use camwatch_db::{list_active_videos, Database};
    use std::time::{Duration, Instant};

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.general.data_dir = Some(dir.to_path_buf());
        config.detection.blur_sigma = 0.0;
        config.ingest.idle_poll_ms = 1;
        config
    }

    fn frame(channel: &str, data: Vec<u8>, at: Instant) -> Frame {
        Frame::new(ChannelId::new(channel).unwrap(), data, at)
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(20);
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_channels_created_on_first_frame() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = ChannelHub::new(test_config(tmp.path()), Arc::new(FakeEncoder::default()));

        hub.submit(frame("a", block_png(None), Instant::now())).unwrap();
        hub.submit(frame("b", block_png(None), Instant::now())).unwrap();
        hub.submit(frame("a", block_png(None), Instant::now())).unwrap();

        let names: Vec<String> = hub.backlogs().into_iter().map(|(id, _)| id.to_string()).collect();
        assert_eq!(names, ["a", "b"]);

        let stats = hub.shutdown();
        assert_eq!(stats.len(), 2);
        assert!(hub.backlogs().is_empty());
    }

    #[test]
    fn test_clip_reaches_catalog() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let quota = Arc::new(QuotaManager::new(db.clone(), config.videos_dir(), config.storage.clone()));

        let hub = ChannelHub::new(config, Arc::new(FakeEncoder::default()));
        let recorder = spawn_catalog_recorder(hub.subscribe(), quota).unwrap();

        let t0 = Instant::now();
        let at = |i: u64| t0 + Duration::from_millis(100 * i);
        hub.submit(frame("door", block_png(None), at(0))).unwrap();
        hub.submit(frame("door", block_png(Some(0)), at(1))).unwrap();
        hub.submit(frame("door", block_png(Some(60)), at(2))).unwrap();
        for i in 3..24 {
            hub.submit(frame("door", block_png(Some(120)), at(i))).unwrap();
        }

        wait_for(|| {
            let db = db.lock().unwrap();
            !list_active_videos(db.connection(), None).unwrap().is_empty()
        });

        let stats = hub.shutdown();
        assert_eq!(stats[0].1.clips_written, 1);
        drop(hub);
        recorder.join().unwrap();

        let db = db.lock().unwrap();
        let videos = list_active_videos(db.connection(), None).unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].channel, "door");
        assert!(videos[0].filename.starts_with("door__"));
        assert!(videos[0].filename.ends_with(".webm"));
    }

    #[test]
    fn test_broken_channel_does_not_stop_others() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let quota = Arc::new(QuotaManager::new(db.clone(), config.videos_dir(), config.storage.clone()));

        let hub = ChannelHub::new(config, Arc::new(FakeEncoder::default()));
        let recorder = spawn_catalog_recorder(hub.subscribe(), quota).unwrap();

        let t0 = Instant::now();
        let at = |i: u64| t0 + Duration::from_millis(100 * i);
        let door = |i: u64| match i {
            0 => None,
            1 => Some(0),
            2 => Some(60),
            _ => Some(120),
        };
        for i in 0..24 {
            hub.submit(frame("garbage", vec![0xde, 0xad, 0xbe, 0xef], at(i))).unwrap();
            hub.submit(frame("door", block_png(door(i)), at(i))).unwrap();
        }

        wait_for(|| {
            let db = db.lock().unwrap();
            !list_active_videos(db.connection(), None).unwrap().is_empty()
        });
        wait_for(|| hub.backlogs().iter().all(|(_, backlog)| *backlog == 0));

        let stats = hub.shutdown();
        assert_eq!(stats.len(), 2);
        let (door_id, door_stats) = &stats[0];
        let (garbage_id, garbage_stats) = &stats[1];
        assert_eq!(door_id.as_str(), "door");
        assert_eq!(door_stats.clips_written, 1);
        assert_eq!(door_stats.decode_errors, 0);
        assert_eq!(garbage_id.as_str(), "garbage");
        assert_eq!(garbage_stats.decode_errors, 24);
        assert_eq!(garbage_stats.clips_written, 0);

        drop(hub);
        recorder.join().unwrap();
        let db = db.lock().unwrap();
        let videos = list_active_videos(db.connection(), None).unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].channel, "door");
    }

    #[test]
    fn test_submit_after_shutdown_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let hub = ChannelHub::new(test_config(tmp.path()), Arc::new(FakeEncoder::default()));
        hub.shutdown();
        hub.submit(frame("late", block_png(None), Instant::now())).unwrap();
        assert!(hub.backlogs().is_empty());
    }
}
