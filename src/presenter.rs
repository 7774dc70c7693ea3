use crate::simulation::Frame;
use crossfire::{mpsc, MTx, Rx, TrySendError};
use log::{debug, info, trace};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

pub type FrameReceiver = Rx<Frame>;

/// Sending half of the bounded frame queue. Cloned into every run; never blocks.
#[derive(Clone)]
pub struct FrameSink {
    sender: MTx<Frame>,
    dropped: Arc<AtomicU64>,
}

impl FrameSink {
    /// Offers a frame to the presentation thread. A full queue drops the frame.
    /// Returns false if the frame was not queued.
    pub fn offer(&self, frame: Frame) -> bool {
        match self.sender.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("Frame queue full, dropped frame t={} of run {}.", frame.time, frame.run);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Totals reported by the presentation thread when the queue closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresenterStats {
    pub frames: u64,
    pub merges: u64,
}

/// Creates the bounded frame queue.
pub fn frame_channel(capacity: usize) -> (FrameSink, FrameReceiver) {
    let (sender, receiver) = mpsc::bounded_blocking(capacity);
    (FrameSink { sender, dropped: Arc::new(AtomicU64::new(0)) }, receiver)
}

/// Drains frames until every sink is dropped. Stands in for a display: it only logs what it sees.
pub fn consume(receiver: FrameReceiver) -> PresenterStats {
    let mut stats = PresenterStats::default();
    while let Ok(frame) = receiver.recv() {
        stats.frames += 1;
        let immune: usize = frame.sites.iter().map(|s| s.immune_cells.len()).sum();
        debug!(
            "Frame run {} t={}: {}x{} sites, {} immune cells.",
            frame.run, frame.time, frame.grid_width, frame.grid_height, immune
        );
        for merge in &frame.merges {
            stats.merges += 1;
            info!(
                "Run {} t={}: focus #{} merged with #{} ({} collisions, perimeter {} cells).",
                frame.run,
                frame.time,
                merge.focus_id,
                merge.colliding_focus_id,
                merge.collisions,
                merge.perimeter.len()
            );
        }
    }
    stats
}

/// Spawns the presentation thread.
pub fn spawn_presenter(receiver: FrameReceiver) -> std::io::Result<JoinHandle<PresenterStats>> {
    std::thread::Builder::new()
        .name("presenter".to_string())
        .spawn(move || consume(receiver))
}
