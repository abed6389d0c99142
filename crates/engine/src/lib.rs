// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! ArchiveKit Engine - composition root for the per-streamer segment
//! coordinator (C7) and the cadence scheduler (C10).
//!
//! - [`coordinator`]: the OFFLINE/RESOLVING/RECORDING/CLOSING actor.
//! - [`scheduler`]: status/video-pipeline/stale-cleanup timers.
//! - [`post_process`]: the handoff into the (external) encoding step.

pub mod coordinator;
pub mod post_process;
pub mod scheduler;

pub use coordinator::{CoordinatorState, SegmentCoordinatorConfig};
pub use post_process::{discover_ready_segments, ReadySegment, VideoPostProcessor};
pub use scheduler::{Scheduler, SchedulerConfig, StreamerHandle};

use archivekit_core::StreamerConfig;
use archivekit_douyu::{StatusMonitor, StreamResolver};
use archivekit_store::SessionStore;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};

/// Everything needed to build one streamer's coordinator: its own
/// config plus the shared resolver and store.
pub struct StreamerWiring {
    pub streamer: StreamerConfig,
    pub status_url: String,
    pub coordinator: SegmentCoordinatorConfig,
}

/// Builds one [`StreamerHandle`] (status monitor + live channel) and
/// spawns its [`coordinator::run`] task wired to that channel.
///
/// Returns the handle (to be registered with the [`Scheduler`]) and a
/// sender the caller uses to stop the coordinator.
#[must_use]
pub fn spawn_streamer(
    wiring: StreamerWiring,
    http_client: reqwest::Client,
    resolver: Arc<StreamResolver>,
    store: SessionStore,
) -> (Arc<StreamerHandle>, oneshot::Sender<()>) {
    let monitor = StatusMonitor::new(http_client, wiring.status_url);
    let (handle, live_rx) = StreamerHandle::new(wiring.streamer.name.clone(), wiring.streamer.room_id.clone(), monitor);
    let handle = Arc::new(handle);

    let (stop_tx, stop_rx) = oneshot::channel();
    tokio::spawn(coordinator::run(wiring.coordinator, resolver, store, live_rx, stop_rx));

    (handle, stop_tx)
}

/// The assembled engine: one coordinator per streamer plus the shared
/// scheduler. `run` blocks until `stop_rx` reports `true`, then stops
/// every coordinator in turn.
pub struct Engine {
    pub scheduler: Arc<Scheduler>,
    pub coordinator_stops: Vec<oneshot::Sender<()>>,
}

impl Engine {
    #[must_use]
    pub fn new(scheduler: Scheduler, coordinator_stops: Vec<oneshot::Sender<()>>) -> Self {
        Self { scheduler: Arc::new(scheduler), coordinator_stops }
    }

    pub async fn run(self, stop_rx: watch::Receiver<bool>) {
        self.scheduler.run(stop_rx).await;
        for stop in self.coordinator_stops {
            let _ = stop.send(());
        }
    }
}
