/*
    jam-recorder-rs | Rust CLI tool to record a Spotify jam into a playlist.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use crate::api::ApiError;
use crate::models::{AddedTrack, PlayingTrack, PlaylistTarget, RecordingReport};
use crate::ticker::PeriodicTask;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// What the recorder needs from the provider.
#[async_trait]
pub trait RecorderApi: Send + Sync {
    async fn now_playing(&self) -> Result<Option<PlayingTrack>, ApiError>;
    async fn append_track(&self, playlist_id: &str, track: &PlayingTrack) -> Result<(), ApiError>;
}

/// Tracks already submitted in this session, in insertion order.
#[derive(Debug, Default)]
pub struct TrackLedger {
    entries: Vec<AddedTrack>,
    index: HashMap<String, usize>,
}

impl TrackLedger {
    pub fn contains(&self, track_id: &str) -> bool {
        self.index.contains_key(track_id)
    }

    /// Returns `false` if the track was already in the ledger.
    pub fn insert(&mut self, track: &PlayingTrack) -> bool {
        if self.contains(&track.id) {
            return false;
        }
        self.index.insert(track.id.clone(), self.entries.len());
        self.entries.push(AddedTrack {
            id: track.id.clone(),
            display_name: format!("{} - {}", track.name, track.artist_line()),
            confirmed: false,
        });
        true
    }

    pub fn confirm(&mut self, track_id: &str) {
        if let Some(&i) = self.index.get(track_id) {
            self.entries[i].confirmed = true;
        }
    }

    pub fn entries(&self) -> &[AddedTrack] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct RecordingSession {
    generation: u64,
    target: PlaylistTarget,
    ledger: TrackLedger,
    last_observed_track_id: Option<String>,
}

/// Result of a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    NothingPlaying,
    AlreadySeen,
    Appended(String),
    AppendFailed(String),
    FetchFailed,
    /// The session this tick started for is gone.
    Stale,
}

/// Polls the playing track and appends each new one to the target playlist.
///
/// Appends are at-most-once: a track enters the ledger before its append is
/// awaited and is never submitted again in the same session, even when the
/// append failed.
pub struct Recorder {
    api: Arc<dyn RecorderApi>,
    interval: Duration,
    session: Mutex<Option<RecordingSession>>,
    task: Mutex<Option<PeriodicTask>>,
    generation: AtomicU64,
}

impl Recorder {
    pub fn new(api: Arc<dyn RecorderApi>) -> Arc<Self> {
        Self::with_interval(api, POLL_INTERVAL)
    }

    pub fn with_interval(api: Arc<dyn RecorderApi>, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            api,
            interval,
            session: Mutex::new(None),
            task: Mutex::new(None),
            generation: AtomicU64::new(0),
        })
    }

    /// Starts a fresh session on `target`, ending any running one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self: &Arc<Self>, target: PlaylistTarget) {
        if let Some(previous) = self.stop() {
            debug!(
                "Replaced the recording on playlist {} ({} tracks).",
                previous.playlist.id,
                previous.tracks.len()
            );
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!("Recording started on playlist {}.", target.id);
        *self.session.lock() = Some(RecordingSession {
            generation,
            target,
            ledger: TrackLedger::default(),
            last_observed_track_id: None,
        });

        let recorder = Arc::downgrade(self);
        let task = PeriodicTask::spawn(self.interval, move || {
            let recorder = recorder.clone();
            async move {
                if let Some(recorder) = recorder.upgrade() {
                    recorder.poll_once().await;
                }
            }
        });
        *self.task.lock() = Some(task);
    }

    /// Stops polling and hands back what the session recorded.
    ///
    /// Returns `None` when nothing was recording, so repeated calls are harmless.
    pub fn stop(&self) -> Option<RecordingReport> {
        if let Some(task) = self.task.lock().take() {
            task.cancel();
        }
        let session = self.session.lock().take()?;
        info!(
            "Recording stopped, {} tracks in this session.",
            session.ledger.len()
        );
        Some(RecordingReport {
            playlist: session.target,
            tracks: session.ledger.entries,
        })
    }

    pub fn is_recording(&self) -> bool {
        self.session.lock().is_some()
    }

    pub fn target(&self) -> Option<PlaylistTarget> {
        self.session.lock().as_ref().map(|s| s.target.clone())
    }

    /// The current session's ledger in insertion order; empty when idle.
    pub fn added_tracks(&self) -> Vec<AddedTrack> {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.ledger.entries().to_vec())
            .unwrap_or_default()
    }

    fn active_generation(&self) -> Option<u64> {
        self.session.lock().as_ref().map(|s| s.generation)
    }

    /// One polling step. Failures are logged and never end the session.
    pub async fn poll_once(&self) -> TickOutcome {
        let Some(generation) = self.active_generation() else {
            return TickOutcome::Idle;
        };

        let track = match self.api.now_playing().await {
            Ok(Some(track)) => track,
            Ok(None) => return TickOutcome::NothingPlaying,
            Err(e) => {
                warn!("Could not fetch the playing track: {}", e);
                return TickOutcome::FetchFailed;
            }
        };

        // Check and insert under one lock, with no await in between.
        let playlist_id = {
            let mut guard = self.session.lock();
            let Some(session) = guard.as_mut().filter(|s| s.generation == generation) else {
                return TickOutcome::Stale;
            };
            if session.last_observed_track_id.as_deref() == Some(track.id.as_str())
                || session.ledger.contains(&track.id)
            {
                return TickOutcome::AlreadySeen;
            }
            session.last_observed_track_id = Some(track.id.clone());
            session.ledger.insert(&track);
            session.target.id.clone()
        };

        info!("New track: {} by {}", track.name, track.artist_line());
        match self.api.append_track(&playlist_id, &track).await {
            Ok(()) => {
                let mut guard = self.session.lock();
                match guard.as_mut().filter(|s| s.generation == generation) {
                    Some(session) => {
                        session.ledger.confirm(&track.id);
                        TickOutcome::Appended(track.id)
                    }
                    None => TickOutcome::Stale,
                }
            }
            Err(e) => {
                error!("Failed to add '{}' to the playlist: {}", track.name, e);
                TickOutcome::AppendFailed(track.id)
            }
        }
    }
}
