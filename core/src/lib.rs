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

pub mod api;
pub mod app;
pub mod auth;
pub mod clock;
pub mod config;
pub mod gateway;
pub mod models;
pub mod profile;
pub mod recorder;
pub mod storage;
pub mod ticker;

// Re-export key items for convenience
pub use api::{ApiError, RspotifyApi, SpotifyApi};
pub use app::JamRecorder;
pub use auth::{AuthError, AuthState, Authenticator, Browser};
pub use config::{ConfigError, SpotifyConfig};
pub use gateway::ApiGateway;
pub use models::{
    default_playlist_name, filter_playlists, AddedTrack, PlayingTrack, PlaylistSummary,
    PlaylistTarget, RecordingReport, UserProfile,
};
pub use recorder::{Recorder, RecorderApi};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError};
