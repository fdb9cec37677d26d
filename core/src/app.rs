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

use crate::api::{RspotifyApi, SpotifyApi};
use crate::auth::{AuthError, AuthState, Authenticator, Browser, PkceService, TokenStore};
use crate::clock::{Clock, SystemClock};
use crate::config::SpotifyConfig;
use crate::gateway::ApiGateway;
use crate::models::{AddedTrack, PlaylistTarget, RecordingReport};
use crate::profile::ProfileService;
use crate::recorder::Recorder;
use crate::storage::KeyValueStore;
use log::info;
use std::sync::Arc;

/// Everything the UI talks to, wired together.
pub struct JamRecorder {
    auth: Arc<Authenticator>,
    gateway: Arc<ApiGateway>,
    profile: Arc<ProfileService>,
    recorder: Arc<Recorder>,
}

impl JamRecorder {
    /// Production wiring: system clock and the rspotify client.
    pub fn new(config: SpotifyConfig, storage: Arc<dyn KeyValueStore>) -> Self {
        let api = Arc::new(RspotifyApi::new(&config.client_id));
        Self::with_parts(config, storage, Arc::new(SystemClock), api)
    }

    pub fn with_parts(
        config: SpotifyConfig,
        storage: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        api: Arc<dyn SpotifyApi>,
    ) -> Self {
        let config = Arc::new(config);
        let http = reqwest::Client::new();

        let tokens = TokenStore::open(config.clone(), storage.clone(), clock, http.clone());
        let pkce = PkceService::new(config.clone(), storage.clone(), http.clone());
        let auth = Arc::new(Authenticator::new(pkce, tokens));
        let gateway = Arc::new(ApiGateway::new(auth.clone(), api));
        let profile = Arc::new(ProfileService::new(
            gateway.clone(),
            http,
            config.endpoints.me.clone(),
            storage,
        ));
        let cached = Arc::downgrade(&profile);
        auth.on_logout(move || {
            if let Some(profile) = cached.upgrade() {
                profile.clear();
            }
        });
        let recorder = Recorder::new(gateway.clone());

        Self {
            auth,
            gateway,
            profile,
            recorder,
        }
    }

    pub async fn authorize(&self, browser: &dyn Browser) -> Result<(), AuthError> {
        self.profile.clear();
        self.auth.authorize(browser).await
    }

    pub async fn handle_callback(&self, browser: &dyn Browser) -> bool {
        self.auth.handle_callback(browser).await
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    pub fn get_access_token(&self) -> Option<String> {
        self.auth.get_access_token()
    }

    pub fn has_session(&self) -> bool {
        self.auth.has_session()
    }

    /// Answers `is_authenticated` after any pending token refresh has landed.
    pub async fn restore_session(&self) -> bool {
        self.auth.restore_session().await
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth.state()
    }

    /// Ends the session: recording, cached profile, tokens and verifier.
    pub fn logout(&self) {
        if let Some(report) = self.recorder.stop() {
            info!(
                "Stopped recording on logout after {} tracks.",
                report.tracks.len()
            );
        }
        self.auth.logout();
    }

    pub fn start_recording(&self, target: PlaylistTarget) {
        self.recorder.start(target);
    }

    pub fn stop_recording(&self) -> Option<RecordingReport> {
        self.recorder.stop()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn get_added_tracks(&self) -> Vec<AddedTrack> {
        self.recorder.added_tracks()
    }

    pub fn gateway(&self) -> &ApiGateway {
        &self.gateway
    }

    pub fn profile(&self) -> &ProfileService {
        &self.profile
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }
}
