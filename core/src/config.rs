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

use thiserror::Error;

pub const CLIENT_ID_VAR: &str = "RSPOTIFY_CLIENT_ID";
pub const REDIRECT_URI_VAR: &str = "RSPOTIFY_REDIRECT_URI";
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8888/callback";

const AUTHORIZE_ENDPOINT: &str = "https://accounts.spotify.com/authorize";
const TOKEN_ENDPOINT: &str = "https://accounts.spotify.com/api/token";
const PROFILE_ENDPOINT: &str = "https://api.spotify.com/v1/me";

// - playlist-read-private: To list the user's playlists as recording targets.
// - playlist-modify-public / playlist-modify-private: To create and append to the target.
// - user-read-playback-state: To sample what is currently playing.
// - user-modify-playback-state: Requested for parity with the web recorder.
const DEFAULT_SCOPES: [&str; 5] = [
    "playlist-read-private",
    "playlist-modify-public",
    "playlist-modify-private",
    "user-read-playback-state",
    "user-modify-playback-state",
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable {0}")]
    MissingVar(&'static str),
}

/// Provider URLs used by the auth layer and the profile cache.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub authorize: String,
    pub token: String,
    pub me: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            authorize: AUTHORIZE_ENDPOINT.to_string(),
            token: TOKEN_ENDPOINT.to_string(),
            me: PROFILE_ENDPOINT.to_string(),
        }
    }
}

/// Static application settings for talking to Spotify.
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub endpoints: Endpoints,
}

impl SpotifyConfig {
    pub fn new(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            endpoints: Endpoints::default(),
        }
    }

    /// Reads the client id and redirect URI from the environment.
    ///
    /// Uses the same variable names as rspotify (`RSPOTIFY_CLIENT_ID`,
    /// `RSPOTIFY_REDIRECT_URI`). No client secret is needed: the PKCE flow
    /// replaces it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let client_id = std::env::var(CLIENT_ID_VAR)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingVar(CLIENT_ID_VAR))?;
        let redirect_uri = std::env::var(REDIRECT_URI_VAR)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());

        Ok(Self::new(client_id, redirect_uri))
    }

    pub fn with_token_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoints.token = url.into();
        self
    }

    pub fn with_profile_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoints.me = url.into();
        self
    }

    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}
