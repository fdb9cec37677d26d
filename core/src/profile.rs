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
use crate::gateway::ApiGateway;
use crate::models::UserProfile;
use crate::storage::{keys, KeyValueStore};
use log::{debug, error, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// The signed-in user's profile, fetched once and cached in storage.
pub struct ProfileService {
    gateway: Arc<ApiGateway>,
    http: reqwest::Client,
    endpoint: String,
    storage: Arc<dyn KeyValueStore>,
    cache: Mutex<Option<UserProfile>>,
}

impl ProfileService {
    pub fn new(
        gateway: Arc<ApiGateway>,
        http: reqwest::Client,
        endpoint: impl Into<String>,
        storage: Arc<dyn KeyValueStore>,
    ) -> Self {
        let service = Self {
            gateway,
            http,
            endpoint: endpoint.into(),
            storage,
            cache: Mutex::new(None),
        };
        *service.cache.lock() = service.load();
        service
    }

    fn load(&self) -> Option<UserProfile> {
        let raw = self.storage.get(keys::USER_PROFILE)?;
        match serde_json::from_str(&raw) {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!("Discarding unreadable cached profile: {}", e);
                self.storage.remove(keys::USER_PROFILE);
                None
            }
        }
    }

    /// The cached profile, without touching the network.
    pub fn cached(&self) -> Option<UserProfile> {
        self.cache.lock().clone()
    }

    /// Returns the cached profile or fetches `GET /v1/me`.
    pub async fn get_profile(&self) -> Result<UserProfile, ApiError> {
        if let Some(profile) = self.cached() {
            return Ok(profile);
        }

        let http = &self.http;
        let endpoint = self.endpoint.as_str();
        let profile = self
            .gateway
            .call("fetch profile", move |token| fetch_profile(http, endpoint, token))
            .await
            .map_err(|e| {
                error!("Error fetching user profile: {}", e);
                e
            })?;

        match serde_json::to_string(&profile) {
            Ok(raw) => self.storage.set(keys::USER_PROFILE, &raw),
            Err(e) => warn!("Could not cache user profile: {}", e),
        }
        *self.cache.lock() = Some(profile.clone());
        debug!("Cached profile for user {}.", profile.id);
        Ok(profile)
    }

    pub fn clear(&self) {
        *self.cache.lock() = None;
        self.storage.remove(keys::USER_PROFILE);
    }
}

async fn fetch_profile(
    http: &reqwest::Client,
    endpoint: &str,
    token: String,
) -> Result<UserProfile, ApiError> {
    let response = http
        .get(endpoint)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| ApiError::Network(e.to_string()))?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::ProfileFetchFailed(format!(
            "HTTP {}: {}",
            status.as_u16(),
            body
        )));
    }

    response
        .json::<UserProfile>()
        .await
        .map_err(|e| ApiError::ProfileFetchFailed(e.to_string()))
}
