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

use super::AuthError;
use crate::clock::Clock;
use crate::config::SpotifyConfig;
use crate::storage::{keys, KeyValueStore};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Tokens expiring within this window are refreshed opportunistically on read.
pub const REFRESH_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Successful response of the token endpoint, for both grant types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct RawTokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

impl TokenResponse {
    pub fn parse(body: &str) -> Result<Self, AuthError> {
        let raw: RawTokenResponse = serde_json::from_str(body)
            .map_err(|e| AuthError::MalformedTokenResponse(e.to_string()))?;

        match (raw.access_token, raw.expires_in) {
            (Some(access_token), Some(expires_in)) if !access_token.is_empty() => {
                if expires_in <= 0 {
                    return Err(AuthError::MalformedTokenResponse(format!(
                        "expires_in must be positive, got {}",
                        expires_in
                    )));
                }
                Ok(Self {
                    access_token,
                    expires_in,
                    refresh_token: raw.refresh_token,
                })
            }
            _ => Err(AuthError::MalformedTokenResponse(
                "missing access_token or expires_in".to_string(),
            )),
        }
    }
}

/// POSTs a form to the token endpoint and parses the JSON answer.
pub(crate) async fn request_token(
    http: &reqwest::Client,
    endpoint: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, AuthError> {
    let resp = http
        .post(endpoint)
        .header("Accept", "application/json")
        .header("Content-Type", "application/x-www-form-urlencoded")
        .form(form)
        .send()
        .await?;

    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(AuthError::TokenExchangeFailed {
            status: status.as_u16(),
            body,
        });
    }

    TokenResponse::parse(&body)
}

/// Snapshot of what the store currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at_ms: i64,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at_ms: i64,
}

#[derive(Debug, Default)]
struct TokenState {
    access: Option<AccessToken>,
    refresh_token: Option<String>,
}

/// Owns the access/refresh token pair, its persistence and its refresh.
///
/// Always handled through an `Arc` so background refreshes can outlive the
/// read that triggered them.
pub struct TokenStore {
    config: Arc<SpotifyConfig>,
    storage: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    http: reqwest::Client,
    state: Mutex<TokenState>,
    // Bumped by `clear`, so a refresh that started before a logout cannot
    // resurrect the session when it lands.
    epoch: AtomicU64,
    refreshing: AtomicBool,
    refresh_done: Notify,
}

impl TokenStore {
    /// Builds the store and loads whatever tokens were persisted.
    pub fn open(
        config: Arc<SpotifyConfig>,
        storage: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        http: reqwest::Client,
    ) -> Arc<Self> {
        let store = Arc::new(Self {
            config,
            storage,
            clock,
            http,
            state: Mutex::new(TokenState::default()),
            epoch: AtomicU64::new(0),
            refreshing: AtomicBool::new(false),
            refresh_done: Notify::new(),
        });
        store.load();
        store
    }

    fn load(self: &Arc<Self>) {
        let stored_token = self.storage.get(keys::ACCESS_TOKEN);
        let stored_expiry = self.storage.get(keys::TOKEN_EXPIRY);
        let stored_refresh = self.storage.get(keys::REFRESH_TOKEN);

        let Some(value) = stored_token else {
            if let Some(refresh_token) = stored_refresh {
                debug!("Only a refresh token is stored, refreshing in the background.");
                self.state.lock().refresh_token = Some(refresh_token);
                self.spawn_refresh(true);
            }
            return;
        };
        let Some(expires_at_ms) = stored_expiry.and_then(|raw| raw.parse::<i64>().ok()) else {
            warn!("Stored access token has no usable expiry, discarding it.");
            self.clear();
            return;
        };

        if self.clock.now_ms() < expires_at_ms {
            debug!("Loaded a valid access token from storage.");
            let mut state = self.state.lock();
            state.access = Some(AccessToken {
                value,
                expires_at_ms,
            });
            state.refresh_token = stored_refresh;
        } else if let Some(refresh_token) = stored_refresh {
            // The persisted triple stays until the refresh resolves, so a
            // process that exits first can still pick it up next time.
            debug!("Stored access token expired, refreshing in the background.");
            self.state.lock().refresh_token = Some(refresh_token);
            self.spawn_refresh(true);
        } else {
            debug!("Stored access token expired and cannot be refreshed.");
            self.clear();
        }
    }

    /// Stores a freshly issued token. A response without a refresh token keeps
    /// the one already held.
    pub fn set_tokens(&self, response: &TokenResponse) {
        self.store_tokens(response, None);
    }

    fn store_tokens(&self, response: &TokenResponse, expected_epoch: Option<u64>) -> bool {
        let expires_at_ms = self
            .clock
            .now_ms()
            .saturating_add(response.expires_in.saturating_mul(1000));

        let mut state = self.state.lock();
        if expected_epoch.is_some_and(|epoch| epoch != self.epoch.load(Ordering::Acquire)) {
            return false;
        }
        state.access = Some(AccessToken {
            value: response.access_token.clone(),
            expires_at_ms,
        });
        if let Some(refresh_token) = &response.refresh_token {
            state.refresh_token = Some(refresh_token.clone());
            self.storage.set(keys::REFRESH_TOKEN, refresh_token);
        }
        self.storage.set(keys::ACCESS_TOKEN, &response.access_token);
        self.storage
            .set(keys::TOKEN_EXPIRY, &expires_at_ms.to_string());
        true
    }

    /// Returns the access token while it is still valid.
    ///
    /// Starts a background refresh first if the token is about to expire. An
    /// expired token is dropped; without a refresh token everything is purged.
    pub fn get_valid_access_token(self: &Arc<Self>) -> Option<String> {
        self.ensure_fresh();

        if let Some(token) = self.peek_access_token() {
            return Some(token);
        }
        self.drop_expired();
        None
    }

    /// Pure read: the access token if `now < expiry`, nothing else.
    pub fn peek_access_token(&self) -> Option<String> {
        let now = self.clock.now_ms();
        self.state
            .lock()
            .access
            .as_ref()
            .filter(|access| now < access.expires_at_ms)
            .map(|access| access.value.clone())
    }

    /// Kicks off a fire-and-forget refresh when the token is inside the
    /// look-ahead window, or when only a refresh token is left.
    pub fn ensure_fresh(self: &Arc<Self>) {
        let now = self.clock.now_ms();
        let trigger = {
            let state = self.state.lock();
            match (&state.access, &state.refresh_token) {
                (Some(access), Some(_)) if now + REFRESH_WINDOW_MS > access.expires_at_ms => {
                    Some(now >= access.expires_at_ms)
                }
                (None, Some(_)) => Some(true),
                _ => None,
            }
        };

        if let Some(purge_on_failure) = trigger {
            self.spawn_refresh(purge_on_failure);
        }
    }

    /// Like [`get_valid_access_token`](Self::get_valid_access_token), but when
    /// only a refresh token is held it waits for the refresh to land instead
    /// of reporting the session as gone.
    pub async fn wait_for_access_token(self: &Arc<Self>) -> Option<String> {
        loop {
            if let Some(token) = self.get_valid_access_token() {
                return Some(token);
            }
            if self.refresh_token().is_none() {
                return None;
            }

            let done = self.refresh_done.notified();
            tokio::pin!(done);
            done.as_mut().enable();

            self.ensure_fresh();
            if self.refreshing.load(Ordering::Acquire) {
                done.await;
            } else if self.peek_access_token().is_none() {
                return None;
            }
        }
    }

    fn drop_expired(&self) {
        let mut state = self.state.lock();
        if state.access.is_none() {
            return;
        }
        info!("Access token expired or invalid, clearing it.");
        state.access = None;
        self.storage.remove(keys::ACCESS_TOKEN);
        self.storage.remove(keys::TOKEN_EXPIRY);

        if state.refresh_token.is_none() {
            drop(state);
            self.clear();
        }
    }

    fn spawn_refresh(self: &Arc<Self>, purge_on_failure: bool) {
        if self.refreshing.swap(true, Ordering::AcqRel) {
            debug!("Token refresh already in flight.");
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.refreshing.store(false, Ordering::Release);
            debug!("No async runtime available, skipping background refresh.");
            return;
        };

        let store = Arc::clone(self);
        handle.spawn(async move {
            let refreshed = store.refresh().await;
            if !refreshed && purge_on_failure {
                warn!("Background token refresh failed, clearing stored tokens.");
                store.clear();
            }
            store.refreshing.store(false, Ordering::Release);
            store.refresh_done.notify_waiters();
        });
    }

    /// Trades the refresh token for a new access token.
    ///
    /// Returns `false` on any failure without touching the stored state.
    pub async fn refresh(&self) -> bool {
        match self.try_refresh().await {
            Ok(()) => true,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    async fn try_refresh(&self) -> Result<(), AuthError> {
        let refresh_token = self
            .refresh_token()
            .ok_or_else(|| AuthError::RefreshFailed("no refresh token".to_string()))?;
        let epoch = self.epoch.load(Ordering::Acquire);

        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ];
        let mut response = request_token(&self.http, &self.config.endpoints.token, &form)
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        // Spotify usually omits the refresh token here; keep the one we used.
        if response.refresh_token.is_none() {
            response.refresh_token = Some(refresh_token);
        }
        if !self.store_tokens(&response, Some(epoch)) {
            return Err(AuthError::RefreshFailed(
                "tokens were cleared while refreshing".to_string(),
            ));
        }
        info!("Access token refreshed.");
        Ok(())
    }

    /// Purges every persisted and in-memory token field.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        *state = TokenState::default();
        self.storage.remove(keys::ACCESS_TOKEN);
        self.storage.remove(keys::TOKEN_EXPIRY);
        self.storage.remove(keys::REFRESH_TOKEN);
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.state.lock().refresh_token.clone()
    }

    pub fn record(&self) -> Option<TokenRecord> {
        let state = self.state.lock();
        state.access.as_ref().map(|access| TokenRecord {
            access_token: access.value.clone(),
            refresh_token: state.refresh_token.clone(),
            expires_at_ms: access.expires_at_ms,
        })
    }
}
