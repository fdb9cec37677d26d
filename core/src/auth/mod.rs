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

pub mod pkce;
pub mod token;

use crate::api::ApiError;
use async_trait::async_trait;
use log::{error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

pub use pkce::PkceService;
pub use token::{TokenRecord, TokenResponse, TokenStore};

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No PKCE code verifier is stored; start the login again")]
    MissingVerifier,
    #[error("Token exchange failed with HTTP {status}: {body}")]
    TokenExchangeFailed { status: u16, body: String },
    #[error("Malformed token response: {0}")]
    MalformedTokenResponse(String),
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("Network error talking to Spotify accounts: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Browser hand-off failed: {0}")]
    Browser(String),
}

/// Where the user stands in the login protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    LoggedOut,
    Authorizing,
    Authenticated,
}

/// The page the user is looking at.
///
/// `navigate` is a full-page redirect: it only returns once the provider has
/// sent the user back, with `current_url` pointing at the callback.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), AuthError>;
    fn current_url(&self) -> Option<String>;
    fn replace_url(&self, url: &str);
}

type LogoutHook = Box<dyn Fn() + Send + Sync>;

/// Login, callback, logout and 401 recovery on top of the PKCE generator and
/// the token store.
pub struct Authenticator {
    pkce: PkceService,
    tokens: Arc<TokenStore>,
    state: Mutex<AuthState>,
    logout_hooks: Mutex<Vec<LogoutHook>>,
}

impl Authenticator {
    pub fn new(pkce: PkceService, tokens: Arc<TokenStore>) -> Self {
        let initial = if tokens.peek_access_token().is_some() {
            AuthState::Authenticated
        } else {
            AuthState::LoggedOut
        };
        Self {
            pkce,
            tokens,
            state: Mutex::new(initial),
            logout_hooks: Mutex::new(Vec::new()),
        }
    }

    /// Registers a callback run on every logout, including the one forced by
    /// an unrecoverable 401.
    pub fn on_logout(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.logout_hooks.lock().push(Box::new(hook));
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn state(&self) -> AuthState {
        let mut state = self.state.lock();
        let authenticated = self.tokens.peek_access_token().is_some();
        *state = match (*state, authenticated) {
            (_, true) => AuthState::Authenticated,
            (AuthState::Authorizing, false) => AuthState::Authorizing,
            (_, false) => AuthState::LoggedOut,
        };
        *state
    }

    /// Starts a fresh login: wipes tokens and verifier, then redirects the
    /// browser to the provider's consent page.
    pub async fn authorize(&self, browser: &dyn Browser) -> Result<(), AuthError> {
        self.tokens.clear();
        self.pkce.clear_verifier();

        let url = self.pkce.build_authorization_url()?;
        *self.state.lock() = AuthState::Authorizing;
        info!("Redirecting to Spotify for authorization.");

        if let Err(e) = browser.navigate(&url).await {
            *self.state.lock() = AuthState::LoggedOut;
            self.pkce.clear_verifier();
            return Err(e);
        }
        Ok(())
    }

    /// Completes a login from the callback URL, if there is one.
    ///
    /// The `code`/`error` query is always stripped from the browser URL so a
    /// reload cannot replay it. Without either parameter this just reports
    /// the current authentication status.
    pub async fn handle_callback(&self, browser: &dyn Browser) -> bool {
        let Some(current) = browser.current_url() else {
            return self.is_authenticated();
        };
        let mut url = match Url::parse(&current) {
            Ok(url) => url,
            Err(e) => {
                warn!("Ignoring unparsable callback URL: {}", e);
                return self.is_authenticated();
            }
        };

        let mut code = None;
        let mut error = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                _ => {}
            }
        }

        if url.query().is_some() {
            url.set_query(None);
            browser.replace_url(url.as_str());
        }

        if let Some(error) = error {
            error!("Error during Spotify authorization: {}", error);
            self.fail_login();
            return false;
        }

        let Some(code) = code else {
            return self.is_authenticated();
        };

        match self.pkce.exchange_code(&code).await {
            Ok(response) => {
                self.tokens.set_tokens(&response);
                *self.state.lock() = AuthState::Authenticated;
                info!("Token stored after authorization callback.");
                true
            }
            Err(e) => {
                error!("Failed to exchange code for token: {}", e);
                self.fail_login();
                false
            }
        }
    }

    fn fail_login(&self) {
        self.pkce.clear_verifier();
        self.tokens.clear();
        *self.state.lock() = AuthState::LoggedOut;
    }

    pub fn is_authenticated(&self) -> bool {
        self.get_access_token().is_some()
    }

    pub fn get_access_token(&self) -> Option<String> {
        self.tokens.get_valid_access_token()
    }

    /// True while the session can still produce a token: either the access
    /// token is valid or a refresh token is held to get a new one.
    pub fn has_session(&self) -> bool {
        self.is_authenticated() || self.tokens.refresh_token().is_some()
    }

    /// Like `is_authenticated`, but waits for a pending refresh when only a
    /// refresh token survived, e.g. right after startup.
    pub async fn restore_session(&self) -> bool {
        self.tokens.wait_for_access_token().await.is_some()
    }

    /// Reacts to a failed provider call. Only a 401 triggers recovery: one
    /// refresh, and `true` means the caller should retry once. A failed
    /// refresh logs the user out.
    pub async fn handle_api_error(&self, error: &ApiError) -> bool {
        if error.status() != Some(401) {
            return false;
        }

        info!("Spotify API returned 401, attempting to refresh the token.");
        if self.tokens.refresh().await {
            info!("Token refreshed, retrying the operation.");
            return true;
        }

        error!("Token refresh failed. Logging out.");
        self.logout();
        false
    }

    pub fn logout(&self) {
        self.tokens.clear();
        self.pkce.clear_verifier();
        *self.state.lock() = AuthState::LoggedOut;
        for hook in self.logout_hooks.lock().iter() {
            hook();
        }
        info!("Logged out, all tokens cleared from storage.");
    }
}
