//! PKCE (Proof Key for Code Exchange, RFC 7636) for the authorization-code flow.
//!
//! A single verifier lives in storage between the authorize redirect and the
//! callback. It is consumed by exactly one exchange attempt.

use super::token::{request_token, TokenResponse};
use super::AuthError;
use crate::config::SpotifyConfig;
use crate::storage::{keys, KeyValueStore};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use log::{debug, error};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use url::Url;

pub const VERIFIER_LEN: usize = 128;

/// `BASE64URL(SHA256(verifier))` without padding.
pub fn code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

pub struct PkceService {
    config: Arc<SpotifyConfig>,
    storage: Arc<dyn KeyValueStore>,
    http: reqwest::Client,
}

impl PkceService {
    pub fn new(
        config: Arc<SpotifyConfig>,
        storage: Arc<dyn KeyValueStore>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            config,
            storage,
            http,
        }
    }

    /// Generates a 128-character alphanumeric verifier and makes it the only
    /// live one, replacing any previous attempt.
    pub fn generate_verifier(&self) -> String {
        let verifier: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(VERIFIER_LEN)
            .map(char::from)
            .collect();
        self.storage.set(keys::CODE_VERIFIER, &verifier);
        verifier
    }

    pub fn stored_verifier(&self) -> Option<String> {
        self.storage.get(keys::CODE_VERIFIER)
    }

    pub fn clear_verifier(&self) {
        self.storage.remove(keys::CODE_VERIFIER);
    }

    /// Creates a fresh verifier and returns the provider's authorize URL for it.
    pub fn build_authorization_url(&self) -> Result<String, AuthError> {
        let verifier = self.generate_verifier();
        let challenge = code_challenge(&verifier);
        let scope = self.config.scope_string();

        let url = Url::parse_with_params(
            &self.config.endpoints.authorize,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", scope.as_str()),
                ("code_challenge_method", "S256"),
                ("code_challenge", challenge.as_str()),
            ],
        )?;

        Ok(url.into())
    }

    /// Trades an authorization code for tokens.
    ///
    /// The live verifier is deleted after the attempt whatever its outcome.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, AuthError> {
        let Some(verifier) = self.stored_verifier() else {
            error!("Code verifier not found in storage during exchange.");
            return Err(AuthError::MissingVerifier);
        };

        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", verifier.as_str()),
        ];
        let result = request_token(&self.http, &self.config.endpoints.token, &form).await;
        self.clear_verifier();

        match &result {
            Ok(_) => debug!("Authorization code exchanged for tokens."),
            Err(e) => error!("Spotify token exchange failed: {}", e),
        }
        result
    }
}
