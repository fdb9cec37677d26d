use crate::api::{ApiError, SpotifyApi};
use crate::auth::Authenticator;
use crate::models::{playlist_description, PlayingTrack, PlaylistSummary};
use crate::recorder::RecorderApi;
use async_trait::async_trait;
use log::{error, warn};
use std::future::Future;
use std::sync::Arc;

/// Every provider call goes through here: the current token is pushed into
/// the client first, and a 401 gets exactly one refresh-and-retry.
pub struct ApiGateway {
    auth: Arc<Authenticator>,
    api: Arc<dyn SpotifyApi>,
}

impl ApiGateway {
    pub fn new(auth: Arc<Authenticator>, api: Arc<dyn SpotifyApi>) -> Self {
        Self { auth, api }
    }

    pub fn auth(&self) -> &Arc<Authenticator> {
        &self.auth
    }

    async fn sync_token(&self) -> Result<String, ApiError> {
        let token = self.auth.get_access_token();
        self.api.set_access_token(token.clone()).await;
        token.ok_or(ApiError::NotAuthenticated)
    }

    /// Runs `op` with a valid access token.
    ///
    /// `op` is invoked at most twice. A failure after the retry is returned
    /// as is, without a second recovery attempt.
    pub async fn call<T, F, Fut>(&self, what: &str, op: F) -> Result<T, ApiError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let token = self.sync_token().await?;
        let err = match op(token).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        warn!("Spotify call '{}' failed: {}", what, err);
        if !self.auth.handle_api_error(&err).await {
            return Err(err);
        }

        let token = self.sync_token().await?;
        op(token).await.map_err(|err| {
            error!("Spotify call '{}' failed after retry: {}", what, err);
            err
        })
    }

    pub async fn current_track(&self) -> Result<Option<PlayingTrack>, ApiError> {
        let api: &dyn SpotifyApi = &*self.api;
        self.call("current track", move |_| api.current_track()).await
    }

    pub async fn add_track_to_playlist(
        &self,
        playlist_id: &str,
        track_uri: &str,
    ) -> Result<(), ApiError> {
        let api: &dyn SpotifyApi = &*self.api;
        self.call("add track", move |_| api.add_track_to_playlist(playlist_id, track_uri))
            .await
            .map_err(ApiError::into_playlist_failure)
    }

    /// Creates a public playlist stamped with today's date.
    pub async fn create_playlist(&self, name: &str) -> Result<PlaylistSummary, ApiError> {
        let today = playlist_description(chrono::Local::now().date_naive());
        let description = today.as_str();
        let api: &dyn SpotifyApi = &*self.api;
        self.call("create playlist", move |_| api.create_playlist(name, description))
            .await
            .map_err(ApiError::into_playlist_failure)
    }

    pub async fn user_playlists(&self) -> Result<Vec<PlaylistSummary>, ApiError> {
        let api: &dyn SpotifyApi = &*self.api;
        self.call("list playlists", move |_| api.user_playlists())
            .await
            .map_err(ApiError::into_playlist_failure)
    }

    pub async fn playlist(&self, playlist_id: &str) -> Result<PlaylistSummary, ApiError> {
        let api: &dyn SpotifyApi = &*self.api;
        self.call("get playlist", move |_| api.playlist(playlist_id))
            .await
            .map_err(ApiError::into_playlist_failure)
    }
}

#[async_trait]
impl RecorderApi for ApiGateway {
    async fn now_playing(&self) -> Result<Option<PlayingTrack>, ApiError> {
        self.current_track().await
    }

    async fn append_track(&self, playlist_id: &str, track: &PlayingTrack) -> Result<(), ApiError> {
        self.add_track_to_playlist(playlist_id, &track.uri).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::tests::authenticator;
    use crate::auth::TokenResponse;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Scripted provider: pops one queued failure per call, succeeds otherwise.
    #[derive(Default)]
    pub(crate) struct MockApi {
        pub tokens_seen: Mutex<Vec<Option<String>>>,
        pub failures: Mutex<VecDeque<ApiError>>,
        pub calls: AtomicUsize,
    }

    impl MockApi {
        fn next(&self) -> Result<(), ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.failures.lock().pop_front() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    fn summary(id: &str, name: &str) -> PlaylistSummary {
        PlaylistSummary {
            id: id.to_string(),
            name: name.to_string(),
            total_tracks: 0,
            is_public: true,
            is_collaborative: false,
            owner_name: "me".to_string(),
            web_url: format!("https://open.spotify.com/playlist/{}", id),
        }
    }

    #[async_trait]
    impl SpotifyApi for MockApi {
        async fn set_access_token(&self, token: Option<String>) {
            self.tokens_seen.lock().push(token);
        }

        async fn current_track(&self) -> Result<Option<PlayingTrack>, ApiError> {
            self.next()?;
            Ok(Some(PlayingTrack {
                id: "t1".to_string(),
                uri: "spotify:track:t1".to_string(),
                name: "Song".to_string(),
                artists: vec!["Band".to_string()],
            }))
        }

        async fn add_track_to_playlist(&self, _: &str, _: &str) -> Result<(), ApiError> {
            self.next()
        }

        async fn create_playlist(
            &self,
            name: &str,
            description: &str,
        ) -> Result<PlaylistSummary, ApiError> {
            self.next()?;
            assert!(description.starts_with("Created by Spotify Jam Saver on "));
            Ok(summary("new", name))
        }

        async fn user_playlists(&self) -> Result<Vec<PlaylistSummary>, ApiError> {
            self.next()?;
            Ok(vec![summary("p1", "Friday Jam")])
        }

        async fn playlist(&self, playlist_id: &str) -> Result<PlaylistSummary, ApiError> {
            self.next()?;
            Ok(summary(playlist_id, "Friday Jam"))
        }
    }

    async fn refresh_server(status: u16) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_json(json!({ "access_token": "new", "expires_in": 3600 })),
            )
            .mount(&server)
            .await;
        server
    }

    async fn gateway(server: &MockServer, api: Arc<MockApi>) -> (ApiGateway, Arc<MemoryStore>) {
        let storage = Arc::new(MemoryStore::new());
        let auth = authenticator(
            storage.clone(),
            Arc::new(ManualClock::new(0)),
            &format!("{}/api/token", server.uri()),
        );
        auth.tokens().set_tokens(&TokenResponse {
            access_token: "old".to_string(),
            expires_in: 3600,
            refresh_token: Some("r1".to_string()),
        });
        (ApiGateway::new(Arc::new(auth), api), storage)
    }

    #[tokio::test]
    async fn test_pushes_token_before_call() {
        let server = refresh_server(200).await;
        let api = Arc::new(MockApi::default());
        let (gateway, _) = gateway(&server, api.clone()).await;

        let playlists = gateway.user_playlists().await.unwrap();
        assert_eq!(playlists.len(), 1);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*api.tokens_seen.lock(), vec![Some("old".to_string())]);
    }

    #[tokio::test]
    async fn test_401_refreshes_and_retries_once() {
        let server = refresh_server(200).await;
        let api = Arc::new(MockApi::default());
        api.failures.lock().push_back(ApiError::Unauthorized);
        let (gateway, _) = gateway(&server, api.clone()).await;

        let track = gateway.current_track().await.unwrap();
        assert_eq!(track.map(|t| t.id).as_deref(), Some("t1"));
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            *api.tokens_seen.lock(),
            vec![Some("old".to_string()), Some("new".to_string())]
        );
    }

    #[tokio::test]
    async fn test_second_401_is_surfaced() {
        let server = refresh_server(200).await;
        let api = Arc::new(MockApi::default());
        api.failures.lock().push_back(ApiError::Unauthorized);
        api.failures.lock().push_back(ApiError::Unauthorized);
        let (gateway, _) = gateway(&server, api.clone()).await;

        let result = gateway.current_track().await;
        assert!(matches!(result, Err(ApiError::Unauthorized)));
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_401_with_failed_refresh_logs_out() {
        let server = refresh_server(400).await;
        let api = Arc::new(MockApi::default());
        api.failures.lock().push_back(ApiError::Unauthorized);
        let (gateway, storage) = gateway(&server, api.clone()).await;

        let result = gateway.add_track_to_playlist("p1", "spotify:track:t1").await;
        assert!(matches!(result, Err(ApiError::Unauthorized)));
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert!(storage.is_empty());
        assert!(!gateway.auth().is_authenticated());
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let server = refresh_server(200).await;
        let api = Arc::new(MockApi::default());
        api.failures.lock().push_back(ApiError::Status {
            status: 403,
            message: "forbidden".to_string(),
        });
        let (gateway, _) = gateway(&server, api.clone()).await;

        let result = gateway.add_track_to_playlist("p1", "spotify:track:t1").await;
        assert!(matches!(result, Err(ApiError::PlaylistOperationFailed(_))));
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert!(gateway.auth().is_authenticated());
    }

    #[tokio::test]
    async fn test_without_token_provider_is_not_called() {
        let server = refresh_server(200).await;
        let api = Arc::new(MockApi::default());
        let (gateway, _) = gateway(&server, api.clone()).await;
        gateway.auth().logout();

        let result = gateway.create_playlist("Jam").await;
        assert!(matches!(result, Err(ApiError::NotAuthenticated)));
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
        assert_eq!(*api.tokens_seen.lock(), vec![None]);
    }
}
