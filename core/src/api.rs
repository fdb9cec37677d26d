use crate::models::{PlayingTrack, PlaylistSummary};
use async_trait::async_trait;
use futures::stream::TryStreamExt;
use log::{debug, warn};
use rspotify::{
    http::HttpError,
    model::{PlayableId, PlayableItem, PlaylistId, TrackId},
    prelude::*,
    AuthCodeSpotify, ClientError, Config, Credentials, OAuth, Token,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not authenticated with Spotify")]
    NotAuthenticated,
    #[error("Spotify rejected the access token (401)")]
    Unauthorized,
    #[error("Spotify returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Network failure: {0}")]
    Network(String),
    #[error("Profile fetch failed: {0}")]
    ProfileFetchFailed(String),
    #[error("Playlist operation failed: {0}")]
    PlaylistOperationFailed(String),
    #[error("Invalid Spotify ID: {0}")]
    InvalidId(String),
}

impl ApiError {
    /// HTTP status carried by the error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized => Some(401),
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Wraps a provider failure of a playlist call. Authentication errors
    /// keep their kind so callers can still react to them.
    pub fn into_playlist_failure(self) -> Self {
        match self {
            ApiError::Unauthorized => ApiError::Unauthorized,
            ApiError::NotAuthenticated => ApiError::NotAuthenticated,
            err @ ApiError::PlaylistOperationFailed(_) => err,
            other => ApiError::PlaylistOperationFailed(other.to_string()),
        }
    }
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        if let ClientError::Http(http) = &err {
            match http.as_ref() {
                HttpError::StatusCode(response) => {
                    let status = response.status().as_u16();
                    if status == 401 {
                        return ApiError::Unauthorized;
                    }
                    return ApiError::Status {
                        status,
                        message: err.to_string(),
                    };
                }
                _ => return ApiError::Network(err.to_string()),
            }
        }
        ApiError::Network(err.to_string())
    }
}

/// The provider operations the recorder needs, behind a seam so the gateway
/// can be exercised without Spotify.
#[async_trait]
pub trait SpotifyApi: Send + Sync {
    /// Replaces the bearer token used by subsequent calls.
    async fn set_access_token(&self, token: Option<String>);

    /// The track on the active device, only while it is actually playing.
    async fn current_track(&self) -> Result<Option<PlayingTrack>, ApiError>;

    async fn add_track_to_playlist(
        &self,
        playlist_id: &str,
        track_uri: &str,
    ) -> Result<(), ApiError>;

    /// Creates a public playlist owned by the current user.
    async fn create_playlist(
        &self,
        name: &str,
        description: &str,
    ) -> Result<PlaylistSummary, ApiError>;

    async fn user_playlists(&self) -> Result<Vec<PlaylistSummary>, ApiError>;

    async fn playlist(&self, playlist_id: &str) -> Result<PlaylistSummary, ApiError>;
}

/// `SpotifyApi` backed by rspotify.
///
/// rspotify's own refreshing is switched off: tokens are owned by the
/// [`TokenStore`](crate::auth::TokenStore) and pushed in before each call.
pub struct RspotifyApi {
    spotify: Arc<AuthCodeSpotify>,
}

impl RspotifyApi {
    pub fn new(client_id: &str) -> Self {
        let config = Config {
            token_cached: false,
            token_refreshing: false,
            ..Default::default()
        };
        let spotify = AuthCodeSpotify::with_config(
            Credentials::new_pkce(client_id),
            OAuth::default(),
            config,
        );
        Self {
            spotify: Arc::new(spotify),
        }
    }
}

fn playlist_id(id: &str) -> Result<PlaylistId<'_>, ApiError> {
    PlaylistId::from_id(id).map_err(|_| ApiError::InvalidId(id.to_string()))
}

#[async_trait]
impl SpotifyApi for RspotifyApi {
    async fn set_access_token(&self, token: Option<String>) {
        let token_mutex = self.spotify.get_token();
        match token_mutex.lock().await {
            Ok(mut guard) => {
                *guard = token.map(|access_token| Token {
                    access_token,
                    expires_at: None,
                    ..Default::default()
                });
            }
            Err(_) => warn!("Spotify client token lock failed"),
        };
    }

    async fn current_track(&self) -> Result<Option<PlayingTrack>, ApiError> {
        let Some(context) = self.spotify.current_user_playing_item().await? else {
            return Ok(None);
        };
        if !context.is_playing {
            return Ok(None);
        }

        match context.item {
            Some(PlayableItem::Track(track)) => {
                // Local files have no Spotify ID and cannot be added to a playlist.
                let Some(id) = track.id else {
                    debug!("Skipping local track '{}'", track.name);
                    return Ok(None);
                };
                Ok(Some(PlayingTrack {
                    id: id.id().to_string(),
                    uri: id.uri(),
                    name: track.name,
                    artists: track.artists.into_iter().map(|a| a.name).collect(),
                }))
            }
            _ => Ok(None),
        }
    }

    async fn add_track_to_playlist(
        &self,
        playlist_id_str: &str,
        track_uri: &str,
    ) -> Result<(), ApiError> {
        let playlist = playlist_id(playlist_id_str)?;
        let track = TrackId::from_uri(track_uri)
            .map_err(|_| ApiError::InvalidId(track_uri.to_string()))?;

        self.spotify
            .playlist_add_items(playlist, [PlayableId::Track(track)], None)
            .await
            .map_err(|e| ApiError::from(e).into_playlist_failure())?;
        Ok(())
    }

    async fn create_playlist(
        &self,
        name: &str,
        description: &str,
    ) -> Result<PlaylistSummary, ApiError> {
        let user = self.spotify.current_user().await?;
        let pl = self
            .spotify
            .user_playlist_create(user.id, name, Some(true), None, Some(description))
            .await
            .map_err(|e| ApiError::from(e).into_playlist_failure())?;

        let id = pl.id.id().to_string();
        Ok(PlaylistSummary {
            web_url: PlaylistSummary::web_url_from(&id, &pl.external_urls),
            id,
            name: pl.name,
            total_tracks: pl.tracks.total,
            is_public: pl.public.unwrap_or(true),
            is_collaborative: pl.collaborative,
            owner_name: pl.owner.display_name.unwrap_or(pl.owner.id.to_string()),
        })
    }

    async fn user_playlists(&self) -> Result<Vec<PlaylistSummary>, ApiError> {
        let mut playlists = Vec::new();
        let mut stream = self.spotify.current_user_playlists();

        while let Some(pl) = stream
            .try_next()
            .await
            .map_err(|e| ApiError::from(e).into_playlist_failure())?
        {
            let owner_name = pl.owner.display_name.unwrap_or(pl.owner.id.to_string());
            let id = pl.id.id().to_string();

            playlists.push(PlaylistSummary {
                web_url: PlaylistSummary::web_url_from(&id, &pl.external_urls),
                id,
                name: pl.name,
                total_tracks: pl.tracks.total,
                is_public: pl.public.unwrap_or(false),
                is_collaborative: pl.collaborative,
                owner_name,
            });
        }

        Ok(playlists)
    }

    async fn playlist(&self, playlist_id_str: &str) -> Result<PlaylistSummary, ApiError> {
        let id = playlist_id(playlist_id_str)?;
        let pl = self
            .spotify
            .playlist(id, None, None)
            .await
            .map_err(|e| ApiError::from(e).into_playlist_failure())?;

        let id = pl.id.id().to_string();
        Ok(PlaylistSummary {
            web_url: PlaylistSummary::web_url_from(&id, &pl.external_urls),
            id,
            name: pl.name,
            total_tracks: pl.tracks.total,
            is_public: pl.public.unwrap_or(false),
            is_collaborative: pl.collaborative,
            owner_name: pl.owner.display_name.unwrap_or(pl.owner.id.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_of_errors() {
        assert_eq!(ApiError::Unauthorized.status(), Some(401));
        assert_eq!(
            ApiError::Status {
                status: 503,
                message: "unavailable".to_string()
            }
            .status(),
            Some(503)
        );
        assert_eq!(ApiError::Network("reset".to_string()).status(), None);
        assert_eq!(ApiError::NotAuthenticated.status(), None);
    }

    #[test]
    fn test_playlist_failure_keeps_unauthorized() {
        assert!(matches!(
            ApiError::Unauthorized.into_playlist_failure(),
            ApiError::Unauthorized
        ));
        assert!(matches!(
            ApiError::Network("reset".to_string()).into_playlist_failure(),
            ApiError::PlaylistOperationFailed(msg) if msg.contains("reset")
        ));
    }

    #[test]
    fn test_invalid_playlist_id_is_rejected() {
        assert!(matches!(
            playlist_id("not a valid id!"),
            Err(ApiError::InvalidId(_))
        ));
        assert!(playlist_id("37i9dQZF1DXcBWIGoYBM5M").is_ok());
    }

    #[tokio::test]
    async fn test_set_access_token_replaces_client_token() {
        let api = RspotifyApi::new("client-id");

        api.set_access_token(Some("tok".to_string())).await;
        let token = api.spotify.get_token().lock().await.unwrap().clone();
        assert_eq!(token.map(|t| t.access_token).as_deref(), Some("tok"));

        api.set_access_token(None).await;
        let token = api.spotify.get_token().lock().await.unwrap().clone();
        assert!(token.is_none());
    }
}
