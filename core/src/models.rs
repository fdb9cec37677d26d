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

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The playlist a recording session appends to. Fixed for the session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistTarget {
    pub id: String,
    pub web_url: String,
}

/// The track currently playing on the user's active device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayingTrack {
    pub id: String,
    pub uri: String,
    pub name: String,
    pub artists: Vec<String>,
}

impl PlayingTrack {
    pub fn artist_line(&self) -> String {
        self.artists.join(", ")
    }
}

/// One entry of the session's ledger, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedTrack {
    pub id: String,
    pub display_name: String,
    pub confirmed: bool, // true once Spotify acknowledged the append
}

impl fmt::Display for AddedTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.confirmed { "ADDED" } else { "PENDING" };
        write!(f, "[{}] {} ({})", status, self.display_name, self.id)
    }
}

/// What a finished recording produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingReport {
    pub playlist: PlaylistTarget,
    pub tracks: Vec<AddedTrack>,
}

impl RecordingReport {
    pub fn confirmed_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.confirmed).count()
    }
}

/// Summary of a playlist for listing and choosing purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    pub total_tracks: u32,
    pub is_public: bool,
    pub is_collaborative: bool,
    pub owner_name: String,
    pub web_url: String,
}

impl PlaylistSummary {
    pub fn target(&self) -> PlaylistTarget {
        PlaylistTarget {
            id: self.id.clone(),
            web_url: self.web_url.clone(),
        }
    }

    /// Spotify's external URL map, falling back to the canonical open.spotify.com link.
    pub fn web_url_from(id: &str, external_urls: &HashMap<String, String>) -> String {
        external_urls
            .get("spotify")
            .cloned()
            .unwrap_or_else(|| format!("https://open.spotify.com/playlist/{}", id))
    }
}

/// Case-insensitive match on playlist name or owner. A blank query keeps everything.
pub fn filter_playlists<'a>(
    playlists: &'a [PlaylistSummary],
    query: &str,
) -> Vec<&'a PlaylistSummary> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return playlists.iter().collect();
    }
    playlists
        .iter()
        .filter(|p| {
            p.name.to_lowercase().contains(&query) || p.owner_name.to_lowercase().contains(&query)
        })
        .collect()
}

fn us_date(date: NaiveDate) -> String {
    date.format("%m-%d-%Y").to_string()
}

/// `Jam [MM-DD-YYYY]`
pub fn default_playlist_name(date: NaiveDate) -> String {
    format!("Jam [{}]", us_date(date))
}

pub fn playlist_description(date: NaiveDate) -> String {
    format!("Created by Spotify Jam Saver on {}", us_date(date))
}

/// Cached subset of `GET /v1/me`. Unknown fields are ignored, missing ones default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub external_urls: HashMap<String, String>,
    #[serde(default)]
    pub followers: Option<Followers>,
    #[serde(default)]
    pub images: Vec<ProfileImage>,
    #[serde(default)]
    pub explicit_content: Option<ExplicitContent>,
}

impl UserProfile {
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Followers {
    #[serde(default)]
    pub href: Option<String>,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileImage {
    pub url: String,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplicitContent {
    pub filter_enabled: bool,
    pub filter_locked: bool,
}
