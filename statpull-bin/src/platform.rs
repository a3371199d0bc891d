//! Client for the stats platform and the records it serves.
//!
//! The platform exposes two resources per team:
//!
//! - `GET {base_url}/teams/{id}`: the team itself
//! - `GET {base_url}/teams/{id}/matches`: its matches, each with embedded
//!   per-player stat lines
//!
//! Every response is classified into an [`Outcome`], so the retry wrapper
//! can tell throttling apart from missing teams.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use statpull_lib::{ErrorKind, Keyed, Outcome, Result};
use std::time::Duration;

/// A team as served by `/teams/{id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Team {
    pub(crate) id: u64,
    pub(crate) name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) region: Option<String>,
}

impl Keyed for Team {
    type Key = u64;

    fn key(&self) -> u64 {
        self.id
    }
}

/// A played match, without its stat lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct Match {
    pub(crate) id: u64,
    pub(crate) home_id: u64,
    pub(crate) away_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) played_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) score: Option<String>,
}

impl Keyed for Match {
    type Key = u64;

    fn key(&self) -> u64 {
        self.id
    }
}

/// Performance of one player in one match
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct StatLine {
    pub(crate) match_id: u64,
    pub(crate) player_id: u64,
    pub(crate) player: String,
    pub(crate) kills: u32,
    pub(crate) deaths: u32,
    pub(crate) assists: u32,
}

impl Keyed for StatLine {
    type Key = (u64, u64);

    fn key(&self) -> Self::Key {
        (self.match_id, self.player_id)
    }
}

/// Wire shape of an entry of `/teams/{id}/matches`
#[derive(Debug, Deserialize)]
pub(crate) struct MatchPayload {
    id: u64,
    home_id: u64,
    away_id: u64,
    #[serde(default)]
    played_at: Option<String>,
    #[serde(default)]
    score: Option<String>,
    #[serde(default)]
    stats: Vec<StatPayload>,
}

#[derive(Debug, Deserialize)]
struct StatPayload {
    player_id: u64,
    player: String,
    #[serde(default)]
    kills: u32,
    #[serde(default)]
    deaths: u32,
    #[serde(default)]
    assists: u32,
}

impl MatchPayload {
    /// Split the payload into the match record and its stat lines
    pub(crate) fn into_records(self) -> (Match, Vec<StatLine>) {
        let lines = self
            .stats
            .into_iter()
            .map(|stat| StatLine {
                match_id: self.id,
                player_id: stat.player_id,
                player: stat.player,
                kills: stat.kills,
                deaths: stat.deaths,
                assists: stat.assists,
            })
            .collect();
        let record = Match {
            id: self.id,
            home_id: self.home_id,
            away_id: self.away_id,
            played_at: self.played_at,
            score: self.score,
        };
        (record, lines)
    }
}

/// Thin, cloneable HTTP client for the stats platform
#[derive(Debug, Clone)]
pub(crate) struct Platform {
    client: reqwest::Client,
    base_url: Url,
}

impl Platform {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built or `base_url` cannot be a
    /// base for relative paths
    pub(crate) fn new(base_url: Url, user_agent: &str, timeout: Duration) -> Result<Self> {
        if base_url.cannot_be_a_base() {
            return Err(ErrorKind::InvalidConfig(format!(
                "`{base_url}` cannot be used as base URL"
            )));
        }
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, base_url })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub(crate) async fn team(&self, id: &str) -> Outcome<Team> {
        let url = self.url(&["teams", id]);
        log::debug!("GET {url}");
        Outcome::from_send_result(self.client.get(url).send().await).await
    }

    pub(crate) async fn matches(&self, team_id: &str) -> Outcome<Vec<MatchPayload>> {
        let url = self.url(&["teams", team_id, "matches"]);
        log::debug!("GET {url}");
        Outcome::from_send_result(self.client.get(url).send().await).await
    }
}
