// src/sync/adapters/score_feed.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use serde_json::json;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::error::SyncError;
use crate::sync::types::{FetchParams, SourceAdapter, SourceRecord};
use crate::sync::{natural_key, normalize_name, now_ms};

pub const SOURCE_ID: &str = "score-feed";

#[derive(Debug, Deserialize)]
struct Scoreboard {
    #[serde(rename = "game", default)]
    game: Vec<Game>,
}

#[derive(Debug, Deserialize)]
struct Game {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@status")]
    status: Option<String>,
    #[serde(rename = "@start")]
    start: Option<String>,
    home: Team,
    away: Team,
}

#[derive(Debug, Deserialize)]
struct Team {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@score")]
    score: Option<u32>,
}

fn parse_rfc2822_to_ms(ts: &str) -> u64 {
    OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC).unix_timestamp())
        .and_then(|x| u64::try_from(x).ok())
        .map(|s| s * 1_000)
        .unwrap_or(0)
}

/// Legacy scoreboard feed: XML upstream with per-game status and scores.
pub struct ScoreFeedAdapter {
    mode: Mode,
}

enum Mode {
    #[cfg(feature = "adapters-fixtures")]
    Fixture(String),
    #[cfg(feature = "adapters-http")]
    Http {
        url: String,
        client: reqwest::Client,
    },
}

impl ScoreFeedAdapter {
    #[cfg(feature = "adapters-fixtures")]
    pub fn from_fixture(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
        }
    }

    #[cfg(feature = "adapters-http")]
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            mode: Mode::Http {
                url: url.into(),
                client: reqwest::Client::new(),
            },
        }
    }

    fn parse_records_from_str(s: &str) -> Result<Vec<SourceRecord>> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(s);
        let board: Scoreboard = from_str(&xml_clean)
            .map_err(|e| SyncError::permanent(format!("parsing score feed xml: {e}")))
            .context("score feed payload")?;

        let fetched_at_ms = now_ms();

        let mut out = Vec::with_capacity(board.game.len());
        for g in board.game {
            if g.id.trim().is_empty() {
                continue;
            }
            let payload = json!({
                "kind": "score",
                "status": g.status.as_deref().unwrap_or("scheduled"),
                "start_ms": g.start.as_deref().map(parse_rfc2822_to_ms).unwrap_or(0),
                "home_team": { "name": normalize_name(&g.home.name), "score": g.home.score },
                "away_team": { "name": normalize_name(&g.away.name), "score": g.away.score },
            });

            out.push(SourceRecord {
                natural_key: natural_key(SOURCE_ID, &[&g.id]),
                source_id: SOURCE_ID.to_string(),
                fetched_at_ms,
                payload,
            });
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("sync_parse_ms").record(ms);
        counter!("sync_records_parsed_total").increment(out.len() as u64);
        Ok(out)
    }
}

#[async_trait]
impl SourceAdapter for ScoreFeedAdapter {
    async fn fetch(&self, params: &FetchParams) -> Result<Vec<SourceRecord>> {
        let _ = params;
        match &self.mode {
            #[cfg(feature = "adapters-fixtures")]
            Mode::Fixture(s) => Self::parse_records_from_str(s),

            #[cfg(feature = "adapters-http")]
            Mode::Http { url, client } => {
                let mut req = client.get(url);
                if let Some(from) = &params.date_from {
                    req = req.query(&[("date", from)]);
                }
                let resp = req
                    .send()
                    .await
                    .map_err(|e| SyncError::transient(format!("score-feed http: {e}")))?;
                let status = resp.status();
                if status.is_server_error() {
                    return Err(SyncError::transient(format!("score-feed upstream {status}")).into());
                }
                if !status.is_success() {
                    return Err(SyncError::permanent(format!("score-feed upstream {status}")).into());
                }
                let body = resp
                    .text()
                    .await
                    .map_err(|e| SyncError::transient(format!("score-feed body: {e}")))
                    .context("score-feed http .text()")?;
                Self::parse_records_from_str(&body)
            }
        }
    }

    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

#[cfg(all(test, feature = "adapters-fixtures"))]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"<scoreboard>
        <game id="401585441" status="in_progress" start="Wed, 14 Jan 2026 19:10:00 +0000">
            <home name="Boston Celtics" score="54"/>
            <away name="Miami&nbsp;Heat" score="49"/>
        </game>
        <game id="401585442" status="scheduled" start="Thu, 15 Jan 2026 00:10:00 +0000">
            <home name="Denver Nuggets"/>
            <away name="Phoenix Suns"/>
        </game>
    </scoreboard>"#;

    #[tokio::test]
    async fn parses_fixture_games() {
        let adapter = ScoreFeedAdapter::from_fixture(FIXTURE);
        let recs = adapter.fetch(&FetchParams::default()).await.unwrap();
        assert_eq!(recs.len(), 2);

        let live = &recs[0];
        assert_eq!(live.natural_key, "score-feed:401585441");
        assert_eq!(live.payload["status"], "in_progress");
        assert_eq!(live.payload["home_team"]["score"], 54);
        assert_eq!(live.payload["away_team"]["name"], "Miami Heat");

        let upcoming = &recs[1];
        assert_eq!(upcoming.payload["status"], "scheduled");
        assert!(upcoming.payload["home_team"]["score"].is_null());
    }

    #[tokio::test]
    async fn broken_xml_is_an_error() {
        let adapter = ScoreFeedAdapter::from_fixture("<scoreboard><game></scoreboard>");
        assert!(adapter.fetch(&FetchParams::default()).await.is_err());
    }
}
