use anyhow::Result;
use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::SyncError;
use crate::sync::types::{FetchParams, SourceAdapter, SourceRecord};
use crate::sync::{natural_key, normalize_name, now_ms};

pub const SOURCE_ID: &str = "odds-api";

#[derive(Debug, Deserialize)]
struct ApiEvent {
    id: String,
    sport_key: String,
    commence_time: Option<String>,
    home_team: String,
    away_team: String,
    #[serde(default)]
    bookmakers: Vec<ApiBookmaker>,
}

#[derive(Debug, Deserialize)]
struct ApiBookmaker {
    key: String,
    #[serde(default)]
    markets: Vec<ApiMarket>,
}

#[derive(Debug, Deserialize)]
struct ApiMarket {
    key: String,
    #[serde(default)]
    outcomes: Vec<ApiOutcome>,
}

#[derive(Debug, Deserialize)]
struct ApiOutcome {
    name: String,
    price: f64,
}

fn parse_rfc3339_to_ms(ts: &str) -> u64 {
    OffsetDateTime::parse(ts, &Rfc3339)
        .ok()
        .map(|dt| dt.unix_timestamp())
        .and_then(|x| u64::try_from(x).ok())
        .map(|s| s * 1_000)
        .unwrap_or(0)
}

/// Odds-API provider: JSON upstream listing games with per-bookmaker prices.
pub struct OddsApiAdapter {
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

impl OddsApiAdapter {
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
        let events: Vec<ApiEvent> = serde_json::from_str(s)
            .map_err(|e| SyncError::permanent(format!("parsing odds api json: {e}")))?;

        // One clock read per call; every record in the batch carries the same
        // fetch stamp so freshness compares whole batches, not rows.
        let fetched_at_ms = now_ms();

        let mut out = Vec::with_capacity(events.len());
        for ev in events {
            let mut odds = Map::new();
            for bk in &ev.bookmakers {
                let mut markets = Map::new();
                for m in &bk.markets {
                    let mut prices = Map::new();
                    for o in &m.outcomes {
                        prices.insert(normalize_name(&o.name), json!(o.price));
                    }
                    markets.insert(m.key.clone(), Value::Object(prices));
                }
                odds.insert(bk.key.clone(), Value::Object(markets));
            }

            let payload = json!({
                "kind": "odds",
                "sport": ev.sport_key,
                "home_team": normalize_name(&ev.home_team),
                "away_team": normalize_name(&ev.away_team),
                "commence_time_ms": ev.commence_time.as_deref().map(parse_rfc3339_to_ms).unwrap_or(0),
                "odds": Value::Object(odds),
            });

            out.push(SourceRecord {
                natural_key: natural_key(SOURCE_ID, &[&ev.sport_key, &ev.id]),
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
impl SourceAdapter for OddsApiAdapter {
    async fn fetch(&self, params: &FetchParams) -> Result<Vec<SourceRecord>> {
        // Fixture mode ignores params; the HTTP mode forwards them upstream.
        let _ = params;
        match &self.mode {
            #[cfg(feature = "adapters-fixtures")]
            Mode::Fixture(s) => Self::parse_records_from_str(s),

            #[cfg(feature = "adapters-http")]
            Mode::Http { url, client } => {
                let mut req = client.get(url);
                if let Some(sport) = &params.sport {
                    req = req.query(&[("sport", sport)]);
                }
                if let Some(from) = &params.date_from {
                    req = req.query(&[("commenceTimeFrom", from)]);
                }
                if let Some(to) = &params.date_to {
                    req = req.query(&[("commenceTimeTo", to)]);
                }

                let resp = req
                    .send()
                    .await
                    .map_err(|e| SyncError::transient(format!("odds-api http: {e}")))?;
                let status = resp.status();
                if status.is_server_error() {
                    return Err(SyncError::transient(format!("odds-api upstream {status}")).into());
                }
                if !status.is_success() {
                    return Err(SyncError::permanent(format!("odds-api upstream {status}")).into());
                }
                let body = resp
                    .text()
                    .await
                    .map_err(|e| SyncError::transient(format!("odds-api body: {e}")))?;
                Self::parse_records_from_str(&body)
            }
        }
    }

    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }
}
