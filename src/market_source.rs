//! REST-backed `MarketSource` (§6 "exchange REST surface": `/markets`,
//! `/events`, grouped by sport fixture). Grounded on
//! `scrapers/polymarket_api.rs`'s `reqwest::Client` + rate-limited
//! `execute_with_retry` idiom and `scrapers/polymarket_gamma.rs`'s loosely
//! typed Gamma response structs (string-or-number fields, `#[serde(rename)]`
//! for camelCase wire names).
//!
//! Soccer fixtures are grouped by `(league, home_team, away_team, date)`
//! into match-level devigged probabilities; `model_quote` has no external
//! model feed wired up and always returns `None`, which keeps calibration
//! in `ModelMode::V0` (pure market-implied) unless an operator later
//! plugs in a model source.

use crate::error::TradingError;
use crate::model::{Contract, EventSpec, MatchOutcome, Prob3};
use crate::orchestrator::MarketSource;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const GAMMA_API_BASE: &str = "https://gamma-api.polymarket.com";
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 200;

fn de_string_f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => s.parse::<f64>().map(Some).map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

fn de_string_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match v {
        Value::Array(arr) => Ok(arr
            .into_iter()
            .filter_map(|x| x.as_str().map(str::to_string))
            .collect()),
        Value::String(s) => serde_json::from_str(&s).map_err(serde::de::Error::custom),
        _ => Ok(Vec::new()),
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GammaMarket {
    slug: String,
    #[serde(rename = "conditionId")]
    condition_id: String,
    question: String,
    #[serde(rename = "endDateIso", default)]
    end_date_iso: Option<String>,
    #[serde(default, deserialize_with = "de_string_f64_opt")]
    liquidity: Option<f64>,
    #[serde(default)]
    closed: Option<bool>,
    #[serde(default, deserialize_with = "de_string_vec")]
    outcomes: Vec<String>,
    #[serde(rename = "outcomePrices", default, deserialize_with = "de_string_vec")]
    outcome_prices: Vec<String>,
    #[serde(rename = "clobTokenIds", default, deserialize_with = "de_string_vec")]
    clob_token_ids: Vec<String>,
    #[serde(rename = "groupItemTitle", default)]
    group_item_title: Option<String>,
    #[serde(rename = "eventSlug", default)]
    event_slug: Option<String>,
}

#[derive(Clone)]
struct GroupedMatch {
    prob: Prob3,
    last_outcome: MatchOutcome,
}

pub struct RestMarketSource {
    client: Client,
    base_url: String,
    tag: String,
    groups: RwLock<HashMap<String, GroupedMatch>>,
}

impl RestMarketSource {
    pub fn new(tag: impl Into<String>) -> Result<Self, TradingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("clobtrader/1.0")
            .build()
            .map_err(|e| TradingError::Fatal(format!("building http client: {e}")))?;
        Ok(Self {
            client,
            base_url: GAMMA_API_BASE.to_string(),
            tag: tag.into(),
            groups: RwLock::new(HashMap::new()),
        })
    }

    async fn fetch_markets(&self) -> Result<Vec<GammaMarket>, TradingError> {
        let url = format!("{}/markets", self.base_url);
        let mut last_err = None;
        for attempt in 0..MAX_RETRIES {
            let resp = self
                .client
                .get(&url)
                .query(&[("tag", self.tag.as_str()), ("closed", "false"), ("limit", "200")])
                .send()
                .await;
            match resp {
                Ok(r) if r.status().is_success() => {
                    return r
                        .json::<Vec<GammaMarket>>()
                        .await
                        .map_err(|e| TradingError::Transient {
                            retry: true,
                            message: format!("decoding markets response: {e}"),
                        });
                }
                Ok(r) => {
                    last_err = Some(format!("gamma markets returned {}", r.status()));
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                }
            }
            sleep(Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt))).await;
        }
        Err(TradingError::Transient {
            retry: true,
            message: last_err.unwrap_or_else(|| "gamma markets exhausted retries".to_string()),
        })
    }

    /// Parses `"Home vs Away"`-style questions into league/team/date
    /// components for `match_key()` grouping. Best-effort: Gamma doesn't
    /// carry structured fixture metadata on the market object itself.
    fn parse_fixture(market: &GammaMarket) -> Option<(String, String, String, chrono::DateTime<chrono::Utc>)> {
        let league = market
            .event_slug
            .clone()
            .unwrap_or_else(|| "unknown-league".to_string());
        let title = market.group_item_title.as_deref().unwrap_or(&market.question);
        let (home, away) = title.split_once(" vs ").or_else(|| title.split_once(" v "))?;
        let match_date = market
            .end_date_iso
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now);
        Some((league, home.trim().to_string(), away.trim().to_string(), match_date))
    }

    fn outcome_for(title_outcome: &str) -> Option<MatchOutcome> {
        match title_outcome.to_ascii_lowercase().as_str() {
            s if s.contains("draw") || s.contains("tie") => Some(MatchOutcome::Draw),
            s if s.contains("home") => Some(MatchOutcome::Home),
            s if s.contains("away") => Some(MatchOutcome::Away),
            _ => None,
        }
    }
}

#[async_trait::async_trait]
impl MarketSource for RestMarketSource {
    async fn discover(&self) -> Result<Vec<Contract>, TradingError> {
        let markets = self.fetch_markets().await?;
        let mut contracts = Vec::with_capacity(markets.len());
        let mut groups: HashMap<String, (f64, f64, f64, MatchOutcome)> = HashMap::new();

        for market in &markets {
            let Some((league, home_team, away_team, match_date)) = Self::parse_fixture(market) else {
                continue;
            };
            let Some(token_id) = market.clob_token_ids.first().cloned() else {
                continue;
            };
            let price = market
                .outcome_prices
                .first()
                .and_then(|p| p.parse::<f64>().ok())
                .unwrap_or(0.5);
            let outcome = market
                .outcomes
                .first()
                .and_then(|o| Self::outcome_for(o))
                .unwrap_or(MatchOutcome::Home);

            let spread = crate::decimal::decimal_from_f64(0.01).unwrap_or_default();
            let mid = crate::decimal::decimal_from_f64(price.clamp(0.001, 0.999)).unwrap_or_default();

            contracts.push(Contract {
                market_id: market.condition_id.clone(),
                token_id,
                slug: market.slug.clone(),
                question: market.question.clone(),
                event: EventSpec::Soccer1X2 {
                    league: league.clone(),
                    home_team: home_team.clone(),
                    away_team: away_team.clone(),
                    match_date,
                    outcome,
                    is_yes_side: true,
                },
                best_bid: mid - spread,
                best_ask: mid + spread,
                mid,
                closed: market.closed.unwrap_or(false),
                end_date: match_date,
                liquidity: crate::decimal::decimal_from_f64(market.liquidity.unwrap_or(0.0))
                    .unwrap_or_default(),
            });

            let match_key = format!("{league}|{home_team}|{away_team}|{}", match_date.format("%Y-%m-%d"));
            let entry = groups.entry(match_key).or_insert((0.0, 0.0, 0.0, outcome));
            match outcome {
                MatchOutcome::Home => entry.0 = price,
                MatchOutcome::Draw => entry.1 = price,
                MatchOutcome::Away => entry.2 = price,
            }
            entry.3 = outcome;
        }

        let mut cache = self.groups.write();
        cache.clear();
        for (key, (home, draw, away, last_outcome)) in groups {
            cache.insert(
                key,
                GroupedMatch {
                    prob: Prob3::new(home, draw, away),
                    last_outcome,
                },
            );
        }

        debug!(count = contracts.len(), "discovered contracts");
        Ok(contracts)
    }

    async fn match_quote(&self, market_key: &str) -> Result<Option<(Prob3, MatchOutcome)>, TradingError> {
        let cache = self.groups.read();
        Ok(cache
            .get(market_key)
            .map(|g| (g.prob.normalize(), g.last_outcome)))
    }

    async fn model_quote(&self, _market_key: &str) -> Result<Option<Prob3>, TradingError> {
        Ok(None)
    }
}

impl Drop for RestMarketSource {
    fn drop(&mut self) {
        let groups = self.groups.read().len();
        if groups > 0 {
            warn!(groups, "dropping market source with cached fixture groups");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_fixture_splits_vs_title() {
        let market = GammaMarket {
            slug: "foo".to_string(),
            condition_id: "c1".to_string(),
            question: "Arsenal vs Chelsea".to_string(),
            end_date_iso: None,
            liquidity: Some(1000.0),
            closed: Some(false),
            outcomes: vec!["Home".to_string()],
            outcome_prices: vec!["0.55".to_string()],
            clob_token_ids: vec!["tok1".to_string()],
            group_item_title: None,
            event_slug: Some("epl".to_string()),
        };
        let (league, home, away, _date) = RestMarketSource::parse_fixture(&market).unwrap();
        assert_eq!(league, "epl");
        assert_eq!(home, "Arsenal");
        assert_eq!(away, "Chelsea");
    }

    #[test]
    fn outcome_for_classifies_common_labels() {
        assert_eq!(RestMarketSource::outcome_for("Home Win"), Some(MatchOutcome::Home));
        assert_eq!(RestMarketSource::outcome_for("Draw"), Some(MatchOutcome::Draw));
        assert_eq!(RestMarketSource::outcome_for("Away"), Some(MatchOutcome::Away));
        assert_eq!(RestMarketSource::outcome_for("nonsense"), None);
    }
}
