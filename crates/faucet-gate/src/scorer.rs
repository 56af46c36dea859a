//! Identity score lookup against a passport scorer API.

use crate::config::ScorerConfig;
use crate::error::{GateError, GateResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Upstream source of identity scores
#[async_trait]
pub trait ScoreOracle: Send + Sync {
    async fn score(&self, identity_address: &str) -> GateResult<f64>;
}

/// Fail with `InsufficientScore` unless `identity_address` scores at least `threshold`
pub async fn ensure_min_score(
    oracle: &dyn ScoreOracle,
    identity_address: &str,
    threshold: f64,
) -> GateResult<f64> {
    let score = oracle.score(identity_address).await?;
    if score < threshold {
        info!(
            "Identity {} scored {} (threshold {})",
            identity_address, score, threshold
        );
        return Err(GateError::InsufficientScore { score, threshold });
    }
    Ok(score)
}

/// Body of `GET /registry/score/{scorer_id}/{address}`
#[derive(Debug, Deserialize)]
struct ScoreResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    score: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

impl ScoreResponse {
    fn into_score(self) -> GateResult<f64> {
        if self.status.as_deref() == Some("ERROR") {
            return Err(GateError::ScoreUnavailable(
                self.error.unwrap_or_else(|| "scorer reported an error".to_string()),
            ));
        }

        match self.score {
            None | Some(serde_json::Value::Null) => Ok(0.0),
            Some(serde_json::Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| GateError::ScoreUnavailable(format!("unusable score {}", n))),
            Some(serde_json::Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| GateError::ScoreUnavailable(format!("unusable score '{}'", s))),
            Some(other) => Err(GateError::ScoreUnavailable(format!("unusable score {}", other))),
        }
    }
}

/// HTTP client for a passport-style scorer
#[derive(Debug, Clone)]
pub struct PassportScorer {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    scorer_id: String,
}

impl PassportScorer {
    pub fn new(config: &ScorerConfig) -> GateResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GateError::Internal(anyhow::anyhow!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            scorer_id: config.scorer_id.clone(),
        })
    }
}

#[async_trait]
impl ScoreOracle for PassportScorer {
    async fn score(&self, identity_address: &str) -> GateResult<f64> {
        let url = format!(
            "{}/registry/score/{}/{}",
            self.api_url, self.scorer_id, identity_address
        );
        debug!("Fetching score for {}", identity_address);

        let response = self
            .client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .map_err(|e| GateError::ScoreUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GateError::ScoreUnavailable(format!(
                "scorer returned HTTP {}",
                status.as_u16()
            )));
        }

        let body: ScoreResponse = response
            .json()
            .await
            .map_err(|e| GateError::ScoreUnavailable(format!("malformed scorer response: {}", e)))?;

        let score = body.into_score()?;
        debug!("Identity {} has score {}", identity_address, score);
        Ok(score)
    }
}
