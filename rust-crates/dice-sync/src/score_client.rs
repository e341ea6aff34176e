use crate::leaderboard::ScoreLookup;
use alloy::primitives::Address;
use anyhow::{
    Context,
    Result,
    anyhow,
};
use reqwest::StatusCode;
use serde::{
    Deserialize,
    Serialize,
};

pub const SCORE_PATH: &str = "/api/get-player-score";
pub const LEGACY_SCORE_PATH: &str = "/api/getPlayerScore";

/// Body of both score routes. Fields are optional so a missing one can be answered with
/// a 400 instead of a parse failure.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRequest {
    pub player_address: Option<String>,
    pub contract_address: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResponse {
    pub score: u64,
    pub player_address: String,
}

/// The legacy route reports the score as a decimal string.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LegacyScoreResponse {
    pub score: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
}

/// HTTP client for the score proxy.
#[derive(Clone)]
pub struct ScoreClient {
    base_url: String,
    dice_game: Address,
    http: reqwest::Client,
}

impl ScoreClient {
    pub fn new(base_url: impl Into<String>, dice_game: Address) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client for score proxy")?;
        Ok(Self {
            base_url,
            dice_game,
            http,
        })
    }

    pub async fn player_score(&self, player: Address) -> Result<u64> {
        let url = format!("{}{SCORE_PATH}", self.base_url);
        let request = ScoreRequest {
            player_address: Some(player.to_checksum(None)),
            contract_address: Some(self.dice_game.to_checksum(None)),
        };
        let res = self
            .http
            .post(url)
            .json(&request)
            .send()
            .await
            .context("score proxy request failed")?;
        let status = res.status();
        let bytes = res
            .bytes()
            .await
            .context("failed to read score proxy response body")?;
        if status != StatusCode::OK {
            let body = String::from_utf8_lossy(&bytes);
            return Err(anyhow!(
                "score proxy responded with {status} for {player}: {body}"
            ));
        }
        let dto: ScoreResponse =
            serde_json::from_slice(&bytes).context("invalid score proxy payload")?;
        Ok(dto.score)
    }
}

impl ScoreLookup for ScoreClient {
    async fn score(&self, player: Address) -> Result<u64> {
        self.player_score(player).await
    }
}
