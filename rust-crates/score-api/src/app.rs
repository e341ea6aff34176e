use crate::{
    Result,
    app::query_api::{
        Query,
        QueryAPI,
        ScoreQuery,
    },
};
use alloy::{
    primitives::{
        Address,
        U256,
    },
    providers::DynProvider,
};
use dice_sync::rpc::read_player_score;
use tracing_subscriber::EnvFilter;

pub mod actix_score_api;
pub mod query_api;


pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Reads a player's score from a game contract.
pub trait ScoreSource: Clone + Send + Sync + 'static {
    fn player_score(
        &self,
        contract: Address,
        player: Address,
    ) -> impl Future<Output = Result<U256>> + Send;
}

#[derive(Clone)]
pub struct RpcScores {
    provider: DynProvider,
}

impl RpcScores {
    pub fn new(provider: DynProvider) -> Self {
        Self { provider }
    }
}

impl ScoreSource for RpcScores {
    async fn player_score(&self, contract: Address, player: Address) -> Result<U256> {
        read_player_score(&self.provider, contract, player).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Continue,
    Exit,
}

pub struct App<API, Scores> {
    api: API,
    scores: Scores,
}

impl<API, Scores> App<API, Scores> {
    pub fn new(api: API, scores: Scores) -> Self {
        Self { api, scores }
    }
}

impl<API: QueryAPI, Scores: ScoreSource> App<API, Scores> {
    pub async fn run(&mut self, interrupt: impl Future<Output = ()>) -> Result<RunState> {
        tokio::select! {
            query = self.api.query() => {
                self.handle_query(query?);
                Ok(RunState::Continue)
            }
            _ = interrupt => Ok(RunState::Exit),
        }
    }

    // each lookup runs on its own task
    fn handle_query(&self, query: Query) {
        match query {
            Query::PlayerScore(ScoreQuery {
                contract,
                player,
                sender,
            }) => {
                let scores = self.scores.clone();
                tokio::spawn(async move {
                    let result = scores.player_score(contract, player).await;
                    if let Err(err) = &result {
                        tracing::warn!(%contract, %player, "score lookup failed: {err:#}");
                    }
                    if sender.send(result).is_err() {
                        tracing::debug!(%player, "score requester went away");
                    }
                });
            }
        }
    }
}
