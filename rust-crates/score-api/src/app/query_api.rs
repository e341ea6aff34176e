use alloy::primitives::{
    Address,
    U256,
};
use tokio::sync::oneshot;

pub trait QueryAPI {
    fn query(&mut self) -> impl Future<Output = crate::Result<Query>>;
}

#[derive(Debug)]
pub enum Query {
    PlayerScore(ScoreQuery),
}

impl Query {
    pub fn player_score(
        contract: Address,
        player: Address,
        sender: oneshot::Sender<crate::Result<U256>>,
    ) -> Self {
        Query::PlayerScore(ScoreQuery {
            contract,
            player,
            sender,
        })
    }
}

#[derive(Debug)]
pub struct ScoreQuery {
    pub contract: Address,
    pub player: Address,
    pub sender: oneshot::Sender<crate::Result<U256>>,
}
