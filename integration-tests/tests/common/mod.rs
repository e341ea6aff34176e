#![allow(dead_code)]

use alloy::primitives::{
    Address,
    B256,
    TxHash,
    U256,
    address,
};
use anyhow::{
    Result,
    anyhow,
};
use dice_sync::{
    config::{
        SEPOLIA_CHAIN_ID,
        SyncConfig,
    },
    controller::{
        GameController,
        GameWriter,
    },
    error::ActionError,
    events::{
        EventSource,
        GameEvent,
    },
    identity::Session,
    read_cache::ContractReader,
};
use std::sync::{
    Arc,
    Mutex,
};
use tokio::sync::mpsc;

pub const ME: Address = address!("0x00000000000000000000000000000000000000bb");
pub const SOMEONE_ELSE: Address = address!("0x00000000000000000000000000000000000000aa");

pub const MILLI_ETH: u64 = 1_000_000_000_000_000;

pub fn milli_eth(amount: u64) -> U256 {
    U256::from(amount) * U256::from(MILLI_ETH)
}

/// A write the fake chain was asked to send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SentWrite {
    RollDice { prediction: u8, bet: U256 },
    AddLiquidity(U256),
    RemoveLiquidity(U256),
}

#[derive(Debug)]
struct ChainState {
    sent: Vec<SentWrite>,
    receipt: Option<bool>,
    reject_writes: Option<String>,
    min_bet: U256,
    score: U256,
    total_liquidity: U256,
    provider_balance: U256,
    wallet_balance: U256,
}

impl Default for ChainState {
    fn default() -> Self {
        Self {
            sent: Vec::new(),
            receipt: None,
            reject_writes: None,
            min_bet: milli_eth(1),
            score: U256::ZERO,
            total_liquidity: milli_eth(10_000),
            provider_balance: U256::ZERO,
            wallet_balance: milli_eth(2_000),
        }
    }
}

/// In-memory stand-in for both contracts: records writes, answers receipts and reads.
#[derive(Clone, Default)]
pub struct FakeChain {
    state: Arc<Mutex<ChainState>>,
}

impl FakeChain {
    pub fn sent(&self) -> Vec<SentWrite> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn set_receipt(&self, receipt: Option<bool>) {
        self.state.lock().unwrap().receipt = receipt;
    }

    pub fn reject_writes(&self, reason: &str) {
        self.state.lock().unwrap().reject_writes = Some(reason.to_string());
    }

    pub fn set_score(&self, score: u64) {
        self.state.lock().unwrap().score = U256::from(score);
    }

    pub fn set_provider_balance(&self, balance: U256) {
        self.state.lock().unwrap().provider_balance = balance;
    }

    fn send(&self, write: SentWrite) -> Result<TxHash> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = &state.reject_writes {
            return Err(anyhow!(reason.clone()));
        }
        state.sent.push(write);
        Ok(B256::with_last_byte(state.sent.len() as u8))
    }
}

impl GameWriter for FakeChain {
    async fn roll_dice(&self, prediction: u8, bet: U256) -> Result<TxHash> {
        self.send(SentWrite::RollDice { prediction, bet })
    }

    async fn add_liquidity(&self, amount: U256) -> Result<TxHash> {
        self.send(SentWrite::AddLiquidity(amount))
    }

    async fn remove_liquidity(&self, amount: U256) -> Result<TxHash> {
        self.send(SentWrite::RemoveLiquidity(amount))
    }

    async fn receipt_status(&self, _: TxHash) -> Result<Option<bool>> {
        Ok(self.state.lock().unwrap().receipt)
    }
}

impl ContractReader for FakeChain {
    async fn min_bet(&self) -> Result<U256> {
        Ok(self.state.lock().unwrap().min_bet)
    }

    async fn multiplier(&self) -> Result<U256> {
        Ok(U256::from(5u64))
    }

    async fn player_score(&self, _: Address) -> Result<U256> {
        Ok(self.state.lock().unwrap().score)
    }

    async fn most_recent_roll(&self) -> Result<U256> {
        Ok(U256::from(4u64))
    }

    async fn players(&self) -> Result<Vec<Address>> {
        Ok(vec![ME])
    }

    async fn total_liquidity(&self) -> Result<U256> {
        Ok(self.state.lock().unwrap().total_liquidity)
    }

    async fn provider_balance(&self, _: Address) -> Result<U256> {
        Ok(self.state.lock().unwrap().provider_balance)
    }

    async fn provider_shares(&self, _: Address) -> Result<U256> {
        Ok(self.state.lock().unwrap().provider_balance)
    }

    async fn wallet_balance(&self, _: Address) -> Result<U256> {
        Ok(self.state.lock().unwrap().wallet_balance)
    }
}

/// Event batches pushed by the test.
pub struct ChannelEvents {
    receiver: mpsc::UnboundedReceiver<Vec<GameEvent>>,
}

impl ChannelEvents {
    pub fn new() -> (mpsc::UnboundedSender<Vec<GameEvent>>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (sender, Self { receiver })
    }
}

impl EventSource for ChannelEvents {
    async fn next_event_batch(&mut self) -> Result<Vec<GameEvent>> {
        match self.receiver.recv().await {
            Some(batch) => Ok(batch),
            None => std::future::pending().await,
        }
    }
}

pub fn won(player: Address, rolled: u64, winning: U256) -> GameEvent {
    GameEvent::PlayerWon {
        player,
        bet_amount: milli_eth(2),
        winning_amount: winning,
        rolled_number: U256::from(rolled),
        tx_hash: None,
    }
}

pub fn lost(player: Address, rolled: u64) -> GameEvent {
    GameEvent::PlayerLost {
        player,
        bet_amount: milli_eth(2),
        rolled_number: U256::from(rolled),
        tx_hash: None,
    }
}

pub fn signed_in(address: Address) -> Session {
    Session {
        embedded_address: Some(address),
        direct_address: Some(address),
        is_authenticated: true,
        is_ready: true,
    }
}

/// A signed-in controller on the required chain, backed by a [`FakeChain`].
pub struct TestContext {
    pub chain: FakeChain,
    pub controller: GameController<FakeChain>,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        let chain = FakeChain::default();
        let mut controller = GameController::new(config, chain.clone());
        controller.sync_session(signed_in(ME), true, Some(SEPOLIA_CHAIN_ID));
        Self { chain, controller }
    }

    pub async fn roll(&mut self, bet: &str, prediction: u8) -> Result<TxHash, ActionError> {
        self.controller.inputs.bet_amount = bet.to_string();
        self.controller.inputs.prediction = prediction;
        self.controller.handle_roll_dice().await
    }

    /// Rolls and confirms, leaving the controller waiting for the game result.
    pub async fn confirmed_roll(&mut self, bet: &str) -> TxHash {
        self.chain.set_receipt(Some(true));
        let hash = self.roll(bet, 4).await.unwrap();
        self.controller.poll_receipt().await.unwrap();
        hash
    }

    pub fn notification_message(&self) -> Option<String> {
        self.controller
            .notification()
            .map(|notification| notification.message.clone())
    }
}
