use alloy::primitives::{
    Address,
    U256,
};
use std::time::Duration;

pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;
pub const DEFAULT_SEPOLIA_RPC_URL: &str = "https://ethereum-sepolia-rpc.publicnode.com";
pub const DEFAULT_LOCAL_RPC_URL: &str = "http://localhost:8545/";

/// Contract reads are re-polled this often; shorter intervals trade request volume for
/// freshness.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(10);
/// Wait after a resolved roll before re-reading, so the RPC node has caught up with the
/// block that carried the result.
pub const SETTLE_DELAY: Duration = Duration::from_millis(1_000);
/// Same as [`SETTLE_DELAY`] for a confirmed liquidity change.
pub const LIQUIDITY_SETTLE_DELAY: Duration = Duration::from_millis(2_000);
/// Wallets report the new chain slightly after acknowledging a switch.
pub const CHAIN_SWITCH_SETTLE: Duration = Duration::from_millis(1_000);
pub const READ_RETRY_ATTEMPTS: u32 = 3;
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const EVENT_POLL_INTERVAL: Duration = Duration::from_secs(4);
pub const RESULT_HISTORY_CAPACITY: usize = 10;
pub const RESULT_TIMEOUT: Duration = Duration::from_secs(120);

/// 0.001 ETH, used whenever the contract's minimum bet cannot be read.
pub const FALLBACK_MIN_BET_WEI: U256 = U256::from_limbs([1_000_000_000_000_000, 0, 0, 0]);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContractAddresses {
    pub dice_game: Address,
    pub liquidity_pool: Address,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    pub required_chain_id: u64,
    pub refresh_interval: Duration,
    pub settle_delay: Duration,
    pub liquidity_settle_delay: Duration,
    pub chain_switch_settle: Duration,
    pub read_retry_attempts: u32,
    pub receipt_poll_interval: Duration,
    pub event_poll_interval: Duration,
    pub history_capacity: usize,
    /// `None` waits for the randomness callback forever.
    pub result_timeout: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            required_chain_id: SEPOLIA_CHAIN_ID,
            refresh_interval: REFRESH_INTERVAL,
            settle_delay: SETTLE_DELAY,
            liquidity_settle_delay: LIQUIDITY_SETTLE_DELAY,
            chain_switch_settle: CHAIN_SWITCH_SETTLE,
            read_retry_attempts: READ_RETRY_ATTEMPTS,
            receipt_poll_interval: RECEIPT_POLL_INTERVAL,
            event_poll_interval: EVENT_POLL_INTERVAL,
            history_capacity: RESULT_HISTORY_CAPACITY,
            result_timeout: Some(RESULT_TIMEOUT),
        }
    }
}

impl SyncConfig {
    pub fn for_chain(required_chain_id: u64) -> Self {
        Self {
            required_chain_id,
            ..Self::default()
        }
    }
}
