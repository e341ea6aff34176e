//! JSON-RPC implementations of the collaborator traits.

use crate::{
    config::{
        ContractAddresses,
        EVENT_POLL_INTERVAL,
    },
    controller::GameWriter,
    events::{
        EventSource,
        GameEvent,
    },
    identity::SessionProvider,
    network::ChainSwitcher,
    read_cache::{
        ContractReader,
        Field,
        ReadKey,
        ReadSnapshot,
        field_read,
        read_each_field,
    },
};
use alloy::{
    network::{
        EthereumWallet,
        ReceiptResponse,
    },
    primitives::{
        Address,
        TxHash,
        U256,
    },
    providers::{
        DynProvider,
        Provider,
        ProviderBuilder,
    },
    rpc::types::{
        Filter,
        Log,
    },
    signers::local::PrivateKeySigner,
    sol_types::SolEvent,
};
use anyhow::{
    Context,
    Result,
    anyhow,
    bail,
};
use chrono::Utc;
use generated_abi::{
    dice_game_types::DiceGame,
    liquidity_pool_types::LiquidityPool,
};
use std::{
    fmt::Debug,
    future::Future,
    time::Duration,
};
use tokio::time::{
    self,
    Interval,
    MissedTickBehavior,
};
use tracing::{
    debug,
    info,
    warn,
};

/// Widest block range asked of `eth_getLogs` in one request.
pub const MAX_LOG_RANGE: u64 = 1_000;

/// Read-only provider for `rpc_url`.
pub fn read_provider(rpc_url: &str) -> Result<DynProvider> {
    let url = rpc_url
        .parse()
        .with_context(|| format!("invalid RPC url {rpc_url}"))?;
    Ok(ProviderBuilder::new().connect_http(url).erased())
}

/// Provider that fills and signs transactions with `signer`.
pub fn signing_provider(rpc_url: &str, signer: PrivateKeySigner) -> Result<DynProvider> {
    let url = rpc_url
        .parse()
        .with_context(|| format!("invalid RPC url {rpc_url}"))?;
    Ok(ProviderBuilder::new()
        .wallet(EthereumWallet::from(signer))
        .connect_http(url)
        .erased())
}

pub async fn read_player_score(
    provider: &DynProvider,
    dice_game: Address,
    player: Address,
) -> Result<U256> {
    let game = DiceGame::new(dice_game, provider);
    game.getPlayerScore(player)
        .call()
        .await
        .with_context(|| format!("getPlayerScore({player}) failed"))
}

#[derive(Clone)]
pub struct ChainReader {
    provider: DynProvider,
    contracts: ContractAddresses,
}

impl ChainReader {
    pub fn new(provider: DynProvider, contracts: ContractAddresses) -> Self {
        Self {
            provider,
            contracts,
        }
    }

    fn game(&self) -> DiceGame::DiceGameInstance<&DynProvider> {
        DiceGame::new(self.contracts.dice_game, &self.provider)
    }

    fn pool(&self) -> LiquidityPool::LiquidityPoolInstance<&DynProvider> {
        LiquidityPool::new(self.contracts.liquidity_pool, &self.provider)
    }
}

impl ContractReader for ChainReader {
    async fn min_bet(&self) -> Result<U256> {
        Ok(self.game().getMinBet().call().await?)
    }

    async fn multiplier(&self) -> Result<U256> {
        Ok(self.game().getMultiplier().call().await?)
    }

    async fn player_score(&self, player: Address) -> Result<U256> {
        Ok(self.game().getPlayerScore(player).call().await?)
    }

    async fn most_recent_roll(&self) -> Result<U256> {
        Ok(self.game().getMostRecentRoll().call().await?)
    }

    async fn players(&self) -> Result<Vec<Address>> {
        Ok(self.game().getPlayers().call().await?)
    }

    async fn total_liquidity(&self) -> Result<U256> {
        Ok(self.pool().getTotalLiquidity().call().await?)
    }

    async fn provider_balance(&self, provider: Address) -> Result<U256> {
        Ok(self
            .pool()
            .getLiquidityProviderBalance(provider)
            .call()
            .await?)
    }

    async fn provider_shares(&self, provider: Address) -> Result<U256> {
        Ok(self
            .pool()
            .getLiquidityProviderShares(provider)
            .call()
            .await?)
    }

    async fn wallet_balance(&self, owner: Address) -> Result<U256> {
        self.provider
            .get_balance(owner)
            .await
            .with_context(|| format!("eth_getBalance({owner}) failed"))
    }

    /// The contract views go out as one Multicall3 `aggregate3`, the wallet balance
    /// alongside it. A failed multicall falls back to one request per field.
    async fn read_batch(&self, key: ReadKey) -> ReadSnapshot {
        let address = key.address;
        let game = self.game();
        let pool = self.pool();
        let builder = self
            .provider
            .multicall()
            .add(game.getMinBet())
            .add(game.getMultiplier())
            .add(game.getPlayerScore(address))
            .add(game.getMostRecentRoll())
            .add(pool.getTotalLiquidity())
            .add(pool.getLiquidityProviderBalance(address))
            .add(pool.getLiquidityProviderShares(address));
        let multicall = builder.aggregate3();
        let (batch, wallet_balance) = tokio::join!(multicall, self.wallet_balance(address));
        let (
            min_bet,
            multiplier,
            player_score,
            most_recent_roll,
            total_liquidity,
            provider_balance,
            provider_shares,
        ) = match batch {
            Ok(results) => results,
            Err(err) => {
                warn!(%err, "multicall read failed; reading fields one by one");
                return read_each_field(self, key).await;
            }
        };
        ReadSnapshot {
            key,
            min_bet: field_read(Field::MinBet, call_result(min_bet)),
            multiplier: field_read(Field::Multiplier, call_result(multiplier)),
            player_score: field_read(Field::PlayerScore, call_result(player_score)),
            most_recent_roll: field_read(Field::MostRecentRoll, call_result(most_recent_roll)),
            total_liquidity: field_read(Field::TotalLiquidity, call_result(total_liquidity)),
            provider_balance: field_read(Field::ProviderBalance, call_result(provider_balance)),
            provider_shares: field_read(Field::ProviderShares, call_result(provider_shares)),
            wallet_balance: field_read(Field::WalletBalance, wallet_balance),
            taken_at: Utc::now(),
        }
    }
}

fn call_result<T, E: Debug>(result: std::result::Result<T, E>) -> Result<T> {
    result.map_err(|failure| anyhow!("call failed inside multicall: {failure:?}"))
}

/// Sends the game's writes through a signing provider.
#[derive(Clone)]
pub struct ChainWriter {
    provider: DynProvider,
    contracts: ContractAddresses,
}

impl ChainWriter {
    pub fn new(provider: DynProvider, contracts: ContractAddresses) -> Self {
        Self {
            provider,
            contracts,
        }
    }
}

impl GameWriter for ChainWriter {
    async fn roll_dice(&self, prediction: u8, bet: U256) -> Result<TxHash> {
        let game = DiceGame::new(self.contracts.dice_game, &self.provider);
        let pending = game
            .rollDice(prediction)
            .value(bet)
            .send()
            .await
            .context("rollDice was not accepted")?;
        Ok(*pending.tx_hash())
    }

    async fn add_liquidity(&self, amount: U256) -> Result<TxHash> {
        let pool = LiquidityPool::new(self.contracts.liquidity_pool, &self.provider);
        let pending = pool
            .addLiquidity()
            .value(amount)
            .send()
            .await
            .context("addLiquidity was not accepted")?;
        Ok(*pending.tx_hash())
    }

    async fn remove_liquidity(&self, amount: U256) -> Result<TxHash> {
        let pool = LiquidityPool::new(self.contracts.liquidity_pool, &self.provider);
        let pending = pool
            .removeLiquidity(amount)
            .send()
            .await
            .context("removeLiquidity was not accepted")?;
        Ok(*pending.tx_hash())
    }

    async fn receipt_status(&self, hash: TxHash) -> Result<Option<bool>> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .with_context(|| format!("receipt lookup for {hash} failed"))?;
        Ok(receipt.map(|receipt| receipt.status()))
    }
}

/// Block height and game log queries behind [`LogPoller`].
pub trait LogSource: Send + Sync + 'static {
    fn head(&self) -> impl Future<Output = Result<u64>> + Send;
    fn game_logs(
        &self,
        dice_game: Address,
        from: u64,
        to: u64,
    ) -> impl Future<Output = Result<Vec<Log>>> + Send;
}

impl LogSource for DynProvider {
    async fn head(&self) -> Result<u64> {
        self.get_block_number()
            .await
            .context("eth_blockNumber failed")
    }

    async fn game_logs(&self, dice_game: Address, from: u64, to: u64) -> Result<Vec<Log>> {
        let filter = Filter::new()
            .address(dice_game)
            .event_signature(vec![
                DiceGame::PlayerWon::SIGNATURE_HASH,
                DiceGame::PlayerLost::SIGNATURE_HASH,
            ])
            .from_block(from)
            .to_block(to);
        self.get_logs(&filter)
            .await
            .with_context(|| format!("eth_getLogs {from}..={to} failed"))
    }
}

/// Polls the game's won/lost logs, starting at the head seen on the first poll.
/// A backlog is fetched in ranges of at most [`MAX_LOG_RANGE`] blocks.
pub struct LogPoller<L = DynProvider> {
    source: L,
    dice_game: Address,
    next_block: Option<u64>,
    ticker: Interval,
}

impl<L: LogSource> LogPoller<L> {
    pub fn new(source: L, dice_game: Address) -> Self {
        Self::with_interval(source, dice_game, EVENT_POLL_INTERVAL)
    }

    pub fn with_interval(source: L, dice_game: Address, every: Duration) -> Self {
        let mut ticker = time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            source,
            dice_game,
            next_block: None,
            ticker,
        }
    }

    /// Starts from `block` instead of the current head.
    pub fn from_block(mut self, block: u64) -> Self {
        self.next_block = Some(block);
        self
    }
}

pub fn decode_game_log(log: &Log) -> Option<GameEvent> {
    let tx_hash = log.transaction_hash;
    let topic = log.topic0()?;
    if *topic == DiceGame::PlayerWon::SIGNATURE_HASH {
        let event = log.log_decode::<DiceGame::PlayerWon>().ok()?.inner.data;
        Some(GameEvent::PlayerWon {
            player: event.player,
            bet_amount: event.betAmount,
            winning_amount: event.winningAmount,
            rolled_number: event.rolledNumber,
            tx_hash,
        })
    } else if *topic == DiceGame::PlayerLost::SIGNATURE_HASH {
        let event = log.log_decode::<DiceGame::PlayerLost>().ok()?.inner.data;
        Some(GameEvent::PlayerLost {
            player: event.player,
            bet_amount: event.betAmount,
            rolled_number: event.rolledNumber,
            tx_hash,
        })
    } else {
        None
    }
}

impl<L: LogSource> EventSource for LogPoller<L> {
    async fn next_event_batch(&mut self) -> Result<Vec<GameEvent>> {
        self.ticker.tick().await;
        let head = self.source.head().await?;
        let mut from = match self.next_block {
            Some(from) => from,
            None => {
                debug!(head, "event poller starting at chain head");
                self.next_block = Some(head + 1);
                return Ok(Vec::new());
            }
        };

        let mut events = Vec::new();
        while from <= head {
            let to = head.min(from.saturating_add(MAX_LOG_RANGE - 1));
            match self.source.game_logs(self.dice_game, from, to).await {
                Ok(logs) => {
                    events.extend(logs.iter().filter_map(decode_game_log));
                    from = to + 1;
                    self.next_block = Some(from);
                }
                Err(err) if events.is_empty() => return Err(err),
                Err(err) => {
                    // keep what arrived; the rest is picked up on the next poll
                    warn!(%err, from, to, "log range query failed");
                    break;
                }
            }
        }
        Ok(events)
    }
}

/// A session signing locally with a keystore key over one RPC endpoint.
#[derive(Clone)]
pub struct DirectSession {
    provider: DynProvider,
    address: Address,
    chain_id: Option<u64>,
}

impl DirectSession {
    pub async fn connect(rpc_url: &str, signer: PrivateKeySigner) -> Result<Self> {
        let address = signer.address();
        let provider = signing_provider(rpc_url, signer)?;
        let mut session = Self {
            provider,
            address,
            chain_id: None,
        };
        session.refresh().await?;
        info!(%address, chain_id = ?session.chain_id, "direct session connected");
        Ok(session)
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    pub async fn refresh(&mut self) -> Result<()> {
        let chain_id = self
            .provider
            .get_chain_id()
            .await
            .context("eth_chainId failed")?;
        self.chain_id = Some(chain_id);
        Ok(())
    }

    pub fn writer(&self, contracts: ContractAddresses) -> ChainWriter {
        ChainWriter::new(self.provider.clone(), contracts)
    }
}

impl SessionProvider for DirectSession {
    fn address(&self) -> Option<Address> {
        Some(self.address)
    }

    fn is_connected(&self) -> bool {
        self.chain_id.is_some()
    }

    fn chain_id(&self) -> Option<u64> {
        self.chain_id
    }
}

impl ChainSwitcher for DirectSession {
    async fn switch_chain(&self, chain_id: u64) -> Result<()> {
        match self.chain_id {
            Some(current) if current == chain_id => Ok(()),
            // an RPC endpoint serves exactly one chain and cannot add another
            Some(current) => bail!(
                "RPC endpoint serves chain {current}; point --rpc-url at chain {chain_id}"
            ),
            None => bail!("no direct session to switch"),
        }
    }
}
