//! Polled contract reads for one `(address, chain)` key.

use crate::config::{
    FALLBACK_MIN_BET_WEI,
    SyncConfig,
};
use alloy::primitives::{
    Address,
    U256,
};
use chrono::{
    DateTime,
    Utc,
};
use futures::future::join_all;
use std::{
    fmt,
    future::Future,
    time::Duration,
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{
        self,
        Instant,
    },
};
use tracing::{
    debug,
    warn,
};

/// Read-only view of the game and pool contracts, plus the player's own ETH balance.
pub trait ContractReader: Send + Sync + 'static {
    fn min_bet(&self) -> impl Future<Output = anyhow::Result<U256>> + Send;
    fn multiplier(&self) -> impl Future<Output = anyhow::Result<U256>> + Send;
    fn player_score(
        &self,
        player: Address,
    ) -> impl Future<Output = anyhow::Result<U256>> + Send;
    fn most_recent_roll(&self) -> impl Future<Output = anyhow::Result<U256>> + Send;
    fn players(&self) -> impl Future<Output = anyhow::Result<Vec<Address>>> + Send;
    fn total_liquidity(&self) -> impl Future<Output = anyhow::Result<U256>> + Send;
    fn provider_balance(
        &self,
        provider: Address,
    ) -> impl Future<Output = anyhow::Result<U256>> + Send;
    fn provider_shares(
        &self,
        provider: Address,
    ) -> impl Future<Output = anyhow::Result<U256>> + Send;
    fn wallet_balance(
        &self,
        owner: Address,
    ) -> impl Future<Output = anyhow::Result<U256>> + Send;

    /// Every field for `key` in one round, each field succeeding or failing on its own.
    /// Readers that can batch calls should override this.
    fn read_batch(&self, key: ReadKey) -> impl Future<Output = ReadSnapshot> + Send {
        read_each_field(self, key)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReadKey {
    pub address: Address,
    pub chain_id: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub type FieldRead<T> = Result<T, ReadError>;

/// The polled values, addressable one by one for retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    MinBet,
    Multiplier,
    PlayerScore,
    MostRecentRoll,
    TotalLiquidity,
    ProviderBalance,
    ProviderShares,
    WalletBalance,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::MinBet,
        Field::Multiplier,
        Field::PlayerScore,
        Field::MostRecentRoll,
        Field::TotalLiquidity,
        Field::ProviderBalance,
        Field::ProviderShares,
        Field::WalletBalance,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::MinBet => "min_bet",
            Field::Multiplier => "multiplier",
            Field::PlayerScore => "player_score",
            Field::MostRecentRoll => "most_recent_roll",
            Field::TotalLiquidity => "total_liquidity",
            Field::ProviderBalance => "provider_balance",
            Field::ProviderShares => "provider_shares",
            Field::WalletBalance => "wallet_balance",
        }
    }

    async fn read<R: ContractReader + ?Sized>(
        self,
        reader: &R,
        address: Address,
    ) -> anyhow::Result<U256> {
        match self {
            Field::MinBet => reader.min_bet().await,
            Field::Multiplier => reader.multiplier().await,
            Field::PlayerScore => reader.player_score(address).await,
            Field::MostRecentRoll => reader.most_recent_roll().await,
            Field::TotalLiquidity => reader.total_liquidity().await,
            Field::ProviderBalance => reader.provider_balance(address).await,
            Field::ProviderShares => reader.provider_shares(address).await,
            Field::WalletBalance => reader.wallet_balance(address).await,
        }
    }
}

pub fn field_read(field: Field, result: anyhow::Result<U256>) -> FieldRead<U256> {
    result.map_err(|err| ReadError {
        field: field.name(),
        message: err.to_string(),
    })
}

/// One complete poll. Each field failed or succeeded on its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadSnapshot {
    pub key: ReadKey,
    pub min_bet: FieldRead<U256>,
    pub multiplier: FieldRead<U256>,
    pub player_score: FieldRead<U256>,
    pub most_recent_roll: FieldRead<U256>,
    pub total_liquidity: FieldRead<U256>,
    pub provider_balance: FieldRead<U256>,
    pub provider_shares: FieldRead<U256>,
    pub wallet_balance: FieldRead<U256>,
    pub taken_at: DateTime<Utc>,
}

impl ReadSnapshot {
    pub fn min_bet_or_fallback(&self) -> U256 {
        self.min_bet.clone().unwrap_or(FALLBACK_MIN_BET_WEI)
    }

    /// Provider's part of the pool in percent with two decimals, `"0"` when either side
    /// is unknown or zero.
    pub fn pool_share_percentage(&self) -> String {
        match (&self.provider_balance, &self.total_liquidity) {
            (Ok(balance), Ok(total)) => pool_share_percentage(*balance, *total),
            _ => "0".to_string(),
        }
    }

    pub fn field(&self, field: Field) -> &FieldRead<U256> {
        match field {
            Field::MinBet => &self.min_bet,
            Field::Multiplier => &self.multiplier,
            Field::PlayerScore => &self.player_score,
            Field::MostRecentRoll => &self.most_recent_roll,
            Field::TotalLiquidity => &self.total_liquidity,
            Field::ProviderBalance => &self.provider_balance,
            Field::ProviderShares => &self.provider_shares,
            Field::WalletBalance => &self.wallet_balance,
        }
    }

    fn field_mut(&mut self, field: Field) -> &mut FieldRead<U256> {
        match field {
            Field::MinBet => &mut self.min_bet,
            Field::Multiplier => &mut self.multiplier,
            Field::PlayerScore => &mut self.player_score,
            Field::MostRecentRoll => &mut self.most_recent_roll,
            Field::TotalLiquidity => &mut self.total_liquidity,
            Field::ProviderBalance => &mut self.provider_balance,
            Field::ProviderShares => &mut self.provider_shares,
            Field::WalletBalance => &mut self.wallet_balance,
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &ReadError> {
        Field::ALL
            .into_iter()
            .filter_map(move |field| self.field(field).as_ref().err())
    }
}

pub fn pool_share_percentage(balance: U256, total: U256) -> String {
    if balance.is_zero() || total.is_zero() {
        return "0".to_string();
    }
    // hundredths of a percent, rounded half up
    let scaled = balance.saturating_mul(U256::from(20_000u64)).saturating_add(total)
        / (total * U256::from(2u64));
    let hundred = U256::from(100u64);
    format!("{}.{:02}", scaled / hundred, (scaled % hundred).to::<u64>())
}

/// Reads every field with its own call, all at once.
pub async fn read_each_field<R: ContractReader + ?Sized>(
    reader: &R,
    key: ReadKey,
) -> ReadSnapshot {
    let address = key.address;
    let (
        min_bet,
        multiplier,
        player_score,
        most_recent_roll,
        total_liquidity,
        provider_balance,
        provider_shares,
        wallet_balance,
    ) = tokio::join!(
        reader.min_bet(),
        reader.multiplier(),
        reader.player_score(address),
        reader.most_recent_roll(),
        reader.total_liquidity(),
        reader.provider_balance(address),
        reader.provider_shares(address),
        reader.wallet_balance(address),
    );
    ReadSnapshot {
        key,
        min_bet: field_read(Field::MinBet, min_bet),
        multiplier: field_read(Field::Multiplier, multiplier),
        player_score: field_read(Field::PlayerScore, player_score),
        most_recent_roll: field_read(Field::MostRecentRoll, most_recent_roll),
        total_liquidity: field_read(Field::TotalLiquidity, total_liquidity),
        provider_balance: field_read(Field::ProviderBalance, provider_balance),
        provider_shares: field_read(Field::ProviderShares, provider_shares),
        wallet_balance: field_read(Field::WalletBalance, wallet_balance),
        taken_at: Utc::now(),
    }
}

/// One batched read for `key`. Fields that failed are read again on their own, up to
/// `attempts` reads per field in total.
pub async fn read_snapshot<R: ContractReader>(
    reader: &R,
    key: ReadKey,
    attempts: u32,
) -> ReadSnapshot {
    let mut snapshot = reader.read_batch(key).await;
    for attempt in 2..=attempts.max(1) {
        let failed: Vec<Field> = Field::ALL
            .into_iter()
            .filter(|field| snapshot.field(*field).is_err())
            .collect();
        if failed.is_empty() {
            break;
        }
        debug!(attempt, fields = ?failed, "retrying failed contract reads");
        let retried =
            join_all(failed.iter().map(|field| field.read(reader, key.address))).await;
        for (field, result) in failed.into_iter().zip(retried) {
            *snapshot.field_mut(field) = field_read(field, result);
        }
    }
    snapshot.taken_at = Utc::now();
    snapshot
}

/// Holds the latest snapshot for the current key.
#[derive(Debug, Default)]
pub struct ReadCache {
    key: Option<ReadKey>,
    snapshot: Option<ReadSnapshot>,
}

impl ReadCache {
    pub fn key(&self) -> Option<ReadKey> {
        self.key
    }

    /// Returns `true` when the key changed; the old snapshot is dropped with it.
    pub fn set_key(&mut self, key: Option<ReadKey>) -> bool {
        if self.key == key {
            return false;
        }
        self.key = key;
        self.snapshot = None;
        true
    }

    /// Replaces the snapshot wholesale. Snapshots read for another key are discarded.
    pub fn apply(&mut self, snapshot: ReadSnapshot) -> bool {
        if self.key != Some(snapshot.key) {
            debug!(key = ?snapshot.key, current = ?self.key, "discarding stale snapshot");
            return false;
        }
        self.snapshot = Some(snapshot);
        true
    }

    pub fn snapshot(&self) -> Option<&ReadSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn min_bet(&self) -> U256 {
        self.snapshot
            .as_ref()
            .map(ReadSnapshot::min_bet_or_fallback)
            .unwrap_or(FALLBACK_MIN_BET_WEI)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadCommand {
    FetchNow,
    /// Fetch once the delay has passed; a later request replaces an earlier one.
    FetchAfter(Duration),
    /// New key, `None` pauses polling.
    Retarget(Option<ReadKey>),
    Shutdown,
}

/// A snapshot and the instant its read started.
#[derive(Clone, Debug)]
pub struct ReadUpdate {
    pub snapshot: ReadSnapshot,
    pub started: Instant,
}

async fn fetch<R: ContractReader>(
    reader: &R,
    key: Option<ReadKey>,
    attempts: u32,
    snapshot_tx: &mpsc::UnboundedSender<ReadUpdate>,
) -> anyhow::Result<()> {
    let Some(key) = key else {
        return Ok(());
    };
    let started = Instant::now();
    let snapshot = read_snapshot(reader, key, attempts).await;
    snapshot_tx
        .send(ReadUpdate { snapshot, started })
        .map_err(|_| anyhow::anyhow!("snapshot receiver dropped"))
}

/// Polls on `refresh_interval` and on demand until shut down.
pub async fn read_worker<R: ContractReader>(
    reader: R,
    refresh_interval: Duration,
    attempts: u32,
    mut key: Option<ReadKey>,
    mut cmd_rx: mpsc::UnboundedReceiver<ReadCommand>,
    snapshot_tx: mpsc::UnboundedSender<ReadUpdate>,
) -> anyhow::Result<()> {
    let mut ticker = time::interval(refresh_interval);
    let mut delayed: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                fetch(&reader, key, attempts, &snapshot_tx).await?;
            }
            _ = time::sleep_until(delayed.unwrap_or_else(Instant::now)), if delayed.is_some() => {
                delayed = None;
                fetch(&reader, key, attempts, &snapshot_tx).await?;
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    break;
                };
                match cmd {
                    ReadCommand::FetchNow => {
                        fetch(&reader, key, attempts, &snapshot_tx).await?;
                    }
                    ReadCommand::FetchAfter(delay) => {
                        delayed = Some(Instant::now() + delay);
                    }
                    ReadCommand::Retarget(next) => {
                        if next != key {
                            debug!(?next, "read worker retargeted");
                            key = next;
                            delayed = None;
                            ticker.reset();
                            fetch(&reader, key, attempts, &snapshot_tx).await?;
                        }
                    }
                    ReadCommand::Shutdown => break,
                }
            }
        }
    }
    debug!("read worker stopped");
    Ok(())
}

/// The spawned [`read_worker`] and its command channel.
pub struct ReadWorkerHandle {
    commands: mpsc::UnboundedSender<ReadCommand>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl ReadWorkerHandle {
    pub fn spawn<R: ContractReader>(
        reader: R,
        config: &SyncConfig,
        key: Option<ReadKey>,
    ) -> (Self, mpsc::UnboundedReceiver<ReadUpdate>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(read_worker(
            reader,
            config.refresh_interval,
            config.read_retry_attempts,
            key,
            cmd_rx,
            snapshot_tx,
        ));
        (
            Self {
                commands: cmd_tx,
                task,
            },
            snapshot_rx,
        )
    }

    pub fn send(&self, command: ReadCommand) {
        if self.commands.send(command).is_err() {
            warn!(?command, "read worker is gone");
        }
    }

    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.commands.send(ReadCommand::Shutdown);
        self.task.await?
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use alloy::primitives::address;
    use std::sync::{
        Arc,
        atomic::{
            AtomicU32,
            Ordering,
        },
    };

    const ME: Address = address!("0x00000000000000000000000000000000000000aa");
    const OTHER: Address = address!("0x00000000000000000000000000000000000000bb");

    fn key(address: Address) -> ReadKey {
        ReadKey {
            address,
            chain_id: 11_155_111,
        }
    }

    #[derive(Clone, Default)]
    struct FakeReader {
        min_bet_calls: Arc<AtomicU32>,
        score_calls: Arc<AtomicU32>,
        failing_min_bet: bool,
        flaky_score_failures: u32,
    }

    impl ContractReader for FakeReader {
        async fn min_bet(&self) -> anyhow::Result<U256> {
            self.min_bet_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing_min_bet {
                anyhow::bail!("execution reverted")
            }
            Ok(U256::from(5u64))
        }
        async fn multiplier(&self) -> anyhow::Result<U256> {
            Ok(U256::from(5u64))
        }
        async fn player_score(&self, _: Address) -> anyhow::Result<U256> {
            let call = self.score_calls.fetch_add(1, Ordering::SeqCst);
            if call < self.flaky_score_failures {
                anyhow::bail!("timeout")
            }
            Ok(U256::from(42u64))
        }
        async fn most_recent_roll(&self) -> anyhow::Result<U256> {
            Ok(U256::from(3u64))
        }
        async fn players(&self) -> anyhow::Result<Vec<Address>> {
            Ok(vec![ME])
        }
        async fn total_liquidity(&self) -> anyhow::Result<U256> {
            Ok(U256::from(400u64))
        }
        async fn provider_balance(&self, _: Address) -> anyhow::Result<U256> {
            Ok(U256::from(100u64))
        }
        async fn provider_shares(&self, _: Address) -> anyhow::Result<U256> {
            Ok(U256::from(100u64))
        }
        async fn wallet_balance(&self, _: Address) -> anyhow::Result<U256> {
            Ok(U256::from(7_000u64))
        }
    }

    /// Answers every field in one batch call, failing `min_bet` inside the batch.
    #[derive(Clone, Default)]
    struct BatchReader {
        inner: FakeReader,
        batch_calls: Arc<AtomicU32>,
    }

    impl ContractReader for BatchReader {
        async fn min_bet(&self) -> anyhow::Result<U256> {
            self.inner.min_bet().await
        }
        async fn multiplier(&self) -> anyhow::Result<U256> {
            anyhow::bail!("multiplier is only read in batches")
        }
        async fn player_score(&self, _: Address) -> anyhow::Result<U256> {
            anyhow::bail!("player_score is only read in batches")
        }
        async fn most_recent_roll(&self) -> anyhow::Result<U256> {
            anyhow::bail!("most_recent_roll is only read in batches")
        }
        async fn players(&self) -> anyhow::Result<Vec<Address>> {
            Ok(vec![ME])
        }
        async fn total_liquidity(&self) -> anyhow::Result<U256> {
            anyhow::bail!("total_liquidity is only read in batches")
        }
        async fn provider_balance(&self, _: Address) -> anyhow::Result<U256> {
            anyhow::bail!("provider_balance is only read in batches")
        }
        async fn provider_shares(&self, _: Address) -> anyhow::Result<U256> {
            anyhow::bail!("provider_shares is only read in batches")
        }
        async fn wallet_balance(&self, _: Address) -> anyhow::Result<U256> {
            anyhow::bail!("wallet_balance is only read in batches")
        }

        async fn read_batch(&self, key: ReadKey) -> ReadSnapshot {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            let mut snapshot = read_each_field(&self.inner, key).await;
            snapshot.min_bet = field_read(Field::MinBet, Err(anyhow::anyhow!("call reverted")));
            snapshot
        }
    }

    #[tokio::test]
    async fn read_snapshot__isolates_failing_field() {
        // given
        let reader = FakeReader {
            failing_min_bet: true,
            ..FakeReader::default()
        };

        // when
        let snapshot = read_snapshot(&reader, key(ME), 3).await;

        // then
        assert_eq!(reader.min_bet_calls.load(Ordering::SeqCst), 3);
        assert_eq!(snapshot.min_bet.as_ref().unwrap_err().field, "min_bet");
        assert_eq!(snapshot.player_score, Ok(U256::from(42u64)));
        assert_eq!(snapshot.min_bet_or_fallback(), FALLBACK_MIN_BET_WEI);
        assert_eq!(snapshot.errors().count(), 1);
    }

    #[tokio::test]
    async fn read_snapshot__batches_once_and_rereads_only_failed_fields() {
        // given
        let reader = BatchReader::default();

        // when
        let snapshot = read_snapshot(&reader, key(ME), 3).await;

        // then
        assert_eq!(reader.batch_calls.load(Ordering::SeqCst), 1);
        // one read inside the batch, one individual retry that succeeds
        assert_eq!(reader.inner.min_bet_calls.load(Ordering::SeqCst), 2);
        assert_eq!(reader.inner.score_calls.load(Ordering::SeqCst), 1);
        assert_eq!(snapshot.min_bet, Ok(U256::from(5u64)));
        assert_eq!(snapshot.wallet_balance, Ok(U256::from(7_000u64)));
        assert_eq!(snapshot.errors().count(), 0);
    }

    #[tokio::test]
    async fn read_snapshot__reports_wallet_balance() {
        let snapshot = read_snapshot(&FakeReader::default(), key(ME), 1).await;

        assert_eq!(snapshot.wallet_balance, Ok(U256::from(7_000u64)));
        assert_eq!(snapshot.field(Field::WalletBalance), &Ok(U256::from(7_000u64)));
    }

    #[tokio::test]
    async fn read_snapshot__retries_transient_failures() {
        let reader = FakeReader {
            flaky_score_failures: 2,
            ..FakeReader::default()
        };

        let snapshot = read_snapshot(&reader, key(ME), 3).await;

        assert_eq!(snapshot.player_score, Ok(U256::from(42u64)));
        assert_eq!(reader.score_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn pool_share_percentage__two_decimals_or_zero() {
        assert_eq!(pool_share_percentage(U256::from(100u64), U256::from(400u64)), "25.00");
        assert_eq!(pool_share_percentage(U256::from(1u64), U256::from(3u64)), "33.33");
        assert_eq!(pool_share_percentage(U256::from(2u64), U256::from(3u64)), "66.67");
        assert_eq!(pool_share_percentage(U256::ZERO, U256::from(3u64)), "0");
        assert_eq!(pool_share_percentage(U256::from(3u64), U256::ZERO), "0");
    }

    #[tokio::test]
    async fn apply__discards_snapshot_for_other_key() {
        // given
        let reader = FakeReader::default();
        let mut cache = ReadCache::default();
        cache.set_key(Some(key(ME)));
        let stale = read_snapshot(&reader, key(OTHER), 1).await;

        // when
        let applied = cache.apply(stale);

        // then
        assert!(!applied);
        assert!(cache.snapshot().is_none());
        assert_eq!(cache.min_bet(), FALLBACK_MIN_BET_WEI);
    }

    #[tokio::test]
    async fn set_key__drops_snapshot_of_previous_key() {
        let reader = FakeReader::default();
        let mut cache = ReadCache::default();
        cache.set_key(Some(key(ME)));
        assert!(cache.apply(read_snapshot(&reader, key(ME), 1).await));
        assert_eq!(cache.min_bet(), U256::from(5u64));

        assert!(!cache.set_key(Some(key(ME))));
        assert!(cache.set_key(Some(key(OTHER))));

        assert!(cache.snapshot().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn read_worker__polls_on_interval_and_on_demand() {
        // given
        let reader = FakeReader::default();
        let calls = reader.min_bet_calls.clone();
        let config = SyncConfig::default();
        let (handle, mut snapshots) = ReadWorkerHandle::spawn(reader, &config, Some(key(ME)));

        // when
        let first = snapshots.recv().await.unwrap();
        time::advance(config.refresh_interval).await;
        let second = snapshots.recv().await.unwrap();
        handle.send(ReadCommand::FetchNow);
        let third = snapshots.recv().await.unwrap();

        // then
        assert_eq!(first.snapshot.key, key(ME));
        assert_eq!(second.snapshot.key, key(ME));
        assert_eq!(third.snapshot.key, key(ME));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn read_worker__delayed_fetch_waits_for_settle() {
        // given
        let config = SyncConfig::default();
        let (handle, mut snapshots) =
            ReadWorkerHandle::spawn(FakeReader::default(), &config, Some(key(ME)));
        snapshots.recv().await.unwrap();

        // when
        let requested = Instant::now();
        handle.send(ReadCommand::FetchAfter(config.settle_delay));
        let update = snapshots.recv().await.unwrap();

        // then
        assert!(update.started >= requested + config.settle_delay);
        assert!(requested.elapsed() >= config.settle_delay);
        assert!(requested.elapsed() < config.refresh_interval);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn read_worker__is_idle_without_key_and_fetches_on_retarget() {
        // given
        let config = SyncConfig::default();
        let reader = FakeReader::default();
        let calls = reader.min_bet_calls.clone();
        let (handle, mut snapshots) = ReadWorkerHandle::spawn(reader, &config, None);

        // when
        time::advance(config.refresh_interval * 2).await;
        tokio::task::yield_now().await;
        let idle_calls = calls.load(Ordering::SeqCst);
        handle.send(ReadCommand::Retarget(Some(key(OTHER))));
        let update = snapshots.recv().await.unwrap();

        // then
        assert_eq!(idle_calls, 0);
        assert_eq!(update.snapshot.key, key(OTHER));
        handle.shutdown().await.unwrap();
    }
}
