use crate::{
    amount::{
        format_eth_fixed6,
        parse_eth,
    },
    config::SyncConfig,
    error::{
        ActionError,
        Result,
    },
    events::{
        EventCorrelator,
        GameEvent,
        GameResult,
        Outcome,
    },
    identity::{
        IdentityResolver,
        Session,
        SessionAction,
        reconcile_direct_session,
    },
    network::{
        ChainSwitcher,
        NetworkGuard,
        NetworkStatus,
    },
    read_cache::{
        ReadCache,
        ReadCommand,
        ReadKey,
        ReadSnapshot,
    },
    tracker::{
        ActionGuard,
        GameAction,
        LifecycleEffect,
        LifecycleState,
        TransactionTracker,
    },
};
use alloy::primitives::{
    Address,
    TxHash,
    U256,
};
use std::future::Future;
use tracing::{
    error,
    info,
    warn,
};

const MAX_ERRORS: usize = 50;

/// Signs and sends the game's writes.
pub trait GameWriter: Send + Sync {
    fn roll_dice(
        &self,
        prediction: u8,
        bet: U256,
    ) -> impl Future<Output = anyhow::Result<TxHash>> + Send;
    fn add_liquidity(&self, amount: U256) -> impl Future<Output = anyhow::Result<TxHash>> + Send;
    fn remove_liquidity(
        &self,
        amount: U256,
    ) -> impl Future<Output = anyhow::Result<TxHash>> + Send;
    /// `None` while the transaction is not mined, otherwise whether it succeeded.
    fn receipt_status(
        &self,
        hash: TxHash,
    ) -> impl Future<Output = anyhow::Result<Option<bool>>> + Send;
}

/// Raw user input, parsed only when an action is requested.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputFields {
    pub bet_amount: String,
    pub prediction: u8,
    pub add_amount: String,
    pub remove_amount: String,
}

impl Default for InputFields {
    fn default() -> Self {
        Self {
            bet_amount: String::new(),
            prediction: 1,
            add_amount: String::new(),
            remove_amount: String::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub kind: NotificationKind,
    game_result: bool,
}

impl Notification {
    /// Game results stay until dismissed, everything else may time out.
    pub fn is_game_result(&self) -> bool {
        self.game_result
    }
}

/// First ten characters of the hash, `0x` included.
pub fn short_hash(hash: &TxHash) -> String {
    let text = hash.to_string();
    text[..10].to_string()
}

/// `0x123456...abcdef`
pub fn hash_preview(hash: &TxHash) -> String {
    let text = hash.to_string();
    format!("{}...{}", &text[..8], &text[text.len() - 6..])
}

pub fn result_message(result: &GameResult) -> String {
    match result.outcome {
        Outcome::Won => format!(
            "You WON! Rolled {}. You won {} ETH!",
            result.rolled_number,
            format_eth_fixed6(result.winning_amount.unwrap_or_default())
        ),
        Outcome::Lost => format!(
            "You lost. Rolled {}. Better luck next time!",
            result.rolled_number
        ),
    }
}

/// One application session: every component, their side effects, and the user-level
/// operations.
pub struct GameController<W> {
    config: SyncConfig,
    writer: W,
    identity: IdentityResolver,
    guard: NetworkGuard,
    tracker: TransactionTracker,
    correlator: EventCorrelator,
    cache: ReadCache,
    active_chain_id: Option<u64>,
    pub inputs: InputFields,
    notification: Option<Notification>,
    errors: Vec<String>,
    read_commands: Vec<ReadCommand>,
}

impl<W: GameWriter> GameController<W> {
    pub fn new(config: SyncConfig, writer: W) -> Self {
        Self {
            guard: NetworkGuard::new(config.required_chain_id)
                .with_switch_settle(config.chain_switch_settle),
            tracker: TransactionTracker::new(
                config.settle_delay,
                config.liquidity_settle_delay,
            ),
            correlator: EventCorrelator::new(config.history_capacity),
            identity: IdentityResolver::default(),
            cache: ReadCache::default(),
            active_chain_id: None,
            inputs: InputFields::default(),
            notification: None,
            errors: Vec::new(),
            read_commands: Vec::new(),
            config,
            writer,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn session(&self) -> &Session {
        self.identity.session()
    }

    pub fn effective_address(&self) -> Option<Address> {
        self.identity.effective_address()
    }

    pub fn tracker(&self) -> &TransactionTracker {
        &self.tracker
    }

    pub fn correlator(&self) -> &EventCorrelator {
        &self.correlator
    }

    pub fn cache(&self) -> &ReadCache {
        &self.cache
    }

    pub fn snapshot(&self) -> Option<&ReadSnapshot> {
        self.cache.snapshot()
    }

    pub fn network_status(&self) -> NetworkStatus {
        self.guard.status()
    }

    pub fn network_warning(&self) -> Option<&str> {
        self.guard.warning()
    }

    pub fn notification(&self) -> Option<&Notification> {
        self.notification.as_ref()
    }

    pub fn dismiss_notification(&mut self) {
        self.notification = None;
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Read-worker commands produced since the last call.
    pub fn take_read_commands(&mut self) -> Vec<ReadCommand> {
        std::mem::take(&mut self.read_commands)
    }

    pub fn is_waiting(&self) -> bool {
        self.tracker.state().is_in_flight()
    }

    /// Applies a new session sample. Retargets the read key and the event filter when the
    /// effective address changed, and says what to do with the direct session.
    pub fn sync_session(
        &mut self,
        session: Session,
        direct_connected: bool,
        active_chain_id: Option<u64>,
    ) -> Option<SessionAction> {
        if let Some(address) = self.identity.update(session) {
            self.correlator.set_effective_address(address);
        }
        self.active_chain_id = active_chain_id;

        let key = self.read_key();
        if self.cache.set_key(key) {
            self.read_commands.push(ReadCommand::Retarget(key));
            // a fresh connection's balance lags behind the wallet
            if key.is_some() {
                self.read_commands
                    .push(ReadCommand::FetchAfter(self.config.settle_delay));
            }
        }
        reconcile_direct_session(&session, direct_connected)
    }

    fn read_key(&self) -> Option<ReadKey> {
        let session = self.identity.session();
        if !session.reads_enabled() {
            return None;
        }
        Some(ReadKey {
            address: session.effective_address()?,
            chain_id: self.active_chain_id.unwrap_or(self.config.required_chain_id),
        })
    }

    pub async fn check_network<S: ChainSwitcher>(
        &mut self,
        switcher: &S,
        is_connected: bool,
        active_chain_id: Option<u64>,
    ) -> NetworkStatus {
        self.guard
            .enforce(switcher, is_connected, active_chain_id)
            .await
    }

    pub fn apply_snapshot(&mut self, snapshot: ReadSnapshot) -> bool {
        for err in snapshot.errors() {
            warn!(%err, "field unavailable in latest snapshot");
        }
        self.cache.apply(snapshot)
    }

    pub fn refetch(&mut self) {
        self.read_commands.push(ReadCommand::FetchNow);
    }

    pub async fn handle_roll_dice(&mut self) -> Result<TxHash> {
        let Some(bet) = parse_eth(&self.inputs.bet_amount) else {
            return Err(self.reject(ActionError::validation(
                "Please enter a valid bet amount",
            )));
        };
        let action = GameAction::RollDice {
            prediction: self.inputs.prediction,
            bet,
        };
        self.submit(action).await
    }

    pub async fn handle_add_liquidity(&mut self) -> Result<TxHash> {
        let Some(amount) = parse_eth(&self.inputs.add_amount) else {
            return Err(self.reject(ActionError::validation("Invalid amount")));
        };
        self.submit(GameAction::AddLiquidity { amount }).await
    }

    /// `remove_amount` is a pool share amount, denominated like ETH.
    pub async fn handle_remove_liquidity(&mut self) -> Result<TxHash> {
        let Some(amount) = parse_eth(&self.inputs.remove_amount) else {
            return Err(self.reject(ActionError::validation("Invalid amount")));
        };
        self.submit(GameAction::RemoveLiquidity { amount }).await
    }

    async fn submit(&mut self, action: GameAction) -> Result<TxHash> {
        if self.guard.status() == NetworkStatus::WrongNetwork {
            let required = self.guard.required_chain_id();
            return Err(self.reject(ActionError::WrongNetwork(required)));
        }
        let session = self.identity.session();
        let guard = ActionGuard {
            is_authenticated: session.can_transact() && session.effective_address().is_some(),
            min_bet: self.cache.min_bet(),
        };
        if let Err(err) = self.tracker.begin(action, guard) {
            return Err(self.reject(err));
        }
        self.notification = None;
        self.correlator.clear_latest();

        let sent = match action {
            GameAction::RollDice { prediction, bet } => {
                self.writer.roll_dice(prediction, bet).await
            }
            GameAction::AddLiquidity { amount } => self.writer.add_liquidity(amount).await,
            GameAction::RemoveLiquidity { amount } => {
                self.writer.remove_liquidity(amount).await
            }
        };

        match sent {
            Ok(hash) => {
                self.tracker.submitted(hash).map_err(anyhow::Error::from)?;
                let message = match action {
                    GameAction::RollDice { .. } => {
                        format!("Dice roll submitted! Transaction: {}...", short_hash(&hash))
                    }
                    _ => format!("Transaction submitted: {}", hash_preview(&hash)),
                };
                self.notify(message, NotificationKind::Success);
                Ok(hash)
            }
            Err(err) => {
                let message = format!("{err:#}");
                self.tracker.fail(&message).map_err(anyhow::Error::from)?;
                self.push_error(format!("{} failed: {message}", action.label()));
                self.notify(message, NotificationKind::Error);
                Err(ActionError::Transport(err))
            }
        }
    }

    fn reject(&mut self, err: ActionError) -> ActionError {
        info!(%err, "action rejected");
        self.notify(err.to_string(), NotificationKind::Error);
        err
    }

    /// Checks the receipt of the pending transaction once. Does nothing unless a
    /// transaction is waiting for confirmation.
    pub async fn poll_receipt(&mut self) -> anyhow::Result<LifecycleState> {
        let state = self.tracker.state();
        if !matches!(state, LifecycleState::Submitted | LifecycleState::Confirming) {
            return Ok(state);
        }
        let Some(hash) = self.tracker.pending().map(|pending| pending.hash) else {
            return Ok(state);
        };
        self.tracker.confirming()?;

        let awaits_result = self
            .tracker
            .action()
            .is_some_and(|action| action.awaits_external_result());
        match self.writer.receipt_status(hash).await {
            Ok(None) => {}
            Ok(Some(true)) => {
                let effects = self.tracker.confirmed(hash)?;
                if !effects.is_empty() {
                    if awaits_result {
                        self.notify(
                            "Dice roll confirmed! Waiting for VRF result...",
                            NotificationKind::Success,
                        );
                    } else {
                        self.notify(
                            format!(
                                "Transaction confirmed successfully! Hash: {}",
                                hash_preview(&hash)
                            ),
                            NotificationKind::Success,
                        );
                    }
                }
                self.apply_effects(effects);
            }
            Ok(Some(false)) => self.receipt_failed(awaits_result, "transaction reverted")?,
            Err(err) => self.receipt_failed(awaits_result, &format!("{err:#}"))?,
        }
        Ok(self.tracker.state())
    }

    fn receipt_failed(&mut self, awaits_result: bool, reason: &str) -> anyhow::Result<()> {
        error!(reason, "transaction did not confirm");
        self.tracker.fail(reason)?;
        self.push_error(format!("receipt: {reason}"));
        let message = if awaits_result {
            "Transaction failed to confirm. Please try again.".to_string()
        } else {
            format!("Transaction failed: {reason}")
        };
        self.notify(message, NotificationKind::Error);
        Ok(())
    }

    /// Feeds an event batch through the correlator and lets matching results resolve
    /// the pending roll.
    pub fn ingest_events(&mut self, batch: &[GameEvent]) -> Vec<GameResult> {
        let results = self.correlator.ingest(batch);
        for result in &results {
            match self.tracker.observe_result(result) {
                Some(effects) => self.apply_effects(effects),
                // a result from elsewhere still moves the score
                None => self
                    .read_commands
                    .push(ReadCommand::FetchAfter(self.config.settle_delay)),
            }
            let kind = match result.outcome {
                Outcome::Won => NotificationKind::Success,
                Outcome::Lost => NotificationKind::Error,
            };
            self.notification = Some(Notification {
                message: result_message(result),
                kind,
                game_result: true,
            });
        }
        results
    }

    /// Gives up on the pending roll's result.
    pub fn abandon_pending_result(&mut self) -> anyhow::Result<()> {
        self.tracker.abandon()?;
        self.notify(
            "No dice result arrived in time. Your score will update once it does.",
            NotificationKind::Error,
        );
        self.read_commands.push(ReadCommand::FetchNow);
        Ok(())
    }

    fn apply_effects(&mut self, effects: Vec<LifecycleEffect>) {
        for effect in effects {
            match effect {
                LifecycleEffect::ClearInputs => {
                    self.inputs.bet_amount.clear();
                    self.inputs.add_amount.clear();
                    self.inputs.remove_amount.clear();
                }
                LifecycleEffect::ClearBetInput => self.inputs.bet_amount.clear(),
                LifecycleEffect::RefetchAfter(delay) => {
                    self.read_commands.push(ReadCommand::FetchAfter(delay));
                }
            }
        }
    }

    fn notify(&mut self, message: impl Into<String>, kind: NotificationKind) {
        self.notification = Some(Notification {
            message: message.into(),
            kind,
            game_result: false,
        });
    }

    fn push_error(&mut self, item: String) {
        self.errors.push(item);
        if self.errors.len() > MAX_ERRORS {
            let drain = self.errors.len() - MAX_ERRORS;
            self.errors.drain(0..drain);
        }
    }
}
