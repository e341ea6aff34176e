use crate::{
    amount::format_eth,
    config::{
        LIQUIDITY_SETTLE_DELAY,
        SETTLE_DELAY,
    },
    error::{
        ActionError,
        Result,
        TrackerError,
    },
    events::GameResult,
};
use alloy::primitives::{
    TxHash,
    U256,
};
use chrono::{
    DateTime,
    Utc,
};
use generated_abi::is_valid_face;
use std::{
    fmt,
    time::Duration,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameAction {
    RollDice { prediction: u8, bet: U256 },
    AddLiquidity { amount: U256 },
    RemoveLiquidity { amount: U256 },
}

impl GameAction {
    /// Only the dice roll is settled by an off-chain randomness callback.
    pub fn awaits_external_result(&self) -> bool {
        matches!(self, GameAction::RollDice { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            GameAction::RollDice { .. } => "roll dice",
            GameAction::AddLiquidity { .. } => "add liquidity",
            GameAction::RemoveLiquidity { .. } => "remove liquidity",
        }
    }

    fn validate(&self, min_bet: U256) -> Result<()> {
        match *self {
            GameAction::RollDice { prediction, bet } => {
                if bet.is_zero() {
                    return Err(ActionError::validation("Please enter a valid bet amount"));
                }
                if bet < min_bet {
                    return Err(ActionError::validation(format!(
                        "Bet amount must be at least {} ETH",
                        format_eth(min_bet)
                    )));
                }
                if !is_valid_face(prediction) {
                    return Err(ActionError::validation(
                        "Invalid prediction. Must be between 1 and 6",
                    ));
                }
                Ok(())
            }
            GameAction::AddLiquidity { amount } | GameAction::RemoveLiquidity { amount } => {
                if amount.is_zero() {
                    Err(ActionError::validation("Invalid amount"))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// What the caller knows at the moment the user asks for an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActionGuard {
    pub is_authenticated: bool,
    pub min_bet: U256,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStatus {
    Submitted,
    Confirming,
    Confirmed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingTransaction {
    pub hash: TxHash,
    pub submitted_at: DateTime<Utc>,
    pub status: TxStatus,
    pub awaiting_external_result: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Submitting,
    Submitted,
    Confirming,
    Confirmed,
    AwaitingExternalResult,
    Resolved,
    Failed,
}

impl LifecycleState {
    /// States in which another action must not start.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            LifecycleState::Submitting
                | LifecycleState::Submitted
                | LifecycleState::Confirming
                | LifecycleState::AwaitingExternalResult
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Submitting => "submitting",
            LifecycleState::Submitted => "submitted",
            LifecycleState::Confirming => "confirming",
            LifecycleState::Confirmed => "confirmed",
            LifecycleState::AwaitingExternalResult => "awaiting the game result",
            LifecycleState::Resolved => "resolved",
            LifecycleState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Side effects the owner of the tracker has to carry out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleEffect {
    ClearInputs,
    ClearBetInput,
    RefetchAfter(Duration),
}

/// Drives one write at a time from submission to its terminal state.
#[derive(Debug)]
pub struct TransactionTracker {
    state: LifecycleState,
    action: Option<GameAction>,
    pending: Option<PendingTransaction>,
    processed_hash: Option<TxHash>,
    awaiting_since: Option<DateTime<Utc>>,
    failure: Option<String>,
    settle_delay: Duration,
    liquidity_settle_delay: Duration,
}

impl Default for TransactionTracker {
    fn default() -> Self {
        Self::new(SETTLE_DELAY, LIQUIDITY_SETTLE_DELAY)
    }
}

impl TransactionTracker {
    pub fn new(settle_delay: Duration, liquidity_settle_delay: Duration) -> Self {
        Self {
            state: LifecycleState::Idle,
            action: None,
            pending: None,
            processed_hash: None,
            awaiting_since: None,
            failure: None,
            settle_delay,
            liquidity_settle_delay,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn action(&self) -> Option<&GameAction> {
        self.action.as_ref()
    }

    pub fn pending(&self) -> Option<&PendingTransaction> {
        self.pending.as_ref()
    }

    pub fn awaiting_since(&self) -> Option<DateTime<Utc>> {
        self.awaiting_since
    }

    /// The error that moved the lifecycle to `Failed`.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// `Idle → Submitting`. Fails without touching the state when the action is invalid,
    /// the session cannot sign, or another action is still in flight.
    pub fn begin(&mut self, action: GameAction, guard: ActionGuard) -> Result<()> {
        if self.state.is_in_flight() {
            return Err(ActionError::ActionInFlight(self.state));
        }
        action.validate(guard.min_bet)?;
        if !guard.is_authenticated {
            return Err(ActionError::NotAuthenticated);
        }

        tracing::info!(action = action.label(), "submitting transaction");
        self.state = LifecycleState::Submitting;
        self.action = Some(action);
        self.pending = None;
        self.processed_hash = None;
        self.awaiting_since = None;
        self.failure = None;
        Ok(())
    }

    /// `Submitting → Submitted` once the wallet returned a hash.
    pub fn submitted(&mut self, hash: TxHash) -> std::result::Result<(), TrackerError> {
        self.expect_state(&[LifecycleState::Submitting], "submitted")?;
        tracing::info!(%hash, "transaction submitted");
        self.pending = Some(PendingTransaction {
            hash,
            submitted_at: Utc::now(),
            status: TxStatus::Submitted,
            awaiting_external_result: false,
        });
        self.state = LifecycleState::Submitted;
        Ok(())
    }

    /// `Submitted → Confirming`, repeated calls while confirming are no-ops.
    pub fn confirming(&mut self) -> std::result::Result<(), TrackerError> {
        if self.state == LifecycleState::Confirming {
            return Ok(());
        }
        self.expect_state(&[LifecycleState::Submitted], "confirming")?;
        self.set_status(TxStatus::Confirming);
        self.state = LifecycleState::Confirming;
        Ok(())
    }

    /// A successful receipt for `hash`. Returns the effects to apply; a hash that has
    /// already been processed yields no effects.
    pub fn confirmed(
        &mut self,
        hash: TxHash,
    ) -> std::result::Result<Vec<LifecycleEffect>, TrackerError> {
        if self.processed_hash == Some(hash) {
            tracing::debug!(%hash, "receipt already processed");
            return Ok(Vec::new());
        }
        self.expect_state(
            &[LifecycleState::Submitted, LifecycleState::Confirming],
            "confirmed",
        )?;
        if self.pending.as_ref().map(|pending| pending.hash) != Some(hash) {
            return Err(TrackerError {
                from: self.state,
                event: "confirmed",
            });
        }

        self.processed_hash = Some(hash);
        self.set_status(TxStatus::Confirmed);
        tracing::info!(%hash, "transaction confirmed");

        let mut effects = vec![LifecycleEffect::ClearInputs];
        if self.action.is_some_and(|action| action.awaits_external_result()) {
            if let Some(pending) = self.pending.as_mut() {
                pending.awaiting_external_result = true;
            }
            self.awaiting_since = Some(Utc::now());
            self.state = LifecycleState::AwaitingExternalResult;
        } else {
            self.state = LifecycleState::Confirmed;
            effects.push(LifecycleEffect::RefetchAfter(self.liquidity_settle_delay));
        }
        Ok(effects)
    }

    /// Submission or confirmation failed.
    pub fn fail(&mut self, reason: &str) -> std::result::Result<(), TrackerError> {
        self.expect_state(
            &[LifecycleState::Submitting, LifecycleState::Confirming],
            "fail",
        )?;
        tracing::error!(reason, state = %self.state, "transaction failed");
        self.set_status(TxStatus::Failed);
        self.failure = Some(reason.to_string());
        self.state = LifecycleState::Failed;
        Ok(())
    }

    /// Offers a result for the effective address. Resolves the lifecycle when the result
    /// carries the pending hash or was observed after the wait began.
    pub fn observe_result(&mut self, result: &GameResult) -> Option<Vec<LifecycleEffect>> {
        if self.state != LifecycleState::AwaitingExternalResult {
            return None;
        }
        let pending_hash = self.pending.as_ref().map(|pending| pending.hash);
        let hash_matches = result.transaction_hash.is_some() && result.transaction_hash == pending_hash;
        let after_wait = self
            .awaiting_since
            .is_some_and(|since| result.observed_at >= since);
        if !hash_matches && !after_wait {
            return None;
        }

        tracing::info!(
            outcome = ?result.outcome,
            rolled = result.rolled_number,
            "game result resolved the pending roll"
        );
        self.state = LifecycleState::Resolved;
        self.pending = None;
        self.awaiting_since = None;
        Some(vec![
            LifecycleEffect::ClearBetInput,
            LifecycleEffect::RefetchAfter(self.settle_delay),
        ])
    }

    /// Stops waiting for a result that is not coming.
    pub fn abandon(&mut self) -> std::result::Result<(), TrackerError> {
        self.expect_state(&[LifecycleState::AwaitingExternalResult], "abandon")?;
        tracing::warn!(
            hash = ?self.pending.as_ref().map(|pending| pending.hash),
            "gave up waiting for the game result"
        );
        self.state = LifecycleState::Idle;
        self.pending = None;
        self.awaiting_since = None;
        Ok(())
    }

    fn expect_state(
        &self,
        allowed: &[LifecycleState],
        event: &'static str,
    ) -> std::result::Result<(), TrackerError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(TrackerError {
                from: self.state,
                event,
            })
        }
    }

    fn set_status(&mut self, status: TxStatus) {
        if let Some(pending) = self.pending.as_mut() {
            pending.status = status;
        }
    }
}
