use crate::{
    controller::{
        GameController,
        GameWriter,
    },
    events::{
        EventKind,
        EventSource,
        EventSubscription,
    },
    read_cache::{
        ContractReader,
        ReadCommand,
        ReadUpdate,
        ReadWorkerHandle,
    },
    tracker::LifecycleState,
};
use tokio::{
    sync::mpsc,
    time::{
        self,
        Instant,
    },
};
use tracing::{
    debug,
    info,
    warn,
};

/// Background tasks feeding one controller.
pub struct SessionChannels {
    read_worker: ReadWorkerHandle,
    snapshots: mpsc::UnboundedReceiver<ReadUpdate>,
    events: EventSubscription,
}

impl SessionChannels {
    pub fn start<W, R, S>(controller: &GameController<W>, reader: R, source: S) -> Self
    where
        W: GameWriter,
        R: ContractReader,
        S: EventSource,
    {
        let (read_worker, snapshots) =
            ReadWorkerHandle::spawn(reader, controller.config(), controller.cache().key());
        let events =
            EventSubscription::spawn(source, &[EventKind::PlayerWon, EventKind::PlayerLost]);
        Self {
            read_worker,
            snapshots,
            events,
        }
    }

    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        self.events.unsubscribe();
        self.read_worker.shutdown().await
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriveMode {
    /// Return once nothing is in flight and any scheduled refetch has landed.
    UntilSettled,
    /// Keep following reads and events until interrupted.
    Follow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriveExit {
    Settled(LifecycleState),
    Interrupted,
    WorkerClosed,
}

/// Forwards queued read commands and returns the latest instant a requested fetch
/// may start, if any was requested.
fn flush_read_commands<W: GameWriter>(
    controller: &mut GameController<W>,
    channels: &SessionChannels,
) -> Option<Instant> {
    let now = Instant::now();
    let mut due = None;
    for command in controller.take_read_commands() {
        let requested = match command {
            ReadCommand::FetchNow => Some(now),
            ReadCommand::FetchAfter(delay) => Some(now + delay),
            ReadCommand::Retarget(_) | ReadCommand::Shutdown => None,
        };
        due = due.max(requested);
        channels.read_worker.send(command);
    }
    due
}

/// Drives the controller: polls the receipt, routes snapshots and event batches, and
/// gives up on a missing game result after the configured deadline. `on_update` runs
/// after every step.
pub async fn run_loop<W, F>(
    controller: &mut GameController<W>,
    channels: &mut SessionChannels,
    mode: DriveMode,
    mut on_update: F,
) -> anyhow::Result<DriveExit>
where
    W: GameWriter,
    F: FnMut(&GameController<W>),
{
    info!(?mode, "running session loop");
    let mut receipt_ticker = time::interval(controller.config().receipt_poll_interval);
    let result_timeout = controller.config().result_timeout;
    let mut result_deadline: Option<Instant> = None;
    // a snapshot only counts as the requested refetch if its read started at or after this
    let mut refetch_due: Option<Instant> = None;
    let mut events_open = true;

    loop {
        refetch_due = refetch_due.max(flush_read_commands(controller, channels));

        let state = controller.tracker().state();
        if state == LifecycleState::AwaitingExternalResult {
            if result_deadline.is_none() {
                result_deadline = result_timeout.map(|timeout| Instant::now() + timeout);
            }
        } else {
            result_deadline = None;
        }
        if mode == DriveMode::UntilSettled && !state.is_in_flight() && refetch_due.is_none() {
            return Ok(DriveExit::Settled(state));
        }
        let receipt_due = matches!(
            state,
            LifecycleState::Submitted | LifecycleState::Confirming
        );

        tokio::select! {
            _ = receipt_ticker.tick(), if receipt_due => {
                controller.poll_receipt().await?;
            }
            batch = channels.events.next_batch(), if events_open => {
                match batch {
                    Some(batch) => {
                        debug!(events = batch.len(), "event batch");
                        controller.ingest_events(&batch);
                    }
                    None => {
                        warn!("event subscription ended");
                        events_open = false;
                    }
                }
            }
            update = channels.snapshots.recv() => {
                let Some(ReadUpdate { snapshot, started }) = update else {
                    warn!("read worker channel closed");
                    return Ok(DriveExit::WorkerClosed);
                };
                let applied = controller.apply_snapshot(snapshot);
                if applied && refetch_due.is_some_and(|due| started >= due) {
                    refetch_due = None;
                }
            }
            _ = time::sleep_until(result_deadline.unwrap_or_else(Instant::now)), if result_deadline.is_some() => {
                warn!("no game result before the deadline");
                controller.abandon_pending_result()?;
                result_deadline = None;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                return Ok(DriveExit::Interrupted);
            }
        }
        on_update(controller);
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        config::SyncConfig,
        events::GameEvent,
        identity::Session,
    };
    use alloy::primitives::{
        Address,
        B256,
        TxHash,
        U256,
        address,
    };
    use std::{
        collections::VecDeque,
        sync::{
            Arc,
            Mutex,
        },
        time::Duration,
    };

    const ME: Address = address!("0x00000000000000000000000000000000000000aa");

    #[derive(Clone, Default)]
    struct Chain {
        receipt: Option<bool>,
        score: Arc<Mutex<U256>>,
    }

    impl GameWriter for Chain {
        async fn roll_dice(&self, _: u8, _: U256) -> anyhow::Result<TxHash> {
            Ok(B256::repeat_byte(0xab))
        }
        async fn add_liquidity(&self, _: U256) -> anyhow::Result<TxHash> {
            Ok(B256::repeat_byte(0xac))
        }
        async fn remove_liquidity(&self, _: U256) -> anyhow::Result<TxHash> {
            Ok(B256::repeat_byte(0xad))
        }
        async fn receipt_status(&self, _: TxHash) -> anyhow::Result<Option<bool>> {
            Ok(self.receipt)
        }
    }

    impl ContractReader for Chain {
        async fn min_bet(&self) -> anyhow::Result<U256> {
            Ok(U256::from(1_000u64))
        }
        async fn multiplier(&self) -> anyhow::Result<U256> {
            Ok(U256::from(5u64))
        }
        async fn player_score(&self, _: Address) -> anyhow::Result<U256> {
            Ok(*self.score.lock().unwrap())
        }
        async fn most_recent_roll(&self) -> anyhow::Result<U256> {
            Ok(U256::from(4u64))
        }
        async fn players(&self) -> anyhow::Result<Vec<Address>> {
            Ok(vec![ME])
        }
        async fn total_liquidity(&self) -> anyhow::Result<U256> {
            Ok(U256::ZERO)
        }
        async fn provider_balance(&self, _: Address) -> anyhow::Result<U256> {
            Ok(U256::ZERO)
        }
        async fn provider_shares(&self, _: Address) -> anyhow::Result<U256> {
            Ok(U256::ZERO)
        }
        async fn wallet_balance(&self, _: Address) -> anyhow::Result<U256> {
            Ok(U256::from(10u64).pow(U256::from(18u64)))
        }
    }

    struct DelayedEvents {
        batches: VecDeque<(Duration, Vec<GameEvent>)>,
        score: Arc<Mutex<U256>>,
    }

    impl EventSource for DelayedEvents {
        async fn next_event_batch(&mut self) -> anyhow::Result<Vec<GameEvent>> {
            match self.batches.pop_front() {
                Some((delay, batch)) => {
                    time::sleep(delay).await;
                    *self.score.lock().unwrap() += U256::from(1u64);
                    Ok(batch)
                }
                None => std::future::pending().await,
            }
        }
    }

    fn controller(chain: Chain) -> GameController<Chain> {
        let mut controller = GameController::new(SyncConfig::default(), chain);
        controller.sync_session(
            Session {
                embedded_address: Some(ME),
                direct_address: None,
                is_authenticated: true,
                is_ready: true,
            },
            true,
            None,
        );
        controller.inputs.bet_amount = "0.01".to_string();
        controller.inputs.prediction = 4;
        controller
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop__resolves_roll_and_waits_for_refetch() {
        // given
        let chain = Chain {
            receipt: Some(true),
            ..Chain::default()
        };
        let source = DelayedEvents {
            batches: VecDeque::from([(
                Duration::from_secs(25),
                vec![GameEvent::PlayerWon {
                    player: ME,
                    bet_amount: U256::from(10u64),
                    winning_amount: U256::from(20u64),
                    rolled_number: U256::from(4u64),
                    tx_hash: None,
                }],
            )]),
            score: chain.score.clone(),
        };
        let mut controller = controller(chain.clone());
        let mut channels = SessionChannels::start(&controller, chain, source);
        controller.handle_roll_dice().await.unwrap();

        // when
        let exit = run_loop(&mut controller, &mut channels, DriveMode::UntilSettled, |_| {})
            .await
            .unwrap();

        // then
        assert_eq!(exit, DriveExit::Settled(LifecycleState::Resolved));
        assert!(
            controller
                .notification()
                .unwrap()
                .message
                .starts_with("You WON! Rolled 4.")
        );
        assert_eq!(
            controller.snapshot().unwrap().player_score,
            Ok(U256::from(1u64))
        );
        channels.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop__ignores_interval_read_that_started_before_settle_delay() {
        // given
        let config = SyncConfig::default();
        let chain = Chain {
            receipt: Some(true),
            ..Chain::default()
        };
        // lands just before the third interval read at 30s
        let arrives = config.refresh_interval * 3 - Duration::from_millis(500);
        let source = DelayedEvents {
            batches: VecDeque::from([(
                arrives,
                vec![GameEvent::PlayerLost {
                    player: ME,
                    bet_amount: U256::from(10u64),
                    rolled_number: U256::from(2u64),
                    tx_hash: None,
                }],
            )]),
            score: chain.score.clone(),
        };
        let mut controller = controller(chain.clone());
        let mut channels = SessionChannels::start(&controller, chain, source);
        controller.handle_roll_dice().await.unwrap();
        let mut resolved_at = None;

        // when
        let exit = run_loop(&mut controller, &mut channels, DriveMode::UntilSettled, |c| {
            if resolved_at.is_none() && c.tracker().state() == LifecycleState::Resolved {
                resolved_at = Some(Instant::now());
            }
        })
        .await
        .unwrap();

        // then
        assert_eq!(exit, DriveExit::Settled(LifecycleState::Resolved));
        assert!(resolved_at.unwrap().elapsed() >= config.settle_delay);
        channels.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop__abandons_missing_result_after_deadline() {
        // given
        let chain = Chain {
            receipt: Some(true),
            ..Chain::default()
        };
        let source = DelayedEvents {
            batches: VecDeque::new(),
            score: chain.score.clone(),
        };
        let mut controller = controller(chain.clone());
        let mut channels = SessionChannels::start(&controller, chain, source);
        controller.handle_roll_dice().await.unwrap();
        let started = Instant::now();

        // when
        let exit = run_loop(&mut controller, &mut channels, DriveMode::UntilSettled, |_| {})
            .await
            .unwrap();

        // then
        assert_eq!(exit, DriveExit::Settled(LifecycleState::Idle));
        assert!(started.elapsed() >= SyncConfig::default().result_timeout.unwrap());
        channels.shutdown().await.unwrap();
    }
}
