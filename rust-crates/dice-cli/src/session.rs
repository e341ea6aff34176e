use crate::{
    render::NotificationPrinter,
    wallets::KeystoreAuth,
};
use anyhow::{
    Context,
    Result,
    anyhow,
};
use deployments::{
    DeploymentEnv,
    DeploymentRecord,
    parse_address,
};
use dice_sync::{
    config::{
        ContractAddresses,
        SyncConfig,
    },
    controller::GameController,
    driver::{
        DriveExit,
        DriveMode,
        SessionChannels,
        run_loop,
    },
    identity::{
        AuthProvider,
        Session,
        SessionAction,
        SessionProvider,
    },
    network::NetworkStatus,
    rpc::{
        ChainReader,
        ChainWriter,
        DirectSession,
        LogPoller,
    },
};
use std::{
    path::PathBuf,
    time::Duration,
};
use tracing::{
    info,
    warn,
};

/// Everything the game commands need, resolved from flags and the deployments store.
#[derive(Clone, Debug)]
pub struct CliConfig {
    pub env: DeploymentEnv,
    pub rpc_url: String,
    pub wallet: Option<String>,
    pub wallet_dir: PathBuf,
    pub contracts: ContractAddresses,
    pub deployment_block: Option<u64>,
    pub score_api_url: Option<String>,
    pub result_timeout: Option<Duration>,
}

impl CliConfig {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            result_timeout: self.result_timeout,
            ..SyncConfig::for_chain(self.env.chain_id())
        }
    }
}

/// Flag values win over the stored record, field by field.
pub fn resolve_contracts(
    env: DeploymentEnv,
    record: Option<&DeploymentRecord>,
    dice_game: Option<&str>,
    liquidity_pool: Option<&str>,
) -> Result<ContractAddresses> {
    let dice_game = match (dice_game, record) {
        (Some(raw), _) => parse_address(raw).context("parsing --dice-game")?,
        (None, Some(record)) => record.dice_game_address()?,
        (None, None) => {
            return Err(anyhow!(
                "No deployment record for {env}; pass --dice-game and --liquidity-pool"
            ));
        }
    };
    let liquidity_pool = match (liquidity_pool, record) {
        (Some(raw), _) => parse_address(raw).context("parsing --liquidity-pool")?,
        (None, Some(record)) => record.liquidity_pool_address()?,
        (None, None) => {
            return Err(anyhow!(
                "No deployment record for {env}; pass --liquidity-pool"
            ));
        }
    };
    Ok(ContractAddresses {
        dice_game,
        liquidity_pool,
    })
}

/// `0` disables the deadline.
pub fn result_timeout(seconds: u64) -> Option<Duration> {
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

/// An unlocked wallet, its direct session and the controller fed by the background
/// workers.
pub struct CliSession {
    auth: KeystoreAuth,
    direct: DirectSession,
    pub controller: GameController<ChainWriter>,
    channels: SessionChannels,
    printer: NotificationPrinter,
}

impl CliSession {
    /// Unlocks (or creates) the wallet, connects it and starts the workers. Events are
    /// followed from `from_block` when given, otherwise from the chain head.
    pub async fn open(config: &CliConfig, from_block: Option<u64>) -> Result<Self> {
        let wallet = config
            .wallet
            .as_deref()
            .ok_or_else(|| anyhow!("Specify --wallet <name> to select a keystore wallet"))?;
        let mut auth = KeystoreAuth::new(config.wallet_dir.clone(), wallet);
        auth.connect_or_create_wallet()
            .await
            .context("unlocking keystore wallet")?;
        let signer = auth
            .signer()
            .cloned()
            .ok_or_else(|| anyhow!("wallet '{wallet}' is not unlocked"))?;
        let direct = DirectSession::connect(&config.rpc_url, signer)
            .await
            .context("connecting to RPC endpoint")?;

        let sync_config = config.sync_config();
        let event_poll_interval = sync_config.event_poll_interval;
        let mut controller =
            GameController::new(sync_config, direct.writer(config.contracts));
        let session = Session::observe(&auth, Some(&direct));
        // the keystore signs for both identities, so there is nothing to reconnect
        match controller.sync_session(session, direct.is_connected(), direct.chain_id()) {
            Some(SessionAction::ConnectDirect) => info!("direct session requested"),
            Some(SessionAction::DisconnectDirect) => warn!("direct session should close"),
            None => {}
        }

        let mut events = LogPoller::with_interval(
            direct.provider().clone(),
            config.contracts.dice_game,
            event_poll_interval,
        );
        if let Some(block) = from_block {
            info!(block, "following game events from block");
            events = events.from_block(block);
        }
        let reader = ChainReader::new(direct.provider().clone(), config.contracts);
        let channels = SessionChannels::start(&controller, reader, events);

        let mut cli = Self {
            auth,
            direct,
            controller,
            channels,
            printer: NotificationPrinter::default(),
        };
        cli.check_network().await;
        Ok(cli)
    }

    async fn check_network(&mut self) {
        let status = self
            .controller
            .check_network(&self.direct, self.direct.is_connected(), self.direct.chain_id())
            .await;
        if status == NetworkStatus::WrongNetwork {
            if let Some(warning) = self.controller.network_warning() {
                println!("{warning}");
            }
        }
    }

    /// Waits for the first snapshot of the current key.
    pub async fn load(&mut self) -> Result<DriveExit> {
        self.controller.refetch();
        self.drive(DriveMode::UntilSettled).await
    }

    pub async fn drive(&mut self, mode: DriveMode) -> Result<DriveExit> {
        let printer = &mut self.printer;
        run_loop(&mut self.controller, &mut self.channels, mode, |controller| {
            printer.observe(controller)
        })
        .await
    }

    /// Prints the notification left by a controller call made outside the loop.
    pub fn print_notification(&mut self) {
        self.printer.observe(&self.controller);
    }

    pub async fn close(mut self) -> Result<()> {
        self.auth.logout();
        self.channels.shutdown().await
    }
}
