use clap::{
    ArgGroup,
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use deployments::{
    DeploymentEnv,
    DeploymentRecord,
    DeploymentStore,
    parse_address,
};
use dice_sync::{
    config::{
        DEFAULT_LOCAL_RPC_URL,
        DEFAULT_SEPOLIA_RPC_URL,
    },
    driver::{
        DriveExit,
        DriveMode,
    },
    leaderboard::{
        OnChainScores,
        build_leaderboard,
    },
    read_cache::ContractReader,
    rpc::{
        ChainReader,
        read_provider,
    },
    score_client::ScoreClient,
    tracker::LifecycleState,
};
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
    process::ExitCode,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::EnvFilter;

mod render;
mod session;
mod wallets;

use session::{
    CliConfig,
    CliSession,
    resolve_contracts,
    result_timeout,
};

#[derive(Parser, Debug)]
#[command(
    name = "dice-cli",
    about = "Play the dice prediction game and provide liquidity from the terminal",
    version,
    group(
        ArgGroup::new("network")
            .args(["sepolia", "local"])
    )
)]
struct Args {
    /// Play on Sepolia (default)
    #[arg(long)]
    sepolia: bool,

    /// Play against a local node
    #[arg(long)]
    local: bool,

    /// Override the RPC URL for the selected network
    #[arg(long)]
    rpc_url: Option<String>,

    /// Keystore wallet to play with; created on first use
    #[arg(long)]
    wallet: Option<String>,

    /// Override the wallet directory (defaults to ~/.dice/wallets)
    #[arg(long)]
    wallet_dir: Option<String>,

    /// Dice game contract (defaults to the deployment record)
    #[arg(long)]
    dice_game: Option<String>,

    /// Liquidity pool contract (defaults to the deployment record)
    #[arg(long)]
    liquidity_pool: Option<String>,

    /// Look leaderboard scores up through a score API instead of the contract
    #[arg(long)]
    score_api_url: Option<String>,

    /// Give up waiting for a roll result after this many seconds; 0 waits forever
    #[arg(long, default_value_t = 120)]
    result_timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show contract state for the wallet
    Status,
    /// Bet on a face of the die and wait for the result
    Roll {
        /// Face from 1 to 6
        #[arg(long)]
        prediction: u8,
        /// Bet in ETH
        #[arg(long)]
        bet: String,
    },
    /// Deposit ETH into the liquidity pool
    AddLiquidity {
        /// Amount in ETH
        amount: String,
    },
    /// Withdraw pool shares
    RemoveLiquidity {
        /// Share amount, denominated like ETH
        amount: String,
    },
    /// Follow game results for the wallet until interrupted
    Watch {
        /// Start from this block instead of the chain head
        #[arg(long)]
        from_block: Option<u64>,
        /// Start from the recorded deployment block
        #[arg(long, conflicts_with = "from_block")]
        replay: bool,
    },
    /// Rank every player by score
    Leaderboard,
    /// List keystore wallets
    Wallets,
    /// Store --dice-game and --liquidity-pool as the deployment record
    RecordDeployment {
        #[arg(long)]
        deployment_block: Option<u64>,
    },
}

enum GameWrite {
    Roll { prediction: u8, bet: String },
    AddLiquidity(String),
    RemoveLiquidity(String),
}

fn log_dir() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".dice").join("logs"),
        Err(_) => PathBuf::from(".dice-logs"),
    }
}

fn init_tracing() -> Result<WorkerGuard> {
    let dir = log_dir();
    fs::create_dir_all(&dir)
        .wrap_err_with(|| format!("Failed to create log directory {}", dir.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, "dice-cli.log"));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    Ok(guard)
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{line}");
    }
}

fn exit_code(exit: DriveExit) -> ExitCode {
    match exit {
        DriveExit::Settled(LifecycleState::Failed) | DriveExit::WorkerClosed => {
            ExitCode::FAILURE
        }
        _ => ExitCode::SUCCESS,
    }
}

async fn status(config: &CliConfig) -> Result<ExitCode> {
    let mut session = CliSession::open(config, None).await.map_err(|e| eyre!(e))?;
    let exit = session.load().await.map_err(|e| eyre!(e))?;
    print_lines(render::status_lines(&session.controller));
    session.close().await.map_err(|e| eyre!(e))?;
    Ok(exit_code(exit))
}

async fn transact(config: &CliConfig, write: GameWrite) -> Result<ExitCode> {
    let mut session = CliSession::open(config, None).await.map_err(|e| eyre!(e))?;
    // the minimum bet check needs the contract's value
    session.load().await.map_err(|e| eyre!(e))?;

    let controller = &mut session.controller;
    let submitted = match write {
        GameWrite::Roll { prediction, bet } => {
            controller.inputs.prediction = prediction;
            controller.inputs.bet_amount = bet;
            controller.handle_roll_dice().await
        }
        GameWrite::AddLiquidity(amount) => {
            controller.inputs.add_amount = amount;
            controller.handle_add_liquidity().await
        }
        GameWrite::RemoveLiquidity(amount) => {
            controller.inputs.remove_amount = amount;
            controller.handle_remove_liquidity().await
        }
    };
    session.print_notification();

    let exit = match submitted {
        Ok(hash) => {
            tracing::info!(%hash, "transaction submitted");
            let exit = session
                .drive(DriveMode::UntilSettled)
                .await
                .map_err(|e| eyre!(e))?;
            print_lines(render::status_lines(&session.controller));
            exit_code(exit)
        }
        Err(err) => {
            if !err.is_local() {
                tracing::warn!("not waiting for confirmation: {err}");
            }
            ExitCode::FAILURE
        }
    };
    session.close().await.map_err(|e| eyre!(e))?;
    Ok(exit)
}

async fn watch(config: &CliConfig, from_block: Option<u64>, replay: bool) -> Result<ExitCode> {
    let from_block = if replay {
        let block = config.deployment_block.ok_or_else(|| {
            eyre!(
                "No deployment block on record for {}; pass --from-block",
                config.env
            )
        })?;
        Some(block)
    } else {
        from_block
    };
    let mut session = CliSession::open(config, from_block)
        .await
        .map_err(|e| eyre!(e))?;
    session.load().await.map_err(|e| eyre!(e))?;
    print_lines(render::status_lines(&session.controller));
    println!("Watching for game results, Ctrl-C to stop");
    let exit = session
        .drive(DriveMode::Follow)
        .await
        .map_err(|e| eyre!(e))?;
    session.close().await.map_err(|e| eyre!(e))?;
    Ok(exit_code(exit))
}

async fn leaderboard(config: &CliConfig) -> Result<ExitCode> {
    let provider = read_provider(&config.rpc_url).map_err(|e| eyre!(e))?;
    let reader = ChainReader::new(provider, config.contracts);
    let players = reader
        .players()
        .await
        .map_err(|e| eyre!(e))
        .wrap_err("Failed to read the player list")?;
    let board = match &config.score_api_url {
        Some(url) => {
            let client =
                ScoreClient::new(url.clone(), config.contracts.dice_game).map_err(|e| eyre!(e))?;
            build_leaderboard(&client, players).await
        }
        None => build_leaderboard(&OnChainScores(&reader), players).await,
    };
    print_lines(render::leaderboard_lines(&board));
    Ok(ExitCode::SUCCESS)
}

fn list_wallets(dir: &Path) -> Result<ExitCode> {
    let wallets = wallets::list_wallets(dir).map_err(|e| eyre!(e))?;
    if wallets.is_empty() {
        println!("No wallets in {}", dir.display());
    }
    for wallet in wallets {
        println!("{}  {}", wallet.name, wallet.path.display());
    }
    Ok(ExitCode::SUCCESS)
}

fn record_deployment(
    args: &Args,
    env: DeploymentEnv,
    rpc_url: &str,
    store: &DeploymentStore,
    deployment_block: Option<u64>,
) -> Result<ExitCode> {
    let dice_game = args
        .dice_game
        .as_deref()
        .ok_or_else(|| eyre!("--dice-game is required to record a deployment"))?;
    let liquidity_pool = args
        .liquidity_pool
        .as_deref()
        .ok_or_else(|| eyre!("--liquidity-pool is required to record a deployment"))?;
    let mut record = DeploymentRecord::new(
        env,
        parse_address(dice_game).map_err(|e| eyre!(e))?,
        parse_address(liquidity_pool).map_err(|e| eyre!(e))?,
        rpc_url,
    );
    record.deployment_block = deployment_block;
    store.save(record).map_err(|e| eyre!(e))?;
    println!("Recorded {env} deployment in {}", store.path().display());
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let args = Args::parse();
    let _log_guard = init_tracing()?;
    tracing::info!("starting dice-cli");
    deployments::ensure_structure().map_err(|e| eyre!(e))?;

    let (env, default_url) = if args.local {
        (DeploymentEnv::Local, DEFAULT_LOCAL_RPC_URL)
    } else {
        (DeploymentEnv::Sepolia, DEFAULT_SEPOLIA_RPC_URL)
    };
    let rpc_url = args
        .rpc_url
        .clone()
        .unwrap_or_else(|| default_url.to_string());
    let wallet_dir =
        wallets::resolve_wallet_dir(args.wallet_dir.as_deref()).map_err(|e| eyre!(e))?;
    let store = DeploymentStore::new(env).map_err(|e| eyre!(e))?;

    match &args.command {
        Command::Wallets => return list_wallets(&wallet_dir),
        Command::RecordDeployment { deployment_block } => {
            return record_deployment(&args, env, &rpc_url, &store, *deployment_block);
        }
        _ => {}
    }

    let record = store.load().map_err(|e| eyre!(e))?;
    let contracts = resolve_contracts(
        env,
        record.as_ref(),
        args.dice_game.as_deref(),
        args.liquidity_pool.as_deref(),
    )
    .map_err(|e| eyre!(e))?;
    let config = CliConfig {
        env,
        rpc_url,
        wallet: args.wallet.clone(),
        wallet_dir,
        contracts,
        deployment_block: record.and_then(|record| record.deployment_block),
        score_api_url: args.score_api_url.clone(),
        result_timeout: result_timeout(args.result_timeout_secs),
    };

    match args.command {
        Command::Status => status(&config).await,
        Command::Roll { prediction, bet } => {
            transact(&config, GameWrite::Roll { prediction, bet }).await
        }
        Command::AddLiquidity { amount } => {
            transact(&config, GameWrite::AddLiquidity(amount)).await
        }
        Command::RemoveLiquidity { amount } => {
            transact(&config, GameWrite::RemoveLiquidity(amount)).await
        }
        Command::Watch { from_block, replay } => watch(&config, from_block, replay).await,
        Command::Leaderboard => leaderboard(&config).await,
        Command::Wallets | Command::RecordDeployment { .. } => Ok(ExitCode::SUCCESS),
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn args__parse_roll_with_network_and_wallet() {
        let args = Args::try_parse_from([
            "dice-cli",
            "--local",
            "--wallet",
            "alice",
            "roll",
            "--prediction",
            "4",
            "--bet",
            "0.01",
        ])
        .unwrap();

        assert!(args.local);
        assert_eq!(args.wallet.as_deref(), Some("alice"));
        assert!(matches!(
            args.command,
            Command::Roll { prediction: 4, ref bet } if bet == "0.01"
        ));
    }

    #[test]
    fn args__reject_both_networks() {
        let parsed = Args::try_parse_from(["dice-cli", "--local", "--sepolia", "status"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn args__replay_conflicts_with_from_block() {
        let parsed = Args::try_parse_from([
            "dice-cli",
            "watch",
            "--replay",
            "--from-block",
            "10",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn exit_code__failed_settle_is_failure() {
        assert_eq!(
            exit_code(DriveExit::Settled(LifecycleState::Failed)),
            ExitCode::FAILURE
        );
        assert_eq!(
            exit_code(DriveExit::Settled(LifecycleState::Resolved)),
            ExitCode::SUCCESS
        );
    }
}
