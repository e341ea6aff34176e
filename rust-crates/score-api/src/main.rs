use anyhow::Context;
use clap::Parser;
use dice_sync::{
    config::{
        DEFAULT_LOCAL_RPC_URL,
        DEFAULT_SEPOLIA_RPC_URL,
    },
    rpc::read_provider,
};
use score_api::app::{
    App,
    RpcScores,
    RunState,
    actix_score_api::ActixScoreApi,
    init_tracing,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON-RPC endpoint used for contract reads. Defaults to the public Sepolia node.
    #[arg(long)]
    rpc_url: Option<String>,

    /// Read from a local node instead of Sepolia.
    #[arg(long, conflicts_with = "rpc_url")]
    local: bool,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long, default_value = "false")]
    tracing: bool,
}

async fn handle_interupt() {
    let res = tokio::signal::ctrl_c().await;
    match res {
        Ok(_) => {
            tracing::info!("Received interrupt, exiting");
        }
        Err(_) => {
            tracing::warn!("Received interrupt error, exiting anyway");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.tracing {
        init_tracing();
    }
    let rpc_url = match (&args.rpc_url, args.local) {
        (Some(url), _) => url.clone(),
        (None, true) => DEFAULT_LOCAL_RPC_URL.to_string(),
        (None, false) => DEFAULT_SEPOLIA_RPC_URL.to_string(),
    };
    tracing::info!("Reading scores through {rpc_url}");
    let provider = read_provider(&rpc_url).context("creating RPC provider")?;
    let api = ActixScoreApi::new(args.port).await?;
    let mut app = App::new(api, RpcScores::new(provider));

    tracing::info!("Starting score API");
    loop {
        let interrupt = handle_interupt();
        match app.run(interrupt).await? {
            RunState::Continue => continue,
            RunState::Exit => {
                tracing::info!("Exiting score API");
                return Ok(());
            }
        }
    }
}
