use crate::{
    Result,
    app::query_api::{
        Query,
        QueryAPI,
    },
};
use actix_cors::Cors;
use actix_web::{
    App,
    HttpResponse,
    HttpServer,
    dev::ServerHandle,
    web,
};
use alloy::primitives::{
    Address,
    U256,
};
use anyhow::{
    Context,
    anyhow,
};
use dice_sync::score_client::{
    ErrorResponse,
    LEGACY_SCORE_PATH,
    LegacyScoreResponse,
    SCORE_PATH,
    ScoreRequest,
    ScoreResponse,
};
use std::{
    net::TcpListener,
    str::FromStr,
    thread::JoinHandle,
};
use tokio::sync::{
    mpsc,
    oneshot,
};

const MISSING_FIELDS: &str = "Missing playerAddress or contractAddress";
const LEGACY_MISSING_FIELDS: &str = "Player address and contract address are required";
const LOOKUP_FAILED: &str = "Failed to fetch player score";

pub struct ActixScoreApi {
    receiver: mpsc::Receiver<Query>,
    base_url: String,
    server_handle: ServerHandle,
    server_thread: Option<JoinHandle<()>>,
}

impl ActixScoreApi {
    pub async fn new(port: Option<u16>) -> Result<Self> {
        let (sender, receiver) = mpsc::channel(16);

        let listener = TcpListener::bind(("127.0.0.1", port.unwrap_or(0)))
            .context("failed to bind HTTP listener for score API")?;
        let address = listener
            .local_addr()
            .context("failed to read listener address")?;
        let base_url = format!("http://{}", address);

        tracing::info!("score API listening on {}", base_url);

        let server = HttpServer::new(move || {
            App::new()
                .wrap(Cors::permissive())
                .app_data(web::Data::new(sender.clone()))
                .route(SCORE_PATH, web::post().to(handle_player_score))
                .route(LEGACY_SCORE_PATH, web::post().to(handle_legacy_player_score))
        })
        .listen(listener)
        .context("failed to start Actix server")?
        .run();

        let server_handle = server.handle();
        let server_thread = std::thread::spawn(move || {
            let sys = actix_web::rt::System::new();
            let _ = sys.block_on(server);
        });

        Ok(Self {
            receiver,
            base_url,
            server_handle,
            server_thread: Some(server_thread),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl QueryAPI for ActixScoreApi {
    async fn query(&mut self) -> Result<Query> {
        self.receiver
            .recv()
            .await
            .ok_or_else(|| anyhow!("score server closed"))
    }
}

impl Drop for ActixScoreApi {
    fn drop(&mut self) {
        let _ = self.server_handle.stop(true);
        if let Some(thread) = self.server_thread.take() {
            let _ = thread.join();
        }
    }
}

enum Lookup {
    MissingFields,
    Failed,
    Found { player_address: String, score: U256 },
}

async fn lookup_score(sender: &mpsc::Sender<Query>, body: &[u8]) -> Lookup {
    let request: ScoreRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(err) => {
            tracing::error!("unreadable score request: {err}");
            return Lookup::Failed;
        }
    };
    let present = |field: Option<String>| field.filter(|value| !value.is_empty());
    let (Some(player_address), Some(contract_address)) = (
        present(request.player_address),
        present(request.contract_address),
    ) else {
        return Lookup::MissingFields;
    };
    let (player, contract) = match (
        Address::from_str(&player_address),
        Address::from_str(&contract_address),
    ) {
        (Ok(player), Ok(contract)) => (player, contract),
        _ => {
            tracing::error!(
                "malformed address in score request: player {player_address}, contract {contract_address}"
            );
            return Lookup::Failed;
        }
    };

    let (response_sender, response_receiver) = oneshot::channel();
    let query = Query::player_score(contract, player, response_sender);
    if sender.send(query).await.is_err() {
        tracing::error!("unable to forward score query");
        return Lookup::Failed;
    }
    match response_receiver.await {
        Ok(Ok(score)) => Lookup::Found {
            player_address,
            score,
        },
        Ok(Err(err)) => {
            tracing::error!("Error fetching player score: {err:#}");
            Lookup::Failed
        }
        Err(_) => {
            tracing::error!("score responder dropped");
            Lookup::Failed
        }
    }
}

fn error_response(mut builder: actix_web::HttpResponseBuilder, message: &str) -> HttpResponse {
    builder.json(ErrorResponse {
        error: message.to_string(),
    })
}

async fn handle_player_score(
    sender: web::Data<mpsc::Sender<Query>>,
    body: web::Bytes,
) -> HttpResponse {
    tracing::info!("received player score request");
    match lookup_score(sender.get_ref(), &body).await {
        Lookup::MissingFields => error_response(HttpResponse::BadRequest(), MISSING_FIELDS),
        Lookup::Failed => error_response(HttpResponse::InternalServerError(), LOOKUP_FAILED),
        Lookup::Found {
            player_address,
            score,
        } => HttpResponse::Ok().json(ScoreResponse {
            score: score.saturating_to::<u64>(),
            player_address,
        }),
    }
}

async fn handle_legacy_player_score(
    sender: web::Data<mpsc::Sender<Query>>,
    body: web::Bytes,
) -> HttpResponse {
    tracing::info!("received legacy player score request");
    match lookup_score(sender.get_ref(), &body).await {
        Lookup::MissingFields => {
            error_response(HttpResponse::BadRequest(), LEGACY_MISSING_FIELDS)
        }
        Lookup::Failed => error_response(HttpResponse::InternalServerError(), LOOKUP_FAILED),
        Lookup::Found { score, .. } => HttpResponse::Ok().json(LegacyScoreResponse {
            score: score.to_string(),
        }),
    }
}
