use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use shared::{
    domain::{OutletId, Transfer, TransferId},
    error::{ApiError, ErrorCode},
    protocol::{
        ActionEnvelope, CreateTransferRequest, LoginRequest, LoginResponse, MergeCandidateList,
        ProductHit,
    },
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

use courier_integration::{CourierConfig, CourierHttpProvider, CourierService, Disabled};
use transfer_core::ApiContext;
use vend_integration::{StaticInventory, VendConfig, VendHttpProvider};

mod auth;
mod config;

use auth::{mint_session_token, require_authenticated_user, AuthConfig};
use config::{load_settings, prepare_database_url};

const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
struct AppState {
    api: ApiContext,
    auth: AuthConfig,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    code: ErrorCode,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct TransferBody {
    transfer: Transfer,
}

#[derive(Debug, Serialize)]
struct SearchBody {
    products: Vec<ProductHit>,
}

#[derive(Debug, Serialize)]
struct DeletedBody {
    deleted: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let inventory = match &settings.vend_base_url {
        Some(base_url) => VendHttpProvider::new(&VendConfig {
            base_url: base_url.clone(),
            api_token: settings.vend_api_token.clone(),
            timeout_secs: settings.vend_timeout_secs,
        })
        .map(|provider| Arc::new(provider) as Arc<dyn vend_integration::InventoryProvider>)?,
        None => {
            warn!("no inventory backend configured; stock snapshots will be empty");
            StaticInventory::new().into_provider()
        }
    };

    let shipping: Arc<dyn courier_integration::ShippingProvider> = match settings
        .courier_service
        .as_deref()
        .and_then(CourierService::from_str)
    {
        Some(service) => Arc::new(CourierHttpProvider::new(&CourierConfig {
            service,
            base_url: settings.courier_base_url.clone(),
            api_key: settings.courier_api_key.clone(),
            timeout_secs: settings.courier_timeout_secs,
        })?),
        None => {
            warn!("no courier service configured; label booking is disabled");
            Arc::new(Disabled)
        }
    };

    let api = ApiContext {
        storage,
        inventory,
        shipping,
        hub_outlet_id: OutletId(settings.hub_outlet_id),
        auto_dispatch_on_pack: settings.auto_dispatch_on_pack,
    };
    let auth = AuthConfig {
        secret: settings.auth_secret,
        ttl_seconds: settings.auth_ttl_seconds,
    };

    let state = AppState { api, auth };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, hub_outlet_id = settings.hub_outlet_id, "transfer server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", post(login))
        .route("/transfers", post(http_create_transfer))
        .route("/transfers/:transfer_id", get(http_get_transfer))
        .route(
            "/transfers/:transfer_id/merge-candidates",
            get(http_merge_candidates),
        )
        .route("/transfers/:transfer_id/actions", post(http_transfer_action))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorCode::MalformedRequest => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::InvalidTransition => StatusCode::CONFLICT,
        ErrorCode::ValidationFailed => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::GuardRejected => StatusCode::FORBIDDEN,
        ErrorCode::MergeConflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Translates a core error into the wire shape. Internal faults get a
/// generic message; the original is already logged where it happened.
fn reject(err: ApiError) -> (StatusCode, Json<ErrorBody>) {
    let message = if err.code == ErrorCode::Internal {
        "unexpected server error; please try again".to_string()
    } else {
        err.message
    };
    (
        status_for(err.code),
        Json(ErrorBody {
            success: false,
            code: err.code,
            error: message,
            details: err.details,
        }),
    )
}

fn success<T: Serialize>(value: &T) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorBody>)> {
    let mut body = serde_json::to_value(value)
        .map_err(|e| reject(ApiError::new(ErrorCode::Internal, e.to_string())))?;
    if let serde_json::Value::Object(map) = &mut body {
        map.insert("success".into(), serde_json::Value::Bool(true));
    }
    Ok(Json(body))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorBody>)> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err(reject(ApiError::new(
            ErrorCode::ValidationFailed,
            "username required",
        )));
    }

    let user_id = state
        .api
        .storage
        .create_user(username)
        .await
        .map_err(|e| reject(ApiError::new(ErrorCode::Internal, e.to_string())))?;
    let (token, expires_at) = mint_session_token(&state.auth, user_id)
        .map_err(|e| reject(ApiError::new(ErrorCode::Internal, e.to_string())))?;

    success(&LoginResponse {
        user_id: user_id.0,
        token,
        expires_at,
    })
}

async fn http_create_transfer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorBody>)> {
    let user_id = require_authenticated_user(&headers, &state.auth).map_err(reject)?;
    let req: CreateTransferRequest = serde_json::from_slice(&body)
        .map_err(|_| reject(ApiError::new(ErrorCode::MalformedRequest, "invalid JSON body")))?;

    let transfer = transfer_core::create_transfer(&state.api, user_id, &req)
        .await
        .map_err(reject)?;
    success(&TransferBody { transfer })
}

async fn http_get_transfer(
    State(state): State<Arc<AppState>>,
    Path(transfer_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorBody>)> {
    require_authenticated_user(&headers, &state.auth).map_err(reject)?;
    let view = transfer_core::view_transfer(&state.api, TransferId(transfer_id))
        .await
        .map_err(reject)?;
    success(&view)
}

async fn http_merge_candidates(
    State(state): State<Arc<AppState>>,
    Path(transfer_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorBody>)> {
    require_authenticated_user(&headers, &state.auth).map_err(reject)?;
    let candidates = transfer_core::list_merge_candidates(&state.api, TransferId(transfer_id))
        .await
        .map_err(reject)?;
    success(&MergeCandidateList { candidates })
}

/// The single-action gateway. Authentication comes first, then the
/// exactly-one-action check, then the restricted-mode guard inside the
/// dispatched operation. Each request runs exactly one handler.
async fn http_transfer_action(
    State(state): State<Arc<AppState>>,
    Path(transfer_id): Path<i64>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorBody>)> {
    let user_id = require_authenticated_user(&headers, &state.auth).map_err(reject)?;

    let envelope: ActionEnvelope = serde_json::from_slice(&body)
        .map_err(|_| reject(ApiError::new(ErrorCode::MalformedRequest, "invalid JSON body")))?;
    if envelope.present_actions() != 1 {
        return Err(reject(ApiError::new(
            ErrorCode::MalformedRequest,
            "provide exactly one action",
        )));
    }

    let ctx = &state.api;
    let transfer_id = TransferId(transfer_id);

    if let Some(payload) = &envelope.commit_pack {
        let outcome = transfer_core::commit_pack(ctx, user_id, transfer_id, payload)
            .await
            .map_err(reject)?;
        return success(&outcome);
    }
    if let Some(payload) = &envelope.dispatch {
        let transfer = transfer_core::dispatch(ctx, transfer_id, payload)
            .await
            .map_err(reject)?;
        return success(&TransferBody { transfer });
    }
    if let Some(payload) = &envelope.receive {
        let view = transfer_core::receive(ctx, user_id, transfer_id, payload)
            .await
            .map_err(reject)?;
        return success(&view);
    }
    if envelope.delete_transfer.is_some() {
        transfer_core::delete_transfer(ctx, transfer_id)
            .await
            .map_err(reject)?;
        return success(&DeletedBody { deleted: true });
    }
    if let Some(payload) = &envelope.merge {
        let outcome = transfer_core::merge_transfers(ctx, user_id, transfer_id, payload)
            .await
            .map_err(reject)?;
        return success(&outcome);
    }
    if let Some(payload) = &envelope.search_product {
        let products = transfer_core::search_products(ctx, payload)
            .await
            .map_err(reject)?;
        return success(&SearchBody { products });
    }
    if let Some(payload) = &envelope.add_product {
        let transfer = transfer_core::add_line(ctx, transfer_id, payload)
            .await
            .map_err(reject)?;
        return success(&TransferBody { transfer });
    }
    if let Some(payload) = &envelope.remove_product {
        let transfer = transfer_core::remove_line(ctx, transfer_id, payload)
            .await
            .map_err(reject)?;
        return success(&TransferBody { transfer });
    }

    Err(reject(ApiError::new(
        ErrorCode::MalformedRequest,
        "unknown action",
    )))
}
