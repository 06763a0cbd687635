use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::middleware::{decode_claims, require_auth};
use parley_api::{AppState, AppStateInner, deletes, groups, history, reads};
use parley_directory::{HttpDirectory, IdentityDirectory, LocalMembership, MembershipDirectory};
use parley_gateway::{Fanout, PresenceRegistry, connection};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PARLEY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let identity_url =
        std::env::var("PARLEY_IDENTITY_URL").unwrap_or_else(|_| "http://localhost:8001".into());
    // When unset, group membership is resolved from the local tables
    // instead of a separate group service.
    let group_url = std::env::var("PARLEY_GROUP_URL").ok();

    // Init database
    let db = Arc::new(parley_db::Database::open(&PathBuf::from(&db_path))?);

    // Collaborator ports
    let http_directory = HttpDirectory::new(
        identity_url,
        group_url.clone().unwrap_or_default(),
    );
    let identity: Arc<dyn IdentityDirectory> = Arc::new(http_directory.clone());
    let membership: Arc<dyn MembershipDirectory> = match group_url {
        Some(_) => Arc::new(http_directory),
        None => Arc::new(LocalMembership::new(db.clone(), identity.clone())),
    };

    // Shared state
    let registry = PresenceRegistry::new();
    let fanout = Fanout::new(registry.clone(), membership.clone());
    let state: AppState = Arc::new(AppStateInner {
        db,
        registry,
        fanout,
        identity,
        membership,
        jwt_secret,
    });

    // Routes
    let ws_route = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state.clone());

    // Parameter names are unified per position so shared matcher nodes
    // never conflict; handlers extract by tuple position.
    let protected_routes = Router::new()
        .route("/messages/{id}", delete(deletes::delete_direct_message))
        .route("/messages/{id}/{other_id}", get(history::get_direct_history))
        .route(
            "/group_messages/{id}",
            get(history::get_group_history).delete(deletes::delete_group_message),
        )
        .route("/conversations/{user_id}", get(reads::list_conversations))
        .route("/conversations/{user_id}/unread", get(reads::unread_counts))
        .route("/conversations/{user_id}/read/{other_id}", post(reads::mark_direct_read))
        .route("/conversations/{user_id}/groups/{group_id}/read", post(reads::mark_group_read))
        .route(
            "/conversations/{user_id}/{other_id}",
            delete(deletes::delete_direct_conversation),
        )
        .route("/group_conversations/{id}", delete(deletes::delete_group_conversation))
        .route("/groups", post(groups::create_group))
        .route("/groups/{id}", get(groups::list_user_groups))
        .route("/groups/{id}/info", get(groups::group_info))
        .route(
            "/groups/{id}/members",
            get(groups::get_group_members).post(groups::add_member),
        )
        .route("/groups/{id}/members/{username}", delete(groups::remove_member))
        .route("/groups/{id}/owner", patch(groups::transfer_owner))
        .route("/groups/{id}/delete/{user_id}", delete(groups::dissolve_group))
        .route("/groups/{id}/leave/{user_id}", delete(groups::leave_group))
        .route("/cleanup/{user_id}", delete(groups::cleanup_user))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    let app = Router::new()
        .merge(ws_route)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Deserialize)]
struct WsQuery {
    token: String,
}

/// Validate the credential before the upgrade completes; a bad token is
/// refused with 401 so the socket never reaches the open state.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(claims) = decode_claims(&query.token, &state.jwt_secret) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let ctx = state.gateway_context();
    ws.on_upgrade(move |socket| {
        connection::handle_socket(socket, ctx, claims.sub, claims.username, query.token)
    })
}
