use axum::http::{self, HeaderValue};
use axum::middleware as axum_middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Level;

use crate::middleware::guards::bearer_auth;
use crate::state::AppState;
use crate::websocket::session::chat_handler;

pub mod conversations;
pub mod health;
pub mod messages;
pub mod users;

pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/api/health", get(health::health))
        .route("/api/health/detailed", get(health::health_detailed));

    let protected = Router::new()
        .route("/api/conversations", get(conversations::list_conversations))
        .route("/api/conversations/direct", post(conversations::create_direct))
        .route("/api/conversations/group", post(conversations::create_group))
        .route("/api/conversations/business", post(conversations::create_business))
        .route("/api/conversations/:id", get(conversations::get_conversation))
        .route(
            "/api/conversations/:id/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route("/api/conversations/:id/read", post(conversations::mark_read))
        .route("/api/conversations/:id/participants", post(conversations::add_participant))
        .route(
            "/api/conversations/:id/participants/:user_id",
            delete(conversations::remove_participant),
        )
        .route(
            "/api/conversations/:id/participants/:user_id/role",
            put(conversations::update_role),
        )
        .route("/api/conversations/:id/mute", put(conversations::set_muted))
        .route("/api/messages/:id", put(messages::edit_message).delete(messages::delete_message))
        .route("/api/users", get(users::list_users))
        .route_layer(axum_middleware::from_fn_with_state(state.clone(), bearer_auth));

    // The socket surface authenticates in-session (handshake token or auth
    // frame within the window), so it sits outside the bearer layer.
    let socket = Router::new().route("/chat", get(chat_handler));

    let cors = match &state.config.cors_origin {
        Some(origin) => match origin.parse::<HeaderValue>() {
            Ok(value) => CorsLayer::new()
                .allow_origin(AllowOrigin::exact(value))
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
            Err(_) => {
                tracing::warn!(%origin, "invalid CORS origin, allowing any");
                CorsLayer::permissive()
            }
        },
        None => CorsLayer::permissive(),
    };

    public
        .merge(protected)
        .merge(socket)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().path().to_string();
                    tracing::span!(Level::INFO, "http", %method, %uri)
                })
                .on_response(
                    |res: &http::Response<_>, latency: std::time::Duration, _span: &tracing::Span| {
                        tracing::info!(
                            status = %res.status(),
                            elapsed_ms = latency.as_millis() as u64,
                            "response"
                        );
                    },
                ),
        )
        .layer(cors)
        .with_state(state)
}
