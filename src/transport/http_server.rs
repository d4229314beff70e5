use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{delete, get, post, put},
};

use crate::{
    server::AppState,
    transport::{
        middleware::{add_response_headers, check_auth},
        routes::{channels, moves, sessions},
    },
};

const API_V1: &str = "/v1";

/// GET /version
pub async fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn router(state: Arc<AppState>) -> Router {
    let v1_routes = Router::new()
        .route(
            "/channels",
            get(channels::list_channels).post(channels::create_channel),
        )
        .route("/channels/{channel_id}/members", put(channels::join_channel))
        .route("/members/{user_id}", delete(channels::leave_voice))
        .route("/channels/{channel_id}/messages", get(channels::get_messages))
        .route(
            "/channels/{channel_id}/talking-stick",
            post(sessions::start_talking_stick).delete(sessions::stop_talking_stick),
        )
        .route(
            "/channels/{channel_id}/talking-stick/skip",
            post(sessions::skip_turn),
        )
        .route(
            "/channels/{channel_id}/muteall",
            post(sessions::start_muteall).delete(sessions::stop_muteall),
        )
        .route("/channels/{channel_id}/unmute-all", post(sessions::force_unmute))
        .route("/channels/{channel_id}/move", post(moves::move_members))
        .route("/channels/{channel_id}/moveall", post(moves::move_all))
        .route("/sessions", get(sessions::list_sessions));

    Router::new()
        .nest(API_V1, v1_routes)
        .route("/version", get(get_version))
        .layer(middleware::from_fn_with_state(state.clone(), check_auth))
        .layer(middleware::from_fn(add_response_headers))
        .with_state(state)
}
