use axum::{
    Router,
    routing::{get, post},
};

use crate::{
    AppState,
    hub::ws_handler,
    middleware::{auth_middleware, log_errors},
    routes,
};

// 创建主路由
pub fn create_router(state: AppState) -> Router {
    // WebSocket 在握手时自行校验身份
    let public_routes = Router::new().route("/ws", get(ws_handler));

    let protected_routes = Router::new()
        .route("/locations/update", post(routes::location::update_location))
        .route("/locations/nearby", get(routes::location::find_nearby_users))
        .route("/locations/me", get(routes::location::my_location))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let router = Router::new()
        .nest(
            &state.config.api_base_uri,
            Router::new().merge(public_routes).merge(protected_routes),
        )
        .layer(axum::middleware::from_fn(log_errors));

    // 开发环境允许所有来源
    #[cfg(debug_assertions)]
    let router = router.layer(tower_http::cors::CorsLayer::permissive());

    router.with_state(state)
}
