// Web服务器模块
//
// 连接器的 axum 传输适配层：请求 → Action，Payload/FmError → 响应

pub mod error;
pub mod handlers;
pub mod response;
pub mod state;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use error::status_of;
pub use response::content_type_for;
pub use state::{build_backend, AppState};

/// 构建路由
pub fn build_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.server.max_body_size).unwrap_or(usize::MAX);

    // 配置中间件层
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http()) // HTTP 请求日志
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    Router::new()
        .route(
            "/api/filemanager",
            get(handlers::connector_get).post(handlers::connector_post),
        )
        .route("/health", get(handlers::health_check))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(middleware)
}
