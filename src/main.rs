use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use presence_backend::{
    AppState,
    cache::LocationCacheOperations,
    config::Config,
    database::{LocationHistory, LocationHistoryOperation, LocationOperation},
    hub::Hub,
    privacy::PrivacyLayer,
    proximity::ProximityEngine,
    router::create_router,
    tasks::spawn_stale_location_reaper,
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 设置数据库连接池
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'presence_backend';")
                    .await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");
    let pool = Arc::new(pool);

    // 设置 Redis 客户端
    let redis_client =
        redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");
    let redis_arc = Arc::new(redis_client);

    // 组装邻近查询引擎
    let history: Option<Arc<dyn LocationHistory>> = if config.location_history {
        Some(Arc::new(LocationHistoryOperation::new(pool.clone())))
    } else {
        tracing::info!("Location history is disabled");
        None
    };
    let engine = Arc::new(ProximityEngine::new(
        Arc::new(LocationOperation::new(pool)),
        Arc::new(LocationCacheOperations::new(redis_arc)),
        history,
        PrivacyLayer::new(config.privacy_settings()),
        config.engine_settings(),
    ));
    let hub = Arc::new(Hub::new(engine.clone(), config.hub_settings()));

    // 后台任务：过期位置清理和附近用户推送
    let reaper = spawn_stale_location_reaper(engine.clone(), config.cleanup_interval());
    let pusher = hub.clone().spawn_push_loop(config.push_interval());

    // 设置应用状态
    let state = AppState {
        config: config.clone(),
        engine,
        hub,
    };
    let app = create_router(state);

    // 启动服务器
    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    reaper.abort();
    pusher.abort();
    tracing::info!("Server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
