use crate::app_state::AppState;
use axum::{
    extract::DefaultBodyLimit, middleware, response::IntoResponse, routing::get, serve, Extension,
    Router,
};
use shared::config::server::{Config, DatabaseConfig, LogFormat};
use shared::models::{Timestamp, User};
use sqlx::postgres::PgPoolOptions;
use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{fmt, EnvFilter};

use crate::{
    handlers::stream::SharedRegistry,
    middleware::{
        auth::{self, AuthState},
        request_context::{self, RequestIdState},
    },
    realtime::{ConnectionRegistry, MessageRouter, PresenceBroadcaster},
    routes,
    services::{
        MemoryMessageStore, MemoryUserDirectory, MessageService, MessageStore, PgMessageStore,
        PgUserDirectory, UserDirectory,
    },
    tracer,
};
use axum::http::{header, HeaderValue, StatusCode};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Initializes the tracing subscriber for logging using the provided configuration.
pub fn initialize_tracing(config: &Config) -> String {
    let env_filter = build_env_filter(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    if matches!(config.logging.format, LogFormat::Json) {
        let _ = fmt_builder.json().with_ansi(false).try_init();
    } else {
        let _ = fmt_builder.with_ansi(true).try_init();
    }

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Creates a database connection pool from the given database settings.
///
/// # Errors
/// Returns an error if the database connection pool cannot be created.
pub async fn create_database_pool(db: &DatabaseConfig, url: &str) -> Result<sqlx::PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections.max(1))
        .connect(url)
        .await?;
    metrics::gauge!("courier_db_pool_max_connections").set(f64::from(db.max_connections.max(1)));
    Ok(pool)
}

/// Creates the application state with the given database pool.
pub fn create_app_state(pool: Option<sqlx::PgPool>) -> Arc<AppState> {
    Arc::new(AppState { pool })
}

/// The delivery core and its collaborators, constructed once at startup and
/// injected into the handlers that need them.
#[derive(Clone)]
pub struct CoreServices {
    pub registry: SharedRegistry,
    pub messages: Arc<MessageService>,
    pub users: Arc<dyn UserDirectory>,
}

/// Builds the registry, router, store, and services for this process.
///
/// With a database pool the Postgres store and directory are used; without
/// one the server runs entirely from memory, seeded with a few development
/// identities that match the dev session derivation.
pub fn create_core_services(state: &AppState, config: &Config) -> CoreServices {
    let registry = Arc::new(ConnectionRegistry::new(PresenceBroadcaster::new()));
    let router = Arc::new(MessageRouter::new(Arc::clone(&registry)));

    let (store, users): (Arc<dyn MessageStore>, Arc<dyn UserDirectory>) = match state.pool.as_ref()
    {
        Some(pool) => (
            Arc::new(PgMessageStore::new(pool.clone())),
            Arc::new(PgUserDirectory::new(pool.clone())),
        ),
        None => (
            Arc::new(MemoryMessageStore::new()),
            Arc::new(seeded_dev_directory()),
        ),
    };

    let messages = Arc::new(MessageService::new(store, router, config.media.clone()));

    CoreServices {
        registry,
        messages,
        users,
    }
}

fn seeded_dev_directory() -> MemoryUserDirectory {
    let users = ["alice", "bob", "carol"]
        .into_iter()
        .map(|name| User {
            id: auth::dev_user_id(name),
            full_name: {
                let mut chars = name.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            },
            email: format!("{name}@courier.local"),
            avatar: None,
            created_at: Timestamp::now(),
        })
        .collect();
    MemoryUserDirectory::new(users)
}

/// Creates the CORS layer for the application.
pub fn create_cors_layer(config: &Config) -> CorsLayer {
    use http::Method;

    let methods = vec![
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];

    let mut cors = CorsLayer::new()
        .allow_methods(AllowMethods::list(methods))
        .allow_headers(AllowHeaders::any())
        .max_age(Duration::from_secs(config.server.cors.max_age_seconds));

    if config.server.cors.allowed_origins.is_empty() {
        cors = cors.allow_origin(AllowOrigin::any());
    } else {
        let origins = config
            .server
            .cors
            .allowed_origins
            .iter()
            .filter_map(|origin| http::HeaderValue::from_str(origin).ok())
            .collect::<Vec<_>>();
        cors = cors
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(config.server.cors.allow_credentials);
    }

    cors
}

/// Creates the API router: roster, history, send, and the event stream,
/// all behind session resolution.
pub fn create_api_router(
    state: &AppState,
    config: &Arc<Config>,
    core: &CoreServices,
) -> Router<Arc<AppState>> {
    let auth_state = AuthState::new(config, state.pool.clone());

    Router::new()
        .route("/users", get(crate::handlers::users::get_roster))
        .route(
            "/messages/{peer_id}",
            get(crate::handlers::messages::get_history),
        )
        .route(
            "/messages/send/{peer_id}",
            axum::routing::post(crate::handlers::messages::send_message),
        )
        .route("/stream", get(crate::handlers::stream::stream_events))
        .route_layer(middleware::from_fn_with_state(
            auth_state,
            auth::require_session,
        ))
        .layer(Extension(Arc::clone(&core.registry)))
        .layer(Extension(Arc::clone(&core.messages)))
        .layer(Extension(Arc::clone(&core.users)))
}

/// Creates the main application router with all middleware and routes.
pub fn create_app_router(
    state: Arc<AppState>,
    config: Arc<Config>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let core = create_core_services(&state, &config);
    let api_router = create_api_router(&state, &config, &core);

    let cors = create_cors_layer(&config);
    let request_id_state = RequestIdState::from_config(&config);

    Router::new()
        .nest("/api", api_router)
        .merge(routes::health::create_health_router())
        .route("/metrics", get(metrics_endpoint))
        .merge(routes::openapi::openapi_routes())
        .layer(Extension(config.clone()))
        .layer(Extension(metrics_handle))
        .layer(cors)
        .layer(tracer::create_trace_layer())
        .layer(middleware::from_fn_with_state(
            request_id_state,
            request_context::assign_request_id,
        ))
        .layer(DefaultBodyLimit::max(config.server.max_body_bytes))
        .with_state(state)
}

/// Creates the graceful shutdown signal handler.
pub async fn create_shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutting down...");
}

/// Starts the server and binds it to the configured port.
///
/// # Errors
/// Returns an error if the server fails to start.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    initialize_tracing(&config);
    info!("Starting server...");

    let metrics_handle = metrics_handle();
    let config = Arc::new(config);

    let pool = match config.db.url.as_deref() {
        Some(url) => {
            let pool = create_database_pool(&config.db, url)
                .await
                .map_err(|err| -> Box<dyn std::error::Error> { Box::new(err) })?;
            sqlx::query_scalar::<_, i32>("SELECT 1")
                .fetch_one(&pool)
                .await
                .map_err(|err| -> Box<dyn std::error::Error> { Box::new(err) })?;
            Some(pool)
        }
        None => {
            info!("no database configured; serving from the in-memory store");
            None
        }
    };

    let state = create_app_state(pool);
    let app = create_app_router(state, config.clone(), metrics_handle.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    let shutdown_signal = create_shutdown_signal();

    serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use serde_json::Value;
    use shared::config::server::Profile;
    use shared::models::Message;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let config = Arc::new(Config::default_for_profile(Profile::Test));
        let state = Arc::new(AppState::default());
        create_app_router(state, config, metrics_handle())
    }

    fn session_cookie(token: &str) -> String {
        format!("courier_session={token}")
    }

    #[test]
    fn initialize_tracing_returns_configured_level() {
        let config = Config::default_for_profile(Profile::Test);
        assert_eq!(initialize_tracing(&config), config.logging.level);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_payload() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
        assert_eq!(content_type, "text/plain; version=0.0.4");
    }

    #[tokio::test]
    async fn api_rejects_requests_without_a_session() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/api/users")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn roster_excludes_the_authenticated_dev_user() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/api/users")
                    .header(header::COOKIE, session_cookie("alice"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let roster: Vec<Value> = serde_json::from_slice(&bytes).unwrap();
        let names: Vec<_> = roster
            .iter()
            .map(|user| user["full_name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Bob", "Carol"]);
    }

    #[tokio::test]
    async fn send_and_history_round_trip_over_http() {
        let app = test_app();
        let bob_id = crate::middleware::auth::dev_user_id("bob");
        let alice_id = crate::middleware::auth::dev_user_id("alice");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/messages/send/{bob_id}"))
                    .header(header::COOKIE, session_cookie("alice"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"text":"hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let sent: Message = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(sent.sender_id, alice_id);
        assert_eq!(sent.recipient_id, bob_id);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/messages/{alice_id}"))
                    .header(header::COOKIE, session_cookie("bob"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let history: Vec<Message> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(history, vec![sent]);
    }

    #[tokio::test]
    async fn empty_send_maps_to_validation_failed() {
        let bob_id = crate::middleware::auth::dev_user_id("bob");
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/messages/send/{bob_id}"))
                    .header(header::COOKIE, session_cookie("alice"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let problem: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(problem["code"], "validation_failed");
    }
}
