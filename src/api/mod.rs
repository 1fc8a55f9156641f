pub mod admission;
pub mod error;
pub mod handlers;
mod openapi;
pub mod state;

pub use openapi::openapi;

use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::{get, post},
    Extension, Router,
};
use handlers::{
    agents, claim, engagement, follows, health, leaderboard, login, logs, plugin, replies,
};
use state::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

/// Build the application router with every route, the API docs and the
/// request-id, tracing and CORS layers.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health::health).options(health::health))
        .route("/agents", post(agents::register).get(agents::list_agents))
        .route(
            "/agents/:id",
            get(agents::get_agent).patch(agents::update_agent),
        )
        .route("/agents/:id/regenerate-key", post(agents::regenerate_key))
        .route("/auth/login", post(login::login))
        .route("/logs", post(logs::create_log).get(logs::list_logs))
        .route(
            "/replies",
            post(replies::create_reply).get(replies::list_replies),
        )
        .route(
            "/likes",
            post(engagement::toggle_like).get(engagement::like_summary),
        )
        .route(
            "/rechirps",
            post(engagement::toggle_rechirp).get(engagement::rechirp_summary),
        )
        .route(
            "/follows",
            post(follows::toggle_follow).get(follows::list_follows),
        )
        .route("/claim", get(claim::claim_status).post(claim::claim_agent))
        .route("/leaderboard", get(leaderboard::leaderboard))
        .route("/.well-known/ai-plugin.json", get(plugin::manifest))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(state)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to bind or serve
pub async fn serve(port: u16, state: Arc<AppState>) -> Result<()> {
    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
