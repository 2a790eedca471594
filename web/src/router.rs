use crate::controller::{health_check_controller, push_controller};
use crate::AppState;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};

use utoipa::OpenApi;
use utoipa_rapidoc::RapiDoc;

// This is the global definition of our OpenAPI spec. To be a part of the
// rendered spec, a path and schema must be listed here. The SSE endpoint
// is a long-lived stream and is documented in the crate docs instead.
#[derive(OpenApi)]
#[openapi(
    info(title = "Pulse Push API"),
    paths(
        push_controller::create,
        health_check_controller::health_check,
    ),
    components(schemas(push_controller::PushParams)),
    tags(
        (name = "pulse_platform", description = "Pulse real-time push API")
    )
)]
struct ApiDoc;

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(push_routes(app_state.clone()))
        .merge(sse_routes(app_state.clone()))
        .merge(RapiDoc::with_openapi("/api-docs/openapi.json", ApiDoc::openapi()).path("/rapidoc"))
        .layer(cors_layer(&app_state))
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}

fn push_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/push", post(push_controller::create))
        .with_state(app_state)
}

fn sse_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/sse", get(crate::sse::handler::subscribe))
        .with_state(app_state)
}

fn cors_layer(app_state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = app_state
        .config
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static("x-user-id"),
            HeaderName::from_static("last-event-id"),
        ])
        .allow_credentials(true)
}
