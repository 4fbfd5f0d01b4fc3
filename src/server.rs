use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::Arc;

use anyhow::Context as _;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::cli::ServeArgs;
use crate::config::ProxyConfig;
use crate::proxy::{ErrorKind, ProxyError, ProxyService};
use crate::virtualize::VirtualResourceId;

const RESOURCE_CACHE_CONTROL: &str = "public, max-age=86400";

pub fn router(service: Arc<ProxyService>, static_dir: Option<&FsPath>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    let mut app = Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/api/catalog", get(list_catalog))
        .route("/api/items/:entity_id", get(item_detail))
        .route("/api/items/:entity_id/chapters/*chapter_ref", get(item_images))
        .route("/api/resources/*resource_id", get(resource))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(service);

    if let Some(dir) = static_dir.filter(|dir| dir.is_dir()) {
        tracing::info!(dir = %dir.display(), "serving static assets");
        app = app.fallback_service(ServeDir::new(dir));
    }
    app
}

pub async fn run(config: ProxyConfig, args: ServeArgs) -> anyhow::Result<()> {
    let service = Arc::new(ProxyService::from_config(&config).context("build proxy service")?);
    let app = router(service, args.static_dir.as_deref().map(FsPath::new));

    let addr: SocketAddr = args
        .addr
        .parse()
        .with_context(|| format!("invalid --addr {:?}", args.addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, origin = %config.origin, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(%err, "ctrl-c handler unavailable");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down");
        })
        .await
        .context("serve http")?;
    Ok(())
}

async fn list_catalog(State(service): State<Arc<ProxyService>>) -> Result<Response, ProxyError> {
    Ok(Json(service.list_catalog().await?).into_response())
}

async fn item_detail(
    State(service): State<Arc<ProxyService>>,
    Path(entity_id): Path<String>,
) -> Result<Response, ProxyError> {
    Ok(Json(service.get_item_detail(&entity_id).await?).into_response())
}

async fn item_images(
    State(service): State<Arc<ProxyService>>,
    Path((entity_id, chapter_ref)): Path<(String, String)>,
) -> Result<Response, ProxyError> {
    Ok(Json(service.get_item_images(&entity_id, &chapter_ref).await?).into_response())
}

#[derive(Debug, Deserialize)]
struct ResourceQuery {
    origin: Option<String>,
}

async fn resource(
    State(service): State<Arc<ProxyService>>,
    Path(resource_id): Path<String>,
    Query(query): Query<ResourceQuery>,
) -> Result<Response, ProxyError> {
    let Some((scope, name)) = VirtualResourceId::split(&resource_id) else {
        return Err(ProxyError::ResourceNotFound(resource_id));
    };
    let hint = query.origin.as_deref().filter(|hint| !hint.trim().is_empty());
    let body = service.resolve_resource(scope, name, hint).await?;

    let mut response = Response::new(Body::from(body.bytes));
    let headers = response.headers_mut();
    if let Some(value) = body
        .content_type
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
    {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Some(len) = body.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(RESOURCE_CACHE_CONTROL),
    );
    Ok(response)
}

fn status_for(err: &ProxyError) -> StatusCode {
    match err {
        ProxyError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ProxyError::ResourceNotFound(_)
        | ProxyError::NoMatch { .. }
        | ProxyError::UpstreamStatus { code: 404 } => StatusCode::NOT_FOUND,
        ProxyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ProxyError::Network { .. }
        | ProxyError::TooManyRedirects { .. }
        | ProxyError::UpstreamStatus { .. }
        | ProxyError::Parse(_) => StatusCode::BAD_GATEWAY,
    }
}

#[derive(Debug, serde::Serialize)]
struct ErrorBody {
    error: ErrorKind,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostics: Option<crate::extract::Diagnostics>,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let kind = self.kind();
        if status.is_server_error() {
            match &self {
                ProxyError::Network { cause } => {
                    tracing::warn!(kind = kind.as_str(), %cause, "request failed")
                }
                other => tracing::warn!(kind = kind.as_str(), err = %other, "request failed"),
            }
        } else {
            tracing::debug!(kind = kind.as_str(), err = %self, "request rejected");
        }

        let message = self.to_string();
        let diagnostics = match self {
            ProxyError::NoMatch { diagnostics, .. } => Some(diagnostics),
            _ => None,
        };
        let body = ErrorBody {
            error: kind,
            message,
            diagnostics,
        };
        (status, Json(body)).into_response()
    }
}
