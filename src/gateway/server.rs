//! HTTP server wiring for the gateway.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::Gateway;
use crate::error::{Result, StoreError};
use crate::store::Store;

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            StoreError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            StoreError::ChannelUnusable(_) => StatusCode::BAD_GATEWAY,
            StoreError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "gateway request failed");
        }
        (status, self.to_string()).into_response()
    }
}

/// Route every request by its method name; WebDAV verbs are not standard
/// HTTP methods, so there is one catch-all handler.
async fn dispatch(State(gateway): State<Arc<Gateway>>, request: Request) -> Response {
    let method = request.method().as_str().to_ascii_uppercase();
    let path = request.uri().path().to_string();
    let headers = request.headers().clone();

    let result = match method.as_str() {
        "OPTIONS" => Ok(gateway.options()),
        "PROPFIND" => gateway.propfind(&path, &headers),
        "GET" => gateway.get(&path).await,
        "HEAD" => gateway.head(&path),
        "PUT" => gateway.put(&path, request.into_body()).await,
        "DELETE" => gateway.delete(&path),
        "MOVE" => gateway.transfer(&path, &headers, true).await,
        "COPY" => gateway.transfer(&path, &headers, false).await,
        "LOCK" => gateway.lock(),
        "UNLOCK" => Ok(gateway.unlock()),
        "PROPPATCH" => gateway.proppatch(&path),
        "MKCOL" => Ok(gateway.mkcol()),
        _ => Ok(method_not_allowed()),
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(axum::http::header::ALLOW, super::ALLOWED_METHODS)],
    )
        .into_response()
}

/// Build the gateway router for `store`.
pub fn router(store: Arc<Store>) -> Router {
    let gateway = Arc::new(Gateway::new(store));
    Router::new()
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

/// Serve the gateway on `addr` until the process is stopped.
pub async fn serve(store: Arc<Store>, addr: SocketAddr) -> Result<()> {
    let app = router(store);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("WebDAV gateway listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
