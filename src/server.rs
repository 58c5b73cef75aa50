//! HTTP surface: every path and method is forwarded to [`Proxy::handle`].

use axum::extract::State;
use axum::http::{Method, Uri};
use axum::response::IntoResponse;
use axum::Router;
use std::future::Future;
use tokio::net::TcpListener;

use crate::proxy::Proxy;

/// Builds the router. The proxy answers on any path.
pub fn router(proxy: Proxy) -> Router {
    Router::new().fallback(handle_request).with_state(proxy)
}

async fn handle_request(State(proxy): State<Proxy>, method: Method, uri: Uri) -> impl IntoResponse {
    let handled = proxy.handle(&method, &uri).await;
    tracing::debug!(
        method = %method,
        uri = %uri,
        status = handled.response.status.as_u16(),
        "Handled request"
    );
    // Background cache work outlives the response; dropping the handle detaches it
    drop(handled.background);
    handled.response
}

/// Serves `proxy` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, proxy: Proxy, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Starting server on {}", addr);
    }

    axum::serve(listener, router(proxy))
        .with_graceful_shutdown(shutdown)
        .await
}
