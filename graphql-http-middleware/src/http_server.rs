//! Mounting the endpoints on an axum router and serving them.
use std::future::Future;
use std::io;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::configuration::server::Paths;
use crate::services::Endpoint;
use crate::services::GraphQLHandler;

/// A router answering on both endpoints. Every HTTP method is routed to the handler.
pub fn routes(handler: &GraphQLHandler, paths: &Paths) -> Router {
    Router::new()
        .route_service(&paths.graphql, handler.service(Endpoint::Json))
        .route_service(&paths.graphiql, handler.service(Endpoint::GraphiQL))
}

/// Serve `router` until `shutdown` completes.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router.layer(TraceLayer::new_for_http()))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Completes on Ctrl-C.
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received Ctrl-C, shutting down"),
        Err(error) => tracing::error!(%error, "could not listen for Ctrl-C"),
    }
}
