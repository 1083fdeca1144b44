pub mod api;
pub mod eventsub_webhook;
pub mod router;
pub mod websocket;

use anyhow::Result;

use crate::app::Core;

/// Start the axum HTTP + WebSocket server.
pub async fn start_server(core: Core) -> Result<()> {
    let port = core.config().server_port;
    let shutdown = core.shutdown_token().clone();
    let app = router::create_router(core);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("EventSub bridge listening on http://{addr}");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
