use std::net::SocketAddr;

use anyhow::Context;
use axum::Router;
use axum::http::header;
use axum::routing::get;
use camino::Utf8Path;
use console::style;
use tower_http::services::ServeDir;
use tracing::info;

use crate::orchestrator::Shutdown;
use crate::reload::refresh_script;

/// Path of the live-reload client script.
pub const RELOAD_SCRIPT: &str = "/__kiln/reload.js";

/// Static files from `base_dir`, plus the reload client script.
pub fn router(base_dir: &Utf8Path, reload_port: u16) -> Router {
    let script = refresh_script(reload_port);

    Router::new()
        .route(
            RELOAD_SCRIPT,
            get(move || async move { ([(header::CONTENT_TYPE, "text/javascript")], script) }),
        )
        .fallback_service(ServeDir::new(base_dir))
}

/// Serve until shutdown is requested.
pub async fn serve(
    base_dir: &Utf8Path,
    port: u16,
    reload_port: u16,
    mut shutdown: Shutdown,
) -> anyhow::Result<()> {
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("couldn't start the dev server on {address}"))?;

    info!(
        url = %style(format!("http://localhost:{port}/")).yellow(),
        script = RELOAD_SCRIPT,
        "serving {base_dir}"
    );

    axum::serve(listener, router(base_dir, reload_port))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;

    Ok(())
}
