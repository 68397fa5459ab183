use aloft::{app, build_app_state, get_config_info, get_log_level, setup_logger, Poller};
use aloft_core::create_dir_all;
use anyhow::anyhow;
use axum::serve;
use futures::TryFutureExt;
use log::{error, info};
use std::{net::SocketAddr, str::FromStr};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (cli, tuning) = get_config_info();
    let log_level = get_log_level(&cli);

    setup_logger()
        .level(log_level)
        .level_for("aloft", log_level)
        .level_for("http_response", log_level)
        .level_for("http_request", log_level)
        .apply()?;

    let data_dir = cli.data_dir();
    create_dir_all(&data_dir)?;

    let host = cli.host();
    let port = cli.port();
    let socket_addr = SocketAddr::from_str(&format!("{}:{}", host, port))
        .map_err(|e| anyhow!("invalid address: {}", e))?;

    let listener = TcpListener::bind(socket_addr)
        .map_err(|e| anyhow!("error binding to socket: {}", e))
        .await?;

    info!("Aloft starting...");
    info!("  Listen: http://{}", socket_addr);
    info!("  Data: {}", data_dir);
    info!("  Station: {}", cli.station());
    info!("  Site: {:.4},{:.4}", cli.latitude(), cli.longitude());

    let app_state = build_app_state(&cli, &tuning).await.map_err(|e| {
        error!("error building app: {}", e);
        e
    })?;

    let shutdown_token = CancellationToken::new();
    let poller = Poller::new(
        app_state.service.clone(),
        app_state.db.clone(),
        tuning.poll.clone(),
        tuning.retention.clone(),
    );
    let poller_handle = tokio::spawn(poller.run(shutdown_token.clone()));

    let db = app_state.db.clone();
    let app = app(app_state);

    serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown_token.cancel();
    let _ = poller_handle.await;
    db.checkpoint().await;
    info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
