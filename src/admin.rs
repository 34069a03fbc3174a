//! Administrative shutdown: log in as `host::admin` and send the stop command.

use anyhow::Context;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

use ds::envelope::{ACK, HOST, HOST_ADMIN, SHUTDOWN_COMMAND};

use crate::{config::SessionConfig, session::SessionEndpoint, ui::SilentUi};

/// How long the tool waits for its own copy of the shutdown notice.
const SHUTDOWN_NOTICE_WAIT: Duration = Duration::from_secs(5);

pub async fn request_shutdown(server_host: &str, server_port: u16) -> anyhow::Result<()> {
    let config = SessionConfig::new(HOST_ADMIN, server_host, server_port);
    let mut endpoint = SessionEndpoint::bind(config, Arc::new(SilentUi::new()))
        .await
        .context("cannot open a listener to stop the server")?;

    endpoint
        .login()
        .await
        .context("cannot connect to stop the server")?;

    endpoint
        .send(false, vec![HOST.to_string()], SHUTDOWN_COMMAND, ACK)
        .await
        .context("shutdown command was not acknowledged")?;
    info!("Shutdown requested at {server_host}:{server_port}");

    if !endpoint.wait_for_shutdown(SHUTDOWN_NOTICE_WAIT).await {
        warn!("No shutdown notice received from {server_host}:{server_port}");
    }
    endpoint.close().await;
    Ok(())
}
