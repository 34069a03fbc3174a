use clap::Parser;
use std::{sync::Arc, time::Duration};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use felix::{
    admin::request_shutdown,
    cli::{parse_console_line, Args, Commands, ConsoleCommand, CONSOLE_HELP},
    logging::init_logging,
    ChatServer, ConsoleUi, ServerConfig, SessionConfig, SessionEndpoint, SessionState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = init_logging(&args.log_level);
    info!("Logging at {level}");

    match args.command {
        Commands::Server {
            port,
            bind,
            name,
            reaper_secs,
        } => {
            let config = ServerConfig {
                bind_host: bind,
                server_name: name,
                reaper_interval: Duration::from_secs(reaper_secs.max(1)),
                ..ServerConfig::with_port(port)
            };
            run_server(config).await
        }
        Commands::Shutdown { host, port } => request_shutdown(&host, port).await,
        Commands::Client {
            user,
            host,
            port,
            advertise,
        } => {
            let mut config = SessionConfig::new(user, host, port);
            config.advertised_host = advertise;
            run_client(config).await
        }
    }
}

async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let server = ChatServer::bind(config).await?;
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            shutdown.cancel();
        }
    });
    server.run().await?;
    Ok(())
}

async fn run_client(config: SessionConfig) -> anyhow::Result<()> {
    let ui = Arc::new(ConsoleUi::new(config.user_name.as_str()));
    let mut session = SessionEndpoint::bind(config, ui.clone()).await?;
    session.login().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = session.closed_by_server() => {
                println!("*** disconnected by the server");
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };

        if session.state() == SessionState::Disconnected {
            println!("*** not connected, leaving");
            session.close().await;
            return Ok(());
        }

        match parse_console_line(&line) {
            ConsoleCommand::Say { recipients, text } => {
                let recipients = SessionEndpoint::addressees(&recipients, &ui.others());
                // failures are already shown as a client notice
                if let Err(e) = session.say(recipients, &text).await {
                    error!("Message not sent: {e}");
                }
            }
            ConsoleCommand::Users => println!("*** online: {}", ui.others().join(", ")),
            ConsoleCommand::Help => println!("{CONSOLE_HELP}"),
            ConsoleCommand::Quit => break,
            ConsoleCommand::Unknown(command) => println!("*** unknown command /{command}"),
            ConsoleCommand::Empty => {}
        }
    }

    if session.state() == SessionState::LoggedIn {
        if let Err(e) = session.logout().await {
            error!("Logout failed: {e}");
        }
    }
    session.close().await;
    Ok(())
}
