// pnp-agent — PnP device agent CLI
//
// Registers a device with the PnP signaling service, keeps it discoverable,
// and proxies HTTP requests from paired remote peers to devices on the local
// network.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use pnp_agent_core::{
    shutdown_signal, AgentConfig, ConnectionEvent, ErrorEnvelope, HttpFetcher, LoopbackConnection,
    LoopbackService, SessionState, SignalingClient, Supervisor,
};

#[derive(Parser)]
#[command(name = "pnp-agent")]
#[command(about = "PnP device agent — discoverable HTTP proxy for remote peers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent
    Run {
        /// Signaling service host
        #[arg(long)]
        host: Option<String>,
        /// Signaling service port
        #[arg(long)]
        port: Option<u16>,
        /// Connect to the signaling service without TLS
        #[arg(long)]
        insecure: bool,
        /// Seconds between discoverability passes
        #[arg(long)]
        poll_interval: Option<u64>,
    },
    /// Run self-tests
    Test,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            host,
            port,
            insecure,
            poll_interval,
        } => cmd_run(host, port, insecure, poll_interval).await,
        Commands::Test => cmd_test().await,
    }
}

async fn cmd_run(
    host: Option<String>,
    port: Option<u16>,
    insecure: bool,
    poll_interval: Option<u64>,
) -> Result<()> {
    let mut config = AgentConfig::default();
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if insecure {
        config.secure = false;
    }
    if let Some(secs) = poll_interval {
        config.poll_interval = Duration::from_secs(secs);
    }
    tracing::debug!("Agent configuration: {:?}", config);

    println!("{}", "PnP Agent — Starting...".bold());
    println!();
    println!(
        "Signaling service: {}",
        format!("{}:{}", config.host, config.port).bright_cyan()
    );

    let service = LoopbackService::new();
    let client = Arc::new(SignalingClient::new(
        config.clone(),
        service.transport(),
        Arc::new(HttpFetcher::new()),
    ));
    let mut supervisor = Supervisor::new(client, config);

    supervisor.start().await.context("Failed to start agent")?;
    println!("  {} Signaling session requested", "✓".green());

    let client = supervisor.client();
    match wait_for_open(&client, Duration::from_secs(10)).await {
        Some(peer_id) => {
            println!("  {} Registered as {}", "✓".green(), peer_id.bright_cyan());
            println!("  {} Discoverable in peer room", "✓".green());
        }
        None => {
            println!(
                "  {} Session still establishing; retrying in the background",
                "…".yellow()
            );
        }
    }
    println!();
    println!("Press Ctrl-C to stop.");

    shutdown_signal().await;
    supervisor.shutdown().await;
    println!("{} Agent stopped", "✓".green());

    Ok(())
}

async fn cmd_test() -> Result<()> {
    println!("{}", "Running self-tests...".bold());
    println!();

    // A local endpoint standing in for the device the agent fronts.
    let url = local_endpoint(b"hello from the device").await?;
    tracing::debug!("Local device endpoint: {}", url);

    let service = LoopbackService::new();
    let config = AgentConfig {
        poll_interval: Duration::from_millis(50),
        ..AgentConfig::default()
    };
    let client = Arc::new(SignalingClient::new(
        config.clone(),
        service.transport(),
        Arc::new(HttpFetcher::new()),
    ));
    let mut supervisor = Supervisor::new(client, config);

    supervisor.start().await.context("Failed to start agent")?;
    let client = supervisor.client();
    let peer_id = wait_for_open(&client, Duration::from_secs(5))
        .await
        .context("Session never opened")?;
    println!("{} Agent session ({})", "✓".green(), peer_id);

    let members = client.room_members().await?;
    assert!(members.contains(&peer_id));
    println!("{} Room discoverability", "✓".green());

    let conn = service
        .open_connection("selftest-peer", &peer_id)
        .await
        .context("Failed to connect to the agent")?;
    conn.send(format!(r#"{{"url": "{}", "method": "GET"}}"#, url).into_bytes())
        .await?;
    let body = expect_data(&conn).await?;
    assert_eq!(body, b"hello from the device");
    println!("{} HTTP proxying ({} bytes)", "✓".green(), body.len());

    conn.send(format!(r#"{{"url": "{}", "method": "POST"}}"#, url).into_bytes())
        .await?;
    let answer = expect_data(&conn).await?;
    let envelope: ErrorEnvelope =
        serde_json::from_slice(&answer).context("Expected an error envelope")?;
    assert!(envelope.error.contains("POST"));
    println!("{} Error reporting", "✓".green());

    supervisor.shutdown().await;
    assert_eq!(client.state().await, SessionState::Closed);
    println!("{} Clean shutdown", "✓".green());

    println!();
    println!("{}", "All tests passed!".green().bold());

    Ok(())
}

/// Poll until the session opens, returning the assigned peer id.
async fn wait_for_open(client: &SignalingClient, patience: Duration) -> Option<String> {
    let deadline = tokio::time::Instant::now() + patience;
    while tokio::time::Instant::now() < deadline {
        if client.state().await == SessionState::Open {
            return client.peer_id().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}

async fn expect_data(conn: &LoopbackConnection) -> Result<Vec<u8>> {
    let event = tokio::time::timeout(Duration::from_secs(5), conn.recv())
        .await
        .context("Timed out waiting for an answer")?
        .context("Connection closed before answering")?;
    match event {
        ConnectionEvent::Data(data) => Ok(data),
        other => anyhow::bail!("Unexpected connection event: {}", other),
    }
}

/// Serve a one-page HTTP endpoint on a loopback port.
async fn local_endpoint(body: &'static [u8]) -> Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("Failed to bind a local port")?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let header = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(header.as_bytes()).await;
                    let _ = socket.write_all(body).await;
                }
                Err(_) => break,
            }
        }
    });
    Ok(format!("http://{}/", addr))
}
