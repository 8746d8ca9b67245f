// Aria: stream music to listeners, or tune into a host.

mod client;
mod config;
mod playback;
mod server;
mod session;

use std::time::Duration;

use aria_core::{ClientEngine, MemoryCatalog, Song};
use tokio::io::{AsyncBufReadExt, BufReader};

use client::{ClientOptions, NetworkClient};
use playback::{ClockPlayer, TracingStatus};
use server::{AudioHost, HostOptions};
use session::SessionOptions;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("aria {}", VERSION);
        return Ok(());
    }

    let cfg = config::load();
    let rt = tokio::runtime::Runtime::new()?;
    match args.first().map(String::as_str) {
        Some("host") => {
            let file = args.get(1).ok_or("usage: aria host <file> [port]")?.clone();
            let port = match args.get(2) {
                Some(p) => p.parse::<u16>()?,
                None => cfg.port,
            };
            rt.block_on(run_host(file, port, &cfg))
        }
        Some("connect") => {
            let host = args
                .get(1)
                .ok_or("usage: aria connect <host> [port]")?
                .clone();
            let port = match args.get(2) {
                Some(p) => p.parse::<u16>()?,
                None => cfg.port,
            };
            rt.block_on(run_client(host, port, &cfg))
        }
        _ => {
            eprintln!("usage: aria host <file> [port] | aria connect <host> [port]");
            std::process::exit(2);
        }
    }
}

async fn run_client(
    host: String,
    port: u16,
    cfg: &config::Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = ClientEngine::new(
        cfg.download_dir.clone(),
        host.clone(),
        port,
        Box::new(ClockPlayer::new()),
        Box::new(TracingStatus),
    )
    .with_catalog(Box::new(MemoryCatalog::new()));
    let opts = ClientOptions {
        session: SessionOptions {
            recv_buffer: cfg.recv_buffer,
            send_buffer: cfg.send_buffer,
            ..SessionOptions::default()
        },
        reconnect_backoff: Duration::from_millis(cfg.reconnect_backoff_ms),
        ..ClientOptions::default()
    };
    tracing::info!(%host, port, "connecting");
    let net = NetworkClient::spawn(&host, port, engine, opts);
    shutdown_signal().await?;
    net.shutdown().await;
    Ok(())
}

async fn run_host(
    file: String,
    port: u16,
    cfg: &config::Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let host = AudioHost::bind(
        port,
        HostOptions {
            chunk_size: cfg.chunk_size,
        },
    )
    .await?;
    tracing::info!(port = host.port(), "hosting");

    let mut song = Song::from_location(file.clone());
    song.title = std::path::Path::new(&file)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned());
    host.host_song(song).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = shutdown_signal() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if let Err(e) = run_command(&host, line.trim()).await {
                    eprintln!("{e}");
                }
                if line.trim() == "quit" {
                    break;
                }
            }
        }
    }
    host.shutdown().await;
    Ok(())
}

async fn run_command(host: &AudioHost, line: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut parts = line.splitn(2, ' ');
    match (parts.next().unwrap_or(""), parts.next()) {
        ("play", _) => host.play().await,
        ("pause", _) => host.pause().await,
        ("goto", Some(secs)) => {
            let secs: f64 = secs.trim().parse()?;
            host.goto(Duration::from_secs_f64(secs)).await;
        }
        ("notify", Some(text)) => host.notify(text).await,
        ("video", Some(url)) => host.share_video(url.trim()).await,
        ("info", _) => {
            let info = host.info().await;
            println!(
                "hosting on {}:{} with {} client(s)",
                info.host,
                info.port,
                info.clients.unwrap_or(0)
            );
        }
        ("quit", _) | ("", _) => {}
        (cmd, _) => eprintln!("unknown command: {cmd}"),
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
