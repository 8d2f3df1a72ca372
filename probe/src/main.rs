use anyhow::Result;
use clap::Parser;
use sluice_types::{ResourceBody, DEFAULT_PORT};
use std::time::Duration;
use tracing::info;

mod client;
use client::SluiceClient;

/// Runs the Sluice handshake against a live server and prints what it sees
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the Sluice server
    #[arg(long, env = "SLUICE_URL")]
    url: Option<String>,

    /// Read only this resource instead of every listed one
    #[arg(long)]
    uri: Option<String>,

    /// Seconds to wait for each frame
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Leave the session open instead of terminating it
    #[arg(long)]
    keep: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let url = args
        .url
        .unwrap_or_else(|| format!("http://localhost:{}", DEFAULT_PORT));

    info!("Connecting to Sluice at: {}", url);
    let client = SluiceClient::new(url, Duration::from_secs(args.timeout));
    let mut session = client.connect().await?;
    println!("session   {}", session.session_id());
    println!("endpoint  {}", session.endpoint_url());

    let init = session.initialize().await?;
    println!(
        "server    {} {} (protocol {})",
        init.server_info.name, init.server_info.version, init.protocol_version
    );

    let listed = session.list_resources().await?;
    println!("resources {}", listed.resources.len());
    for resource in &listed.resources {
        println!("  {:<28} {:<16} {}", resource.uri, resource.mime_type, resource.name);
    }

    let uris: Vec<String> = match args.uri {
        Some(uri) => vec![uri],
        None => listed.resources.iter().map(|r| r.uri.clone()).collect(),
    };

    for uri in &uris {
        let read = session.read_resource(uri).await?;
        for contents in &read.contents {
            match &contents.body {
                ResourceBody::Text(text) => {
                    println!(
                        "\n== {} ({}, {} bytes)",
                        contents.uri,
                        contents.mime_type,
                        text.len()
                    );
                    println!("{}", text);
                }
                ResourceBody::Blob(blob) => {
                    println!(
                        "\n== {} ({}, {} base64 chars)",
                        contents.uri,
                        contents.mime_type,
                        blob.len()
                    );
                }
            }
        }
    }

    if !args.keep {
        session.terminate().await?;
        info!("Session terminated");
    }

    Ok(())
}
