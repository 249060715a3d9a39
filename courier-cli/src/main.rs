#![cfg_attr(not(test), forbid(unsafe_code))]

//! Courier command-line client.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::models::{Message, SendMessageRequest, User};
use uuid::Uuid;

mod api;
mod stream;
mod sync;

use api::{ApiClient, ApiClientError};
use sync::SyncAgent;

/// Command-line client for the Courier messaging platform
#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Roster, history, sending, and live conversation sync", long_about = None)]
struct Cli {
    /// Courier server base URL
    #[arg(long, default_value = "http://localhost:5001")]
    server: String,

    /// Session token issued by the auth service (falls back to COURIER_SESSION)
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every other user and whether they are reachable
    Roster,

    /// Print the full conversation with a peer
    History {
        /// Peer user id
        #[arg(long)]
        peer: Uuid,
    },

    /// Send a message to a peer
    Send {
        /// Peer user id
        #[arg(long)]
        peer: Uuid,

        /// Text body
        #[arg(long)]
        text: Option<String>,

        /// Attach an image file
        #[arg(long)]
        image: Option<PathBuf>,

        /// Attach a video file
        #[arg(long)]
        video: Option<PathBuf>,
    },

    /// Follow a conversation live, printing messages as they arrive
    Watch {
        /// Peer user id
        #[arg(long)]
        peer: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let token = cli
        .token
        .clone()
        .or_else(|| std::env::var("COURIER_SESSION").ok())
        .context("no session token; pass --token or set COURIER_SESSION")?;

    let client = ApiClient::new(&cli.server, &token)?;

    match cli.command {
        Commands::Roster => handle_roster(&client).await,
        Commands::History { peer } => handle_history(&client, peer).await,
        Commands::Send {
            peer,
            text,
            image,
            video,
        } => handle_send(&client, peer, text, image, video).await,
        Commands::Watch { peer } => handle_watch(&client, peer).await,
    }
}

async fn handle_roster(client: &ApiClient) -> Result<()> {
    let users = client.roster().await?;
    if users.is_empty() {
        println!("No other users yet.");
        return Ok(());
    }

    for user in users {
        print_user(&user);
    }
    Ok(())
}

fn print_user(user: &User) {
    println!("{}  {} <{}>", user.id, user.full_name, user.email);
}

async fn handle_history(client: &ApiClient, peer: Uuid) -> Result<()> {
    let messages = client.history(peer).await?;
    if messages.is_empty() {
        println!("No messages yet.");
        return Ok(());
    }

    for message in &messages {
        print_message(message, peer);
    }
    Ok(())
}

async fn handle_send(
    client: &ApiClient,
    peer: Uuid,
    text: Option<String>,
    image: Option<PathBuf>,
    video: Option<PathBuf>,
) -> Result<()> {
    if image.is_some() && video.is_some() {
        bail!("attach either an image or a video, not both");
    }

    let request = SendMessageRequest {
        text,
        image: image.as_deref().map(encode_media_file).transpose()?,
        video: video.as_deref().map(encode_media_file).transpose()?,
    };

    match client.send(peer, &request).await {
        Ok(message) => {
            println!("Sent {} at {}", message.id, format_time(&message));
            Ok(())
        }
        Err(ApiClientError::Timeout) => {
            // Unknown outcome: the server may still have persisted the
            // message, so history decides, not a blind resend.
            eprintln!("{}", ApiClientError::Timeout);
            let history = client.history(peer).await?;
            match history.last() {
                Some(last) => {
                    eprintln!("latest message on record:");
                    print_message(last, peer);
                }
                None => eprintln!("no messages on record for this conversation"),
            }
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

async fn handle_watch(client: &ApiClient, peer: Uuid) -> Result<()> {
    let agent = SyncAgent::new();

    let history = client.history(peer).await?;
    let _subscription = agent.subscribe(peer, history);
    for message in agent.conversation() {
        print_message(&message, peer);
    }
    let mut printed = agent.conversation().len();

    println!("Watching conversation with {peer}... (press Ctrl+C to stop)");

    loop {
        agent.begin_connect();

        let result = stream::follow_events(client, |event| {
            if agent.state() != sync::ConnectionState::Connected {
                // The first event proves the stream is live. The resync
                // after the previous drop already filled any gap, and live
                // deliveries deduplicate against it by id.
                let _ = agent.mark_connected();
            }
            let was_online = agent.is_online(peer);
            agent.handle_event(event);

            for message in agent.conversation().iter().skip(printed) {
                print_message(message, peer);
                printed += 1;
            }

            let is_online = agent.is_online(peer);
            if is_online != was_online {
                println!("[peer is now {}]", if is_online { "online" } else { "offline" });
            }
        })
        .await;

        agent.connection_lost();
        match result {
            Ok(()) => eprintln!("[stream] connection closed; reconnecting"),
            Err(err) => eprintln!("[stream] {err}; reconnecting"),
        }
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;

        // Deliveries are not queued while disconnected; refetch before the
        // next attach so the gap is filled.
        match client.history(peer).await {
            Ok(history) => {
                agent.replace_history(history);
                for message in agent.conversation().iter().skip(printed) {
                    print_message(message, peer);
                    printed += 1;
                }
                let total = agent.conversation().len();
                if total < printed {
                    printed = total;
                }
            }
            Err(err) => eprintln!("[resync] {err}"),
        }
    }
}

fn print_message(message: &Message, peer: Uuid) {
    let direction = if message.sender_id == peer { "<-" } else { "->" };
    let mut line = format!("[{}] {} ", format_time(message), direction);

    if let Some(text) = &message.text {
        line.push_str(text);
    }
    if let Some(media) = &message.media {
        if message.text.is_some() {
            line.push(' ');
        }
        line.push_str(&format!(
            "({} attachment, {} bytes encoded)",
            media.kind,
            media.encoded_len()
        ));
    }

    println!("{line}");
}

fn format_time(message: &Message) -> String {
    message.created_at.0.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn encode_media_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read media file {}", path.display()))?;
    let mime = mime_for_extension(path);
    Ok(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
}

fn mime_for_extension(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn encodes_media_files_as_data_urls() {
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(b"not really a png").unwrap();

        let data_url = encode_media_file(file.path()).unwrap();
        assert!(data_url.starts_with("data:image/png;base64,"));

        let encoded = data_url.rsplit(',').next().unwrap();
        assert_eq!(STANDARD.decode(encoded).unwrap(), b"not really a png");
    }

    #[test]
    fn mime_lookup_covers_the_supported_kinds() {
        assert_eq!(mime_for_extension(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(mime_for_extension(Path::new("a.mp4")), "video/mp4");
        assert_eq!(mime_for_extension(Path::new("a.bin")), "application/octet-stream");
    }
}
