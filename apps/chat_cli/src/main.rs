use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use shared::{
    domain::{ConversationId, UserId},
    events::EventName,
    protocol::InboundEvent,
};
use sync_engine::{
    config::load_settings,
    connection::ConnectionState,
    query::HttpConversationApi,
    transport::{Credentials, ReconnectPolicy, WebSocketTransport},
    SyncClient,
};
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio_stream::{wrappers::LinesStream, StreamExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Overrides the configured REST base URL.
    #[arg(long)]
    server_url: Option<String>,
    /// Overrides the configured socket URL.
    #[arg(long)]
    socket_url: Option<String>,
    #[arg(long)]
    user_id: String,
    #[arg(long)]
    token: Option<String>,
    /// Conversation to open after connecting.
    #[arg(long)]
    conversation: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    if args.socket_url.is_some() {
        settings.socket_url = args.socket_url;
    }

    let transport = WebSocketTransport::new(ReconnectPolicy {
        attempts: settings.reconnect_attempts,
        delay: settings.reconnect_delay,
    });
    let mut api = HttpConversationApi::new(&settings.server_url)?;
    if let Some(token) = &args.token {
        api = api.with_token(token.clone());
    }
    let client = SyncClient::new(settings, Arc::new(transport), Arc::new(api));

    client.on_status(|status| match &status.last_error {
        Some(error) => println!("[{}] {error}", status.state.as_str()),
        None => println!("[{}]", status.state.as_str()),
    });
    for event in EventName::ALL.into_iter().filter(|event| !event.is_lifecycle()) {
        client.subscribe(event, print_event);
    }

    let mut credentials = Credentials::new(UserId::from(args.user_id.as_str()));
    credentials.token = args.token;
    client.set_identity(credentials).await?;
    let status = client.connect().await?;
    if status.state != ConnectionState::Connected {
        return Err(anyhow!(
            "could not connect: {}",
            status.last_error.unwrap_or_else(|| status.state.as_str().to_string())
        ));
    }
    info!(identity = %args.user_id, "chat: connected");
    list_conversations(&client);

    if let Some(conversation) = args.conversation {
        open(&client, ConversationId::from(conversation.as_str())).await;
    }

    let mut lines = LinesStream::new(BufReader::new(stdin()).lines());
    while let Some(line) = lines.next().await {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("/list", _) => list_conversations(&client),
            ("/open", id) if !id.trim().is_empty() => {
                open(&client, ConversationId::from(id.trim())).await
            }
            ("/older", _) => match client.load_older_messages().await {
                Ok(count) => println!("loaded {count} older messages"),
                Err(err) => warn!(error = %err, "chat: loading older messages failed"),
            },
            (command, _) if command.starts_with('/') => {
                println!("commands: /list, /open <conversation>, /older, /quit");
            }
            _ => {
                let Some(conversation_id) = client.snapshot().open.map(|open| open.id) else {
                    warn!("chat: open a conversation first");
                    continue;
                };
                if let Err(err) = client.send_message(&conversation_id, line).await {
                    warn!(conversation_id = %conversation_id, error = %err, "chat: send failed");
                }
            }
        }
    }

    client.disconnect().await;
    info!("chat: session closed");
    Ok(())
}

async fn open(client: &Arc<SyncClient>, conversation_id: ConversationId) {
    if let Err(err) = client.open_conversation(&conversation_id).await {
        warn!(conversation_id = %conversation_id, error = %err, "chat: open failed");
        return;
    }
    if let Some(open) = client.snapshot().open {
        for message in &open.messages {
            let sender = message.sender_id.as_ref().map_or("?", |sender| sender.as_str());
            println!("{} {sender}: {}", message.created_at.format("%H:%M"), message.content);
        }
    }
}

fn list_conversations(client: &SyncClient) {
    for conversation in client.snapshot().conversations_by_recency() {
        println!(
            "{} {} unread={} mentions={}",
            conversation.id,
            conversation.name.as_deref().unwrap_or("(unnamed)"),
            conversation.unread_count,
            conversation.mention_count
        );
    }
}

fn print_event(event: &InboundEvent) -> Result<()> {
    match event {
        InboundEvent::MessageNew(message) => {
            let sender = message.sender_id.as_ref().map_or("?", |sender| sender.as_str());
            println!("<{}> {sender}: {}", message.conversation_id, message.content);
        }
        InboundEvent::TypingUpdate(update) if !update.typing_users.is_empty() => {
            let users: Vec<&str> = update.typing_users.iter().map(UserId::as_str).collect();
            println!("<{}> typing: {}", update.conversation_id, users.join(", "));
        }
        other => match other.conversation_id() {
            Some(conversation_id) => println!("<{conversation_id}> {}", other.name().as_str()),
            None => println!("{}", other.name().as_str()),
        },
    }
    Ok(())
}
