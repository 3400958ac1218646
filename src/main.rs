use std::error::Error;
use std::sync::Arc;

use chrono::DateTime;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use futures::StreamExt;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

use rust_chat_rpc::common::Message;
use rust_chat_rpc::config::{self, AppConfig};
use rust_chat_rpc::network::{ChatClient, ConnectionSlot, LoopbackConnection};
use rust_chat_rpc::server::ChatServer;
use rust_chat_rpc::storage::{self, ChatDatabase};

#[derive(Parser)]
#[command(
    name = "rust_chat_rpc",
    version,
    about = "Chat client talking to a local chat server over a loopback connection"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the conversations of a user
    Conversations {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long)]
        size: Option<u32>,
    },
    /// Show one page of a conversation's history
    Messages {
        #[arg(long)]
        conversation: String,
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long)]
        size: Option<u32>,
    },
    /// Open (or create) the conversation between two users
    Open {
        #[arg(long)]
        user_a: String,
        #[arg(long)]
        user_b: String,
    },
    /// Count unread messages of a user in a conversation
    Unread {
        #[arg(long)]
        conversation: String,
        #[arg(long)]
        user: String,
    },
    /// Check whether a user has any conversation
    HasChats {
        #[arg(long)]
        user: String,
    },
    /// Post a message to a conversation
    Send {
        #[arg(long)]
        conversation: String,
        #[arg(long)]
        sender: String,
        body: String,
    },
    /// Mark everything a user received in a conversation as read
    Read {
        #[arg(long)]
        conversation: String,
        #[arg(long)]
        user: String,
    },
    /// Follow a conversation live; lines typed on stdin are posted as `sender`
    Watch {
        #[arg(long)]
        conversation: String,
        #[arg(long)]
        sender: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    // Khởi tạo Logger để debug
    env_logger::init();

    let cli = Cli::parse();
    let app_config = config::load_config(&cli.config);

    storage::ensure_parent_dir(&app_config.database_path)?;
    let db = ChatDatabase::with_path(&app_config.database_path)?;
    let server = Arc::new(ChatServer::new(db));

    // The slot normally belongs to the session layer; here it only ever holds the loopback.
    let slot = Arc::new(ConnectionSlot::new());
    slot.install(Arc::new(LoopbackConnection::new(server.clone())));
    let client = ChatClient::new(slot.clone());

    let result = run(cli.command, &client, &server, &app_config).await;
    slot.dispose();
    result
}

async fn run(
    command: Command,
    client: &ChatClient,
    server: &ChatServer,
    app_config: &AppConfig,
) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Conversations { user, page, size } => {
            let size = size.unwrap_or(app_config.page_size);
            print_json(&client.list_conversations(&user, page, size).await?)
        }
        Command::Messages {
            conversation,
            page,
            size,
        } => {
            let size = size.unwrap_or(app_config.page_size);
            for message in client.list_messages(&conversation, page, size).await? {
                print_message(&message);
            }
            Ok(())
        }
        Command::Open { user_a, user_b } => {
            print_json(&client.get_or_create_conversation(&user_a, &user_b).await?)
        }
        Command::Unread { conversation, user } => {
            println!("{}", client.get_unread_count(&conversation, &user).await?);
            Ok(())
        }
        Command::HasChats { user } => {
            println!("{}", client.has_conversations(&user).await?);
            Ok(())
        }
        Command::Send {
            conversation,
            sender,
            body,
        } => print_json(&server.post_message(&conversation, &sender, &body)?),
        Command::Read { conversation, user } => {
            let updated = server.mark_read(&conversation, &user)?;
            log::info!("Marked {updated} messages as read in {conversation}");
            Ok(())
        }
        Command::Watch {
            conversation,
            sender,
        } => watch(client, server, &conversation, &sender, app_config.log_stream_items).await,
    }
}

async fn watch(
    client: &ChatClient,
    server: &ChatServer,
    conversation: &str,
    sender: &str,
    log_items: bool,
) -> Result<(), Box<dyn Error>> {
    let mut subscription = client.stream_messages(conversation);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            item = subscription.next() => match item {
                Some(Ok(message)) => {
                    if log_items {
                        log::info!("Live message {} from {}", message.id, message.sender_id);
                    }
                    print_message(&message);
                }
                Some(Err(err)) => return Err(err.into()),
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    let body = line.trim();
                    if !body.is_empty() {
                        server.post_message(conversation, sender, body)?;
                    }
                }
                None => {
                    stdin_open = false;
                    client.dispose_message_stream();
                }
            },
            _ = signal::ctrl_c() => {
                log::info!("Received shutdown signal, closing live stream...");
                client.dispose_message_stream();
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_message(message: &Message) {
    let time = DateTime::from_timestamp_millis(message.timestamp)
        .map(|at| at.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| message.timestamp.to_string());
    println!(
        "[{time}] {}: {} ({})",
        message.sender_id,
        message.body,
        message.status.as_str()
    );
}
