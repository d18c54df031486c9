use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, Message, MessageId};
use tokio::sync::Mutex;
use uuid::Uuid;

mod callback_handlers;
mod feed;
mod filter;
mod helpers;
mod ledger;
mod message_handlers;
mod post;
mod queue;
mod retry;

use callback_handlers::*;
use feed::*;
use filter::*;
use helpers::*;
use ledger::*;
use message_handlers::*;
use post::*;
use queue::*;
use retry::*;

const ACK_TTL_SECS: u64 = 5;
const DEFAULT_PAGE_SIZE: u32 = 50;
const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone)]
struct Config {
    token: String,
    user_id: u64,
    data_dir: PathBuf,
    bluesky: BlueskyConfig,
    retry: RetryPolicy,
}

#[derive(Debug, Clone)]
struct BlueskyConfig {
    handle: String,
    app_password: String,
    service_url: String,
    page_size: u32,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    token: String,
    user_id: UserIdInput,
    data_dir: PathBuf,
    bluesky: BlueskyConfigFile,
    #[serde(default)]
    retry: Option<RetryConfigFile>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UserIdInput {
    Number(u64),
    String(String),
    File { file: PathBuf },
}

#[derive(Debug, Deserialize)]
struct BlueskyConfigFile {
    handle: String,
    #[serde(default)]
    app_password: Option<String>,
    #[serde(default)]
    app_password_file: Option<PathBuf>,
    #[serde(default)]
    service_url: Option<String>,
    #[serde(default)]
    page_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RetryConfigFile {
    #[serde(default)]
    attempts: Option<u32>,
    #[serde(default)]
    delay_ms: Option<u64>,
}

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    config: PathBuf,
}

type ReviewEngine = QueueEngine<BlueskyClient>;

#[derive(Clone)]
struct Review {
    id: String,
    engine: Arc<ReviewEngine>,
}

struct AppState {
    config: Config,
    client: Arc<BlueskyClient>,
    review: Mutex<Option<Review>>,
    review_messages: Mutex<HashMap<i64, MessageId>>,
    session_path: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = load_config(&args.config)?;
    fs::create_dir_all(&config.data_dir).context("create data_dir")?;

    let session_path = config.data_dir.join(SESSION_FILE);
    let client = BlueskyClient::new(
        &config.bluesky.service_url,
        config.bluesky.page_size,
        Some(session_path.clone()),
    )
    .context("build bluesky client")?;
    let client = Arc::new(client);

    if let Err(err) = connect_bluesky(&client, &config, &session_path).await {
        error!("bluesky login failed, use /login to retry: {:#}", err);
    }

    let state = Arc::new(AppState {
        config: config.clone(),
        client,
        review: Mutex::new(None),
        review_messages: Mutex::new(HashMap::new()),
        session_path,
    });

    let bot = Bot::new(config.token.clone());

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
