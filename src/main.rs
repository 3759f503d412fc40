use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use teloxide::update_listeners::{Polling, webhooks};
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use xplora::config::Config;
use xplora::pipeline::{
    AnswerClient, PipelineSettings, QueryPipeline, TelegramClient, TranscriptionClient, telegram,
};
use xplora::telegram_log::TelegramLogLayer;

/// First keep-alive ping goes out this long after startup.
const KEEPALIVE_WARMUP: Duration = Duration::from_secs(5);

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    #[command(description = "show the welcome message")]
    Start,
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "xplora.json".to_string());
    let config = if Path::new(&config_path).exists() {
        Config::load(&config_path)
    } else {
        Config::from_env()
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("xplora.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("❌ Failed to open log file in {}: {e}", log_dir.display());
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        registry.with(TelegramLogLayer::new(bot.clone(), log_chat_id)).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting xplora...");
    match &config.config_path {
        Some(path) => info!("Loaded config from {}", path.display()),
        None => info!("No config file at {config_path}, using environment"),
    }

    let me = match bot.get_me().await {
        Ok(me) => me,
        Err(e) => {
            error!("Failed to get bot info: {e}");
            std::process::exit(1);
        }
    };
    info!("Bot user ID: {}, username: @{}", me.id, me.username());

    let http = match reqwest::Client::builder().timeout(config.http_timeout).build() {
        Ok(http) => http,
        Err(e) => {
            error!("Failed to build HTTP client: {e}");
            std::process::exit(1);
        }
    };

    let transcriber = match config.assemblyai_api_key.clone() {
        Some(key) => Some(TranscriptionClient::new(http.clone(), key, &config.transcription)),
        None => {
            warn!("ASSEMBLYAI_API_KEY not set, voice messages disabled");
            None
        }
    };

    let pipeline = Arc::new(QueryPipeline::new(
        Arc::new(TelegramClient::new(bot.clone())),
        AnswerClient::new(http.clone(), &config.answer),
        transcriber,
        PipelineSettings {
            bot_user_id: me.id.0 as i64,
            scratch_dir: config.scratch_dir(),
            locale: config.transcription.locale.clone(),
            replies: config.replies.clone(),
        },
    ));

    let handler = Update::filter_message()
        .branch(dptree::entry().filter_command::<Command>().endpoint(handle_command))
        .branch(dptree::endpoint(handle_message));

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .dependencies(dptree::deps![pipeline])
        .enable_ctrlc_handler()
        .build();

    match config.webhook_url.clone() {
        Some(external_url) => {
            let address = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
            let webhook_url = match external_url.join("webhook") {
                Ok(url) => url,
                Err(e) => {
                    error!("Invalid webhook URL {external_url}: {e}");
                    std::process::exit(1);
                }
            };

            let options = webhooks::Options::new(address, webhook_url.clone()).drop_pending_updates();
            let listener = match webhooks::axum(bot.clone(), options).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!("❌ Failed to set webhook: {e}");
                    std::process::exit(1);
                }
            };
            info!("🤖 Webhook mode on {address}, Telegram posts to {webhook_url}");

            if config.keepalive_interval.is_zero() {
                info!("Keep-alive disabled");
            } else {
                tokio::spawn(keep_alive(http, external_url, config.keepalive_interval));
            }

            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the webhook listener"),
                )
                .await;
        }
        None => {
            info!("🤖 No webhook URL, long polling");
            let listener = Polling::builder(bot.clone()).drop_pending_updates().build();
            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the polling listener"),
                )
                .await;
        }
    }

    info!("👋 Stopped");
}

async fn handle_command(msg: Message, cmd: Command, pipeline: Arc<QueryPipeline>) -> ResponseResult<()> {
    match cmd {
        Command::Start => {
            info!("/start in chat {}", msg.chat.id);
            pipeline.welcome(msg.chat.id.0, msg.id.0 as i64).await;
        }
    }
    Ok(())
}

/// Each message runs in its own task so queries in one chat don't queue behind each other.
async fn handle_message(msg: Message, pipeline: Arc<QueryPipeline>) -> ResponseResult<()> {
    let Some(inbound) = telegram::inbound_message(&msg) else {
        return Ok(());
    };
    tokio::spawn(async move {
        pipeline.handle(inbound).await;
    });
    Ok(())
}

/// Ping our own public URL so the hosting platform doesn't idle the service.
async fn keep_alive(http: reqwest::Client, url: reqwest::Url, every: Duration) {
    tokio::time::sleep(KEEPALIVE_WARMUP).await;
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        // Only the webhook path is routed, so any HTTP status means we're awake.
        match http.get(url.clone()).send().await {
            Ok(response) => info!("[Keep-alive] {} -> {}", url, response.status()),
            Err(e) => warn!("[Keep-alive] {} failed: {e}", url),
        }
    }
}
