use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use teloxide::types::ChatId;

use crate::pipeline::poll::PollPolicy;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[error("failed to parse config file '{}': {source}", .path.display())]
    ParseJson { path: PathBuf, source: serde_json::Error },

    #[error("config validation error: {0}")]
    Validation(String),
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    telegram_bot_token: String,
    /// AssemblyAI key for voice messages. Voice is disabled without it.
    #[serde(default)]
    assemblyai_api_key: String,
    /// Directory for logs and scratch audio. Defaults to current directory.
    data_dir: Option<String>,
    log_chat_id: Option<i64>,
    /// Public base URL; when set the bot receives updates via webhook.
    webhook_url: Option<String>,
    listen_port: Option<u16>,
    #[serde(default = "default_keepalive_interval_secs")]
    keepalive_interval_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    http_timeout_secs: u64,
    #[serde(default)]
    answer: AnswerSettings,
    #[serde(default)]
    transcription: TranscriptionSettings,
    #[serde(default)]
    replies: Replies,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            telegram_bot_token: String::new(),
            assemblyai_api_key: String::new(),
            data_dir: None,
            log_chat_id: None,
            webhook_url: None,
            listen_port: None,
            keepalive_interval_secs: default_keepalive_interval_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            answer: AnswerSettings::default(),
            transcription: TranscriptionSettings::default(),
            replies: Replies::default(),
        }
    }
}

fn default_keepalive_interval_secs() -> u64 {
    120
}

fn default_http_timeout_secs() -> u64 {
    60
}

const DEFAULT_LISTEN_PORT: u16 = 10000;

/// Answer backend settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnswerSettings {
    pub base_url: String,
    /// Appended to every query to steer the answer style.
    pub style_directive: String,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for AnswerSettings {
    fn default() -> Self {
        Self {
            base_url: "https://yandex.ru/neuralsearch/api".to_string(),
            style_directive: "Отвечай чётко и развёрнуто в стиле Preplaxity, но строго по теме, \
                              НИКОГДА НЕ ПИШИ Возможно имелось в виду и тд. \
                              в конце ответа не приводи ссылки СТРОГО"
                .to_string(),
            poll_interval_ms: 7000,
            max_attempts: 6,
        }
    }
}

impl AnswerSettings {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(Duration::from_millis(self.poll_interval_ms), self.max_attempts)
    }
}

/// Speech-to-text backend settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    pub base_url: String,
    pub locale: String,
    pub speech_model: String,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.assemblyai.com/v2".to_string(),
            locale: "ru".to_string(),
            speech_model: "universal".to_string(),
            poll_interval_ms: 3000,
            max_attempts: 30,
        }
    }
}

impl TranscriptionSettings {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(Duration::from_millis(self.poll_interval_ms), self.max_attempts)
    }
}

/// Every text the bot shows to users.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Replies {
    pub welcome: String,
    pub query_label: String,
    pub processing: String,
    pub generic_failure: String,
    pub voice_unavailable: String,
    pub recognizing: String,
    pub recognized: String,
    pub recognition_failed: String,
    pub voice_failed: String,
    pub nothing_recognized: String,
}

impl Default for Replies {
    fn default() -> Self {
        Self {
            welcome: "Привет! 👋 Я XPLORA - твой умный ассистент для поиска информации в интернете. 🧠\n\
                      Просто отправь мне свой вопрос, и я постараюсь найти на него самый точный и развернутый ответ! 🚀\n\n\
                      Отправляй текстовые или голосовые сообщения! 🎤"
                .to_string(),
            query_label: "Ваш запрос:".to_string(),
            processing: "Обработка...".to_string(),
            generic_failure: "⚠️ Произошла ошибка при обработке вашего запроса. Попробуйте еще раз позже."
                .to_string(),
            voice_unavailable: "Обработка голосовых сообщений временно недоступна.".to_string(),
            recognizing: "🎙️ Распознаю ваше голосовое сообщение...".to_string(),
            recognized: "✅ Голосовое сообщение распознано.".to_string(),
            recognition_failed: "⚠️ Ошибка при распознавании голосового сообщения.".to_string(),
            voice_failed: "⚠️ Ошибка при обработке вашего голосового сообщения.".to_string(),
            nothing_recognized: "Не удалось распознать текст в голосовом сообщении или оно было пустым."
                .to_string(),
        }
    }
}

pub struct Config {
    /// Where the config came from, if a file was used.
    pub config_path: Option<PathBuf>,
    pub telegram_bot_token: String,
    pub assemblyai_api_key: Option<String>,
    pub data_dir: PathBuf,
    pub log_chat_id: Option<ChatId>,
    pub webhook_url: Option<reqwest::Url>,
    pub listen_port: u16,
    /// Interval for pinging `webhook_url` so the host does not idle (0 = off).
    pub keepalive_interval: Duration,
    pub http_timeout: Duration,
    pub answer: AnswerSettings,
    pub transcription: TranscriptionSettings,
    pub replies: Replies,
}

impl Config {
    /// Load from a JSON file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        Self::build(file, Some(config_path), |key| std::env::var(key).ok())
    }

    /// Configuration from environment variables alone.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::build(ConfigFile::default(), None, |key| std::env::var(key).ok())
    }

    fn build(
        mut file: ConfigFile,
        config_path: Option<PathBuf>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(token) = env("BOT_TOKEN").filter(|v| !v.is_empty()) {
            file.telegram_bot_token = token;
        }
        if let Some(key) = env("ASSEMBLYAI_API_KEY").filter(|v| !v.is_empty()) {
            file.assemblyai_api_key = key;
        }
        if let Some(url) = env("RENDER_EXTERNAL_URL").filter(|v| !v.is_empty()) {
            file.webhook_url = Some(url);
        }
        if let Some(port) = env("PORT") {
            let port = port
                .parse::<u16>()
                .map_err(|_| ConfigError::Validation(format!("PORT must be a port number, got {port:?}")))?;
            file.listen_port = Some(port);
        }

        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }
        if file.answer.max_attempts == 0 || file.transcription.max_attempts == 0 {
            return Err(ConfigError::Validation("max_attempts must be at least 1".into()));
        }

        let webhook_url = file
            .webhook_url
            .filter(|u| !u.is_empty())
            .map(|u| {
                reqwest::Url::parse(&u)
                    .map_err(|e| ConfigError::Validation(format!("invalid webhook_url {u:?}: {e}")))
            })
            .transpose()?;

        let assemblyai_api_key = Some(file.assemblyai_api_key).filter(|k| !k.is_empty());

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            config_path,
            telegram_bot_token: file.telegram_bot_token,
            assemblyai_api_key,
            data_dir,
            log_chat_id: file.log_chat_id.map(ChatId),
            webhook_url,
            listen_port: file.listen_port.unwrap_or(DEFAULT_LISTEN_PORT),
            keepalive_interval: Duration::from_secs(file.keepalive_interval_secs),
            http_timeout: Duration::from_secs(file.http_timeout_secs),
            answer: file.answer,
            transcription: file.transcription,
            replies: file.replies,
        })
    }

    /// Scratch area for downloaded voice notes.
    pub fn scratch_dir(&self) -> PathBuf {
        self.data_dir.join("temp_audio")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}
