use anyhow::Context as _;
use dotenvy::dotenv;
use group_assistant::bot::dispatch::{Collaborators, DispatchController};
use group_assistant::bot::messenger::TelegramMessenger;
use group_assistant::bot::webhook::{self, WebhookState};
use group_assistant::clock::SystemClock;
use group_assistant::config::Settings;
use group_assistant::llm::GeminiClient;
use group_assistant::storage::memory::InMemoryStore;
use group_assistant::storage::{BlobStore, KeyValueStore, R2Storage};
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use teloxide::Bot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting sensitive data
struct RedactionPatterns {
    token1: Regex,
    token2: Regex,
    token3: Regex,
    gemini_key: Regex,
    r2_1: Regex,
    r2_2: Regex,
    r2_3: Regex,
    r2_4: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token1: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token2: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token3: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
            gemini_key: Regex::new(r"AIza[0-9A-Za-z_-]{35}")?,
            r2_1: Regex::new(r"R2_ACCESS_KEY_ID=[^\s&]+")?,
            r2_2: Regex::new(r"R2_SECRET_ACCESS_KEY=[^\s&]+")?,
            r2_3: Regex::new(r"'aws_access_key_id': '[^']*'")?,
            r2_4: Regex::new(r"'aws_secret_access_key': '[^']*'")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let replacements: [(&Regex, &str); 8] = [
            (&self.token1, "$1[TELEGRAM_TOKEN]$3"),
            (&self.token2, "[TELEGRAM_TOKEN]"),
            (&self.token3, "$1[TELEGRAM_TOKEN]"),
            (&self.gemini_key, "[GEMINI_API_KEY]"),
            (&self.r2_1, "R2_ACCESS_KEY_ID=[MASKED]"),
            (&self.r2_2, "R2_SECRET_ACCESS_KEY=[MASKED]"),
            (&self.r2_3, "'aws_access_key_id': '[MASKED]'"),
            (&self.r2_4, "'aws_secret_access_key': '[MASKED]'"),
        ];
        replacements
            .iter()
            .fold(input.to_string(), |output, (pattern, replacement)| {
                pattern.replace_all(&output, *replacement).into_owned()
            })
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length even though the redacted text may differ.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Before logging, so nothing unredacted is ever written
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting group assistant...");

    let settings = init_settings();
    let (kv, blobs) = init_storage(&settings).await;

    let messenger = Arc::new(TelegramMessenger::new(Bot::new(
        settings.telegram_token.clone(),
    )));
    let ai = Arc::new(GeminiClient::new(&settings));
    info!(model = %settings.model, "AI client initialized.");

    let controller = Arc::new(DispatchController::new(
        &settings,
        Collaborators {
            kv,
            blobs,
            messenger,
            ai,
            clock: Arc::new(SystemClock),
        },
    ));

    let app = webhook::router(
        WebhookState {
            controller,
            secret_token: settings.webhook_secret.clone(),
        },
        &settings.webhook_path,
    );

    let listener = tokio::net::TcpListener::bind(&settings.webhook_bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.webhook_bind_addr))?;
    info!(
        addr = %settings.webhook_bind_addr,
        path = %webhook::normalize_path(&settings.webhook_path),
        "Webhook server listening"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(shutdown.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("webhook server failed")?;

    info!("Webhook server stopped.");
    Ok(())
}

async fn cancel_on_ctrl_c(token: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received, shutting down..."),
        Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
    }
    token.cancel();
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Arc<Settings> {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

async fn init_storage(settings: &Settings) -> (Arc<dyn KeyValueStore>, Arc<dyn BlobStore>) {
    if settings.storage_backend.eq_ignore_ascii_case("memory") {
        warn!("Using in-memory storage, state is lost on restart.");
        let store = Arc::new(InMemoryStore::new());
        return (store.clone(), store);
    }

    match R2Storage::new(settings).await {
        Ok(s) => {
            info!("R2 Storage initialized.");
            if let Err(e) = s.check_connection().await {
                error!("R2 Storage connection check returned error: {}", e);
            }
            let store = Arc::new(s);
            (store.clone(), store)
        }
        Err(e) => {
            error!("Failed to initialize R2 Storage: {}", e);
            std::process::exit(1);
        }
    }
}
