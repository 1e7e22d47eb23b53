//! Service binary.
//!
//! Loads `clientpulse.toml` (or the path given as the first argument),
//! wires the store, generation backend, pipeline, and webhook notifier
//! together, and serves the HTTP API until shutdown.
//!
//! ## Environment Variables
//!
//! - `OPENAI_API_KEY` — required when `[generation].backend = "openai"`
//! - `LOG_FORMAT=json` — structured JSON output (production)
//! - `RUST_LOG=info` — log level filter

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clientpulse::backend::GenerationBackend;
use clientpulse::config::{self, BackendKind, ServiceConfig};
use clientpulse::web_api::{self, AppState, ServerConfig};
use clientpulse::webhook::WebhookNotifier;
use clientpulse::{metrics, AnalysisPipeline, CannedBackend, OpenAiBackend, Store};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _ = clientpulse::init_tracing();
    metrics::init_metrics()?;

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "clientpulse.toml".to_string());

    let config = if Path::new(&config_path).exists() {
        config::load_from_file(Path::new(&config_path))?
    } else {
        info!(target: "clientpulse", path = %config_path, "no config file found, using defaults");
        ServiceConfig::default()
    };

    let store = Store::open(&config.database.path)?;

    let generation_timeout = Duration::from_secs(config.generation.timeout_seconds);
    let backend: Arc<dyn GenerationBackend> = match config.generation.backend {
        BackendKind::OpenAi => {
            let mut backend = OpenAiBackend::new(&config.generation.model)?
                .with_temperature(config.generation.temperature)
                .with_timeout(generation_timeout);
            if let Some(base_url) = &config.generation.base_url {
                backend = backend.with_base_url(base_url);
            }
            Arc::new(backend)
        }
        BackendKind::Canned => Arc::new(CannedBackend::demo()),
    };

    let pipeline = AnalysisPipeline::new(
        backend,
        store.clone(),
        config.pipeline.proposals_to_test,
        config.pipeline.tester_mode,
    );

    let notifier = WebhookNotifier::new(Duration::from_secs(config.webhook.timeout_seconds));

    let server_config = ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
        max_request_size: config.server.max_request_size,
    };

    web_api::start_server(
        server_config,
        AppState {
            store,
            pipeline,
            notifier,
        },
    )
    .await
}
