//! REGMARGIN — Frequency-regulation margin dashboard
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the in-memory session and the optional image extraction bridge,
//! and serves the dashboard until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use regmargin::config::{self, LlmConfig};
use regmargin::dashboard;
use regmargin::dashboard::routes::DashboardState;
use regmargin::llm::bridge::ExtractionBridge;
use regmargin::llm::gemini::GeminiClient;
use regmargin::llm::openai::OpenAiClient;
use regmargin::llm::ImageExtractor;
use regmargin::session::Session;

const BANNER: &str = r#"
 ___ ___ ___ __  __   _   ___  ___ ___ _  _
| _ \ __/ __|  \/  | /_\ | _ \/ __|_ _| \| |
|   / _| (_ | |\/| |/ _ \|   / (_ || || .` |
|_|_\___\___|_|  |_/_/ \_\_|_\\___|___|_|\_|

  Frequency Regulation Margins (RPF / RSF)
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path =
        std::env::var("REGMARGIN_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        config = %config_path,
        units = cfg.plant.units.len(),
        max_mw_per_unit = cfg.plant.max_mw_per_unit,
        programmed_mw = cfg.defaults.programmed_mw,
        "REGMARGIN starting up"
    );

    // -- Session -----------------------------------------------------------

    let session = Session::new(cfg.plant.clone(), &cfg.defaults.loads, cfg.defaults.globals());
    let initial = session.report();
    info!(totals = %initial.totals, "Initial margins");

    // -- Extraction bridge -------------------------------------------------

    let bridge = match build_extractor(&cfg.llm)? {
        Some(extractor) => {
            info!(provider = %cfg.llm.provider, model = extractor.model_name(), "Image extraction enabled");
            Some(ExtractionBridge::new(extractor))
        }
        None => {
            warn!(
                env = %cfg.llm.api_key_env,
                "No extraction API key configured — image upload disabled"
            );
            None
        }
    };

    // -- Dashboard ---------------------------------------------------------

    let state = Arc::new(DashboardState::new(session, bridge));
    let addr = cfg.dashboard.socket_addr()?;

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received.");
    };

    dashboard::serve(state, addr, cfg.dashboard.max_upload_bytes, shutdown).await?;

    info!("REGMARGIN shut down cleanly.");
    Ok(())
}

/// Build the configured extractor, or `None` when no API key is set.
fn build_extractor(llm: &LlmConfig) -> Result<Option<Box<dyn ImageExtractor>>> {
    let Some(api_key) = llm.api_key() else {
        return Ok(None);
    };

    let extractor: Box<dyn ImageExtractor> = match llm.provider.as_str() {
        "openai" => Box::new(OpenAiClient::new(
            api_key,
            Some(llm.model.clone()),
            Some(llm.max_tokens),
            Some(llm.timeout_secs),
            llm.base_url.clone(),
        )?),
        "gemini" => Box::new(GeminiClient::new(
            api_key,
            Some(llm.model.clone()),
            Some(llm.max_tokens),
            Some(llm.timeout_secs),
            llm.base_url.clone(),
        )?),
        other => {
            warn!(provider = other, "Unknown extraction provider, defaulting to Gemini");
            Box::new(GeminiClient::new(
                api_key,
                Some(llm.model.clone()),
                Some(llm.max_tokens),
                Some(llm.timeout_secs),
                llm.base_url.clone(),
            )?)
        }
    };

    Ok(Some(extractor))
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("regmargin=info"));

    let json_logging = std::env::var("REGMARGIN_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
