use std::error::Error;
use std::fs::{self, OpenOptions};
use std::sync::{Arc, Mutex};

use nlq_adapters::http::HttpBackend;
use nlq_core::backend::ApiBackend;
use nlq_core::settings::{self, ClientSettings};
use tracing::info;
use tracing_subscriber::EnvFilter;

const LOG_FILE_NAME: &str = "nlq.log";

fn run_app(
    settings: &ClientSettings,
    run_tui: impl FnOnce(Arc<dyn ApiBackend>, &ClientSettings) -> Result<(), nlq_tui::TuiError>,
) -> Result<(), Box<dyn Error>> {
    let backend = HttpBackend::new(&settings.api_base_url, settings.request_timeout())?;
    info!(api = backend.base_url(), "starting client");
    run_tui(Arc::new(backend), settings)?;
    Ok(())
}

/// Logs go to a file in the config directory since the terminal belongs to the UI.
/// `NLQ_LOG` takes precedence over the configured filter.
fn init_logging(settings: &ClientSettings) -> Result<(), Box<dyn Error>> {
    let dir = settings::config_dir()?;
    fs::create_dir_all(&dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))?;

    let filter = EnvFilter::try_from_env("NLQ_LOG")
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|error| error as Box<dyn Error>)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let settings = settings::load_default()?;
    init_logging(&settings)?;
    run_app(&settings, nlq_tui::run)
}
