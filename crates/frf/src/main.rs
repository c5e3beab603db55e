use std::{process::ExitCode, sync::Arc};

use frf_core::{
    backend::types::ChatTarget, config::Config, dispatch::Dispatcher, session::SessionGuard,
    status::StatusReporter, Error,
};
use frf_http::AppState;
use frf_telegram::TelegramBackend;

// Distinct exit codes per startup failure class.
const EXIT_CONFIG_MISSING: u8 = 10;
const EXIT_CONFIG_INCOMPLETE: u8 = 11;
const EXIT_SESSION_START: u8 = 12;
const EXIT_RUNTIME: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = frf_core::logging::init("frf") {
        eprintln!("failed to init logging: {e}");
        return ExitCode::from(EXIT_RUNTIME);
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::from(match e {
                Error::Config(_) => EXIT_CONFIG_MISSING,
                Error::ConfigIncomplete(_) => EXIT_CONFIG_INCOMPLETE,
                Error::Session(_) => EXIT_SESSION_START,
                _ => EXIT_RUNTIME,
            })
        }
    }
}

async fn run() -> Result<(), Error> {
    let cfg = Arc::new(Config::load().await?);

    let backend = Arc::new(TelegramBackend::new());
    let guard = Arc::new(SessionGuard::new(cfg.clone(), backend.clone()));

    // Fail fast: no point serving dispatch requests without a session.
    guard.ensure_started().await?;

    let dispatcher = Arc::new(Dispatcher::new(
        guard.clone(),
        backend,
        ChatTarget(cfg.target_chat_id.clone()),
        cfg.retry_policy(),
    ));
    let status = Arc::new(StatusReporter::new(cfg.clone(), guard));

    frf_http::serve(&cfg.bind_addr, AppState { dispatcher, status })
        .await
        .map_err(|e| Error::External(format!("http server failed: {e}")))
}
