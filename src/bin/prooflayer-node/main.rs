//! prooflayer-node CLI entry point.

mod cli;

use clap::Parser;
use cli::{Cli, Command, LogFormat, VerifyArgs};
use prooflayer_node::backend::HttpBackendFactory;
use prooflayer_node::clock::{Clock, SystemClock};
use prooflayer_node::limits::InMemoryRateLimiter;
use prooflayer_node::store::{InMemoryCredentialStore, InMemoryIdentityStore, InMemoryResultSink};
use prooflayer_node::vault::{CredentialVault, PlatformCredentials};
use prooflayer_node::{BackendKind, Caller, CredentialCheck, Error, ServiceConfig, Verifier, VerifyCall};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

/// Everything a one-shot run needs around the verifier.
struct LocalService {
    verifier: Verifier,
    credential_ids: Vec<(BackendKind, String)>,
    session_token: String,
    caller_id: String,
}

#[tokio::main]
async fn main() -> color_eyre::Result<ExitCode> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing. Stdout carries results, so logs go to stderr.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let fmt_layer = match cli.log_format {
        LogFormat::Text => fmt::layer().with_writer(std::io::stderr).boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    };
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();

    info!("prooflayer-node v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.load_config()?;

    match &cli.command {
        Command::InitConfig { path } => {
            let path = path.clone().unwrap_or_else(ServiceConfig::default_path);
            config.to_file(&path)?;
            info!("Wrote default configuration to {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify(args) => run_verify(&config, args).await,
        Command::TestCredential { backend } => run_test_credential(&config, backend).await,
    }
}

async fn run_verify(config: &ServiceConfig, args: &VerifyArgs) -> color_eyre::Result<ExitCode> {
    // Validate before anything else; malformed input never reaches the pipeline
    let request = match args.to_inbound()?.validate(None) {
        Ok(request) => request,
        Err(e) => return Ok(print_error(&e)),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let limiter = Arc::new(InMemoryRateLimiter::new(
        config.rate_limits.clone(),
        Arc::clone(&clock),
    ));
    let cleanup = Arc::clone(&limiter).spawn_cleanup(
        Duration::from_secs(config.rate_cleanup_interval_secs.max(1)),
        shutdown_rx,
    );

    let service = local_service(config, clock, limiter)?;
    let outcome = service
        .verifier
        .verify(VerifyCall {
            authorization: Some(format!("Bearer {}", service.session_token)),
            request,
        })
        .await;

    let code = match outcome {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            ExitCode::SUCCESS
        }
        Err(e) => print_error(&e),
    };

    service.verifier.flush_usage().await;
    let _ = shutdown_tx.send(true);
    if let Err(e) = cleanup.await {
        warn!("Rate window cleanup task failed: {e}");
    }
    Ok(code)
}

async fn run_test_credential(
    config: &ServiceConfig,
    backend: &str,
) -> color_eyre::Result<ExitCode> {
    let backend: BackendKind = backend.parse()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let limiter = Arc::new(InMemoryRateLimiter::new(
        config.rate_limits.clone(),
        Arc::clone(&clock),
    ));
    let service = local_service(config, clock, limiter)?;

    let Some((_, credential_id)) = service
        .credential_ids
        .iter()
        .find(|(kind, _)| *kind == backend)
    else {
        return Ok(print_error(&Error::NotFound(format!(
            "no {backend} credential configured for {}",
            service.caller_id
        ))));
    };

    match service
        .verifier
        .test_credential(&service.caller_id, credential_id)
        .await
    {
        Ok(CredentialCheck::Valid) => {
            println!("{}", serde_json::json!({ "valid": true, "backend": backend }));
            Ok(ExitCode::SUCCESS)
        }
        Ok(CredentialCheck::Rejected { reason }) => {
            println!(
                "{}",
                serde_json::json!({ "valid": false, "backend": backend, "reason": reason })
            );
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Ok(print_error(&e)),
    }
}

/// Wire the pipeline to in-memory stores holding the configured local caller.
fn local_service(
    config: &ServiceConfig,
    clock: Arc<dyn Clock>,
    limiter: Arc<InMemoryRateLimiter>,
) -> color_eyre::Result<LocalService> {
    let local = &config.local_caller;
    let identity = Arc::new(InMemoryIdentityStore::new());
    let credentials = Arc::new(InMemoryCredentialStore::new());
    let sink = Arc::new(InMemoryResultSink::new());

    let mut caller = Caller::new(local.id.clone(), local.plan);
    caller.byok_enabled = !local.byok_credentials.is_empty();
    identity.upsert_caller(caller);

    let session_token = Uuid::new_v4().to_string();
    identity.add_session(&session_token, &local.id);

    let credential_ids = local
        .byok_credentials
        .iter()
        .map(|sealed| {
            let id = credentials.insert(&local.id, sealed.backend, &sealed.envelope);
            (sealed.backend, id)
        })
        .collect();

    let platform = PlatformCredentials::from_env(&config.platform_credentials_env);
    let backends = Arc::new(HttpBackendFactory::new(config.backends.clone())?);

    let mut builder = Verifier::builder(identity, credentials, backends, sink)
        .config(config)
        .platform_credentials(platform)
        .rate_limiter(limiter)
        .clock(clock);

    match CredentialVault::from_env(&config.vault.master_key_env) {
        Ok(vault) => builder = builder.vault(Arc::new(vault)),
        Err(e) if local.byok_credentials.is_empty() => {
            info!("Running without a credential vault: {e}");
        }
        Err(e) => warn!("BYOK credentials configured but the vault is unavailable: {e}"),
    }

    Ok(LocalService {
        verifier: builder.build(),
        credential_ids,
        session_token,
        caller_id: local.id.clone(),
    })
}

fn print_error(e: &Error) -> ExitCode {
    match serde_json::to_string_pretty(&e.to_body()) {
        Ok(body) => println!("{body}"),
        Err(_) => println!("{}", e.public_message()),
    }
    ExitCode::FAILURE
}
