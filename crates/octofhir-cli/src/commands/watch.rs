use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use octofhir_realtime::config::loader::load_config;
use octofhir_realtime::{
    ConnectionStatus, RealtimeClient, RealtimeConfig, ResourceUpdateEvent, SubscriptionFilter,
    TokenProvider,
};
use tokio::sync::mpsc;
use tracing::info;

use crate::auth;
use crate::cli::{WatchArgs, WatchTarget};
use crate::observability::apply_logging_level;
use crate::output::{print_status, print_update};

/// Settings the watch session is built from.
pub struct WatchSettings {
    pub endpoint: Option<String>,
    pub config_path: Option<String>,
    /// Profile log level; when absent the config file's level applies.
    pub log_level: Option<String>,
}

pub fn filter_for(target: &WatchTarget) -> SubscriptionFilter {
    match target {
        WatchTarget::Patient { patient_id, types } => {
            SubscriptionFilter::patient(patient_id, types.iter().cloned())
        }
        WatchTarget::Room { name } => SubscriptionFilter::room(name),
        WatchTarget::All => SubscriptionFilter::All,
    }
}

fn realtime_config(settings: &WatchSettings) -> Result<RealtimeConfig> {
    let mut config = load_config(settings.config_path.as_deref())
        .context("Failed to load realtime settings")?;
    if let Some(endpoint) = &settings.endpoint {
        config.endpoint = endpoint.clone();
        config.validate()?;
    }
    Ok(config)
}

pub async fn watch(settings: WatchSettings, args: &WatchArgs, profile: &str) -> Result<()> {
    let config = realtime_config(&settings)?;
    if settings.log_level.is_none() {
        apply_logging_level(&config.logging.level);
    }

    let creds = auth::load_credentials(profile)?;
    let mut builder = RealtimeClient::builder(config.clone());
    if let Some(provider) = creds.as_ref().and_then(|c| c.token_provider()) {
        let provider: Arc<dyn TokenProvider> = Arc::new(provider);
        builder = builder.token_provider(provider);
    }
    let client = builder.build()?;

    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let _status_listener = client.on_connection_change(move |status: ConnectionStatus| {
        print_status(status);
        let _ = status_tx.send(status);
    });

    let json = args.json;
    let filter = filter_for(&args.target);
    let subscription = client.subscribe(filter.clone(), move |event: &ResourceUpdateEvent| {
        print_update(event, json);
    });
    info!(subscription_id = %subscription, ?filter, endpoint = %config.endpoint, "Watching");

    let token = creds.as_ref().and_then(|c| c.access_token()).map(str::to_string);
    let state = client.connect(token).await;
    eprintln!(
        "{} {} ({})",
        "Watching".cyan(),
        config.endpoint,
        state.as_str()
    );

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            status = status_rx.recv() => match status {
                Some(status) if status.is_terminal() => break Err(terminal_error(status, &config.endpoint)),
                Some(_) => {}
                None => break Ok(()),
            },
        }
    };

    client.unsubscribe(&subscription);
    client.disconnect().await;
    outcome
}

fn terminal_error(status: ConnectionStatus, endpoint: &str) -> anyhow::Error {
    match status {
        ConnectionStatus::AuthFailed => {
            anyhow::anyhow!("Authentication failed; run `octofhir-live login` again")
        }
        _ => anyhow::anyhow!("Gave up reconnecting to {endpoint}"),
    }
}
