//! Herald demo binary: dispatches a batch of messages through two simulated
//! backends and prints the final statuses.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinSet;

use herald_common::config::DispatchConfig;
use herald_common::types::Message;
use herald_dispatcher::{DispatchService, Sender, SimulatedSender};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald=info,herald_dispatcher=info".into()),
        )
        .json()
        .init();

    tracing::info!("Herald dispatcher starting...");

    // Load configuration
    let config = DispatchConfig::from_env()?;

    // Two flaky backends, tried in order
    let senders: Vec<Arc<dyn Sender>> = vec![
        Arc::new(SimulatedSender::new("provider-a", 0.5)),
        Arc::new(SimulatedSender::new("provider-b", 0.5)),
    ];
    let service = DispatchService::new(config, senders)?;
    service.start_sweeper();

    let messages: Vec<Message> = (1..=5)
        .map(|n| {
            Message::with_id(
                format!("demo-{n}"),
                "test@example.com",
                format!("Hello #{n}"),
                "World",
            )
        })
        .collect();

    let run = async {
        let mut sends = JoinSet::new();
        for message in messages.iter().cloned() {
            let service = service.clone();
            sends.spawn(async move { service.send(&message).await });
        }
        while let Some(result) = sends.join_next().await {
            result?;
        }

        // Resubmitting is deduplicated for delivered ids
        for message in &messages {
            service.send(message).await;
        }
        anyhow::Ok(())
    };

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        result = run => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Dispatch run exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    service.shutdown().await;

    let statuses: BTreeMap<String, _> = service.get_all_statuses().into_iter().collect();
    println!("{}", serde_json::to_string_pretty(&statuses)?);

    tracing::info!("Herald dispatcher stopped.");
    Ok(())
}
