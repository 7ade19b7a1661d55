//! Gadget Resolver: maps Kubernetes container identities to kernel identifiers
//! and keeps tracing gadgets informed about container lifecycle events.
//!
//! This library provides the [`resolver::Resolver`] contract gadgets use to look
//! up mount namespace inodes and PIDs, the subscription mechanism that notifies
//! them when containers come and go, and the per-gadget trace registry
//! ([`gadgets::BaseFactory`]) with its optional capabilities.
use std::sync::Arc;

use error::ResultOkLogExt;
use pubsub::{FuncNotify, PubSubEvent, SubscriptionKey};
use resolver::{ContainerResolver, Resolver};

pub mod config;
pub mod container;
pub mod error;
pub mod fsutil;
pub mod gadgets;
pub mod pubsub;
pub mod resolver;

fn log_container_event(event: PubSubEvent) {
    let c = &event.container;
    log::info!(
        target: "container events",
        "{:?} {}/{}/{} (id={}, mntns={}, pid={})",
        event.event_type,
        c.namespace,
        c.podname,
        c.name,
        c.id,
        c.mntns,
        c.pid
    );
}

/// Runs the resolver service.
///
/// Loads the configuration from the environment, preloads the configured
/// container definitions, logs every container event and every line published
/// to the configured tracer stream, and returns on Ctrl-C.
///
/// # Errors
///
/// Possible errors include:
/// - Invalid configuration values (see [`config::Config::from_env`]).
/// - An unreadable or malformed container definitions file.
/// - Failure to listen for the shutdown signal.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::Config::from_env()?;
    let resolver = Arc::new(ContainerResolver::new(
        tokio::runtime::Handle::current(),
        config.event_buffer,
    ));

    if let Some(path) = &config.containers_file {
        let containers = fsutil::load_container_definitions(path)?;
        log::info!(
            "Preloading {} containers from `{}`",
            containers.len(),
            path.display()
        );
        for container in containers {
            let id = container.id.clone();
            resolver
                .collection()
                .add_container(container)
                .ok_log_context(&format!("skipping container `{id}`"));
        }
    }

    let key = SubscriptionKey::unique();
    let callback: FuncNotify = Arc::new(log_container_event);
    let existing = resolver.subscribe(key.clone(), container::ContainerSelector::all(), callback);
    log::info!("Tracking {} existing containers", existing.len());

    let mut lines = resolver.streams().add_stream(config.tracer_id.clone());
    let reader = {
        let tracer_id = config.tracer_id.clone();
        tokio::spawn(async move {
            while let Some(line) = lines.recv().await {
                log::info!(target: "trace events", "{}: {}", tracer_id, line);
            }
        })
    };
    log::debug!("Listening for events of tracer `{}`", config.tracer_id);

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");

    resolver.unsubscribe(&key);
    resolver.streams().remove_stream(&config.tracer_id);
    reader.await?;

    Ok(())
}
