use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use nvmf_initiator::attempt::{AttemptStore, FileVariableStore};
use nvmf_initiator::clock::MonotonicTicks;
use nvmf_initiator::command::IdentifyResult;
use nvmf_initiator::transport::LoopbackFabric;
use nvmf_initiator::{Initiator, InitiatorConfig};
use nvmf_shared::AttemptConfig;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Namespace size of simulated subsystems, in blocks
const LOOPBACK_NAMESPACE_BLOCKS: u64 = 2048;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("{}", Initiator::version());

    let config = InitiatorConfig::from_env();
    let mut vars = FileVariableStore::open(&config.store_dir)
        .with_context(|| format!("opening store {}", config.store_dir.display()))?;
    let mut attempts = AttemptStore::load_or_default(&vars);

    if attempts.is_empty() {
        attempts.add(AttemptConfig::new(
            "loopback",
            "127.0.0.1",
            4420,
            "nqn.2014-08.org.nvmexpress:loopback",
        ))?;
        attempts.save(&mut vars)?;
        info!("Seeded store with a loopback attempt");
    }

    // Simulation mode: every enabled attempt is served by the loopback fabric
    let fabric = LoopbackFabric::new();
    for attempt in attempts.enabled() {
        match format!("{}:{}", attempt.target_address, attempt.target_port).parse::<SocketAddr>() {
            Ok(target) => fabric.add_subsystem(
                target,
                attempt.subsystem_nqn.clone(),
                &[LOOPBACK_NAMESPACE_BLOCKS],
            ),
            Err(_) => debug!("Attempt {} has no literal address to simulate", attempt.name),
        }
    }

    let poll_interval = config.poll_interval;
    let mut initiator = Initiator::new(
        Arc::new(fabric),
        Arc::new(MonotonicTicks::new()),
        config,
        attempts,
    );

    for (name, result) in initiator.connect_attempts().await {
        match result {
            Ok(key) => info!("Attempt {} connected as {}", name, key),
            Err(e) => warn!("Attempt {} not connected: {}", name, e),
        }
    }

    let namespaces: Vec<_> = initiator.list_connect().collect();
    for entry in namespaces {
        match initiator.identify(&entry.session, entry.nsid) {
            Ok(IdentifyResult::Namespace(ns)) => info!(
                "{}: {} blocks of {} bytes",
                initiator.boot_description(&entry.session, entry.nsid)?,
                ns.size_blocks,
                ns.block_size()
            ),
            Ok(_) => {}
            Err(e) => warn!("Identify of {} nsid {} failed: {}", entry.session, entry.nsid, e),
        }
    }

    // Cooperative poll loop
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = initiator.tick();
                if report.skipped > 0 {
                    debug!("Keep-alive pass: {} sent, {} skipped", report.sent, report.skipped);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    initiator.shutdown();
    Ok(())
}
