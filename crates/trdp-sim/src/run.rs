use std::sync::Arc;
use std::time::Duration;

use trdp_engine::SimEngine;
use trdp_runtime::{EndpointId, SimulatorConfig, Simulator, StackContext, StatusRow};

/// Subscriber log lines shown under each status table.
const LOG_TAIL: usize = 5;

pub struct RunConfig {
    pub duration: Option<Duration>,
    pub cycle: Duration,
    pub status_interval: Duration,
    pub payload: Option<Vec<u8>>,
    pub fixed_payload: Option<Vec<u8>>,
    pub json: bool,
}

pub async fn run(config: SimulatorConfig, run: RunConfig) -> anyhow::Result<()> {
    let stack = Arc::new(StackContext::new(Arc::new(SimEngine::default())));
    let sim = Simulator::start(&config, stack);
    if sim.sessions().is_empty() {
        anyhow::bail!("no interface could be opened");
    }

    for (index, endpoint) in sim.endpoints().iter().enumerate() {
        if !endpoint.direction().can_transmit() {
            continue;
        }
        let id = EndpointId(index);
        if let Some(payload) = &run.payload {
            sim.set_tx_payload(id, payload.clone())?;
        }
        if let Some(payload) = &run.fixed_payload {
            sim.set_fixed_payload(id, payload.clone())?;
        }
    }

    let started = sim.start_all(run.cycle);
    eprintln!(
        "trdp-sim v{}: {} session(s), {} endpoint(s), {} publisher(s)",
        env!("CARGO_PKG_VERSION"),
        sim.sessions().len(),
        sim.endpoints().len(),
        started
    );

    let deadline = async {
        match run.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut ticker = tokio::time::interval(run.status_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                eprintln!("\nCtrl+C received, shutting down...");
                break;
            }
            _ = &mut deadline => break,
            _ = ticker.tick() => report(&sim, run.json),
        }
    }

    sim.shutdown();
    report(&sim, run.json);
    Ok(())
}

fn report(sim: &Simulator, json: bool) {
    let rows = sim.status();
    if json {
        for row in &rows {
            match serde_json::to_string(row) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!("status serialization failed: {e}"),
            }
        }
        return;
    }

    println!();
    println!(
        "{:>3}  {:<10} {:>6}  {:<8}  {:<7} {:>8} {:>8}  {:<8} {:<8}",
        "id", "interface", "comId", "dir", "state", "tx", "rx", "last tx", "last rx"
    );
    for row in &rows {
        print_row(row);
    }

    let log = sim.subscriber_log();
    if !log.is_empty() {
        println!("-- subscriber log --");
        for entry in log.iter().skip(log.len().saturating_sub(LOG_TAIL)) {
            println!("{entry}");
        }
    }
}

fn print_row(row: &StatusRow) {
    let status = &row.endpoint;
    let time = |at: Option<chrono::DateTime<chrono::Utc>>| {
        at.map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "-".into())
    };
    let rx = status
        .receive_count
        .map(|n| n.to_string())
        .unwrap_or_else(|| "-".into());
    let state = if status.running { "running" } else { "stopped" };
    let fixed = status
        .fixed_payload_size
        .map(|n| format!(" fixed:{n}B"))
        .unwrap_or_default();
    println!(
        "{:>3}  {:<10} {:>6}  {:<8}  {:<7} {:>8} {:>8}  {:<8} {:<8}{}",
        row.id.0,
        row.interface,
        status.com_id,
        status.direction.to_string(),
        state,
        status.publish_count,
        rx,
        time(status.last_publish),
        time(status.last_receive),
        fixed
    );
}
