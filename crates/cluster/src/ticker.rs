//! Periodic re-evaluation of proposals past their deadline
//!
//! Votes trigger resolution on their own; this task covers proposals whose
//! deadline passes with no further vote.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use coopgrid_storage::RecordStore;

use crate::engine::ClusterEngine;

#[derive(Debug)]
enum TickerCommand {
    TickNow,
    Stop,
}

/// Handle to a running deadline ticker
pub struct DeadlineTicker {
    commands: mpsc::Sender<TickerCommand>,
    handle: JoinHandle<()>,
}

impl DeadlineTicker {
    /// Start ticking every `interval` on the current runtime
    pub fn spawn<R: RecordStore>(engine: Arc<ClusterEngine<R>>, interval: Duration) -> Self {
        let (commands, mut command_rx) = mpsc::channel(8);

        let handle = tokio::spawn(async move {
            info!("Deadline ticker started, every {:?}", interval);
            let mut timer = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        Self::tick(&engine).await;
                    }
                    cmd = command_rx.recv() => match cmd {
                        Some(TickerCommand::TickNow) => {
                            debug!("Received tick now command");
                            Self::tick(&engine).await;
                        }
                        Some(TickerCommand::Stop) | None => break,
                    }
                }
            }
            info!("Deadline ticker stopped");
        });

        Self { commands, handle }
    }

    async fn tick<R: RecordStore>(engine: &ClusterEngine<R>) {
        match engine.resolve_expired().await {
            Ok(resolved) if resolved.is_empty() => debug!("No proposals resolved this tick"),
            Ok(resolved) => {
                for proposal in &resolved {
                    info!(
                        "Proposal {} in cluster {} resolved {} at its deadline",
                        proposal.id, proposal.cluster_id, proposal.status
                    );
                }
            }
            Err(e) => error!("Failed to resolve expired proposals: {}", e),
        }
    }

    /// Run a tick without waiting for the timer
    pub async fn tick_now(&self) {
        if self.commands.send(TickerCommand::TickNow).await.is_err() {
            debug!("Deadline ticker is no longer running");
        }
    }

    /// Stop the ticker and wait for its task to finish
    pub async fn shutdown(self) {
        let _ = self.commands.send(TickerCommand::Stop).await;
        if let Err(e) = self.handle.await {
            error!("Deadline ticker task failed: {}", e);
        }
    }
}
