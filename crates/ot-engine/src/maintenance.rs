/// Background upkeep: idle document eviction and history compaction
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::{Compaction, DocumentId, OtEngine};

/// What one maintenance sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub evicted: Vec<DocumentId>,
    pub compacted: Vec<DocumentId>,

    /// Compaction deferred because an attached user lags behind
    pub skipped: Vec<DocumentId>,
}

impl MaintenanceReport {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty() && self.compacted.is_empty() && self.skipped.is_empty()
    }
}

/// Owns the periodic maintenance task
#[derive(Debug)]
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Stop the task and wait for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            error!("maintenance task failed: {}", err);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl OtEngine {
    pub fn run_maintenance(&self) -> MaintenanceReport {
        self.run_maintenance_at(Utc::now())
    }

    /// One sweep, judging idleness against `now`
    pub fn run_maintenance_at(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let idle_timeout = self.config().idle_timeout();
        let ceiling = self.config().history_ceiling;
        let window = self.config().history_window;
        let mut report = MaintenanceReport::default();

        for id in self.store().ids() {
            if self
                .store()
                .remove_if(&id, |document| document.is_idle(now, idle_timeout))
            {
                info!(document = %id, "evicted idle document");
                report.evicted.push(id);
                continue;
            }

            let Some(document) = self.store().get(&id) else {
                continue;
            };
            let outcome = document.lock().compact(ceiling, window);
            match outcome {
                Ok(Compaction::Compacted { dropped }) => {
                    info!(document = %id, dropped, "compacted history");
                    report.compacted.push(id);
                }
                Ok(Compaction::Skipped { .. }) => report.skipped.push(id),
                Ok(Compaction::Untouched) => {}
                Err(err) => error!(document = %id, "history compaction failed: {}", err),
            }
        }

        report
    }

    /// Spawn the periodic sweep on the current tokio runtime
    pub fn start_maintenance(&self) -> MaintenanceHandle {
        let engine = self.clone();
        let period = self.config().maintenance_interval();
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = engine.run_maintenance();
                        if !report.is_empty() {
                            debug!(
                                evicted = report.evicted.len(),
                                compacted = report.compacted.len(),
                                skipped = report.skipped.len(),
                                "maintenance sweep"
                            );
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("maintenance task stopped");
        });

        MaintenanceHandle { shutdown, task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EngineConfig, Operation, UserId};
    use chrono::Duration;

    fn engine(ceiling: usize, window: usize) -> OtEngine {
        OtEngine::new(EngineConfig {
            history_ceiling: ceiling,
            history_window: window,
            ..EngineConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_idle_documents_are_evicted() {
        let engine = engine(1000, 500);
        let idle = DocumentId::from("idle");
        let busy = DocumentId::from("busy");
        engine.join_document(&idle, &UserId::from("alice")).unwrap();
        engine.leave_document(&idle, &UserId::from("alice"));
        engine.join_document(&busy, &UserId::from("bob")).unwrap();

        // Not idle long enough yet
        assert!(engine.run_maintenance().is_empty());

        let report = engine.run_maintenance_at(Utc::now() + Duration::hours(2));
        assert_eq!(report.evicted, vec![idle.clone()]);
        assert!(engine.get_document(&idle).is_none());
        assert!(engine.get_document(&busy).is_some());
    }

    #[test]
    fn test_compaction_sweep() {
        let engine = engine(10, 4);
        let id = DocumentId::from("doc");
        engine.join_document(&id, &UserId::from("alice")).unwrap();

        for i in 0..11 {
            let op = Operation::text_insert("alice", i, "x").with_revision(i as u64);
            engine.apply_operation(&id, op).unwrap();
        }

        let report = engine.run_maintenance();
        assert_eq!(report.compacted, vec![id.clone()]);
        assert!(engine.get_operations_since(&id, 6).is_err());
        assert_eq!(engine.get_operations_since(&id, 7).unwrap().len(), 4);
    }
}
