//! Periodic health battery against the ledger and the host process.
//!
//! Each run executes a fixed, ordered set of named checks. A check
//! whose probe errors is reported `warn` until its consecutive-failure
//! counter reaches the escalation threshold, then `fail`. Counters are
//! cleared only by an explicit reset, never by a single success, so a
//! flaky dependency stays visible until an operator acknowledges it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sysinfo::{Disks, System};

use crate::config::{LedgerConfig, MonitorSettings};
use crate::ledger::LedgerReader;

const MEMORY_WARN_BYTES: u64 = 1024 * 1024 * 1024;
const MEMORY_FAIL_BYTES: u64 = 2 * 1024 * 1024 * 1024;
const STORAGE_WARN_RATIO: f64 = 0.10;
const STORAGE_FAIL_RATIO: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
    pub message: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub overall: OverallHealth,
    pub checks: Vec<CheckResult>,
    pub checked_at: DateTime<Utc>,
}

/// Unhealthy iff any check fails; degraded iff none fail and at least
/// one warns; healthy otherwise.
pub fn aggregate(checks: &[CheckResult]) -> OverallHealth {
    if checks.iter().any(|c| c.status == CheckStatus::Fail) {
        OverallHealth::Unhealthy
    } else if checks.iter().any(|c| c.status == CheckStatus::Warn) {
        OverallHealth::Degraded
    } else {
        OverallHealth::Healthy
    }
}

pub struct HealthMonitor {
    reader: Arc<dyn LedgerReader>,
    program_id: String,
    escalation_threshold: u32,
    slot_sample_window: std::time::Duration,
    failure_counts: RwLock<HashMap<&'static str, u32>>,
    latest: RwLock<Option<HealthStatus>>,
    system: Mutex<System>,
}

impl HealthMonitor {
    pub fn new(
        reader: Arc<dyn LedgerReader>,
        ledger: &LedgerConfig,
        settings: &MonitorSettings,
    ) -> Self {
        Self {
            reader,
            program_id: ledger.program_id.clone(),
            escalation_threshold: settings.failure_escalation_threshold,
            slot_sample_window: std::time::Duration::from_millis(settings.slot_sample_window_ms),
            failure_counts: RwLock::new(HashMap::new()),
            latest: RwLock::new(None),
            system: Mutex::new(System::new()),
        }
    }

    /// Latest completed snapshot, if any run has finished.
    pub fn latest(&self) -> Option<HealthStatus> {
        self.latest.read().clone()
    }

    /// Clear all consecutive-failure counters.
    pub fn reset_counters(&self) {
        self.failure_counts.write().clear();
        tracing::info!("Health failure counters reset");
    }

    pub fn failure_count(&self, check: &str) -> u32 {
        self.failure_counts.read().get(check).copied().unwrap_or(0)
    }

    /// Run the full battery once and store the snapshot.
    pub async fn run(&self) -> HealthStatus {
        let mut checks = Vec::new();

        checks.push(self.run_check("rpc_connection", self.check_rpc()).await);
        checks.push(self.run_check("node_version", self.check_version()).await);
        checks.push(
            self.run_check("program_account", self.check_program_account())
                .await,
        );
        checks.push(self.run_check("cluster_peers", self.check_peers()).await);
        checks.push(
            self.run_check("slot_progression", self.check_slot_progression())
                .await,
        );
        checks.push(self.check_memory());
        checks.push(self.check_storage());

        let status = HealthStatus {
            overall: aggregate(&checks),
            checks,
            checked_at: Utc::now(),
        };

        if status.overall != OverallHealth::Healthy {
            tracing::warn!(
                overall = ?status.overall,
                failing = ?status
                    .checks
                    .iter()
                    .filter(|c| c.status != CheckStatus::Pass)
                    .map(|c| c.name)
                    .collect::<Vec<_>>(),
                "Health check degraded"
            );
        }

        *self.latest.write() = Some(status.clone());
        status
    }

    /// Time the probe and convert an error into warn/fail based on the
    /// consecutive-failure counter.
    async fn run_check(
        &self,
        name: &'static str,
        probe: impl std::future::Future<Output = Result<(CheckStatus, String)>>,
    ) -> CheckResult {
        let started = Instant::now();
        let (status, message) = match probe.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let count = {
                    let mut counts = self.failure_counts.write();
                    let count = counts.entry(name).or_insert(0);
                    *count += 1;
                    *count
                };
                let status = if count >= self.escalation_threshold {
                    CheckStatus::Fail
                } else {
                    CheckStatus::Warn
                };
                (status, format!("{} (consecutive failures: {})", e, count))
            }
        };

        CheckResult {
            name,
            status,
            message,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn check_rpc(&self) -> Result<(CheckStatus, String)> {
        let height = self.reader.current_height().await?;
        Ok((CheckStatus::Pass, format!("Ledger reachable at height {}", height)))
    }

    async fn check_version(&self) -> Result<(CheckStatus, String)> {
        let version = self.reader.node_version().await?;
        Ok((CheckStatus::Pass, format!("Node version {}", version)))
    }

    async fn check_program_account(&self) -> Result<(CheckStatus, String)> {
        if self.reader.account_exists(&self.program_id).await? {
            Ok((CheckStatus::Pass, "Program account present".to_string()))
        } else {
            Ok((
                CheckStatus::Fail,
                format!("Program account {} not found", self.program_id),
            ))
        }
    }

    async fn check_peers(&self) -> Result<(CheckStatus, String)> {
        let peers = self.reader.cluster_peer_count().await?;
        if peers == 0 {
            Ok((CheckStatus::Warn, "No cluster peers visible".to_string()))
        } else {
            Ok((CheckStatus::Pass, format!("{} cluster peers visible", peers)))
        }
    }

    async fn check_slot_progression(&self) -> Result<(CheckStatus, String)> {
        let first = self.reader.current_height().await?;
        tokio::time::sleep(self.slot_sample_window).await;
        let second = self.reader.current_height().await?;

        if second > first {
            Ok((
                CheckStatus::Pass,
                format!("Height advanced {} -> {}", first, second),
            ))
        } else {
            Ok((
                CheckStatus::Warn,
                format!("Height stalled at {}", second),
            ))
        }
    }

    fn check_memory(&self) -> CheckResult {
        let started = Instant::now();
        let (status, message) = {
            let mut system = self.system.lock();
            match sysinfo::get_current_pid() {
                Ok(pid) => {
                    system.refresh_process(pid);
                    match system.process(pid) {
                        Some(process) => {
                            let used = process.memory();
                            let mb = used / (1024 * 1024);
                            let status = if used > MEMORY_FAIL_BYTES {
                                CheckStatus::Fail
                            } else if used > MEMORY_WARN_BYTES {
                                CheckStatus::Warn
                            } else {
                                CheckStatus::Pass
                            };
                            (status, format!("Process memory {} MiB", mb))
                        }
                        None => (CheckStatus::Warn, "Process not visible".to_string()),
                    }
                }
                Err(e) => (CheckStatus::Warn, format!("Cannot resolve pid: {}", e)),
            }
        };

        CheckResult {
            name: "memory_usage",
            status,
            message,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn check_storage(&self) -> CheckResult {
        let started = Instant::now();
        let disks = Disks::new_with_refreshed_list();

        let (status, message) = disks
            .list()
            .iter()
            .map(|disk| {
                let total = disk.total_space();
                let available = disk.available_space();
                if total == 0 {
                    (CheckStatus::Pass, 1.0)
                } else {
                    let ratio = available as f64 / total as f64;
                    let status = if ratio < STORAGE_FAIL_RATIO {
                        CheckStatus::Fail
                    } else if ratio < STORAGE_WARN_RATIO {
                        CheckStatus::Warn
                    } else {
                        CheckStatus::Pass
                    };
                    (status, ratio)
                }
            })
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(status, ratio)| {
                (
                    status,
                    format!("Lowest disk headroom {:.1}%", ratio * 100.0),
                )
            })
            .unwrap_or((CheckStatus::Warn, "No disks visible".to_string()));

        CheckResult {
            name: "storage_headroom",
            status,
            message,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}
