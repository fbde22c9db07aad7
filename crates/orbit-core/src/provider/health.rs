//! Provider health tracking
//!
//! State machine: `Unknown -> {Healthy, Degraded, Unhealthy}` driven by
//! executable discoverability, transport liveness, and probe latency.
//! Three or more consecutive probe failures force `Unhealthy`; a single
//! success resets the counter.

use crate::types::{HealthReport, HealthState};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Consecutive probe failures that force `Unhealthy`
pub const UNHEALTHY_THRESHOLD: u32 = 3;

/// Probe round-trips slower than this downgrade to `Degraded`
pub const DEGRADED_LATENCY: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone)]
struct HealthInner {
    state: HealthState,
    message: String,
    consecutive_failures: u32,
    last_latency: Option<Duration>,
}

/// Tracks one adapter's probe history
pub struct HealthMonitor {
    inner: Mutex<HealthInner>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HealthInner {
                state: HealthState::Unknown,
                message: "no probe has run yet".to_string(),
                consecutive_failures: 0,
                last_latency: None,
            }),
        }
    }

    /// Record a successful probe; resets the failure counter
    pub fn record_success(&self, latency: Duration) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.last_latency = Some(latency);
        if latency > DEGRADED_LATENCY {
            inner.state = HealthState::Degraded;
            inner.message = format!("probe succeeded but took {:?}", latency);
        } else {
            inner.state = HealthState::Healthy;
            inner.message = "probe succeeded".to_string();
        }
    }

    /// Record a failed probe; three in a row force `Unhealthy`
    pub fn record_failure(&self, reason: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        inner.message = reason.into();
        inner.state = if inner.consecutive_failures >= UNHEALTHY_THRESHOLD {
            HealthState::Unhealthy
        } else {
            HealthState::Degraded
        };
    }

    /// Force a terminal unhealthy state (dead transport, missing binary)
    pub fn mark_unhealthy(&self, reason: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.max(UNHEALTHY_THRESHOLD);
        inner.state = HealthState::Unhealthy;
        inner.message = reason.into();
    }

    pub fn state(&self) -> HealthState {
        self.inner.lock().state
    }

    /// Snapshot as a report with diagnostic details
    pub fn report(&self) -> HealthReport {
        let inner = self.inner.lock();
        let mut report = HealthReport::new(inner.state, inner.message.clone())
            .with_detail("consecutiveFailures", inner.consecutive_failures);
        if let Some(latency) = inner.last_latency {
            report = report.with_detail("lastProbeMs", latency.as_millis() as u64);
        }
        report
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Locate a provider executable.
///
/// An explicit path is checked directly; a bare name is resolved against
/// `PATH` and then against the usual per-user install locations.
pub fn find_executable(command: &str) -> Option<PathBuf> {
    let direct = Path::new(command);
    if command.contains(std::path::MAIN_SEPARATOR) {
        return direct.exists().then(|| direct.to_path_buf());
    }

    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            let candidate = dir.join(command);
            if candidate.is_file() {
                debug!("Found {} at {:?}", command, candidate);
                return Some(candidate);
            }
        }
    }

    // Version-suffixed install trees (nvm-style) need a glob.
    static FALLBACK_DIRS: Lazy<Vec<String>> = Lazy::new(|| {
        let mut dirs_list = vec![
            "/usr/local/bin".to_string(),
            "/opt/homebrew/bin".to_string(),
        ];
        if let Some(home) = dirs::home_dir() {
            dirs_list.push(format!("{}/.local/bin", home.display()));
            dirs_list.push(format!("{}/.orbit/providers/*/bin", home.display()));
        }
        dirs_list
    });

    for dir in FALLBACK_DIRS.iter() {
        let pattern = format!("{}/{}", dir, command);
        if let Ok(paths) = glob::glob(&pattern) {
            for entry in paths.flatten() {
                if entry.is_file() {
                    debug!("Found {} at {:?}", command, entry);
                    return Some(entry);
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_unknown() {
        let monitor = HealthMonitor::new();
        assert_eq!(monitor.state(), HealthState::Unknown);
    }

    #[test]
    fn test_three_failures_force_unhealthy() {
        let monitor = HealthMonitor::new();

        monitor.record_failure("probe timeout");
        assert_eq!(monitor.state(), HealthState::Degraded);
        monitor.record_failure("probe timeout");
        assert_eq!(monitor.state(), HealthState::Degraded);
        monitor.record_failure("probe timeout");
        assert_eq!(monitor.state(), HealthState::Unhealthy);

        let report = monitor.report();
        assert_eq!(report.details["consecutiveFailures"], serde_json::json!(3));
    }

    #[test]
    fn test_single_success_resets_counter() {
        let monitor = HealthMonitor::new();
        monitor.record_failure("x");
        monitor.record_failure("x");

        monitor.record_success(Duration::from_millis(40));
        assert_eq!(monitor.state(), HealthState::Healthy);
        assert_eq!(
            monitor.report().details["consecutiveFailures"],
            serde_json::json!(0)
        );

        // Counter restarts from zero after the reset.
        monitor.record_failure("x");
        assert_eq!(monitor.state(), HealthState::Degraded);
    }

    #[test]
    fn test_slow_probe_degrades() {
        let monitor = HealthMonitor::new();
        monitor.record_success(DEGRADED_LATENCY + Duration::from_millis(1));
        assert_eq!(monitor.state(), HealthState::Degraded);
    }

    #[test]
    fn test_find_executable_explicit_path() {
        assert!(find_executable("/definitely/not/here/orbit-agent").is_none());

        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().to_string();
        assert_eq!(find_executable(&path).unwrap(), file.path());
    }
}
