// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Installed-printer discovery with a TTL cache.
//
// Enumerating printers means asking the spooler, which can take hundreds of
// milliseconds. Clients poll `get_printers` and the health endpoint often, so
// the last result is kept for a short TTL. Refreshes are serialised: when
// many callers find the snapshot stale at once, only the first one enumerates
// and the rest reuse its result.
//
// When enumeration fails the previous snapshot (if any) is still served,
// together with the error, so one flaky spooler call does not blank the
// printer list in every POS terminal.

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use tillprint_core::error::{Result, TillprintError};
use tillprint_core::types::{PrinterClass, PrinterRecord, PrinterStatus, PrinterSummary};

/// Default snapshot lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Name fragments that identify receipt printers.
const THERMAL_KEYWORDS: &[&str] = &[
    "thermal", "pos", "58mm", "80mm", "receipt", "tm-", "pt-210", "gp-58", "ec-pm",
];

/// Name fragments that identify virtual (non-paper) printers.
const VIRTUAL_KEYWORDS: &[&str] = &["pdf", "xps", "fax", "file"];

/// Source of the installed printer list.
///
/// Called from the blocking thread pool, so implementations may block.
pub trait PrinterEnumerator: Send + Sync + 'static {
    fn enumerate(&self) -> Result<Vec<PrinterRecord>>;
}

/// A printer list handed out by the cache.
#[derive(Debug)]
pub struct Snapshot {
    pub printers: Vec<PrinterRecord>,
    /// Set when the list is stale because the latest refresh failed.
    pub refresh_error: Option<TillprintError>,
}

#[derive(Default)]
struct CacheState {
    printers: Option<Vec<PrinterRecord>>,
    refreshed_at: Option<Instant>,
}

impl CacheState {
    fn fresh(&self, ttl: Duration) -> Option<&Vec<PrinterRecord>> {
        match (&self.printers, self.refreshed_at) {
            (Some(printers), Some(at)) if at.elapsed() < ttl => Some(printers),
            _ => None,
        }
    }
}

pub struct DiscoveryCache {
    enumerator: Arc<dyn PrinterEnumerator>,
    ttl: Duration,
    state: RwLock<CacheState>,
}

impl DiscoveryCache {
    pub fn new(enumerator: Arc<dyn PrinterEnumerator>, ttl: Duration) -> Self {
        Self {
            enumerator,
            ttl,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Current printer list, refreshing it when stale or when forced.
    ///
    /// Fails only when enumeration fails and nothing was cached before.
    #[instrument(skip(self))]
    pub async fn get(&self, force_refresh: bool) -> Result<Snapshot> {
        if !force_refresh {
            let state = self.state.read().await;
            if let Some(printers) = state.fresh(self.ttl) {
                return Ok(Snapshot {
                    printers: printers.clone(),
                    refresh_error: None,
                });
            }
        }

        let mut state = self.state.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if !force_refresh {
            if let Some(printers) = state.fresh(self.ttl) {
                return Ok(Snapshot {
                    printers: printers.clone(),
                    refresh_error: None,
                });
            }
        }

        let enumerator = Arc::clone(&self.enumerator);
        let outcome = tokio::task::spawn_blocking(move || enumerator.enumerate())
            .await
            .map_err(|e| TillprintError::Discovery(format!("enumeration task failed: {e}")))
            .and_then(|result| result);

        match outcome {
            Ok(printers) => {
                debug!(count = printers.len(), "Printer snapshot refreshed");
                state.printers = Some(printers.clone());
                state.refreshed_at = Some(Instant::now());
                Ok(Snapshot {
                    printers,
                    refresh_error: None,
                })
            }
            Err(err) => match &state.printers {
                Some(stale) => {
                    warn!(error = %err, count = stale.len(), "Printer refresh failed, serving stale snapshot");
                    Ok(Snapshot {
                        printers: stale.clone(),
                        refresh_error: Some(err),
                    })
                }
                None => {
                    warn!(error = %err, "Printer enumeration failed with no cached snapshot");
                    Err(err)
                }
            },
        }
    }

    /// Overview for health checks. `error` when no list can be produced.
    pub async fn summary(&self) -> PrinterSummary {
        match self.get(false).await {
            Ok(snapshot) => PrinterSummary::from_printers(&snapshot.printers),
            Err(_) => PrinterSummary::unavailable(),
        }
    }

    /// Force a refresh and log what was found. Run once at startup.
    pub async fn log_startup_diagnostics(&self) {
        let snapshot = match self.get(true).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "Could not enumerate printers at startup");
                return;
            }
        };

        let printers = &snapshot.printers;
        let thermal: Vec<_> = printers.iter().filter(|p| p.is_thermal()).collect();
        info!(detected = printers.len(), thermal = thermal.len(), "Installed printers");
        if thermal.is_empty() {
            warn!("No thermal printers detected");
        }
        for p in printers {
            info!(
                name = %p.name,
                port = %p.port,
                status = p.status.as_str(),
                default = p.is_default,
                thermal = p.is_thermal(),
                is_virtual = p.is_virtual,
                "Printer"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// CUPS enumeration
// ---------------------------------------------------------------------------

/// Lists printers through the CUPS `lpstat` command.
#[derive(Debug, Clone, Default)]
pub struct LpstatEnumerator;

impl PrinterEnumerator for LpstatEnumerator {
    fn enumerate(&self) -> Result<Vec<PrinterRecord>> {
        let output = Command::new("lpstat")
            .args(["-p", "-d", "-v"])
            .env("LC_ALL", "C")
            .output()
            .map_err(|e| TillprintError::Discovery(format!("cannot run lpstat: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            // lpstat exits non-zero when no printers are installed; that is
            // an empty list, not a failure.
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stdout.trim().is_empty() && stderr.contains("No destinations added") {
                return Ok(Vec::new());
            }
            return Err(TillprintError::Discovery(format!(
                "lpstat exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(parse_lpstat(&stdout))
    }
}

/// Parse the combined output of `lpstat -p -d -v`.
pub fn parse_lpstat(output: &str) -> Vec<PrinterRecord> {
    let mut printers: Vec<PrinterRecord> = Vec::new();
    let mut default_name: Option<String> = None;

    for line in output.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("printer ") {
            let Some((name, state)) = rest.split_once(' ') else {
                continue;
            };
            let status = if state.contains("disabled") {
                PrinterStatus::Paused
            } else if state.contains("now printing") {
                PrinterStatus::Printing
            } else if state.contains("is idle") {
                PrinterStatus::Ready
            } else {
                PrinterStatus::Unknown
            };
            printers.push(PrinterRecord {
                name: name.to_string(),
                port: String::new(),
                driver: "cups".into(),
                status,
                is_default: false,
                is_virtual: false,
                class: PrinterClass::Other,
            });
        } else if let Some(name) = line.strip_prefix("system default destination: ") {
            default_name = Some(name.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("device for ") {
            if let Some((name, uri)) = rest.split_once(": ") {
                if let Some(p) = printers.iter_mut().find(|p| p.name == name) {
                    p.port = uri.trim().to_string();
                }
            }
        }
    }

    for p in &mut printers {
        p.is_default = default_name.as_deref() == Some(p.name.as_str());
        p.is_virtual = is_virtual(&p.name, &p.port);
        p.class = classify(&p.name);
        // A queue with no device URI and no state line cannot be reached.
        if p.port.is_empty() && p.status == PrinterStatus::Unknown {
            p.status = PrinterStatus::Offline;
        }
    }
    printers
}

fn classify(name: &str) -> PrinterClass {
    let lower = name.to_lowercase();
    if THERMAL_KEYWORDS.iter().any(|k| lower.contains(k)) {
        PrinterClass::Thermal
    } else {
        PrinterClass::Other
    }
}

fn is_virtual(name: &str, port: &str) -> bool {
    let lower = name.to_lowercase();
    VIRTUAL_KEYWORDS.iter().any(|k| lower.contains(k))
        || port.starts_with("file:")
        || port.starts_with("cups-pdf:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn record(name: &str, class: PrinterClass) -> PrinterRecord {
        PrinterRecord {
            name: name.into(),
            port: "usb://x".into(),
            driver: "test".into(),
            status: PrinterStatus::Ready,
            is_default: false,
            is_virtual: false,
            class,
        }
    }

    /// Counts calls; fails while `failing` is set.
    struct FakeEnumerator {
        calls: AtomicUsize,
        failing: AtomicBool,
        delay: Duration,
    }

    impl FakeEnumerator {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl PrinterEnumerator for FakeEnumerator {
        fn enumerate(&self) -> Result<Vec<PrinterRecord>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(TillprintError::Discovery("spooler unavailable".into()));
            }
            Ok(vec![record(&format!("PT-210 #{n}"), PrinterClass::Thermal)])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_is_reused_within_ttl() {
        let fake = FakeEnumerator::new(Duration::ZERO);
        let cache = DiscoveryCache::new(fake.clone(), Duration::from_secs(30));

        let first = cache.get(false).await.expect("first");
        tokio::time::advance(Duration::from_secs(29)).await;
        let second = cache.get(false).await.expect("second");
        assert_eq!(fake.calls(), 1);
        assert_eq!(first.printers, second.printers);

        tokio::time::advance(Duration::from_secs(2)).await;
        let third = cache.get(false).await.expect("third");
        assert_eq!(fake.calls(), 2);
        assert_eq!(third.printers[0].name, "PT-210 #2");
    }

    #[tokio::test(start_paused = true)]
    async fn force_refresh_bypasses_ttl() {
        let fake = FakeEnumerator::new(Duration::ZERO);
        let cache = DiscoveryCache::new(fake.clone(), DEFAULT_TTL);
        cache.get(false).await.expect("first");
        cache.get(true).await.expect("forced");
        assert_eq!(fake.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_snapshot_served_on_error() {
        let fake = FakeEnumerator::new(Duration::ZERO);
        let cache = DiscoveryCache::new(fake.clone(), DEFAULT_TTL);
        cache.get(false).await.expect("prime");

        fake.failing.store(true, Ordering::SeqCst);
        let snapshot = cache.get(true).await.expect("stale");
        assert_eq!(snapshot.printers[0].name, "PT-210 #1");
        assert!(matches!(snapshot.refresh_error, Some(TillprintError::Discovery(_))));
    }

    #[tokio::test]
    async fn error_without_snapshot() {
        let fake = FakeEnumerator::new(Duration::ZERO);
        fake.failing.store(true, Ordering::SeqCst);
        let cache = DiscoveryCache::new(fake.clone(), DEFAULT_TTL);
        assert!(cache.get(false).await.is_err());
        assert_eq!(cache.summary().await, PrinterSummary::unavailable());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_refresh() {
        let fake = FakeEnumerator::new(Duration::from_millis(100));
        let cache = Arc::new(DiscoveryCache::new(fake.clone(), DEFAULT_TTL));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get(false).await.map(|s| s.printers.len()) })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.expect("join").expect("get"), 1);
        }
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn summary_reflects_snapshot() {
        let fake = FakeEnumerator::new(Duration::ZERO);
        let cache = DiscoveryCache::new(fake, DEFAULT_TTL);
        let summary = cache.summary().await;
        assert_eq!(summary.status, tillprint_core::types::SummaryStatus::Ok);
        assert_eq!(summary.thermal_count, 1);
    }

    const LPSTAT: &str = "\
printer EC-PM-80250 is idle.  enabled since Mon 01 Jan 2026 09:00:00
printer Office_Laser disabled since Mon 01 Jan 2026 09:00:00 -
\treason unknown
printer PDF now printing PDF-12.  enabled since Mon 01 Jan 2026 09:00:00
system default destination: EC-PM-80250
device for EC-PM-80250: usb://EPSON/TM-T20
device for Office_Laser: socket://10.0.0.9:9100
device for PDF: cups-pdf:/
";

    #[test]
    fn lpstat_output_is_parsed() {
        let printers = parse_lpstat(LPSTAT);
        assert_eq!(printers.len(), 3);

        let pos = &printers[0];
        assert_eq!(pos.name, "EC-PM-80250");
        assert_eq!(pos.status, PrinterStatus::Ready);
        assert!(pos.is_default);
        assert!(pos.is_thermal());
        assert_eq!(pos.port, "usb://EPSON/TM-T20");

        let office = &printers[1];
        assert_eq!(office.status, PrinterStatus::Paused);
        assert_eq!(office.class, PrinterClass::Other);
        assert!(!office.is_virtual);

        let pdf = &printers[2];
        assert_eq!(pdf.status, PrinterStatus::Printing);
        assert!(pdf.is_virtual);

        let summary = PrinterSummary::from_printers(&printers);
        assert_eq!(summary.default_name.as_deref(), Some("EC-PM-80250"));
        assert_eq!(summary.thermal_count, 1);
    }
}
