//! Optional metrics instrumentation for lode.
//!
//! When the `observe` feature is enabled, key operations emit counters,
//! histograms, and gauges via the [`metrics`] crate. A downstream
//! application must install a metrics recorder (e.g. `metrics-exporter-prometheus`)
//! to collect the data.
//!
//! When the feature is **not** enabled every function in this module is a
//! zero-cost no-op.

/// Record a writable transaction commit (counter + latency histogram).
///
/// - `lode.transaction.commits_total` – counter with `outcome` label (`ok` / `fail`)
/// - `lode.transaction.commit_duration_seconds` – histogram of commit latency
#[inline]
pub fn record_commit(duration: std::time::Duration, success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("lode.transaction.commits_total", "outcome" => outcome).increment(1);
        metrics::histogram!("lode.transaction.commit_duration_seconds")
            .record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (duration, success);
    }
}

/// Record how long a writer waited for the writable lane.
///
/// - `lode.lane.wait_duration_seconds` – histogram
#[inline]
pub fn record_lane_wait(duration: std::time::Duration) {
    #[cfg(feature = "observe")]
    {
        metrics::histogram!("lode.lane.wait_duration_seconds").record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = duration;
    }
}

/// Record a size-limit failure.
///
/// - `lode.size_limit.total` – counter
#[inline]
pub fn record_size_limit() {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("lode.size_limit.total").increment(1);
    }
}

/// Set the number of submitted but not yet completed background work items.
///
/// - `lode.scheduler.active` – gauge
#[inline]
pub fn set_active_work(active: usize) {
    #[cfg(feature = "observe")]
    {
        metrics::gauge!("lode.scheduler.active").set(active as f64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = active;
    }
}

/// Record a completed background work item.
///
/// - `lode.scheduler.work_items_total` – counter with `lane` (`read` / `write`)
///   and `outcome` (`ok` / `fail`) labels
#[inline]
pub fn record_work_item(readonly: bool, success: bool) {
    #[cfg(feature = "observe")]
    {
        let lane = if readonly { "read" } else { "write" };
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("lode.scheduler.work_items_total", "lane" => lane, "outcome" => outcome)
            .increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (readonly, success);
    }
}
