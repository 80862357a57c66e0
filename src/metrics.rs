use tracing::trace;

// Lightweight metrics helpers emitted on the trace level; the Prometheus
// recorder in main covers the HTTP surface.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "charityshop.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn ingest_counters(charity_id: i64, processed: u64, saved: u64, skipped: u64) {
    trace!(
        target = "charityshop.metrics",
        charity_id = charity_id,
        processed = processed,
        saved = saved,
        skipped = skipped,
        "ingest_run_counters"
    );
}

pub fn sweep_counters(examined: u64, refreshed: u64, deleted: u64, errored: u64) {
    trace!(
        target = "charityshop.metrics",
        examined = examined,
        refreshed = refreshed,
        deleted = deleted,
        errored = errored,
        "sweep_counters"
    );
}
