use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref UPLOADS_TOTAL: Counter = counter(
        "tracker_uploads_total",
        "Hardware packets accepted from the tracker"
    );
    pub static ref INVALID_UPLOADS_TOTAL: Counter = counter(
        "tracker_invalid_uploads_total",
        "Hardware uploads rejected by validation"
    );
    pub static ref HEARTBEATS_TOTAL: Counter = counter(
        "tracker_heartbeats_total",
        "Receiver heartbeats recorded"
    );
    pub static ref SIMULATOR_TICKS_TOTAL: Counter = counter(
        "tracker_simulator_ticks_total",
        "Synthetic packets generated"
    );
    pub static ref PACKETS_PERSISTED_TOTAL: Counter = counter(
        "tracker_packets_persisted_total",
        "Packets appended to history"
    );
    pub static ref DB_FAILURES_TOTAL: Counter = counter(
        "tracker_db_failures_total",
        "Failed database writes"
    );
    pub static ref LOGIN_FAILURES_TOTAL: Counter = counter(
        "tracker_login_failures_total",
        "Rejected login attempts"
    );
}

fn counter(name: &str, help: &str) -> Counter {
    Counter::with_opts(Opts::new(name, help)).expect("metric options are valid")
}

pub fn init_metrics() -> Result<(), prometheus::Error> {
    for metric in [
        &*UPLOADS_TOTAL,
        &*INVALID_UPLOADS_TOTAL,
        &*HEARTBEATS_TOTAL,
        &*SIMULATOR_TICKS_TOTAL,
        &*PACKETS_PERSISTED_TOTAL,
        &*DB_FAILURES_TOTAL,
        &*LOGIN_FAILURES_TOTAL,
    ] {
        REGISTRY.register(Box::new(metric.clone()))?;
    }
    Ok(())
}

pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_registered_counters() {
        // Registration is process-wide; a second call from another test is harmless.
        let _ = init_metrics();
        UPLOADS_TOTAL.inc();
        let text = gather_metrics().unwrap();
        assert!(text.contains("tracker_uploads_total"));
    }
}
