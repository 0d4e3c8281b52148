use lazy_static::lazy_static;
use prometheus::{core::Collector, IntCounter, IntGauge, Registry};
use tracing::error;

lazy_static! {
    static ref REGISTRY_SESSIONS_TOTAL: IntGauge =
        IntGauge::new("taskpilot_registry_sessions_total", "Connected worker sessions")
            .expect("static metric definition");
    static ref REGISTRY_REGISTRATIONS: IntCounter = IntCounter::new(
        "taskpilot_registry_registrations_total",
        "Worker registrations accepted",
    )
    .expect("static metric definition");
    static ref REGISTRY_UNREGISTRATIONS: IntCounter = IntCounter::new(
        "taskpilot_registry_unregistrations_total",
        "Worker sessions removed on disconnect",
    )
    .expect("static metric definition");
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register registry metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, REGISTRY_SESSIONS_TOTAL.clone());
    register(registry, REGISTRY_REGISTRATIONS.clone());
    register(registry, REGISTRY_UNREGISTRATIONS.clone());
}

pub fn set_session_count(count: usize) {
    REGISTRY_SESSIONS_TOTAL.set(count as i64);
}

pub fn record_registration() {
    REGISTRY_REGISTRATIONS.inc();
}

pub fn record_unregistration() {
    REGISTRY_UNREGISTRATIONS.inc();
}
