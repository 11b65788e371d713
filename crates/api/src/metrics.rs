use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static PROCEDURE_CALLS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static IDENTITY_VERIFICATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn http_requests_total() -> &'static IntCounterVec {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new("tandem_api_http_requests_total", "API HTTP request count."),
                &["route", "method", "status"],
            )
            .expect("create tandem_api_http_requests_total"),
        )
    })
}

fn http_request_duration_seconds() -> &'static HistogramVec {
    HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "tandem_api_http_request_duration_seconds",
                    "API HTTP request duration in seconds.",
                )
                .buckets(vec![
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ]),
                &["route", "method", "outcome"],
            )
            .expect("create tandem_api_http_request_duration_seconds"),
        )
    })
}

fn procedure_calls_total() -> &'static IntCounterVec {
    PROCEDURE_CALLS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "tandem_api_procedure_calls_total",
                    "Procedure invocations by outcome.",
                ),
                &["procedure", "outcome"],
            )
            .expect("create tandem_api_procedure_calls_total"),
        )
    })
}

fn identity_verifications_total() -> &'static IntCounterVec {
    IDENTITY_VERIFICATIONS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "tandem_api_identity_verifications_total",
                    "Bearer credential resolutions by outcome.",
                ),
                &["outcome"],
            )
            .expect("create tandem_api_identity_verifications_total"),
        )
    })
}

pub fn observe_http_request(route: &str, method: &str, status: u16, duration: Duration) {
    let status_str = status.to_string();
    http_requests_total()
        .with_label_values(&[route, method, status_str.as_str()])
        .inc();

    let outcome = if (200..400).contains(&status) {
        "success"
    } else {
        "error"
    };
    http_request_duration_seconds()
        .with_label_values(&[route, method, outcome])
        .observe(duration.as_secs_f64());
}

/// `procedure` must be a registered name; unknown names are folded into
/// `unknown` so the label set stays bounded.
pub fn observe_procedure_call(procedure: &str, outcome: &str) {
    procedure_calls_total()
        .with_label_values(&[procedure, outcome])
        .inc();
}

pub fn observe_identity_verification(outcome: &str) {
    identity_verifications_total()
        .with_label_values(&[outcome])
        .inc();
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let _ = procedure_calls_total();
    let _ = identity_verifications_total();

    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}
