//! Prometheus metrics for messaging

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_gauge_vec, CounterVec, GaugeVec};

/// Messaging metrics, labelled by provider type
pub struct MessagingMetrics {
    /// Messages published counter
    pub messages_published: CounterVec,

    /// Messages delivered to handlers
    pub messages_received: CounterVec,

    /// Message publish failures
    pub publish_failures: CounterVec,

    /// Live provider connections
    pub active_connections: GaugeVec,
}

lazy_static! {
    pub static ref MESSAGING_METRICS: MessagingMetrics = MessagingMetrics {
        messages_published: register_counter_vec!(
            "broker_ui_messages_published_total",
            "Total number of messages published",
            &["provider"]
        )
        .unwrap(),

        messages_received: register_counter_vec!(
            "broker_ui_messages_received_total",
            "Total number of messages delivered to subscription handlers",
            &["provider"]
        )
        .unwrap(),

        publish_failures: register_counter_vec!(
            "broker_ui_publish_failures_total",
            "Total number of publish failures",
            &["provider"]
        )
        .unwrap(),

        active_connections: register_gauge_vec!(
            "broker_ui_active_connections",
            "Number of live provider connections",
            &["provider"]
        )
        .unwrap(),
    };
}

/// Initialize messaging metrics
pub fn init_messaging_metrics() {
    lazy_static::initialize(&MESSAGING_METRICS);
}

/// Record the outcome of one publish
pub(crate) fn record_publish<T, E>(provider: &str, result: &Result<T, E>) {
    let counter = if result.is_ok() {
        &MESSAGING_METRICS.messages_published
    } else {
        &MESSAGING_METRICS.publish_failures
    };
    counter.with_label_values(&[provider]).inc();
}

pub(crate) fn record_received(provider: &str) {
    MESSAGING_METRICS
        .messages_received
        .with_label_values(&[provider])
        .inc();
}

pub(crate) fn connection_opened(provider: &str) {
    MESSAGING_METRICS
        .active_connections
        .with_label_values(&[provider])
        .inc();
}

pub(crate) fn connection_closed(provider: &str) {
    MESSAGING_METRICS
        .active_connections
        .with_label_values(&[provider])
        .dec();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_publish_splits_outcomes() {
        let ok_before = MESSAGING_METRICS
            .messages_published
            .with_label_values(&["metrics-test"])
            .get();
        let failed_before = MESSAGING_METRICS
            .publish_failures
            .with_label_values(&["metrics-test"])
            .get();

        record_publish::<(), ()>("metrics-test", &Ok(()));
        record_publish::<(), ()>("metrics-test", &Err(()));
        record_publish::<(), ()>("metrics-test", &Err(()));

        let published = MESSAGING_METRICS
            .messages_published
            .with_label_values(&["metrics-test"])
            .get();
        let failed = MESSAGING_METRICS
            .publish_failures
            .with_label_values(&["metrics-test"])
            .get();
        assert_eq!(published - ok_before, 1.0);
        assert_eq!(failed - failed_before, 2.0);
    }
}
