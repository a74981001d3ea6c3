use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{opts, register_int_counter, Encoder, IntCounter, TextEncoder};

pub static MESSAGES_POSTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "telegraph_messages_posted_total",
        "Total number of messages accepted by the broker"
    ))
    .unwrap()
});

pub static MESSAGES_DELIVERED_LIVE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "telegraph_messages_delivered_live_total",
        "Total number of messages pushed to at least one live listener"
    ))
    .unwrap()
});

pub static MESSAGES_QUEUED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "telegraph_messages_queued_total",
        "Total number of messages queued into an inbox"
    ))
    .unwrap()
});

pub static MESSAGES_FORWARDED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "telegraph_messages_forwarded_total",
        "Total number of messages forwarded to remote brokers"
    ))
    .unwrap()
});

pub static MESSAGES_DROPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "telegraph_messages_dropped_total",
        "Total number of messages dropped by the routing pipeline"
    ))
    .unwrap()
});

pub static DELIVERY_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "telegraph_delivery_failures_total",
        "Total number of failed outbound federation sends"
    ))
    .unwrap()
});

pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
