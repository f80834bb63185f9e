use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};

pub const METRIC_CACHE_HIT: &str = "catalog_cache_hit_total";
pub const METRIC_CACHE_MISS: &str = "catalog_cache_miss_total";
pub const METRIC_CACHE_ERROR: &str = "catalog_cache_error_total";
pub const METRIC_EVENTS_PUBLISHED: &str = "catalog_events_published_total";
pub const METRIC_EVENTS_DROPPED: &str = "catalog_events_dropped_total";
pub const METRIC_EVENTS_OVERFLOW: &str = "catalog_events_overflow_total";
pub const METRIC_PUBLISHER_BACKLOG: &str = "catalog_publisher_backlog";
pub const METRIC_EVENTS_CONSUMED: &str = "catalog_events_consumed_total";
pub const METRIC_HANDLER_RETRIES: &str = "catalog_handler_retries_total";
pub const METRIC_DEAD_LETTERS: &str = "catalog_dead_letters_total";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Register metric descriptions with whichever recorder is installed.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(METRIC_CACHE_HIT, Unit::Count, "Product cache hits.");
        describe_counter!(METRIC_CACHE_MISS, Unit::Count, "Product cache misses.");
        describe_counter!(
            METRIC_CACHE_ERROR,
            Unit::Count,
            "Cache operations that failed and fell back to the durable store."
        );
        describe_counter!(
            METRIC_EVENTS_PUBLISHED,
            Unit::Count,
            "Domain events appended to the event bus."
        );
        describe_counter!(
            METRIC_EVENTS_DROPPED,
            Unit::Count,
            "Domain events dropped after exhausting publish retries."
        );
        describe_counter!(
            METRIC_EVENTS_OVERFLOW,
            Unit::Count,
            "Domain events that found their publisher lane full and had to wait."
        );
        describe_gauge!(
            METRIC_PUBLISHER_BACKLOG,
            Unit::Count,
            "Domain events waiting in the publisher queue."
        );
        describe_counter!(
            METRIC_EVENTS_CONSUMED,
            Unit::Count,
            "Domain events processed by the consumer group."
        );
        describe_counter!(
            METRIC_HANDLER_RETRIES,
            Unit::Count,
            "Event handler attempts beyond the first."
        );
        describe_counter!(
            METRIC_DEAD_LETTERS,
            Unit::Count,
            "Domain events routed to the dead-letter area."
        );
    });
}
