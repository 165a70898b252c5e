//! Prometheus metrics and tracing span helpers.
//!
//! Both halves compile away when the `metrics` / `tracing` features are off;
//! call sites guard every use with the matching `#[cfg(feature = ...)]`.

#[cfg(feature = "metrics")]
pub use prom::{EngineMetrics, METRICS};

#[cfg(feature = "metrics")]
mod prom {
    use once_cell::sync::Lazy;
    use opentelemetry::metrics::{Counter, Histogram, Meter, MeterProvider as _};
    use opentelemetry::{global, KeyValue};
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::{Encoder, Registry, TextEncoder};
    use std::time::Duration;

    pub static METRICS: Lazy<EngineMetrics> = Lazy::new(EngineMetrics::init);

    pub struct EngineMetrics {
        registry: Registry,
        _provider: Option<SdkMeterProvider>,
        pub ledger_entries_total: Counter<u64>,
        pub meals_scheduled_total: Counter<u64>,
        pub meals_cancelled_total: Counter<u64>,
        pub meals_redeemed_total: Counter<u64>,
        pub meals_expired_total: Counter<u64>,
        pub rejections_total: Counter<u64>,
        pub queries_total: Counter<u64>,
        pub query_errors_total: Counter<u64>,
        pub query_duration: Histogram<f64>,
        pub connection_wait_duration: Histogram<f64>,
        pub pool_wait_duration: Histogram<f64>,
    }

    impl EngineMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();
            let (meter, provider) = match opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
            {
                Ok(exporter) => {
                    let provider = SdkMeterProvider::builder().with_reader(exporter).build();
                    (provider.meter("mealguard"), Some(provider))
                }
                Err(e) => {
                    log::warn!("prometheus exporter unavailable, metrics are not exported: {e}");
                    (global::meter("mealguard"), None)
                }
            };

            Self::with_meter(&meter, registry, provider)
        }

        fn with_meter(meter: &Meter, registry: Registry, provider: Option<SdkMeterProvider>) -> Self {
            Self {
                registry,
                _provider: provider,
                ledger_entries_total: meter
                    .u64_counter("mealguard_ledger_entries_total")
                    .with_description("Ledger entries written, by transaction type")
                    .build(),
                meals_scheduled_total: meter
                    .u64_counter("mealguard_meals_scheduled_total")
                    .with_description("Meal slots moved to scheduled")
                    .build(),
                meals_cancelled_total: meter
                    .u64_counter("mealguard_meals_cancelled_total")
                    .with_description("Meal cancellations, by outcome")
                    .build(),
                meals_redeemed_total: meter
                    .u64_counter("mealguard_meals_redeemed_total")
                    .with_description("Meals redeemed, by channel")
                    .build(),
                meals_expired_total: meter
                    .u64_counter("mealguard_meals_expired_total")
                    .with_description("Scheduled meals persisted as expired by the sweep")
                    .build(),
                rejections_total: meter
                    .u64_counter("mealguard_rejections_total")
                    .with_description("Operations rejected by a business rule, by kind")
                    .build(),
                queries_total: meter
                    .u64_counter("mealguard_queries_total")
                    .with_description("Total queries executed")
                    .build(),
                query_errors_total: meter
                    .u64_counter("mealguard_query_errors_total")
                    .with_description("Queries that returned a driver error")
                    .build(),
                query_duration: meter
                    .f64_histogram("mealguard_query_duration_seconds")
                    .with_description("Duration of queries")
                    .build(),
                connection_wait_duration: meter
                    .f64_histogram("mealguard_connection_wait_seconds")
                    .with_description("Time spent establishing connections")
                    .build(),
                pool_wait_duration: meter
                    .f64_histogram("mealguard_pool_wait_seconds")
                    .with_description("Time spent waiting for a pooled connection")
                    .build(),
            }
        }

        pub fn record_query_duration(&self, elapsed: Duration) {
            self.queries_total.add(1, &[]);
            self.query_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_query_error(&self) {
            self.query_errors_total.add(1, &[]);
        }

        pub fn record_connection_wait(&self, elapsed: Duration) {
            self.connection_wait_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_pool_wait(&self, elapsed: Duration) {
            self.pool_wait_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_ledger_entry(&self, transaction_type: &'static str) {
            self.ledger_entries_total
                .add(1, &[KeyValue::new("type", transaction_type)]);
        }

        pub fn record_scheduled(&self, count: u64) {
            self.meals_scheduled_total.add(count, &[]);
        }

        pub fn record_cancelled(&self, outcome: &'static str) {
            self.meals_cancelled_total
                .add(1, &[KeyValue::new("outcome", outcome)]);
        }

        pub fn record_redeemed(&self, channel: &'static str) {
            self.meals_redeemed_total
                .add(1, &[KeyValue::new("channel", channel)]);
        }

        pub fn record_expired(&self, count: u64) {
            self.meals_expired_total.add(count, &[]);
        }

        pub fn record_rejection(&self, kind: &'static str) {
            self.rejections_total.add(1, &[KeyValue::new("kind", kind)]);
        }

        /// Prometheus text exposition of everything recorded so far.
        pub fn render(&self) -> String {
            let mut buffer = Vec::new();
            let encoder = TextEncoder::new();
            if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
                log::warn!("failed to encode metrics: {e}");
            }
            String::from_utf8_lossy(&buffer).into_owned()
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::Span;

    pub fn acquire_connection_span() -> Span {
        tracing::debug_span!("mealguard.connect")
    }

    pub fn begin_transaction_span() -> Span {
        tracing::debug_span!("mealguard.tx.begin")
    }

    pub fn commit_transaction_span() -> Span {
        tracing::debug_span!("mealguard.tx.commit")
    }

    pub fn rollback_transaction_span() -> Span {
        tracing::debug_span!("mealguard.tx.rollback")
    }

    pub fn execute_query_span(query: &str) -> Span {
        // First keyword only; full statements carry user data in literals.
        let verb = query.split_whitespace().next().unwrap_or("");
        tracing::trace_span!("mealguard.query", verb = verb)
    }

    pub fn operation_span(operation: &'static str) -> Span {
        tracing::info_span!("mealguard.op", op = operation)
    }
}
