//! Engine facade.
//!
//! An [`Engine`] owns the storage backend, the clock and the resolved pricing
//! and lifecycle rules. Each public operation runs in exactly one unit of work
//! opened through [`Engine::run`]; operations live in the `accounts`, `ledger`,
//! `scheduling`, `redemption` and `sweep` modules.

use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, PricingConfig, RolePricing, SweepConfig};
use crate::domain::Role;
use crate::error::{EngineError, ErrorKind};
use crate::lifecycle::Lifecycle;
use crate::store::{LedgerStore, PgStore, StoreTx};
use chrono::{DateTime, Utc};
use config::ConfigError;
use std::sync::Arc;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

pub struct Engine {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    pricing: PricingConfig,
    lifecycle: Lifecycle,
    sweep: SweepConfig,
}

impl Engine {
    /// Build an engine over any backend.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the meal configuration does not resolve.
    pub fn new(
        store: Arc<dyn LedgerStore>,
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            clock,
            pricing: config.pricing.clone(),
            lifecycle: Lifecycle::from_config(&config.meals)?,
            sweep: config.sweep.clone(),
        })
    }

    /// Engine over PostgreSQL with the system clock.
    ///
    /// Applies `runtime.workers` to the `may` scheduler before opening the pool.
    ///
    /// # Errors
    ///
    /// `Internal` if the pool cannot be filled, `BadRequest` for invalid configuration.
    pub fn connect(config: &EngineConfig) -> Result<Self, EngineError> {
        if let Some(workers) = config.runtime.workers {
            may::config().set_workers(workers);
        }
        let store = PgStore::connect(&config.database)?;
        Self::new(Arc::new(store), config, Arc::new(SystemClock))
            .map_err(|e| EngineError::BadRequest(format!("invalid configuration: {e}")))
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn pricing_for(&self, role: Role) -> RolePricing {
        self.pricing.for_role(role)
    }

    pub fn sweep_config(&self) -> &SweepConfig {
        &self.sweep
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run `work` in one unit of work and commit it if it succeeds.
    ///
    /// On error the unit is dropped uncommitted, so nothing it wrote persists.
    pub(crate) fn run<T>(
        &self,
        operation: &'static str,
        work: impl FnOnce(&mut dyn StoreTx) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        #[cfg(feature = "tracing")]
        let span = tracing_helpers::operation_span(operation);
        #[cfg(feature = "tracing")]
        let _enter = span.enter();

        let result = self.store.begin().and_then(|mut tx| {
            let value = work(&mut *tx)?;
            tx.commit()?;
            Ok(value)
        });

        if let Err(err) = &result {
            match err.kind() {
                ErrorKind::Internal => log::error!("{operation} failed and was rolled back: {err}"),
                _ => log::warn!("{operation} rejected: {err}"),
            }
            #[cfg(feature = "metrics")]
            METRICS.record_rejection(err.label());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc::now()))
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.pricing.student.meal_cost = 0;
        assert!(Engine::new(Arc::new(MemoryStore::new()), &config, clock()).is_err());

        let mut config = EngineConfig::default();
        config.meals.lunch.verify_from = "noon".to_string();
        assert!(Engine::new(Arc::new(MemoryStore::new()), &config, clock()).is_err());
    }

    #[test]
    fn test_pricing_comes_from_config() {
        let mut config = EngineConfig::default();
        config.pricing.student = RolePricing::new(250, 3);
        let engine = Engine::new(Arc::new(MemoryStore::new()), &config, clock()).unwrap();
        assert_eq!(engine.pricing_for(Role::Student).overdraft_allowance(), 750);
        assert_eq!(engine.pricing_for(Role::Teacher).meal_cost, 2_000);
    }

    #[test]
    fn test_failed_work_is_not_committed() {
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::new(store.clone(), &EngineConfig::default(), clock()).unwrap();
        let result: Result<(), EngineError> = engine.run("test", |tx| {
            tx.insert_user(
                &crate::domain::NewUser {
                    cin: "99".to_string(),
                    role: Role::Admin,
                },
                Utc::now(),
            )?;
            Err(EngineError::BadRequest("abandon".to_string()))
        });
        assert!(result.is_err());
        assert!(store.users().is_empty());
    }
}
