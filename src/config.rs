//! Engine configuration.
//!
//! [`EngineConfig::load`] layers `config/config.toml` (optional) under
//! `MEALGUARD__*` environment variables. Every section has defaults, so an
//! empty environment yields a usable development configuration. The loaded
//! value is handed to [`Engine`](crate::Engine); nothing reads it globally.

use crate::domain::{MealTime, Role};
use chrono::{Duration, FixedOffset, NaiveTime};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use crate::pool::config::*;

const CONFIG_FILE: &str = "config/config.toml";
const ENV_PREFIX: &str = "MEALGUARD";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub meals: MealsConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Price of one meal and how many meals' worth of debt a role may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RolePricing {
    pub meal_cost: i64,
    pub max_meals_in_red: i64,
}

impl RolePricing {
    pub const fn new(meal_cost: i64, max_meals_in_red: i64) -> Self {
        Self {
            meal_cost,
            max_meals_in_red,
        }
    }

    /// How far below zero the balance may go.
    pub fn overdraft_allowance(&self) -> i64 {
        self.meal_cost.saturating_mul(self.max_meals_in_red)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PricingConfig {
    #[serde(default = "default_student_pricing")]
    pub student: RolePricing,
    #[serde(default = "default_teacher_pricing")]
    pub teacher: RolePricing,
    #[serde(default = "default_staff_pricing")]
    pub admin: RolePricing,
    #[serde(default = "default_staff_pricing")]
    pub payment_staff: RolePricing,
    #[serde(default = "default_staff_pricing")]
    pub verification_staff: RolePricing,
    #[serde(default = "default_staff_pricing")]
    pub normal_user: RolePricing,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            student: default_student_pricing(),
            teacher: default_teacher_pricing(),
            admin: default_staff_pricing(),
            payment_staff: default_staff_pricing(),
            verification_staff: default_staff_pricing(),
            normal_user: default_staff_pricing(),
        }
    }
}

impl PricingConfig {
    pub fn for_role(&self, role: Role) -> RolePricing {
        match role {
            Role::Student => self.student,
            Role::Teacher => self.teacher,
            Role::Admin => self.admin,
            Role::PaymentStaff => self.payment_staff,
            Role::VerificationStaff => self.verification_staff,
            Role::NormalUser => self.normal_user,
        }
    }
}

fn default_student_pricing() -> RolePricing {
    RolePricing::new(200, 5)
}

fn default_teacher_pricing() -> RolePricing {
    RolePricing::new(2000, 2)
}

fn default_staff_pricing() -> RolePricing {
    RolePricing::new(3000, 0)
}

/// Clock settings for one meal time, as `HH:MM` strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MealTimeConfig {
    pub service_time: String,
    pub grace_minutes: i64,
    pub verify_from: String,
    pub verify_until: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MealsConfig {
    /// Offset of the canteen's wall clock from UTC.
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_lunch")]
    pub lunch: MealTimeConfig,
    #[serde(default = "default_dinner")]
    pub dinner: MealTimeConfig,
    /// Cancelling further out than this refunds the meal.
    #[serde(default = "default_refund_threshold_minutes")]
    pub refund_threshold_minutes: i64,
    #[serde(default = "default_redeem_before_minutes")]
    pub redeem_before_minutes: i64,
    #[serde(default = "default_redeem_after_minutes")]
    pub redeem_after_minutes: i64,
}

impl Default for MealsConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: default_utc_offset_minutes(),
            lunch: default_lunch(),
            dinner: default_dinner(),
            refund_threshold_minutes: default_refund_threshold_minutes(),
            redeem_before_minutes: default_redeem_before_minutes(),
            redeem_after_minutes: default_redeem_after_minutes(),
        }
    }
}

impl MealsConfig {
    pub fn for_meal(&self, meal_time: MealTime) -> &MealTimeConfig {
        match meal_time {
            MealTime::Lunch => &self.lunch,
            MealTime::Dinner => &self.dinner,
        }
    }
}

fn default_utc_offset_minutes() -> i32 {
    60
}

fn default_lunch() -> MealTimeConfig {
    MealTimeConfig {
        service_time: "12:00".to_string(),
        grace_minutes: 120,
        verify_from: "11:00".to_string(),
        verify_until: "14:00".to_string(),
    }
}

fn default_dinner() -> MealTimeConfig {
    MealTimeConfig {
        service_time: "19:00".to_string(),
        grace_minutes: 60,
        verify_from: "18:00".to_string(),
        verify_until: "20:00".to_string(),
    }
}

fn default_refund_threshold_minutes() -> i64 {
    180
}

fn default_redeem_before_minutes() -> i64 {
    30
}

fn default_redeem_after_minutes() -> i64 {
    180
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_enabled")]
    pub enabled: bool,
    #[serde(default = "default_sweep_interval_seconds")]
    pub interval_seconds: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweep_enabled(),
            interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

fn default_sweep_enabled() -> bool {
    true
}

fn default_sweep_interval_seconds() -> u64 {
    300
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RuntimeConfig {
    /// `may` scheduler worker threads; `None` keeps the runtime default.
    #[serde(default)]
    pub workers: Option<usize>,
}

/// Parse an `HH:MM` (or `HH:MM:SS`) clock value.
///
/// # Errors
///
/// Returns `ConfigError::Message` naming `field` when the value does not parse.
pub fn parse_clock(field: &str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|e| ConfigError::Message(format!("{field}: invalid clock time '{value}': {e}")))
}

/// Longest grace, refund or redemption window accepted, in minutes.
pub const MAX_WINDOW_MINUTES: i64 = 24 * 60;

/// `FixedOffset` for an offset in minutes, `None` outside ±24h.
pub fn offset_from_minutes(minutes: i32) -> Option<FixedOffset> {
    minutes.checked_mul(60).and_then(FixedOffset::east_opt)
}

/// A window length in `[0, MAX_WINDOW_MINUTES]` minutes.
///
/// # Errors
///
/// Returns `ConfigError::Message` naming `field` when the value is out of range.
pub fn window_minutes(field: &str, minutes: i64) -> Result<Duration, ConfigError> {
    if !(0..=MAX_WINDOW_MINUTES).contains(&minutes) {
        return Err(ConfigError::Message(format!(
            "{field} must be between 0 and {MAX_WINDOW_MINUTES}, got {minutes}"
        )));
    }
    Ok(Duration::minutes(minutes))
}

impl EngineConfig {
    /// Load from `config/config.toml`, falling back to env vars.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when neither source can be read or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(env_source());

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                if std::path::Path::new(CONFIG_FILE).exists() {
                    log::warn!("failed to load {CONFIG_FILE}, falling back to env: {err}");
                }
                Config::builder()
                    .add_source(env_source())
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {err}, then env-only error: {env_err}"
                        ))
                    })?
            }
        };

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for role in Role::ALL {
            let pricing = self.pricing.for_role(role);
            if pricing.meal_cost <= 0 {
                return Err(ConfigError::Message(format!(
                    "pricing.{role}: meal_cost must be positive"
                )));
            }
            if pricing.max_meals_in_red < 0 {
                return Err(ConfigError::Message(format!(
                    "pricing.{role}: max_meals_in_red cannot be negative"
                )));
            }
        }

        offset_from_minutes(self.meals.utc_offset_minutes).ok_or_else(|| {
            ConfigError::Message(format!(
                "meals.utc_offset_minutes out of range: {}",
                self.meals.utc_offset_minutes
            ))
        })?;

        for meal_time in MealTime::ALL {
            let meal = self.meals.for_meal(meal_time);
            let prefix = format!("meals.{meal_time}");
            parse_clock(&format!("{prefix}.service_time"), &meal.service_time)?;
            let from = parse_clock(&format!("{prefix}.verify_from"), &meal.verify_from)?;
            let until = parse_clock(&format!("{prefix}.verify_until"), &meal.verify_until)?;
            if from >= until {
                return Err(ConfigError::Message(format!(
                    "{prefix}: verify_from must be before verify_until"
                )));
            }
            window_minutes(&format!("{prefix}.grace_minutes"), meal.grace_minutes)?;
        }

        window_minutes("meals.refund_threshold_minutes", self.meals.refund_threshold_minutes)?;
        window_minutes("meals.redeem_before_minutes", self.meals.redeem_before_minutes)?;
        window_minutes("meals.redeem_after_minutes", self.meals.redeem_after_minutes)?;

        if self.sweep.enabled && self.sweep.interval_seconds == 0 {
            return Err(ConfigError::Message(
                "sweep.interval_seconds must be positive when the sweep is enabled".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}
