use validator::Validate;

use crate::config::Config;
use crate::error::GateError;

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Runs the per-field range checks followed by the cross-field ones.
    pub fn validate(config: &Config) -> Result<(), GateError> {
        config
            .validate()
            .map_err(|e| GateError::Configuration(e.to_string()))?;

        Self::validate_bind_address(&config.bind_addr.to_string())?;
        Self::validate_memory_thresholds(
            config.memory_warning_mb,
            config.memory_critical_mb,
            config.memory_limit_mb,
        )?;
        Self::validate_log_level(&config.log_level)?;

        Ok(())
    }

    /// Validates a bind address
    pub fn validate_bind_address(address: &str) -> Result<(), GateError> {
        if address.is_empty() {
            return Err(GateError::Configuration(
                "Bind address cannot be empty".to_string(),
            ));
        }

        if !address.contains(':') {
            return Err(GateError::Configuration(
                "Bind address must be in host:port format".to_string(),
            ));
        }

        if address.ends_with(":0") {
            return Err(GateError::Configuration(
                "Bind port must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Warning must sit below critical, and critical may not exceed the hard limit.
    pub fn validate_memory_thresholds(
        warning_mb: f64,
        critical_mb: f64,
        limit_mb: f64,
    ) -> Result<(), GateError> {
        if warning_mb >= critical_mb {
            return Err(GateError::Configuration(format!(
                "Memory warning threshold ({}MB) must be below the critical threshold ({}MB)",
                warning_mb, critical_mb
            )));
        }

        if critical_mb > limit_mb {
            return Err(GateError::Configuration(format!(
                "Memory critical threshold ({}MB) cannot exceed the limit ({}MB)",
                critical_mb, limit_mb
            )));
        }

        Ok(())
    }

    pub fn validate_log_level(level: &str) -> Result<(), GateError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&level.to_lowercase().as_str()) {
            return Err(GateError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {:?}",
                level, valid_levels
            )));
        }

        Ok(())
    }
}
