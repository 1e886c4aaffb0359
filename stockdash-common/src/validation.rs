//! Configuration validation for stockdash services.
//!
//! Checks that configured values are present and within valid ranges before
//! anything is started.

use thiserror::Error;

use crate::config::{
    CacheBackendKind, CacheConfig, Config, ObservabilityConfig, RankingConfig, SchedulerConfig,
    SourceConfig, SourceKind,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

fn invalid(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.into(),
        reason: reason.into(),
    }
}

impl Config {
    /// Validate the entire configuration, collecting every section's error.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }
        if let Err(e) = self.cache.validate() {
            errors.push(e);
        }
        if let Err(e) = self.ranking.validate() {
            errors.push(e);
        }
        if let Err(e) = self.scheduler.validate() {
            errors.push(e);
        }
        if let Err(e) = self.source.validate() {
            errors.push(e);
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(invalid(
                "observability.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(invalid(
                "observability.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        Ok(())
    }
}

impl Validate for CacheConfig {
    fn validate(&self) -> ValidationResult<()> {
        let ttls = [
            ("cache.rank_ttl_secs", self.rank_ttl_secs),
            ("cache.universe_ttl_secs", self.universe_ttl_secs),
            ("cache.detail_ttl_secs", self.detail_ttl_secs),
            ("cache.page_ttl_secs", self.page_ttl_secs),
            ("cache.search_ttl_secs", self.search_ttl_secs),
        ];
        for (field, ttl) in ttls {
            if ttl == 0 {
                return Err(invalid(field, "TTL must be greater than zero"));
            }
        }

        if self.backend == CacheBackendKind::Redis && !self.redis_url.starts_with("redis") {
            return Err(invalid(
                "cache.redis_url",
                "must start with redis:// or rediss://",
            ));
        }

        Ok(())
    }
}

impl Validate for RankingConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.top_n == 0 {
            return Err(invalid("ranking.top_n", "must be at least 1"));
        }
        if self.sector_cap == 0 {
            return Err(invalid("ranking.sector_cap", "must be at least 1"));
        }
        if self.max_page_size == 0 {
            return Err(invalid("ranking.max_page_size", "must be at least 1"));
        }
        if self.concurrency == 0 {
            return Err(invalid("ranking.concurrency", "must be at least 1"));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(invalid("ranking.fetch_timeout_ms", "must be greater than zero"));
        }
        if self.rebuild_deadline_secs * 1000 < self.fetch_timeout_ms {
            return Err(invalid(
                "ranking.rebuild_deadline_secs",
                "must not be shorter than the per-candidate fetch timeout",
            ));
        }
        Ok(())
    }
}

impl Validate for SchedulerConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.eviction_interval_secs == 0 {
            return Err(invalid("scheduler.eviction_interval_secs", "must be greater than zero"));
        }
        if self.rebuild_interval_secs == 0 {
            return Err(invalid("scheduler.rebuild_interval_secs", "must be greater than zero"));
        }
        if self.startup_delay_min_secs > self.startup_delay_max_secs {
            return Err(invalid(
                "scheduler.startup_delay_min_secs",
                "must not exceed startup_delay_max_secs",
            ));
        }
        Ok(())
    }
}

impl Validate for SourceConfig {
    fn validate(&self) -> ValidationResult<()> {
        match self.kind {
            SourceKind::Http => {
                let url = self.base_url.as_deref().ok_or_else(|| ValidationError::MissingField {
                    field: "source.base_url".into(),
                })?;
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(invalid("source.base_url", "must be an http(s) URL"));
                }
            }
            SourceKind::Fixture => {
                if self.fixture_path.is_none() {
                    return Err(ValidationError::MissingField {
                        field: "source.fixture_path".into(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.source.base_url = Some("http://127.0.0.1:9000".into());
        config
    }

    #[test]
    fn test_default_with_url_is_valid() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_missing_base_url() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ValidationError::MissingField { ref field } if field == "source.base_url"));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut config = valid_config();
        config.cache.page_ttl_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cache.page_ttl_secs"));
    }

    #[test]
    fn test_multiple_errors_collected() {
        let mut config = valid_config();
        config.observability.log_level = "loud".into();
        config.ranking.top_n = 0;
        config.scheduler.startup_delay_min_secs = 100;
        config.scheduler.startup_delay_max_secs = 10;

        match config.validate().unwrap_err() {
            ValidationError::Multiple(errors) => assert_eq!(errors.len(), 3),
            other => panic!("expected multiple errors, got {other}"),
        }
    }

    #[test]
    fn test_redis_url_scheme() {
        let mut config = valid_config();
        config.cache.backend = CacheBackendKind::Redis;
        config.cache.redis_url = "http://localhost".into();
        assert!(config.validate().is_err());
    }
}
