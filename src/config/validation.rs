//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (percentages, window shape, deadlines, capacities)
//! - Detect duplicate commands, groups and collapsers
//! - Reject contradictory breaker flags
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: InvokerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system, including on hot reload

use std::collections::HashSet;
use thiserror::Error;

use crate::config::schema::{BreakerConfig, InvokerConfig, WindowConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{scope}: error_threshold_percentage must be 0-100, got {value}")]
    ThresholdOutOfRange { scope: String, value: u64 },

    #[error("{scope}: force_open and force_closed are mutually exclusive")]
    ConflictingForceFlags { scope: String },

    #[error("{scope}: rolling window needs at least one bucket of non-zero length")]
    EmptyWindow { scope: String },

    #[error("{scope}: timeout_ms must be greater than zero")]
    ZeroTimeout { scope: String },

    #[error("group {name}: max_concurrent must be greater than zero")]
    ZeroCapacity { name: String },

    #[error("collapser {key}: delay_ms and max_batch_size must be greater than zero")]
    InvalidCollapser { key: String },

    #[error("duplicate {kind} '{name}'")]
    Duplicate { kind: &'static str, name: String },

    #[error("{kind} with empty name")]
    EmptyName { kind: &'static str },
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &InvokerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let defaults = &config.defaults;
    check_breaker("defaults", &defaults.breaker, &mut errors);
    check_window("defaults", &defaults.window, &mut errors);
    if defaults.timeout.enabled && defaults.timeout.timeout_ms == 0 {
        errors.push(ValidationError::ZeroTimeout {
            scope: "defaults".into(),
        });
    }
    if defaults.bulkhead.max_concurrent == 0 {
        errors.push(ValidationError::ZeroCapacity {
            name: "defaults".into(),
        });
    }

    let mut seen = HashSet::new();
    for command in &config.commands {
        if command.key.is_empty() {
            errors.push(ValidationError::EmptyName { kind: "command" });
            continue;
        }
        if !seen.insert(command.key.as_str()) {
            errors.push(ValidationError::Duplicate {
                kind: "command",
                name: command.key.clone(),
            });
        }

        let scope = format!("command {}", command.key);
        if let Some(breaker) = &command.breaker {
            check_breaker(&scope, breaker, &mut errors);
        }
        if let Some(window) = &command.window {
            check_window(&scope, window, &mut errors);
        }
        if command.timeout_ms == Some(0) {
            errors.push(ValidationError::ZeroTimeout { scope });
        }
    }

    let mut seen = HashSet::new();
    for group in &config.groups {
        if group.name.is_empty() {
            errors.push(ValidationError::EmptyName { kind: "group" });
            continue;
        }
        if !seen.insert(group.name.as_str()) {
            errors.push(ValidationError::Duplicate {
                kind: "group",
                name: group.name.clone(),
            });
        }
        if group.max_concurrent == 0 {
            errors.push(ValidationError::ZeroCapacity {
                name: group.name.clone(),
            });
        }
    }

    let mut seen = HashSet::new();
    for collapser in &config.collapsers {
        if collapser.key.is_empty() {
            errors.push(ValidationError::EmptyName { kind: "collapser" });
            continue;
        }
        if !seen.insert(collapser.key.as_str()) {
            errors.push(ValidationError::Duplicate {
                kind: "collapser",
                name: collapser.key.clone(),
            });
        }
        if collapser.delay_ms == 0 || collapser.max_batch_size == 0 {
            errors.push(ValidationError::InvalidCollapser {
                key: collapser.key.clone(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_breaker(scope: &str, breaker: &BreakerConfig, errors: &mut Vec<ValidationError>) {
    if breaker.error_threshold_percentage > 100 {
        errors.push(ValidationError::ThresholdOutOfRange {
            scope: scope.to_string(),
            value: breaker.error_threshold_percentage,
        });
    }
    if breaker.force_open && breaker.force_closed {
        errors.push(ValidationError::ConflictingForceFlags {
            scope: scope.to_string(),
        });
    }
}

fn check_window(scope: &str, window: &WindowConfig, errors: &mut Vec<ValidationError>) {
    if window.buckets == 0 || window.bucket_ms == 0 {
        errors.push(ValidationError::EmptyWindow {
            scope: scope.to_string(),
        });
    }
}
