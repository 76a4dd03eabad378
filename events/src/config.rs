// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Worker configuration.
//!
//! Both structs deserialize with defaults for any missing field, so they can be
//! embedded in an application's own configuration file.

use crate::Error;

use serde::{Deserialize, Serialize};

use std::time::Duration;

/// Where the periodic routine of an actor runs relative to the event drain.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum LoopOrder {
    /// Routine first, then buffered events.
    BeforeEvents,
    /// Buffered events first, then the routine.
    #[default]
    AfterEvents,
}

/// Actor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Name used in logs.
    pub name: String,
    /// Period of the routine, in milliseconds. Without it the routine only runs
    /// when events arrive.
    pub loop_interval_ms: Option<u64>,
    /// Position of the routine within a cycle.
    pub loop_order: LoopOrder,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            name: "eventthread".to_owned(),
            loop_interval_ms: None,
            loop_order: LoopOrder::default(),
        }
    }
}

impl ActorConfig {
    /// Default configuration with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }

    /// Sets the routine period and position. The period has millisecond
    /// resolution: a non-zero period below one millisecond becomes one
    /// millisecond, and periods beyond `u64::MAX` milliseconds saturate.
    pub fn with_loop(mut self, interval: Duration, order: LoopOrder) -> Self {
        let millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        let millis = if millis == 0 && !interval.is_zero() {
            1
        } else {
            millis
        };
        self.loop_interval_ms = Some(millis);
        self.loop_order = order;
        self
    }

    pub fn loop_interval(&self) -> Option<Duration> {
        self.loop_interval_ms.map(Duration::from_millis)
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an empty name or a zero loop interval.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("actor name must not be empty".to_owned()));
        }
        if self.loop_interval_ms == Some(0) {
            return Err(Error::Config(format!(
                "loop interval of {} must be greater than zero",
                self.name
            )));
        }
        Ok(())
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Name used in logs.
    pub name: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: "event-manager".to_owned(),
        }
    }
}

impl DispatcherConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
        }
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an empty name.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::Config(
                "dispatcher name must not be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_defaults() {
        let config = ActorConfig::default();
        assert_eq!(config.name, "eventthread");
        assert_eq!(config.loop_interval(), None);
        assert_eq!(config.loop_order, LoopOrder::AfterEvents);
        assert!(config.validate().is_ok());
        assert_eq!(DispatcherConfig::default().name, "event-manager");
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ActorConfig =
            serde_json::from_str(r#"{ "name": "sensor", "loop_interval_ms": 20 }"#)
                .unwrap();
        assert_eq!(config.name, "sensor");
        assert_eq!(config.loop_interval(), Some(Duration::from_millis(20)));
        assert_eq!(config.loop_order, LoopOrder::AfterEvents);

        let config: DispatcherConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, DispatcherConfig::default());
    }

    #[test]
    fn test_validate() {
        let config = ActorConfig::new(" ");
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = ActorConfig::new("sensor")
            .with_loop(Duration::ZERO, LoopOrder::BeforeEvents);
        assert_eq!(
            config.validate(),
            Err(Error::Config(
                "loop interval of sensor must be greater than zero".to_owned()
            ))
        );
        assert!(DispatcherConfig::new("").validate().is_err());
    }

    #[test]
    fn test_loop_interval_resolution() {
        let config = ActorConfig::new("fast")
            .with_loop(Duration::from_micros(250), LoopOrder::AfterEvents);
        assert_eq!(config.loop_interval_ms, Some(1));
        assert!(config.validate().is_ok());

        let config = ActorConfig::new("slow")
            .with_loop(Duration::from_millis(1500), LoopOrder::AfterEvents);
        assert_eq!(config.loop_interval(), Some(Duration::from_millis(1500)));

        let config =
            ActorConfig::new("forever").with_loop(Duration::MAX, LoopOrder::AfterEvents);
        assert_eq!(config.loop_interval_ms, Some(u64::MAX));
    }
}
