use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TaskError, TaskResult};

/// Longest accepted idle delay: one day.
pub const MAX_IDLE_DELAY_SECS: f64 = 86_400.0;

/// Sizing and pacing of a [`TaskEngine`](crate::TaskEngine).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Worker threads.
    pub number_of_threads: usize,
    /// Items the producer may queue ahead of the workers.
    pub maximum_queue_size: usize,
    /// Seconds the producer sleeps when the source has nothing right now.
    pub idle_delay: f64,
    /// Treat "nothing right now" from the source as the end of the stream.
    pub quit_on_empty_queue: bool,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            number_of_threads: 4,
            maximum_queue_size: 8,
            idle_delay: 7.0,
            quit_on_empty_queue: false,
        }
    }
}

impl TaskConfig {
    pub fn validate(&self) -> TaskResult<()> {
        if self.number_of_threads == 0 {
            return Err(TaskError::Config(
                "number_of_threads must be at least 1".into(),
            ));
        }
        if self.maximum_queue_size == 0 {
            return Err(TaskError::Config(
                "maximum_queue_size must be at least 1".into(),
            ));
        }
        if !(0.0..=MAX_IDLE_DELAY_SECS).contains(&self.idle_delay) {
            return Err(TaskError::Config(format!(
                "idle_delay must be between 0 and {MAX_IDLE_DELAY_SECS} seconds, got {}",
                self.idle_delay
            )));
        }
        Ok(())
    }

    /// [`idle_delay`](Self::idle_delay) as a `Duration`, clamped to the
    /// accepted range.
    pub fn idle_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.idle_delay.clamp(0.0, MAX_IDLE_DELAY_SECS))
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TaskConfig::default();
        config.validate().unwrap();
        assert_eq!(config.number_of_threads, 4);
        assert_eq!(config.maximum_queue_size, 8);
        assert_eq!(config.idle_delay(), Duration::from_secs(7));
    }

    #[test]
    fn rejects_zero_sizes() {
        let config = TaskConfig {
            number_of_threads: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TaskError::Config(_))));
        let config = TaskConfig {
            maximum_queue_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = TaskConfig {
            idle_delay: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_idle_delay_out_of_range() {
        for idle_delay in [1e30, f64::INFINITY, f64::NAN, MAX_IDLE_DELAY_SECS + 1.0] {
            let config = TaskConfig {
                idle_delay,
                ..Default::default()
            };
            assert!(
                matches!(config.validate(), Err(TaskError::Config(_))),
                "accepted {idle_delay}"
            );
        }
        let huge = TaskConfig {
            idle_delay: 1e30,
            ..Default::default()
        };
        assert_eq!(huge.idle_delay(), Duration::from_secs(86_400));
        let config = TaskConfig {
            idle_delay: MAX_IDLE_DELAY_SECS,
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn parses_partial_toml() {
        let config: TaskConfig = toml::from_str(
            r#"
            number_of_threads = 2
            idle_delay = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.number_of_threads, 2);
        assert_eq!(config.maximum_queue_size, 8);
        assert_eq!(config.idle_delay(), Duration::from_millis(500));
    }
}
