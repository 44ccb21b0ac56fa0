//! Contains the lease settings of a lookaside stage and the backoff schedule derived from them.
//!
//! If leases are enabled, a lookup which observes a **hot miss** (someone else is currently
//! computing the missing entry) is retried. The first attempt happens immediately, each retry
//! waits for **initial_wait_ms** which doubles per retry but never exceeds **max_wait_ms**. At
//! most **num_retries** retries are performed.
//!
//! # Example
//!
//! ```
//! # use std::time::Duration;
//! # use lookaside::lookaside::lease::LeaseSettings;
//! let settings = LeaseSettings {
//!     enabled: true,
//!     initial_wait_ms: 2,
//!     max_wait_ms: 10,
//!     num_retries: 4,
//! };
//!
//! let delays: Vec<u64> = settings.backoff().map(|delay| delay.as_millis() as u64).collect();
//! assert_eq!(delays, vec![0, 2, 4, 8, 10]);
//! ```
use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde_json::Value;

use crate::fmt::format_duration;
use crate::lookaside::factory::{optional_bool, optional_non_negative};

/// Contains the default initial wait between two lease attempts in milliseconds.
pub const DEFAULT_INITIAL_WAIT_MS: u64 = 2;

/// Contains the default upper bound of the wait between two lease attempts in milliseconds.
pub const DEFAULT_MAX_WAIT_MS: u64 = 500;

/// Contains the default number of retries after a hot miss.
pub const DEFAULT_NUM_RETRIES: u32 = 10;

/// Describes if and how leases are used to protect against stampedes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LeaseSettings {
    /// Determines if leases are used at all.
    pub enabled: bool,
    /// Contains the wait before the first retry in milliseconds.
    pub initial_wait_ms: u64,
    /// Contains the upper bound of the wait between two attempts in milliseconds.
    pub max_wait_ms: u64,
    /// Contains the max number of retries after a hot miss.
    pub num_retries: u32,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        LeaseSettings {
            enabled: false,
            initial_wait_ms: DEFAULT_INITIAL_WAIT_MS,
            max_wait_ms: DEFAULT_MAX_WAIT_MS,
            num_retries: DEFAULT_NUM_RETRIES,
        }
    }
}

impl LeaseSettings {
    /// Returns the default settings with leases being enabled.
    pub fn enabled() -> Self {
        LeaseSettings {
            enabled: true,
            ..LeaseSettings::default()
        }
    }

    /// Returns the delays to wait before each attempt.
    ///
    /// The schedule contains exactly **num_retries + 1** entries, the first one being zero.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            next_wait_ms: None,
            initial_wait_ms: self.initial_wait_ms,
            max_wait_ms: self.max_wait_ms,
            remaining: self.num_retries as u64 + 1,
        }
    }

    /// Reads the lease settings from the given configuration object.
    ///
    /// The properties **lease_enable**, **lease_initial_wait_ms**, **lease_max_wait_ms** and
    /// **lease_num_retries** are all optional.
    ///
    /// # Errors
    /// Fails if a property has the wrong type, if a value is negative or if the initial wait
    /// exceeds the max wait.
    ///
    /// # Example
    /// ```
    /// # use serde_json::json;
    /// # use lookaside::lookaside::lease::LeaseSettings;
    /// let settings = LeaseSettings::parse(&json!({"lease_enable": true, "lease_num_retries": 3}))
    ///     .unwrap();
    /// assert_eq!(settings.enabled, true);
    /// assert_eq!(settings.num_retries, 3);
    /// assert_eq!(settings.initial_wait_ms, 2);
    ///
    /// assert_eq!(LeaseSettings::parse(&json!({"lease_max_wait_ms": -1})).is_err(), true);
    /// ```
    pub fn parse(config: &Value) -> anyhow::Result<Self> {
        let defaults = LeaseSettings::default();
        let settings = LeaseSettings {
            enabled: optional_bool(config, "lease_enable", defaults.enabled)?,
            initial_wait_ms: optional_non_negative(
                config,
                "lease_initial_wait_ms",
                defaults.initial_wait_ms,
            )?,
            max_wait_ms: optional_non_negative(config, "lease_max_wait_ms", defaults.max_wait_ms)?,
            num_retries: optional_non_negative(
                config,
                "lease_num_retries",
                defaults.num_retries as u64,
            )?
            .try_into()
            .map_err(|_| anyhow::anyhow!("LookasideRoute: 'lease_num_retries' is too large."))?,
        };

        if settings.initial_wait_ms > settings.max_wait_ms {
            return Err(anyhow::anyhow!(
                "LookasideRoute: 'lease_initial_wait_ms' ({}) must not exceed 'lease_max_wait_ms' ({}).",
                settings.initial_wait_ms,
                settings.max_wait_ms
            ));
        }

        Ok(settings)
    }
}

impl Display for LeaseSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if !self.enabled {
            return write!(f, "disabled");
        }

        write!(
            f,
            "enabled ({} retries, waiting {} up to {})",
            self.num_retries,
            format_duration(Duration::from_millis(self.initial_wait_ms)),
            format_duration(Duration::from_millis(self.max_wait_ms))
        )
    }
}

/// Yields the delay to wait before each lease attempt.
///
/// Created by [LeaseSettings::backoff].
pub struct Backoff {
    next_wait_ms: Option<u64>,
    initial_wait_ms: u64,
    max_wait_ms: u64,
    remaining: u64,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let wait_ms = match self.next_wait_ms {
            None => {
                self.next_wait_ms = Some(self.initial_wait_ms.min(self.max_wait_ms));
                0
            }
            Some(wait_ms) => {
                self.next_wait_ms = Some(wait_ms.saturating_mul(2).min(self.max_wait_ms));
                wait_ms
            }
        };

        Some(Duration::from_millis(wait_ms))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Backoff {}
