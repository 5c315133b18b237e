//! Pool and container configuration.
//!
//! Pool settings come from deployment properties in the usual
//! `PoolSize`/`MinSize`/`StrictPooling`/`AccessTimeout` form, plus the
//! sweeper knobs `IdleTimeout`, `MaxAge`, `ReplaceAged`, `SweepInterval`
//! and `CloseTimeout`:
//!
//! ```rust
//! use std::time::Duration;
//! use stateless_container::PoolConfig;
//!
//! let config = PoolConfig::from_properties([
//!     ("MaxSize", "4"),
//!     ("MinSize", "1"),
//!     ("StrictPooling", "true"),
//!     ("AccessTimeout", "250 milliseconds"),
//!     ("IdleTimeout", "10 minutes"),
//! ])
//! .unwrap();
//!
//! assert_eq!(config.max_size, 4);
//! assert_eq!(config.access_timeout, Some(Duration::from_millis(250)));
//! assert_eq!(config.idle_timeout, Some(Duration::from_secs(600)));
//! ```

use std::time::Duration;

use tracing::trace;

use crate::error::{Error, Result};
use crate::security::Subject;

/// Default maximum number of instances per pool.
pub const DEFAULT_MAX_SIZE: usize = 10;

/// Default wait for a free instance in strict mode.
pub const DEFAULT_ACCESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pause between two sweeps of the pool.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default wait for checked-out instances when a pool closes.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// Pool configuration
// ============================================================================

/// Sizing and blocking policy of an instance pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of live instances (strict) or pooled instances
    /// (non-strict).
    pub max_size: usize,
    /// Instances created eagerly at deploy time.
    pub min_size: usize,
    /// Block callers when `max_size` instances are checked out instead of
    /// creating surplus instances.
    pub strict: bool,
    /// How long a strict `acquire` waits; `None` waits forever.
    pub access_timeout: Option<Duration>,
    /// Idle instances beyond `min_size` are evicted after this long unused.
    pub idle_timeout: Option<Duration>,
    /// Instances older than this are retired when swept or released.
    pub max_age: Option<Duration>,
    /// Create a replacement for every aged instance, not just enough to
    /// restore `min_size`.
    pub replace_aged: bool,
    /// Pause between sweeps.
    pub sweep_interval: Duration,
    /// How long closing waits for checked-out instances to come back.
    pub close_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            min_size: 0,
            strict: true,
            access_timeout: Some(DEFAULT_ACCESS_TIMEOUT),
            idle_timeout: None,
            max_age: None,
            replace_aged: true,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

impl PoolConfig {
    /// Sets the maximum size.
    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Sets the pre-filled size.
    #[must_use]
    pub fn with_min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    /// Selects strict or non-strict pooling.
    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Sets the access timeout; `None` waits forever.
    #[must_use]
    pub fn with_access_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.access_timeout = timeout;
        self
    }

    /// Sets the idle timeout; `None` keeps idle instances forever.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the maximum instance age; `None` never retires by age.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// Selects whether every aged instance is replaced.
    #[must_use]
    pub fn with_replace_aged(mut self, replace: bool) -> Self {
        self.replace_aged = replace;
        self
    }

    /// Sets the pause between sweeps.
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets how long closing waits for checked-out instances.
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Returns `true` if the pool needs a background sweeper: something
    /// can expire, or `min_size` has to be restored after a discard.
    pub fn needs_sweeper(&self) -> bool {
        self.min_size > 0 || self.idle_timeout.is_some() || self.max_age.is_some()
    }

    /// Checks the settings are consistent.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::Config("pool max size must be at least 1".into()));
        }
        if self.min_size > self.max_size {
            return Err(Error::Config(format!(
                "pool min size {} exceeds max size {}",
                self.min_size, self.max_size
            )));
        }
        if let (Some(idle), Some(age)) = (self.idle_timeout, self.max_age) {
            if idle > age {
                return Err(Error::Config(format!(
                    "idle timeout {idle:?} exceeds max age {age:?}"
                )));
            }
        }
        if self.sweep_interval.is_zero() {
            return Err(Error::Config("sweep interval must be positive".into()));
        }
        Ok(())
    }

    /// Builds a validated config from deployment properties.
    ///
    /// Property names are matched case-insensitively; unknown names are
    /// ignored.
    pub fn from_properties<'a, I>(properties: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();
        for (name, value) in properties {
            let value = value.trim();
            match name.to_ascii_lowercase().as_str() {
                "poolsize" | "maxsize" => config.max_size = parse_size(name, value)?,
                "minsize" => config.min_size = parse_size(name, value)?,
                "strictpooling" => config.strict = parse_bool(name, value)?,
                "accesstimeout" => config.access_timeout = parse_duration(value)?,
                "idletimeout" => config.idle_timeout = parse_duration(value)?.filter(|d| !d.is_zero()),
                "maxage" => config.max_age = parse_duration(value)?.filter(|d| !d.is_zero()),
                "replaceaged" => config.replace_aged = parse_bool(name, value)?,
                "sweepinterval" | "pollinterval" => {
                    config.sweep_interval = parse_duration(value)?
                        .filter(|d| !d.is_zero())
                        .unwrap_or(DEFAULT_SWEEP_INTERVAL);
                }
                "closetimeout" => config.close_timeout = parse_duration(value)?.unwrap_or(Duration::MAX),
                _ => trace!(property = name, "ignoring unknown pool property"),
            }
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_size(name: &str, value: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{name}: '{value}' is not a size")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(Error::Config(format!("{name}: '{value}' is not a boolean")))
    }
}

/// Parses a timeout such as `30 seconds`, `250ms` or `2 minutes`.
///
/// A bare number is milliseconds; a negative number means "no timeout"
/// and yields `None`.
pub fn parse_duration(value: &str) -> Result<Option<Duration>> {
    let value = value.trim();
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '-'))
        .unwrap_or(value.len());
    let (amount, unit) = value.split_at(split);

    let amount: i64 = amount
        .parse()
        .map_err(|_| Error::Config(format!("'{value}' is not a duration")))?;
    if amount < 0 {
        return Ok(None);
    }
    let amount = amount.unsigned_abs();

    let duration = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "ms" | "millisecond" | "milliseconds" => Duration::from_millis(amount),
        "us" | "microsecond" | "microseconds" => Duration::from_micros(amount),
        "s" | "sec" | "second" | "seconds" => Duration::from_secs(amount),
        "m" | "min" | "minute" | "minutes" => Duration::from_secs(amount.saturating_mul(60)),
        "h" | "hour" | "hours" => Duration::from_secs(amount.saturating_mul(3600)),
        other => {
            return Err(Error::Config(format!(
                "'{value}': unknown time unit '{other}'"
            )));
        }
    };
    Ok(Some(duration))
}

// ============================================================================
// Container configuration
// ============================================================================

/// Composition gates of the business and callback chains.
///
/// Evaluated once when the container is built; never per invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Insert the permission-check interceptor.
    pub security_enabled: bool,
    /// Insert the identity-delegation interceptor.
    pub do_as_current_caller: bool,
    /// Insert the JACC policy-context-handler interceptor.
    pub use_context_handler: bool,
    /// Subject installed for invocations that arrive without one.
    pub default_subject: Subject,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            security_enabled: false,
            do_as_current_caller: false,
            use_context_handler: false,
            default_subject: Subject::anonymous(),
        }
    }
}
