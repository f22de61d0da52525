//! Operator configuration
//!
//! Defines all configurable parameters for the operator: resource API
//! connection, driver concurrency, lease timing and controller intervals.

use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Operator configuration
///
/// All timeouts and intervals are configurable to allow tuning
/// for different deployment scenarios (dev vs prod, fast vs slow stores).
#[derive(Debug, Clone)]
pub struct Config {
    /// Lease holder identity of this operator instance
    pub driver_id: String,

    /// Resource API base URL (e.g., "http://localhost:8080")
    pub api_url: String,

    /// Namespace whose Jobs, Repositories and Connections are watched
    pub namespace: String,

    /// Number of concurrent claim loops
    pub parallel_drivers: usize,

    /// Upper bound on a single job's execution
    pub max_job_runtime: Duration,

    /// How often stale jobs are requeued and terminal leftovers archived
    pub cleanup_interval: Duration,

    /// How often an idle claim loop polls the store without a notification
    pub poll_interval: Duration,

    /// Lease granted on claim and on every renewal
    pub lease_duration: Duration,

    /// How often a running job's lease is renewed; shorter than the lease
    pub lease_renewal_interval: Duration,

    /// Age after which archived jobs are deleted
    pub history_expiration: Duration,

    /// Relist interval of the repository, connection and history informers
    pub resync_interval: Duration,

    /// Relist interval of the job informer feeding driver notifications
    pub job_watch_interval: Duration,

    /// Pending notifications buffered for the driver before new ones are dropped
    pub notification_buffer: usize,

    /// Address the health endpoint listens on
    pub health_bind_addr: SocketAddr,
}

/// Timing the job driver runs with
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub driver_id: String,
    pub parallel_drivers: usize,
    pub max_job_runtime: Duration,
    pub cleanup_interval: Duration,
    pub poll_interval: Duration,
    pub lease_duration: Duration,
    pub lease_renewal_interval: Duration,
}

/// Parses an optional raw setting; absent means `default`, malformed is an error
fn parse_setting<T>(name: &str, raw: Option<&str>, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match raw.map(str::trim) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {} '{}': {}", name, value, e)),
    }
}

fn env_secs(name: &str, default: u64) -> anyhow::Result<Duration> {
    let raw = std::env::var(name).ok();
    parse_setting(name, raw.as_deref(), default).map(Duration::from_secs)
}

fn env_usize(name: &str, default: usize) -> anyhow::Result<usize> {
    let raw = std::env::var(name).ok();
    parse_setting(name, raw.as_deref(), default)
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(driver_id: String, api_url: String) -> Self {
        Self {
            driver_id,
            api_url,
            namespace: "default".to_string(),
            parallel_drivers: 3,
            max_job_runtime: Duration::from_secs(900), // 15 minutes
            cleanup_interval: Duration::from_secs(60),
            poll_interval: Duration::from_secs(10),
            lease_duration: Duration::from_secs(30),
            lease_renewal_interval: Duration::from_secs(10),
            history_expiration: Duration::from_secs(86_400), // 24 hours
            resync_interval: Duration::from_secs(30),
            job_watch_interval: Duration::from_secs(2),
            notification_buffer: 100,
            health_bind_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - PROVISIONER_API_URL (required)
    /// - PROVISIONER_NAMESPACE (optional, default: default)
    /// - PROVISIONER_DRIVER_ID (optional, default: random)
    /// - PARALLEL_DRIVERS (optional, default: 3)
    /// - MAX_JOB_RUNTIME (optional, seconds, default: 900)
    /// - CLEANUP_INTERVAL (optional, seconds, default: 60)
    /// - POLL_INTERVAL (optional, seconds, default: 10)
    /// - LEASE_DURATION (optional, seconds, default: 30)
    /// - LEASE_RENEWAL_INTERVAL (optional, seconds, default: 10)
    /// - HISTORY_EXPIRATION (optional, seconds, default: 86400)
    /// - RESYNC_INTERVAL (optional, seconds, default: 30)
    /// - JOB_WATCH_INTERVAL (optional, seconds, default: 2)
    /// - HEALTH_BIND_ADDR (optional, default: 0.0.0.0:8081)
    pub fn from_env() -> anyhow::Result<Self> {
        let api_url = std::env::var("PROVISIONER_API_URL")
            .map_err(|_| anyhow::anyhow!("PROVISIONER_API_URL environment variable not set"))?;

        let driver_id = std::env::var("PROVISIONER_DRIVER_ID")
            .unwrap_or_else(|_| format!("driver-{}", uuid::Uuid::new_v4()));

        let mut config = Self::new(driver_id, api_url);

        if let Ok(namespace) = std::env::var("PROVISIONER_NAMESPACE") {
            config.namespace = namespace;
        }

        if let Ok(addr) = std::env::var("HEALTH_BIND_ADDR") {
            config.health_bind_addr = addr
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid HEALTH_BIND_ADDR '{}': {}", addr, e))?;
        }

        config.parallel_drivers = env_usize("PARALLEL_DRIVERS", config.parallel_drivers)?;
        config.max_job_runtime = env_secs("MAX_JOB_RUNTIME", 900)?;
        config.cleanup_interval = env_secs("CLEANUP_INTERVAL", 60)?;
        config.poll_interval = env_secs("POLL_INTERVAL", 10)?;
        config.lease_duration = env_secs("LEASE_DURATION", 30)?;
        config.lease_renewal_interval = env_secs("LEASE_RENEWAL_INTERVAL", 10)?;
        config.history_expiration = env_secs("HISTORY_EXPIRATION", 86_400)?;
        config.resync_interval = env_secs("RESYNC_INTERVAL", 30)?;
        config.job_watch_interval = env_secs("JOB_WATCH_INTERVAL", 2)?;

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.driver_id.is_empty() {
            anyhow::bail!("driver_id cannot be empty");
        }

        if self.namespace.is_empty() {
            anyhow::bail!("namespace cannot be empty");
        }

        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            anyhow::bail!("api_url must start with http:// or https://");
        }

        if self.parallel_drivers == 0 {
            anyhow::bail!("parallel_drivers must be greater than 0");
        }

        if self.notification_buffer == 0 {
            anyhow::bail!("notification_buffer must be greater than 0");
        }

        for (name, value) in [
            ("max_job_runtime", self.max_job_runtime),
            ("cleanup_interval", self.cleanup_interval),
            ("poll_interval", self.poll_interval),
            ("lease_duration", self.lease_duration),
            ("lease_renewal_interval", self.lease_renewal_interval),
            ("history_expiration", self.history_expiration),
            ("resync_interval", self.resync_interval),
            ("job_watch_interval", self.job_watch_interval),
        ] {
            if value.is_zero() {
                anyhow::bail!("{} must be greater than 0", name);
            }
        }

        if self.lease_renewal_interval >= self.lease_duration {
            anyhow::bail!("lease_renewal_interval must be shorter than lease_duration");
        }

        Ok(())
    }

    pub fn driver(&self) -> DriverConfig {
        DriverConfig {
            driver_id: self.driver_id.clone(),
            parallel_drivers: self.parallel_drivers,
            max_job_runtime: self.max_job_runtime,
            cleanup_interval: self.cleanup_interval,
            poll_interval: self.poll_interval,
            lease_duration: self.lease_duration,
            lease_renewal_interval: self.lease_renewal_interval,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            format!("driver-{}", uuid::Uuid::new_v4()),
            "http://localhost:8080".to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.parallel_drivers, 3);
        assert_eq!(config.max_job_runtime, Duration::from_secs(900));
        assert_eq!(config.lease_duration, Duration::from_secs(30));
        assert_eq!(config.lease_renewal_interval, Duration::from_secs(10));
        assert_eq!(config.health_bind_addr.port(), 8081);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        // Valid config should pass
        assert!(config.validate().is_ok());

        // Empty driver_id should fail
        config.driver_id = String::new();
        assert!(config.validate().is_err());

        config.driver_id = "test".to_string();

        // Invalid URL should fail
        config.api_url = "not-a-url".to_string();
        assert!(config.validate().is_err());

        config.api_url = "http://localhost:8080".to_string();
        assert!(config.validate().is_ok());

        config.parallel_drivers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_renewal_must_be_shorter_than_lease() {
        let mut config = Config::default();
        config.lease_renewal_interval = config.lease_duration;
        assert!(config.validate().is_err());

        config.lease_renewal_interval = Duration::from_secs(5);
        assert!(config.validate().is_ok());

        config.poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings_fall_back_only_when_absent() {
        assert_eq!(parse_setting::<u64>("LEASE_DURATION", None, 30).unwrap(), 30);
        assert_eq!(parse_setting::<u64>("LEASE_DURATION", Some(" 45 "), 30).unwrap(), 45);
        assert_eq!(parse_setting::<usize>("PARALLEL_DRIVERS", Some("8"), 3).unwrap(), 8);
    }

    #[test]
    fn test_malformed_setting_names_variable() {
        let err = parse_setting::<u64>("LEASE_DURATION", Some("abc"), 30).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("LEASE_DURATION"), "{}", message);
        assert!(message.contains("'abc'"), "{}", message);

        assert!(parse_setting::<usize>("PARALLEL_DRIVERS", Some("-1"), 3).is_err());
        assert!(parse_setting::<u64>("POLL_INTERVAL", Some(""), 10).is_err());
    }

    #[test]
    fn test_driver_config_mirrors_settings() {
        let config = Config::new("driver-a".to_string(), "http://api".to_string());
        let driver = config.driver();
        assert_eq!(driver.driver_id, "driver-a");
        assert_eq!(driver.parallel_drivers, config.parallel_drivers);
        assert_eq!(driver.poll_interval, config.poll_interval);
    }
}
