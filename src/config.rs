use std::time::Duration;

use serde::Deserialize;

use crate::types::TemperatureScale;
use crate::{Error, Result};

pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);
pub const DEFAULT_JITTER_RATIO: f64 = 0.5;
const STALE_INTERVALS: u32 = 3;

/// Static configuration handed to the poller at construction.
///
/// Durations deserialize from seconds (integer or fractional).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "secs")]
    pub poll_interval: Duration,
    #[serde(with = "secs")]
    pub request_timeout: Duration,
    pub max_attempts: u32,
    #[serde(with = "secs")]
    pub backoff_base: Duration,
    #[serde(with = "secs")]
    pub backoff_max: Duration,
    pub jitter_ratio: f64,
    #[serde(with = "opt_secs")]
    pub stale_after: Option<Duration>,
    pub temperature_scale: TemperatureScale,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
            jitter_ratio: DEFAULT_JITTER_RATIO,
            stale_after: None,
            temperature_scale: TemperatureScale::default(),
        }
    }
}

impl PollerConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Accepts `host`, `host:port`, a bare IPv6 literal or `[v6]:port`.
    pub fn from_address(addr: &str) -> Result<Self> {
        let parse_port = |port: &str| {
            port.parse()
                .map_err(|_| Error::Config(format!("invalid port in {addr}")))
        };

        if let Some(rest) = addr.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| Error::Config(format!("unterminated [ in {addr}")))?;
            return match tail.strip_prefix(':') {
                Some(port) => Ok(Self::new(host).port(parse_port(port)?)),
                None if tail.is_empty() => Ok(Self::new(host)),
                None => Err(Error::Config(format!("unexpected {tail} after ] in {addr}"))),
            };
        }

        match addr.rsplit_once(':') {
            // more than one colon without brackets: an IPv6 literal, no port
            Some((host, _)) if host.contains(':') => Ok(Self::new(addr)),
            Some((host, port)) => Ok(Self::new(host).port(parse_port(port)?)),
            None => Ok(Self::new(addr)),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio;
        self
    }

    pub fn stale_after(mut self, threshold: Duration) -> Self {
        self.stale_after = Some(threshold);
        self
    }

    pub fn temperature_scale(mut self, scale: TemperatureScale) -> Self {
        self.temperature_scale = scale;
        self
    }

    /// Snapshot age beyond which readings report unavailable.
    pub fn staleness_threshold(&self) -> Duration {
        self.stale_after
            .unwrap_or(self.poll_interval * STALE_INTERVALS)
    }

    pub fn endpoint(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!("http://{host}:{}{}", self.port, crate::protocol::JNAP_PATH)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host is empty".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll_interval must be positive".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(Error::Config(format!(
                "jitter_ratio {} not in 0..=1",
                self.jitter_ratio
            )));
        }
        if self.backoff_max < self.backoff_base {
            return Err(Error::Config("backoff_max below backoff_base".to_string()));
        }
        let endpoint = self.endpoint();
        match reqwest::Url::parse(&endpoint) {
            Ok(url) if url.host().is_some() => Ok(()),
            Ok(_) => Err(Error::Config(format!("no host in {endpoint}"))),
            Err(e) => Err(Error::Config(format!("invalid endpoint {endpoint}: {e}"))),
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(d)? {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
