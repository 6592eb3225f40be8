use std::time::Duration;

use crate::Error;

/// Coordinator configuration.
///
/// Built and validated through [`Config::builder()`]. Shared between sessions
/// as `Arc<Config>`.
#[derive(Debug, Clone)]
pub struct Config {
    initial_timeout: Duration,
    max_timeout: Duration,
    max_retransmits: usize,
    idle_timeout: Duration,
    cookie_secret_rotation_interval: Duration,
    cookie_bucket: Duration,
    early_data_enabled: bool,
    early_data_capacity_bytes: usize,
    replay_window_size: usize,
    mtu: usize,
    max_queue_rx: usize,
    max_queue_tx: usize,
    rng_seed: Option<u64>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            initial_timeout: Duration::from_secs(1),
            max_timeout: Duration::from_secs(60),
            max_retransmits: 5,
            idle_timeout: Duration::from_secs(60),
            cookie_secret_rotation_interval: Duration::from_secs(300),
            cookie_bucket: Duration::from_secs(30),
            early_data_enabled: true,
            early_data_capacity_bytes: 4096,
            replay_window_size: 64,
            mtu: 1150,
            max_queue_rx: 30,
            max_queue_tx: 30,
            rng_seed: None,
        }
    }

    /// Time of first retransmission.
    ///
    /// Every flight restarts with this value.
    #[inline(always)]
    pub fn initial_timeout(&self) -> Duration {
        self.initial_timeout
    }

    /// Ceiling for the doubled retransmission timeout.
    #[inline(always)]
    pub fn max_timeout(&self) -> Duration {
        self.max_timeout
    }

    /// Max number of retransmissions of one flight before giving up.
    #[inline(always)]
    pub fn max_retransmits(&self) -> usize {
        self.max_retransmits
    }

    /// Time without progress after which a session is closed.
    #[inline(always)]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// How often the cookie secret is replaced.
    #[inline(always)]
    pub fn cookie_secret_rotation_interval(&self) -> Duration {
        self.cookie_secret_rotation_interval
    }

    /// Granularity of the time bucket mixed into cookies.
    ///
    /// A cookie validates in the bucket it was issued in and the one after.
    #[inline(always)]
    pub fn cookie_bucket(&self) -> Duration {
        self.cookie_bucket
    }

    /// Whether 0-RTT early data is accepted (server) or sent (client).
    #[inline(always)]
    pub fn early_data_enabled(&self) -> bool {
        self.early_data_enabled
    }

    /// Max bytes of early data held per session.
    #[inline(always)]
    pub fn early_data_capacity_bytes(&self) -> usize {
        self.early_data_capacity_bytes
    }

    /// Number of sequence numbers tracked by each replay window.
    #[inline(always)]
    pub fn replay_window_size(&self) -> usize {
        self.replay_window_size
    }

    /// Max transmission unit.
    ///
    /// Handshake records are packed into datagrams no larger than this.
    #[inline(always)]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Max handshake messages held while waiting for a complete peer flight.
    #[inline(always)]
    pub fn max_queue_rx(&self) -> usize {
        self.max_queue_rx
    }

    /// Max outgoing datagrams buffered before `poll_output` must be drained.
    #[inline(always)]
    pub fn max_queue_tx(&self) -> usize {
        self.max_queue_tx
    }

    /// Seed for the cookie secret generator. Only for tests.
    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }
}

/// Builder for [`Config`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    initial_timeout: Duration,
    max_timeout: Duration,
    max_retransmits: usize,
    idle_timeout: Duration,
    cookie_secret_rotation_interval: Duration,
    cookie_bucket: Duration,
    early_data_enabled: bool,
    early_data_capacity_bytes: usize,
    replay_window_size: usize,
    mtu: usize,
    max_queue_rx: usize,
    max_queue_tx: usize,
    rng_seed: Option<u64>,
}

impl ConfigBuilder {
    /// Set the time of first retransmission.
    ///
    /// Defaults to 1 second.
    pub fn initial_timeout(mut self, timeout: Duration) -> Self {
        self.initial_timeout = timeout;
        self
    }

    /// Set the ceiling for the retransmission timeout.
    ///
    /// Defaults to 60 seconds.
    pub fn max_timeout(mut self, timeout: Duration) -> Self {
        self.max_timeout = timeout;
        self
    }

    /// Set the max number of retransmissions per flight.
    ///
    /// Defaults to 5.
    pub fn max_retransmits(mut self, count: usize) -> Self {
        self.max_retransmits = count;
        self
    }

    /// Set the session idle timeout.
    ///
    /// Defaults to 60 seconds.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set how often the cookie secret rotates.
    ///
    /// Defaults to 5 minutes.
    pub fn cookie_secret_rotation_interval(mut self, interval: Duration) -> Self {
        self.cookie_secret_rotation_interval = interval;
        self
    }

    /// Set the cookie time bucket granularity.
    ///
    /// Defaults to 30 seconds.
    pub fn cookie_bucket(mut self, bucket: Duration) -> Self {
        self.cookie_bucket = bucket;
        self
    }

    /// Enable or disable 0-RTT early data.
    ///
    /// Defaults to true.
    pub fn early_data_enabled(mut self, enabled: bool) -> Self {
        self.early_data_enabled = enabled;
        self
    }

    /// Set the per-session early data byte ceiling.
    ///
    /// Defaults to 4096.
    pub fn early_data_capacity_bytes(mut self, bytes: usize) -> Self {
        self.early_data_capacity_bytes = bytes;
        self
    }

    /// Set the replay window size. Must be a non-zero multiple of 64.
    ///
    /// Defaults to 64.
    pub fn replay_window_size(mut self, size: usize) -> Self {
        self.replay_window_size = size;
        self
    }

    /// Set the max transmission unit.
    ///
    /// Defaults to 1150.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the max number of buffered inbound handshake messages.
    ///
    /// Defaults to 30.
    pub fn max_queue_rx(mut self, max_queue_rx: usize) -> Self {
        self.max_queue_rx = max_queue_rx;
        self
    }

    /// Set the max number of buffered outgoing datagrams.
    ///
    /// Defaults to 30.
    pub fn max_queue_tx(mut self, max_queue_tx: usize) -> Self {
        self.max_queue_tx = max_queue_tx;
        self
    }

    /// Seed the cookie secret generator for deterministic tests.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Build the configuration.
    ///
    /// Returns `Error::Config` for inconsistent values, before any session
    /// exists or any datagram is sent.
    pub fn build(self) -> Result<Config, Error> {
        if self.initial_timeout.is_zero() {
            return Err(Error::Config("initial_timeout must be non-zero".into()));
        }
        if self.max_timeout < self.initial_timeout {
            return Err(Error::Config(format!(
                "max_timeout {:?} is less than initial_timeout {:?}",
                self.max_timeout, self.initial_timeout
            )));
        }
        if self.max_retransmits == 0 {
            return Err(Error::Config("max_retransmits must be at least 1".into()));
        }
        if self.idle_timeout.is_zero() {
            return Err(Error::Config("idle_timeout must be non-zero".into()));
        }
        if self.cookie_secret_rotation_interval.is_zero() {
            return Err(Error::Config(
                "cookie_secret_rotation_interval must be non-zero".into(),
            ));
        }
        if self.cookie_bucket.as_secs() == 0 {
            return Err(Error::Config(
                "cookie_bucket must be at least one second".into(),
            ));
        }
        if self.early_data_enabled && self.early_data_capacity_bytes == 0 {
            return Err(Error::Config(
                "early_data_capacity_bytes must be non-zero when early data is enabled".into(),
            ));
        }
        if self.replay_window_size == 0 || self.replay_window_size % 64 != 0 {
            return Err(Error::Config(format!(
                "replay_window_size {} is not a non-zero multiple of 64",
                self.replay_window_size
            )));
        }
        // Record header plus handshake header plus a cookie must fit.
        if self.mtu < 128 {
            return Err(Error::Config(format!("mtu {} is too small", self.mtu)));
        }
        if self.max_queue_rx == 0 || self.max_queue_tx == 0 {
            return Err(Error::Config("queue sizes must be non-zero".into()));
        }

        Ok(Config {
            initial_timeout: self.initial_timeout,
            max_timeout: self.max_timeout,
            max_retransmits: self.max_retransmits,
            idle_timeout: self.idle_timeout,
            cookie_secret_rotation_interval: self.cookie_secret_rotation_interval,
            cookie_bucket: self.cookie_bucket,
            early_data_enabled: self.early_data_enabled,
            early_data_capacity_bytes: self.early_data_capacity_bytes,
            replay_window_size: self.replay_window_size,
            mtu: self.mtu,
            max_queue_rx: self.max_queue_rx,
            max_queue_tx: self.max_queue_tx,
            rng_seed: self.rng_seed,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder()
            .build()
            .expect("Default config should always validate")
    }
}
