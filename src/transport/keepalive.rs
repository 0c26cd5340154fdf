//! TCP keep-alive tuning.
//!
//! tokio only exposes an on/off switch for `SO_KEEPALIVE`, so the idle
//! time, probe interval and probe count are set through `socket2`.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use sockwire::transport::KeepAlive;
//!
//! let keep_alive = KeepAlive::default().time(Duration::from_secs(60));
//! keep_alive.apply(&stream)?;
//! ```

use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

use crate::error::Result;

/// Default idle time before the first probe.
pub const DEFAULT_KEEPALIVE_TIME: Duration = Duration::from_secs(300);

/// Default interval between probes.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of unanswered probes before the connection is dropped.
pub const DEFAULT_KEEPALIVE_RETRIES: u32 = 2;

/// TCP keep-alive parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    /// Idle time before the first probe.
    pub time: Duration,
    /// Time between unanswered probes.
    pub interval: Duration,
    /// Unanswered probes before the connection is considered dead.
    pub retries: u32,
}

impl KeepAlive {
    /// Set the idle time.
    pub fn time(mut self, time: Duration) -> Self {
        self.time = time;
        self
    }

    /// Set the probe interval.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the probe count.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Enable keep-alive with these parameters on a connected stream.
    pub fn apply(&self, stream: &TcpStream) -> Result<()> {
        let params = TcpKeepalive::new().with_time(self.time);

        #[cfg(any(
            target_os = "linux",
            target_os = "android",
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "netbsd",
            windows
        ))]
        let params = params.with_interval(self.interval);

        #[cfg(any(
            target_os = "linux",
            target_os = "android",
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "netbsd"
        ))]
        let params = params.with_retries(self.retries);

        SockRef::from(stream).set_tcp_keepalive(&params)?;
        tracing::debug!(
            "TCP keep-alive enabled (time {:?}, interval {:?}, retries {})",
            self.time,
            self.interval,
            self.retries
        );
        Ok(())
    }
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            time: DEFAULT_KEEPALIVE_TIME,
            interval: DEFAULT_KEEPALIVE_INTERVAL,
            retries: DEFAULT_KEEPALIVE_RETRIES,
        }
    }
}
