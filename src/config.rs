// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

/// Default time to wait for a complete frame.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Engine settings shared by [`Client`](crate::Client) and [`Server`](crate::Server).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Upper bound for receiving one complete frame.
    ///
    /// The client starts counting once the request has been written.
    pub read_timeout: Duration,
}

impl Config {
    #[must_use]
    pub const fn with_read_timeout(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::with_read_timeout(DEFAULT_READ_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_read_timeout() {
        assert_eq!(Config::default().read_timeout, Duration::from_secs(1));
        assert_eq!(
            Config::with_read_timeout(Duration::from_millis(20)).read_timeout,
            Duration::from_millis(20)
        );
    }
}
