// src/config/constants.rs
//! System-wide configuration constants

/// Server connection constants
pub mod server {
    pub const DEFAULT_HOST: &str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 50223;
    pub const DEFAULT_CLIENT_PORT: u16 = 50224;
}

/// Streaming acquisition constants
pub mod acquisition {
    /// Consecutive zero-sample reads after which the producer gives up
    pub const MAX_EMPTY_DATA_LOOPS: usize = 1000;

    /// Block size hint used when a sampling rate has no recommended value
    pub const DEFAULT_NUMBER_OF_SCANS: u32 = 8;

    pub const PRODUCER_THREAD_NAME: &str = "amp-producer";
}

/// Channel layout constants
pub mod channels {
    /// Sentinel for "no filter" in the native filter-index fields
    pub const NO_FILTER_INDEX: i64 = -1;

    /// Values contributed by the accelerometer auxiliary channel (x, y, z)
    pub const ACCELERATION_AXES: usize = 3;
}

/// Family C input-signal selectors
pub mod inputs {
    pub const ELECTRODE: i64 = 0;
    pub const SHORTCUT: i64 = 1;
    pub const TEST_SIGNAL: i64 = 5;
}

/// Logging constants
pub mod logging {
    pub const DEFAULT_LEVEL: &str = "info";
}

/// Configuration file discovery
pub mod paths {
    pub const DEFAULT_CONFIG_FILE: &str = "amp-core.toml";
    pub const CONFIG_ENV_VAR: &str = "AMP_CORE_CONFIG";
}
