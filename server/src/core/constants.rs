// =============================================================================
// Application Identity
// =============================================================================

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "relay";

// =============================================================================
// Environment Variables
// =============================================================================

/// Environment variable for the config file path
pub const ENV_CONFIG: &str = "CONFIG_PATH";

/// Environment variable for the bind address
pub const ENV_ADDR: &str = "RELAY_ADDR";

/// Environment variable for the bind port
pub const ENV_PORT: &str = "RELAY_PORT";

/// Environment variable for the log filter (falls back to RUST_LOG)
pub const ENV_LOG: &str = "RELAY_LOG";

/// Environment variable for the log profile (local, dev or prod)
pub const ENV_LOG_ENV: &str = "RELAY_LOG_ENV";

// =============================================================================
// Shutdown Defaults
// =============================================================================

/// Default maximum wait for handler drain during shutdown, in seconds
pub const DEFAULT_CLOSE_TIMEOUT_SECS: u64 = 5;
