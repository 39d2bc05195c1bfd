//! Default configuration values
//!
//! Values used when a field is absent from the policy file and constants
//! shared by the tending layer.

/// Server port used when a host string carries none
pub const DEFAULT_PORT: u16 = 3000;

/// Connect timeout (milliseconds)
pub const CONNECT_TIMEOUT_MS: u64 = 1_000;

/// Delay between two tend cycles (milliseconds)
pub const TEND_INTERVAL_MS: u64 = 1_000;

/// Idle connections kept per node
pub const CONNECTION_QUEUE_SIZE: usize = 64;

/// Per-request timeout used by the tend worker (milliseconds).
///
/// Kept small so one dead node cannot stall a whole cycle.
pub const TEND_REQUEST_TIMEOUT_MS: u64 = 1_000;

/// Environment variable prefix for policy overrides
pub const ENV_PREFIX: &str = "KVCLIENT";
