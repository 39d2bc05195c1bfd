//! # Client Configuration
//!
//! Policy and defaults consumed by the cluster tending layer. The cluster
//! crate never reads files or the environment itself; it is handed a
//! [`ClientPolicy`] built here.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use client_config::{ClientPolicy, defaults};
//!
//! let policy = ClientPolicy::load(Some("config/client.toml".as_ref()), None)?;
//! assert!(policy.connection_queue_size > 0);
//! assert_eq!(defaults::DEFAULT_PORT, 3000);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod defaults;
pub mod policy;

// Re-export commonly used types
pub use policy::{ClientPolicy, TlsOptions, load_policy};
