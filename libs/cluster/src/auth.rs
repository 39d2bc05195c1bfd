//! Authentication contract
//!
//! The handshake and the password hashing scheme belong to the server
//! protocol; the connection factory only needs to run them on every freshly
//! dialed connection when credentials are configured.

use crate::transport::Connection;
use crate::Result;
use async_trait::async_trait;
use std::fmt;

/// Runs the login handshake on a new connection
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate `conn`; an error leaves the connection unusable
    async fn authenticate(
        &self,
        conn: &mut dyn Connection,
        user: &str,
        hashed_password: &str,
    ) -> Result<()>;

    /// Hash a clear-text password into the form sent by `authenticate`
    fn hash_password(&self, password: &str) -> String;
}

/// User name plus already-hashed password
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub hashed_password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, hashed_password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            hashed_password: hashed_password.into(),
        }
    }
}

// Keep the hash out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("hashed_password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::new("admin", "$2a$10$secret");
        let shown = format!("{:?}", creds);
        assert!(shown.contains("admin"));
        assert!(!shown.contains("secret"));
    }
}
