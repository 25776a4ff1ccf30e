//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use these
//! types for all sensitive configuration values: database URLs with
//! embedded credentials, search backend URLs, API keys.
//!
//! `SecretString` implements `Debug` with redaction, so any struct that
//! derives `Debug` while holding a secret gets safe logging behavior for
//! free, and the inner value is zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::SecretString;
//! use secrecy::ExposeSecret;
//!
//! #[derive(Debug)]
//! struct StoreConfig {
//!     pool_size: u32,
//!     database_url: SecretString, // Debug shows "[REDACTED]"
//! }
//!
//! let cfg = StoreConfig {
//!     pool_size: 8,
//!     database_url: SecretString::from("postgres://user:hunter2@db/parley"),
//! };
//!
//! // Safe - the URL is redacted
//! println!("{:?}", cfg);
//!
//! // Access requires an explicit expose_secret() call
//! let url: &str = cfg.database_url.expose_secret();
//! ```

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("hunter2");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("postgres://u:p@localhost/db");
        assert_eq!(secret.expose_secret(), "postgres://u:p@localhost/db");
    }

    #[test]
    fn test_struct_with_secret_is_safe() {
        #[allow(dead_code)]
        #[derive(Debug)]
        struct BackendConfig {
            endpoint: String,
            api_key: SecretString,
        }

        let cfg = BackendConfig {
            endpoint: "https://search:9200".to_string(),
            api_key: SecretString::from("super-secret"),
        };

        let debug_str = format!("{cfg:?}");

        // Endpoint should be visible
        assert!(debug_str.contains("search:9200"));
        // Key should be redacted
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("super-secret"));
    }

    #[test]
    fn test_clone_works() {
        let secret = SecretString::from("cloneable");
        let cloned = secret.clone();
        assert_eq!(cloned.expose_secret(), "cloneable");
    }
}
