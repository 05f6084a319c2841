//! NewType wrappers for the string values that flow through authentication.
//!
//! These keep an opaque refresh secret from being passed where an email or a
//! password digest is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

newtype_string!(
    /// Opaque refresh secret handed to the client (cookie or body).
    ///
    /// 32 random bytes, base64url encoded without padding. It is the lookup
    /// key of a session row and is unique across all sessions.
    RefreshToken
);

newtype_string!(
    /// Hex encoded SHA-256 digest of a user password.
    ///
    /// Passwords are never stored in plain text; sign-in compares digests.
    PasswordHash
);

newtype_string!(
    /// User email address, the login name for sign-in.
    Email
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_token_creation() {
        let token = RefreshToken::new("abc123");
        assert_eq!(token.as_str(), "abc123");
        assert_eq!(token.to_string(), "abc123");
    }

    #[test]
    fn test_refresh_token_into_inner() {
        let token: RefreshToken = String::from("xyz").into();
        assert_eq!(token.into_inner(), "xyz");
    }

    #[test]
    fn test_email_serde_is_transparent() {
        let email = Email::new("student@uni.example");
        let json = serde_json::to_string(&email).unwrap();
        assert_eq!(json, "\"student@uni.example\"");

        let parsed: Email = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, email);
    }

    #[test]
    fn test_password_hash_equality() {
        let a = PasswordHash::new("deadbeef");
        let b: PasswordHash = "deadbeef".into();
        assert_eq!(a, b);
        assert_ne!(a, PasswordHash::new("cafebabe"));
    }
}
