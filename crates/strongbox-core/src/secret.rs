//! Redacting wrapper for datastore credentials
//!
//! Passwords parsed out of connection strings or the environment are held in
//! a [`SecretString`] so they never reach logs, error messages or the admin
//! surface. The value is zeroed on drop and can only be read through
//! [`Secret::expose_secret`].
//!
//! ```
//! use strongbox_core::secret::SecretString;
//!
//! let password = SecretString::from_string("hunter2".to_string());
//! assert_eq!(format!("{password:?}"), "[REDACTED]");
//! assert_eq!(password.expose_as_str(), "hunter2");
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A value that prints and serializes as `[REDACTED]`
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret<T: Zeroize> {
    inner: T,
}

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self { inner: value }
    }

    /// Borrow the secret value.
    ///
    /// The only accessor. Callers hand the value straight to a driver or a
    /// child process environment and never store or log it.
    pub fn expose_secret(&self) -> &T {
        &self.inner
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T: Zeroize> Serialize for Secret<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("[REDACTED]")
    }
}

// Config files carry plain passwords; only the outbound direction redacts.
impl<'de, T: Zeroize + Deserialize<'de>> Deserialize<'de> for Secret<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = T::deserialize(deserializer)?;
        Ok(Secret::new(inner))
    }
}

pub type SecretString = Secret<String>;

impl SecretString {
    pub fn from_string(s: String) -> Self {
        Secret::new(s)
    }

    /// Shorthand for `expose_secret().as_str()`
    pub fn expose_as_str(&self) -> &str {
        &self.inner
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl Eq for SecretString {}
