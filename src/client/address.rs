//! Recipient normalization into chat addresses.

use crate::error::ClientError;
use std::fmt;
use std::str::FromStr;

/// Suffix of direct (one-to-one) chat addresses.
const DIRECT_SUFFIX: &str = "@c.us";

/// A normalized, stable chat address.
///
/// Bare numbers keep only their digits and get the direct-chat suffix, so
/// `+54 9 (11) 1234-5678` and `5491112345678` address the same chat.
/// Inputs that already carry a server part (`...@g.us`) are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatAddress(String);

impl ChatAddress {
    pub fn parse(raw: &str) -> Result<Self, ClientError> {
        let raw = raw.trim();
        if let Some((user, server)) = raw.split_once('@') {
            if user.is_empty() || server.is_empty() {
                return Err(ClientError::InvalidAddress(raw.to_string()));
            }
            return Ok(Self(raw.to_string()));
        }

        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return Err(ClientError::InvalidAddress(raw.to_string()));
        }
        Ok(Self(format!("{digits}{DIRECT_SUFFIX}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before `@`.
    pub fn user(&self) -> &str {
        self.0.split_once('@').map_or(self.0.as_str(), |(user, _)| user)
    }
}

impl FromStr for ChatAddress {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ChatAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
