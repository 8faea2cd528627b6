//! Email address value object.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_object::ValueObject;

/// A validated, normalised (trimmed + lowercased) email address.
///
/// Validation is deliberately shallow: one `@`, a non-empty local part, a
/// dotted domain, no whitespace. Deliverability is the mail transport's
/// problem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let value = raw.trim().to_lowercase();

        if value.is_empty() {
            return Err(DomainError::validation("email must not be empty"));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(DomainError::validation("email must not contain whitespace"));
        }

        let (local, domain) = value
            .split_once('@')
            .ok_or_else(|| DomainError::validation("invalid email format"))?;

        if local.is_empty() || domain.contains('@') {
            return Err(DomainError::validation("invalid email format"));
        }
        if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
            return Err(DomainError::validation("invalid email domain"));
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for EmailAddress {}

impl core::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EmailAddress {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EmailAddress> for String {
    fn from(value: EmailAddress) -> Self {
        value.0
    }
}
