//! Value objects for the onboarding domain.

use serde::{Deserialize, Serialize};

use super::ValidationError;

const MAX_TENANT_ID_LEN: usize = 63;

/// Tenant identifier, a DNS-label style slug.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a tenant ID after checking it is a valid slug.
    pub fn parse(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = TenantId(id.into());
        id.validate()?;
        Ok(id)
    }

    /// Checks the slug rules: 1..=63 lowercase alphanumerics or `-`, no leading or trailing `-`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let s = self.0.as_str();
        if s.is_empty() {
            return Err(ValidationError::Empty { field: "tenant_id" });
        }
        if s.len() > MAX_TENANT_ID_LEN {
            return Err(ValidationError::TooLong {
                field: "tenant_id",
                max: MAX_TENANT_ID_LEN,
            });
        }
        let valid_chars = s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !valid_chars || s.starts_with('-') || s.ends_with('-') {
            return Err(ValidationError::InvalidTenantId(s.to_string()));
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Administrator contact address for a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn parse(address: impl Into<String>) -> Result<Self, ValidationError> {
        let address = EmailAddress(address.into());
        address.validate()?;
        Ok(address)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut parts = self.0.split('@');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty() => Ok(()),
            _ => Err(ValidationError::InvalidEmail(self.0.clone())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cloud region name (e.g. `eu-west-1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Region(String);

impl Region {
    pub fn new(region: impl Into<String>) -> Self {
        Self(region.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Region {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
