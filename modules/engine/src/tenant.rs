//! Tenant context
//!
//! Every persisted row and every out-edge carries the tenant it belongs to.
//! The context is an explicit value bound at operation entry (from the
//! `X-Tenant-Id` header) and threaded through every core call — never
//! process-global state. Repositories refuse to act without it, and the
//! Postgres adapters additionally bind it as a session variable so row-level
//! security policies apply to every query in the transaction.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque tenant identifier. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Result<Self, TenantError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(TenantError::Missing);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TenantError {
    #[error("tenant id missing")]
    Missing,

    #[error("unknown tenant: {0}")]
    Unknown(String),
}

/// Ambient per-operation tenant scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    /// Build a context straight from a header value.
    pub fn from_header(value: &str) -> Result<Self, TenantError> {
        Ok(Self::new(TenantId::new(value)?))
    }

    pub fn tenant_str(&self) -> &str {
        self.tenant_id.as_str()
    }

    /// True when `row_tenant` belongs to this context's tenant. Repository
    /// reads use this to make cross-tenant rows indistinguishable from
    /// missing rows.
    pub fn owns(&self, row_tenant: &TenantId) -> bool {
        &self.tenant_id == row_tenant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_tenant() {
        assert!(TenantId::new("").is_err());
        assert!(TenantId::new("   ").is_err());
    }

    #[test]
    fn test_from_header() {
        let ctx = TenantContext::from_header("tenant-a").unwrap();
        assert_eq!(ctx.tenant_str(), "tenant-a");
    }

    #[test]
    fn test_ownership_check() {
        let ctx = TenantContext::from_header("tenant-a").unwrap();
        assert!(ctx.owns(&TenantId::new("tenant-a").unwrap()));
        assert!(!ctx.owns(&TenantId::new("tenant-b").unwrap()));
    }
}
