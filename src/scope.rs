use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::period::{BucketLabel, Period};

// Identifier used for a service or route when none is bound.
pub const EMPTY_SCOPE: Uuid = Uuid::nil();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub service_id: Uuid,
    pub route_id: Uuid,
}

impl Scope {
    pub fn new(service_id: Option<Uuid>, route_id: Option<Uuid>) -> Self {
        Self {
            service_id: service_id.unwrap_or(EMPTY_SCOPE),
            route_id: route_id.unwrap_or(EMPTY_SCOPE),
        }
    }

    pub fn unscoped() -> Self {
        Self::new(None, None)
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::unscoped()
    }
}

// `route_id:service_id:identifier:bucket:period`
pub fn cache_key(scope: &Scope, identifier: &str, period: Period, bucket: BucketLabel) -> String {
    format!(
        "{}:{}:{}:{}:{}",
        scope.route_id, scope.service_id, identifier, bucket, period
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUCKET: BucketLabel = 1_715_940_240_000;

    #[test]
    fn unscoped_key_uses_nil_sentinel() {
        let key = cache_key(&Scope::unscoped(), "client-A", Period::Minute, BUCKET);
        assert_eq!(
            key,
            "00000000-0000-0000-0000-000000000000:00000000-0000-0000-0000-000000000000:client-A:1715940240000:minute"
        );
        assert_eq!(key, cache_key(&Scope::new(None, None), "client-A", Period::Minute, BUCKET));
    }

    #[test]
    fn key_is_deterministic_and_sensitive_to_every_component() {
        let service = Uuid::parse_str("6b3c1d62-3f0a-4a55-9d6a-4e2f3c9b1a10").unwrap();
        let route = Uuid::parse_str("0f9e8d7c-6b5a-4c3d-8e1f-2a3b4c5d6e7f").unwrap();
        let scope = Scope::new(Some(service), Some(route));
        let base = cache_key(&scope, "client-A", Period::Hour, BUCKET);

        assert_eq!(base, cache_key(&scope, "client-A", Period::Hour, BUCKET));
        assert!(base.starts_with("0f9e8d7c-6b5a-4c3d-8e1f-2a3b4c5d6e7f:6b3c1d62"));

        let variants = [
            cache_key(&Scope::new(Some(service), None), "client-A", Period::Hour, BUCKET),
            cache_key(&Scope::new(None, Some(route)), "client-A", Period::Hour, BUCKET),
            cache_key(&scope, "client-B", Period::Hour, BUCKET),
            cache_key(&scope, "client-A", Period::Day, BUCKET),
            cache_key(&scope, "client-A", Period::Hour, BUCKET + 3_600_000),
        ];
        for variant in variants {
            assert_ne!(base, variant);
        }
    }
}
