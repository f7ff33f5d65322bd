//! License Records
//!
//! License keys tracked in the app database, and the status payload the
//! licensing authority returns for them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored license key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseRecord {
    pub id: i64,
    pub email: String,
    pub key: String,
    /// License is usable until this instant
    pub valid_until: DateTime<Utc>,
    /// Updates are covered until this instant
    pub support_until: DateTime<Utc>,
    /// Newest app release this license may run
    pub max_allowed_app_release: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LicenseRecord {
    /// Overwrite validity fields from an authoritative status
    pub fn apply_status(&mut self, status: &LicenseStatus) {
        self.valid_until = status.valid_until;
        self.support_until = status.support_until;
        self.max_allowed_app_release = status.max_allowed_app_release.clone();
    }

    /// Force the license to expire at `now`
    pub fn expire_at(&mut self, now: DateTime<Utc>) {
        self.valid_until = now;
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_until > now
    }

    pub fn is_supported_at(&self, now: DateTime<Utc>) -> bool {
        self.support_until > now
    }
}

/// Authoritative license status from the licensing authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseStatus {
    pub valid_until: DateTime<Utc>,
    pub support_until: DateTime<Utc>,
    #[serde(default)]
    pub max_allowed_app_release: Option<String>,
}

/// A license key about to be stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLicense {
    pub email: String,
    pub key: String,
    pub status: LicenseStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(now: DateTime<Utc>) -> LicenseRecord {
        LicenseRecord {
            id: 1,
            email: "a@example.com".to_string(),
            key: "KEY-1".to_string(),
            valid_until: now + Duration::days(30),
            support_until: now + Duration::days(30),
            max_allowed_app_release: Some("4.0.0".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_apply_status_overwrites_fields() {
        let now = Utc::now();
        let mut license = record(now);
        let status = LicenseStatus {
            valid_until: now + Duration::days(365),
            support_until: now + Duration::days(90),
            max_allowed_app_release: None,
        };

        license.apply_status(&status);
        assert_eq!(license.valid_until, status.valid_until);
        assert_eq!(license.support_until, status.support_until);
        assert_eq!(license.max_allowed_app_release, None);
    }

    #[test]
    fn test_expire_at() {
        let now = Utc::now();
        let mut license = record(now);
        assert!(license.is_valid_at(now));

        license.expire_at(now);
        assert!(!license.is_valid_at(now));
        assert!(license.is_supported_at(now));
    }

    #[test]
    fn test_status_wire_format() {
        let status: LicenseStatus = serde_json::from_value(serde_json::json!({
            "validUntil": "2030-01-01T00:00:00Z",
            "supportUntil": "2029-01-01T00:00:00.000Z",
            "maxAllowedAppRelease": "5.1.0"
        }))
        .unwrap();

        assert_eq!(status.valid_until.to_rfc3339(), "2030-01-01T00:00:00+00:00");
        assert_eq!(status.max_allowed_app_release.as_deref(), Some("5.1.0"));
    }
}
