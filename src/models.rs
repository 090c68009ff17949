use serde::{Deserialize, Serialize};

use crate::db::Document;

pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ── Envelopes ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct DocumentEnvelope {
    pub document: Document,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DocumentsEnvelope {
    pub documents: Vec<Document>,
    pub count: u64,
}

// ── Account auth state ─────────────────────────────────────────────────

/// The `auth` sub-document of an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountAuth {
    pub is_active: bool,
    pub is_blocked: bool,
    pub number_of_failed_login_attempts: u32,
    pub number_of_failed_change_password_attempts: u32,
    pub last_failed_login_attempt: Option<String>,
    pub last_successful_login: Option<String>,
    pub last_failed_change_password_attempt: Option<String>,
    pub last_successful_change_password: Option<String>,
}

impl AccountAuth {
    /// State of a freshly registered account.
    pub fn registered(activation_required: bool) -> Self {
        Self {
            is_active: !activation_required,
            ..Self::default()
        }
    }
}

// ── Version ────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct VersionResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub build_date: &'static str,
    pub rustc_version: &'static str,
}

// ── Health ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub backend: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_account_auth_wire_names() {
        let auth = AccountAuth::registered(true);
        let value = serde_json::to_value(&auth).unwrap();
        assert_eq!(value["isActive"], json!(false));
        assert_eq!(value["isBlocked"], json!(false));
        assert_eq!(value["numberOfFailedLoginAttempts"], json!(0));
        assert_eq!(value["lastSuccessfulLogin"], json!(null));
    }

    #[test]
    fn test_account_auth_tolerates_missing_fields() {
        let auth: AccountAuth = serde_json::from_value(json!({"isActive": true})).unwrap();
        assert!(auth.is_active);
        assert_eq!(auth.number_of_failed_login_attempts, 0);
    }

    #[test]
    fn test_envelope_omits_absent_token() {
        let envelope = DocumentEnvelope {
            document: Document::new(),
            token: None,
        };
        assert_eq!(serde_json::to_value(&envelope).unwrap(), json!({"document": {}}));
    }
}
