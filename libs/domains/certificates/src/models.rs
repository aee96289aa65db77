use crate::events::UserCertificateCreated;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A certificate held by a user. Several rows may exist per (user, certificate); exactly
/// one of the live ones is marked latest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCertificate {
    pub user_certificate_guid: Uuid,
    pub certificate_guid: Uuid,
    pub user_guid: Uuid,
    pub certificate_name: String,
    pub certificate_type: String,
    pub license_number: Option<String>,
    pub issuing_country: Option<String>,
    pub grade: Option<String>,
    pub trainer: Option<String>,
    pub hours: Option<String>,
    pub require_approval: bool,
    pub is_official: bool,
    pub notes: Option<String>,
    pub time_zone: Option<String>,
    pub suspension_type: Option<String>,
    pub completed_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub is_latest: bool,
    pub created_date: DateTime<Utc>,
    pub deleted_date: Option<DateTime<Utc>>,
    pub last_updated_date: DateTime<Utc>,
}

impl UserCertificate {
    /// Whether this row already records `new`.
    pub fn records(&self, new: &NewUserCertificate) -> bool {
        self.user_guid == new.user_guid
            && self.certificate_guid == new.certificate_guid
            && self.certificate_name == new.certificate_name
            && self.certificate_type == new.certificate_type
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertificateValidationError {
    #[error("Invalid {field}: '{value}' is not a valid UUID")]
    InvalidId { field: &'static str, value: String },

    #[error("{field} must not be blank")]
    Blank { field: &'static str },
}

/// Validated content of a [`UserCertificateCreated`] event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUserCertificate {
    pub user_guid: Uuid,
    pub certificate_guid: Uuid,
    pub certificate_name: String,
    pub certificate_type: String,
}

impl NewUserCertificate {
    /// Build the row to insert as the user's latest copy.
    pub fn into_latest(self, now: DateTime<Utc>) -> UserCertificate {
        UserCertificate {
            user_certificate_guid: Uuid::now_v7(),
            certificate_guid: self.certificate_guid,
            user_guid: self.user_guid,
            certificate_name: self.certificate_name,
            certificate_type: self.certificate_type,
            license_number: None,
            issuing_country: None,
            grade: None,
            trainer: None,
            hours: None,
            require_approval: false,
            is_official: false,
            notes: None,
            time_zone: None,
            suspension_type: None,
            completed_date: None,
            expiry_date: None,
            is_latest: true,
            created_date: now,
            deleted_date: None,
            last_updated_date: now,
        }
    }
}

impl TryFrom<&UserCertificateCreated> for NewUserCertificate {
    type Error = CertificateValidationError;

    fn try_from(event: &UserCertificateCreated) -> Result<Self, Self::Error> {
        let user_guid = parse_id("UserId", &event.user_id)?;
        let certificate_guid = parse_id("CertificateId", &event.certificate_id)?;

        let certificate_name = event.certificate_name.trim();
        if certificate_name.is_empty() {
            return Err(CertificateValidationError::Blank {
                field: "CertificateName",
            });
        }

        Ok(Self {
            user_guid,
            certificate_guid,
            certificate_name: certificate_name.to_string(),
            certificate_type: event.certificate_type.trim().to_string(),
        })
    }
}

fn parse_id(field: &'static str, value: &str) -> Result<Uuid, CertificateValidationError> {
    Uuid::parse_str(value.trim()).map_err(|_| CertificateValidationError::InvalidId {
        field,
        value: value.to_string(),
    })
}
