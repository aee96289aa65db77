//! Events this service understands.

use serde::{Deserialize, Serialize};

/// Routing key of [`UserCertificateCreated`].
pub const USER_CERTIFICATE_CREATE: &str = "QMS.UserCertificate.Create";

/// A certificate was issued to a user.
///
/// Producers send PascalCase fields; camelCase is accepted too. Identifiers arrive as
/// strings and are validated by the handler, not by deserialization, so a bad id is a
/// business rejection rather than a malformed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserCertificateCreated {
    #[serde(alias = "userId")]
    pub user_id: String,
    #[serde(alias = "certificateId")]
    pub certificate_id: String,
    #[serde(alias = "certificateName")]
    pub certificate_name: String,
    #[serde(alias = "certificateType")]
    pub certificate_type: String,
}

/// Union of every registered event schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QmsEvent {
    UserCertificateCreated(UserCertificateCreated),
}

impl QmsEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            QmsEvent::UserCertificateCreated(_) => USER_CERTIFICATE_CREATE,
        }
    }
}

impl From<UserCertificateCreated> for QmsEvent {
    fn from(event: UserCertificateCreated) -> Self {
        QmsEvent::UserCertificateCreated(event)
    }
}

impl TryFrom<QmsEvent> for UserCertificateCreated {
    type Error = QmsEvent;

    fn try_from(event: QmsEvent) -> Result<Self, QmsEvent> {
        match event {
            QmsEvent::UserCertificateCreated(e) => Ok(e),
        }
    }
}
