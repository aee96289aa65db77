use crate::models::UserCertificate;
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Partial unique index keeping one live latest row per (user, certificate).
pub const LATEST_INDEX: &str = "ux_user_certificates_latest";

/// DDL for the `user_certificates` table.
pub const USER_CERTIFICATES_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS user_certificates (
    user_certificate_guid UUID PRIMARY KEY,
    certificate_guid UUID NOT NULL,
    user_guid UUID NOT NULL,
    certificate_name VARCHAR(200) NOT NULL,
    certificate_type VARCHAR(100) NOT NULL,
    license_number VARCHAR(100),
    issuing_country VARCHAR(100),
    grade VARCHAR(50),
    trainer VARCHAR(100),
    hours VARCHAR(50),
    require_approval BOOLEAN NOT NULL DEFAULT FALSE,
    is_official BOOLEAN NOT NULL DEFAULT FALSE,
    notes VARCHAR(500),
    time_zone VARCHAR(100),
    suspension_type VARCHAR(100),
    completed_date TIMESTAMPTZ,
    expiry_date TIMESTAMPTZ,
    is_latest BOOLEAN NOT NULL DEFAULT FALSE,
    created_date TIMESTAMPTZ NOT NULL,
    deleted_date TIMESTAMPTZ,
    last_updated_date TIMESTAMPTZ NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_user_certificates_latest
    ON user_certificates (user_guid, certificate_guid)
    WHERE is_latest AND deleted_date IS NULL;
"#;

/// Sea-ORM Entity for the user_certificates table
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_certificates")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
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
    pub completed_date: Option<DateTimeWithTimeZone>,
    pub expiry_date: Option<DateTimeWithTimeZone>,
    pub is_latest: bool,
    pub created_date: DateTimeWithTimeZone,
    pub deleted_date: Option<DateTimeWithTimeZone>,
    pub last_updated_date: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for UserCertificate {
    fn from(model: Model) -> Self {
        Self {
            user_certificate_guid: model.user_certificate_guid,
            certificate_guid: model.certificate_guid,
            user_guid: model.user_guid,
            certificate_name: model.certificate_name,
            certificate_type: model.certificate_type,
            license_number: model.license_number,
            issuing_country: model.issuing_country,
            grade: model.grade,
            trainer: model.trainer,
            hours: model.hours,
            require_approval: model.require_approval,
            is_official: model.is_official,
            notes: model.notes,
            time_zone: model.time_zone,
            suspension_type: model.suspension_type,
            completed_date: model.completed_date.map(Into::into),
            expiry_date: model.expiry_date.map(Into::into),
            is_latest: model.is_latest,
            created_date: model.created_date.into(),
            deleted_date: model.deleted_date.map(Into::into),
            last_updated_date: model.last_updated_date.into(),
        }
    }
}

impl From<UserCertificate> for ActiveModel {
    fn from(row: UserCertificate) -> Self {
        ActiveModel {
            user_certificate_guid: Set(row.user_certificate_guid),
            certificate_guid: Set(row.certificate_guid),
            user_guid: Set(row.user_guid),
            certificate_name: Set(row.certificate_name),
            certificate_type: Set(row.certificate_type),
            license_number: Set(row.license_number),
            issuing_country: Set(row.issuing_country),
            grade: Set(row.grade),
            trainer: Set(row.trainer),
            hours: Set(row.hours),
            require_approval: Set(row.require_approval),
            is_official: Set(row.is_official),
            notes: Set(row.notes),
            time_zone: Set(row.time_zone),
            suspension_type: Set(row.suspension_type),
            completed_date: Set(row.completed_date.map(Into::into)),
            expiry_date: Set(row.expiry_date.map(Into::into)),
            is_latest: Set(row.is_latest),
            created_date: Set(row.created_date.into()),
            deleted_date: Set(row.deleted_date.map(Into::into)),
            last_updated_date: Set(row.last_updated_date.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddl_declares_latest_index() {
        let index = format!("CREATE UNIQUE INDEX IF NOT EXISTS {LATEST_INDEX}");
        assert!(USER_CERTIFICATES_DDL.contains(&index));
        assert!(USER_CERTIFICATES_DDL.contains("WHERE is_latest AND deleted_date IS NULL"));
    }
}
