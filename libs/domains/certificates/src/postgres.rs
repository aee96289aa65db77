use async_trait::async_trait;
use chrono::{DateTime, Utc};
use database::postgres::PostgresUnitOfWork;
use database::{StoreError, UnitOfWork};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder,
};
use uuid::Uuid;

use crate::entity;
use crate::models::{NewUserCertificate, UserCertificate};
use crate::store::{CertificateStore, UNIQUE_VIOLATION, latest_conflict};

pub struct PgCertificateStore {
    uow: PostgresUnitOfWork,
}

impl PgCertificateStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            uow: PostgresUnitOfWork::new(db),
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.uow.connection()
    }
}

#[async_trait]
impl UnitOfWork for PgCertificateStore {
    type Transaction = DatabaseTransaction;

    async fn begin(&self) -> Result<DatabaseTransaction, StoreError> {
        self.uow.begin().await
    }

    async fn commit(&self, tx: DatabaseTransaction) -> Result<(), StoreError> {
        self.uow.commit(tx).await
    }

    async fn rollback(&self, tx: DatabaseTransaction) -> Result<(), StoreError> {
        self.uow.rollback(tx).await
    }
}

#[async_trait]
impl CertificateStore for PgCertificateStore {
    async fn find_recorded(
        &self,
        tx: &mut DatabaseTransaction,
        new: &NewUserCertificate,
    ) -> Result<Option<UserCertificate>, StoreError> {
        let model = entity::Entity::find()
            .filter(entity::Column::UserGuid.eq(new.user_guid))
            .filter(entity::Column::CertificateGuid.eq(new.certificate_guid))
            .filter(entity::Column::CertificateName.eq(new.certificate_name.clone()))
            .filter(entity::Column::CertificateType.eq(new.certificate_type.clone()))
            .filter(entity::Column::DeletedDate.is_null())
            .order_by_desc(entity::Column::IsLatest)
            .order_by_desc(entity::Column::CreatedDate)
            .one(&*tx)
            .await?;

        Ok(model.map(Into::into))
    }

    async fn clear_latest(
        &self,
        tx: &mut DatabaseTransaction,
        user_guid: Uuid,
        certificate_guid: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let at: DateTimeWithTimeZone = at.into();
        let result = entity::Entity::update_many()
            .col_expr(entity::Column::IsLatest, Expr::value(false))
            .col_expr(entity::Column::LastUpdatedDate, Expr::value(at))
            .filter(entity::Column::UserGuid.eq(user_guid))
            .filter(entity::Column::CertificateGuid.eq(certificate_guid))
            .filter(entity::Column::IsLatest.eq(true))
            .filter(entity::Column::DeletedDate.is_null())
            .exec(&*tx)
            .await?;

        Ok(result.rows_affected)
    }

    async fn insert(
        &self,
        tx: &mut DatabaseTransaction,
        row: UserCertificate,
    ) -> Result<UserCertificate, StoreError> {
        let (user_guid, certificate_guid) = (row.user_guid, row.certificate_guid);
        let active_model: entity::ActiveModel = row.into();
        let model = active_model
            .insert(&*tx)
            .await
            .map_err(|e| classify_insert_error(e.into(), user_guid, certificate_guid))?;

        tracing::debug!(
            user_certificate_guid = %model.user_certificate_guid,
            "Inserted user certificate"
        );
        Ok(model.into())
    }
}

/// A unique violation on the latest index means a concurrent transaction committed its own
/// latest copy between our read and our insert.
fn classify_insert_error(err: StoreError, user_guid: Uuid, certificate_guid: Uuid) -> StoreError {
    if err.code() == Some(UNIQUE_VIOLATION) && err.constraint() == Some(entity::LATEST_INDEX) {
        tracing::debug!(%user_guid, %certificate_guid, "Latest copy recorded concurrently");
        latest_conflict(user_guid, certificate_guid)
    } else {
        err
    }
}
