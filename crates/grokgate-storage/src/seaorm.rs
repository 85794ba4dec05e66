use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, Schema,
};
use time::OffsetDateTime;

use grokgate_pool::{Credential, CredentialStore, PoolClass, StoreError, StoreResult};

use crate::entities;

#[derive(Clone)]
pub struct SeaOrmCredentialStore {
    db: DatabaseConnection,
}

impl SeaOrmCredentialStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create or migrate the credentials table to match the entity.
    pub async fn sync(&self) -> StoreResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Credentials)
            .sync(&self.db)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for SeaOrmCredentialStore {
    async fn load_all(&self) -> StoreResult<Vec<Credential>> {
        let rows = entities::Credentials::find()
            .all(&self.db)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(credential_from_row).collect()
    }

    async fn upsert(&self, credential: &Credential) -> StoreResult<()> {
        use entities::credentials::{ActiveModel as CredentialActive, Column};

        let now = OffsetDateTime::now_utc();
        let existing = entities::Credentials::find()
            .filter(Column::Value.eq(credential.value.as_str()))
            .one(&self.db)
            .await
            .map_err(db_err)?;

        match existing {
            Some(model) => {
                let mut active: CredentialActive = model.into();
                apply_fields(&mut active, credential)?;
                active.updated_at = ActiveValue::Set(now);
                active.update(&self.db).await.map_err(db_err)?;
            }
            None => {
                let mut active = CredentialActive {
                    id: ActiveValue::NotSet,
                    value: ActiveValue::Set(credential.value.clone()),
                    created_at: ActiveValue::Set(now),
                    updated_at: ActiveValue::Set(now),
                    ..Default::default()
                };
                apply_fields(&mut active, credential)?;
                entities::Credentials::insert(active)
                    .exec(&self.db)
                    .await
                    .map_err(db_err)?;
            }
        }
        Ok(())
    }

    async fn delete(&self, value: &str) -> StoreResult<()> {
        use entities::credentials::Column;
        entities::Credentials::delete_many()
            .filter(Column::Value.eq(value))
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

fn apply_fields(
    active: &mut entities::credentials::ActiveModel,
    credential: &Credential,
) -> StoreResult<()> {
    active.pool_class = ActiveValue::Set(pool_class_str(credential.pool_class).to_string());
    active.remaining_quota = ActiveValue::Set(credential.remaining_quota);
    active.elevated_quota = ActiveValue::Set(credential.elevated_quota);
    active.fail_count =
        ActiveValue::Set(i32::try_from(credential.fail_count).unwrap_or(i32::MAX));
    active.cooldown_until = ActiveValue::Set(credential.cooldown_until);
    active.disabled = ActiveValue::Set(credential.disabled);
    active.expired = ActiveValue::Set(credential.expired);
    active.note = ActiveValue::Set(credential.note.clone());
    active.tags =
        ActiveValue::Set(serde_json::to_value(&credential.tags).map_err(|e| {
            StoreError::Backend(format!("tags serialization failed: {e}"))
        })?);
    active.use_count =
        ActiveValue::Set(i64::try_from(credential.use_count).unwrap_or(i64::MAX));
    active.last_used_at = ActiveValue::Set(credential.last_used_at);
    Ok(())
}

fn credential_from_row(row: entities::credentials::Model) -> StoreResult<Credential> {
    let pool_class = match row.pool_class.as_str() {
        "basic" => PoolClass::Basic,
        "elevated" => PoolClass::Elevated,
        other => {
            return Err(StoreError::Backend(format!(
                "unknown pool class in row {}: {other}",
                row.id
            )));
        }
    };
    let tags: Vec<String> = serde_json::from_value(row.tags).unwrap_or_default();
    Ok(Credential {
        value: row.value,
        pool_class,
        remaining_quota: row.remaining_quota,
        elevated_quota: row.elevated_quota,
        fail_count: u32::try_from(row.fail_count).unwrap_or(0),
        cooldown_until: row.cooldown_until,
        disabled: row.disabled,
        expired: row.expired,
        note: row.note,
        tags,
        use_count: u64::try_from(row.use_count).unwrap_or(0),
        last_used_at: row.last_used_at,
    })
}

fn pool_class_str(class: PoolClass) -> &'static str {
    match class {
        PoolClass::Basic => "basic",
        PoolClass::Elevated => "elevated",
    }
}

fn db_err(err: sea_orm::DbErr) -> StoreError {
    StoreError::Backend(err.to_string())
}
