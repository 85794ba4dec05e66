use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "credentials")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// The session token itself; the pool keys on it.
    #[sea_orm(unique)]
    pub value: String,
    pub pool_class: String,
    pub remaining_quota: i64,
    pub elevated_quota: i64,
    pub fail_count: i32,
    pub cooldown_until: Option<OffsetDateTime>,
    pub disabled: bool,
    pub expired: bool,
    pub note: String,
    pub tags: Json,
    pub use_count: i64,
    pub last_used_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
