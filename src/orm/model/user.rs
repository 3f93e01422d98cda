use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, column_name = "id")]
    pub id: i64,
    #[sea_orm(unique, column_name = "device_uuid")]
    pub device_uuid: String,
    #[sea_orm(column_name = "name")]
    pub name: String,
    #[sea_orm(column_name = "app_version")]
    pub app_version: String,
    // Free-form JSON reported by the client on connect
    #[sea_orm(column_name = "device_info")]
    pub device_info: String,
    #[sea_orm(column_name = "banned")]
    pub banned: bool,

    #[sea_orm(column_name = "games")]
    pub games: i32,
    #[sea_orm(column_name = "wins")]
    pub wins: i32,
    #[sea_orm(column_name = "stars")]
    pub stars: i32,

    #[sea_orm(column_name = "created_at")]
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[sea_orm(column_name = "last_seen")]
    pub last_seen: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
