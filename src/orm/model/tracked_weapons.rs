use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "tracked_weapons")]
pub struct Model {
    // Base session id; one loadout per (session, player)
    #[sea_orm(primary_key, auto_increment = false, column_name = "session_id")]
    pub session_id: i64,
    #[sea_orm(primary_key, auto_increment = false, column_name = "player")]
    pub player: i32,
    // JSON object: weapon id -> count
    #[sea_orm(column_name = "weapons")]
    pub weapons: String,
    #[sea_orm(column_name = "updated_at")]
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
