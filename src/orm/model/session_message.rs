use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "session_messages")]
pub struct Model {
    #[sea_orm(primary_key, column_name = "id")]
    pub id: i64,
    // Full session id of the *sender*
    #[sea_orm(indexed, column_name = "session_id")]
    pub session_id: i64,
    #[sea_orm(column_name = "msg_type")]
    pub msg_type: String,
    // JSON object text
    #[sea_orm(column_name = "body")]
    pub body: String,
    #[sea_orm(indexed, column_name = "created_at")]
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
