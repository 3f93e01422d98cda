use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "game_sessions")]
pub struct Model {
    // Base session id (player bit cleared), minted by the creating worker
    #[sea_orm(primary_key, auto_increment = false, column_name = "id")]
    pub id: i64,
    #[sea_orm(indexed, column_name = "user_one_id")]
    pub user_one_id: i64,
    #[sea_orm(indexed, column_name = "user_two_id")]
    pub user_two_id: Option<i64>,
    // Set for personal invites; public matchmaking never joins these
    #[sea_orm(column_name = "invite_user_id")]
    pub invite_user_id: Option<i64>,
    #[sea_orm(indexed, column_name = "status")]
    pub status: i32,
    #[sea_orm(column_name = "variant")]
    pub variant: i32,

    #[sea_orm(column_name = "created_at")]
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[sea_orm(indexed, column_name = "updated_at")]
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[sea_orm(column_name = "joined_at")]
    pub joined_at: Option<chrono::DateTime<chrono::Utc>>,
    #[sea_orm(column_name = "finished_at")]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,

    #[sea_orm(column_name = "moves_one")]
    pub moves_one: i32,
    #[sea_orm(column_name = "moves_two")]
    pub moves_two: i32,
    #[sea_orm(column_name = "winner_id")]
    pub winner_id: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
