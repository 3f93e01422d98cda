use sea_orm::entity::prelude::*;

/// One row per game variant. Matchmaking reads it `FOR UPDATE` to serialize
/// pairing decisions of that variant.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "matchmaking_locks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_name = "variant")]
    pub variant: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
