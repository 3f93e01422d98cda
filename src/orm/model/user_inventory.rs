use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "user_inventory")]
pub struct Model {
    #[sea_orm(primary_key, column_name = "id")]
    pub id: i64,
    #[sea_orm(indexed, column_name = "user_id")]
    pub user_id: i64,
    #[sea_orm(column_name = "item_type")]
    pub item_type: String,
    #[sea_orm(column_name = "item_id")]
    pub item_id: String,
    #[sea_orm(column_name = "quantity")]
    pub quantity: i32,
    #[sea_orm(column_name = "used")]
    pub used: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
