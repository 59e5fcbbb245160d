use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "leaves")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub guild_id: i64,
    pub member_id: i64,
    pub join_id: i32,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::joins::Entity",
        from = "Column::JoinId",
        to = "super::joins::Column::Id"
    )]
    Join,
}

impl Related<super::joins::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Join.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
