use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "invite_codes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub code: String,
    pub guild_id: i64,
    pub channel_id: Option<i64>,
    pub inviter_id: Option<i64>,
    /// Cumulative use counter as last reported by the platform.
    pub uses: i32,
    pub max_uses: i32,
    pub max_age: i32,
    pub temporary: bool,
    pub cleared_amount: i32,
    pub is_vanity: bool,
    pub is_widget: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
    pub deleted_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::joins::Entity")]
    Joins,
}

impl Related<super::joins::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Joins.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
