use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum InvalidatedReason {
    /// Rejoin abuse through the same invite.
    #[sea_orm(string_value = "fake")]
    Fake,
    /// Left before the guild's leave threshold.
    #[sea_orm(string_value = "leave")]
    Leave,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "joins")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub guild_id: i64,
    pub member_id: i64,
    pub exact_match_code: Option<String>,
    /// JSON array of candidate codes, in platform order.
    pub possible_matches: Json,
    pub invalidated_reason: Option<InvalidatedReason>,
    pub cleared: bool,
    pub created_at: DateTimeWithTimeZone,
    pub deleted_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    pub fn possible_matches(&self) -> Vec<String> {
        serde_json::from_value(self.possible_matches.clone()).unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::invite_codes::Entity",
        from = "Column::ExactMatchCode",
        to = "super::invite_codes::Column::Code"
    )]
    ExactMatch,
    #[sea_orm(has_one = "super::leaves::Entity")]
    Leave,
}

impl Related<super::invite_codes::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExactMatch.def()
    }
}

impl Related<super::leaves::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Leave.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
