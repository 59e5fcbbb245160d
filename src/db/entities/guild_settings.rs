use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "guild_settings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub guild_id: i64,
    pub value: Json,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankAssignmentStyle {
    /// Every rank the member qualifies for.
    #[default]
    All,
    /// Only the highest qualifying rank.
    Highest,
}

/// Per-guild tracking settings, stored as JSON in `guild_settings.value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildSettings {
    pub auto_subtract_fakes: bool,
    pub auto_subtract_leaves: bool,
    /// Seconds a member must stay for the join to keep counting.
    pub auto_subtract_leave_threshold: u64,
    /// When set, a rejoin only makes the earlier join fake if it happened within this many seconds.
    pub fake_rejoin_window: Option<u64>,
    pub rank_assignment_style: RankAssignmentStyle,
    pub muted_role: Option<u64>,
}

impl Default for GuildSettings {
    fn default() -> Self {
        Self {
            auto_subtract_fakes: true,
            auto_subtract_leaves: true,
            auto_subtract_leave_threshold: 600,
            fake_rejoin_window: None,
            rank_assignment_style: RankAssignmentStyle::All,
            muted_role: None,
        }
    }
}
