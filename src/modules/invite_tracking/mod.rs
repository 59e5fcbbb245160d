pub mod custom;
pub mod events;
pub mod recompute;
pub mod stats;
pub mod tracking;

pub use custom::{add_custom_invite, clear_invites};
pub use events::{GatewayEvent, dispatch, on_member_join, on_member_leave};
pub use recompute::{recompute_fakes, recompute_leaves};
pub use stats::{MemberCode, get_leaderboard, get_totals, list_member_codes};
pub use tracking::JoinMatch;
