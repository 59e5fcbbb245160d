pub mod config;
pub mod engine;
pub mod promotion;

pub use config::{add_rank, list_ranks, remove_rank};
pub use engine::{Rank, RoleDelta, compute_role_delta};
pub use promotion::{promote_if_qualified, role_delta};
