pub mod invite_tracking;
pub mod ranks;
