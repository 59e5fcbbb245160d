pub mod custom_invites;
pub mod guild_settings;
pub mod guilds;
pub mod invite_codes;
pub mod joins;
pub mod leaves;
pub mod members;
pub mod ranks;
pub mod scheduled_actions;
