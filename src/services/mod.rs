pub mod cache;
pub mod clock;
pub mod counts;
pub mod discord;
pub mod gateway;
pub mod registry;
pub mod scheduler;
pub mod settings;
pub mod store;
