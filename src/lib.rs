/// Anteroom - invitation-gated admission control for video consultation rooms
///
/// Gates entry into per-session video rooms behind single-use, time-limited,
/// multi-factor-verified invitations, and queues verified-but-unadmitted
/// visitors in a waiting room until a session owner admits them.

pub mod admission;
pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod geo;
pub mod identity;
pub mod invitation;
pub mod metrics;
pub mod rate_limit;
pub mod security;
pub mod server;
pub mod token;
pub mod waiting_room;
