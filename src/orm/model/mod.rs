pub mod config;
pub mod game_session;
pub mod matchmaking_lock;
pub mod score;
pub mod session_message;
pub mod tracked_weapons;
pub mod user;
pub mod user_inventory;
