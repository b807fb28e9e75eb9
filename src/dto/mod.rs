pub mod health;
pub mod matchmaking;
pub mod questions;
pub mod validation;
pub mod ws;
