pub mod auth;
pub mod terminal;
