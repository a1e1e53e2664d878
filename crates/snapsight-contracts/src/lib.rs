pub mod chat;
pub mod events;
pub mod intake;
pub mod models;
pub mod session;
