//! Data models for the DAO tracker.
//!
//! Field names serialize to the camelCase shapes the web client exchanges.

mod comment;
mod dao;
mod history;
mod notification;
mod user;

pub use comment::*;
pub use dao::*;
pub use history::*;
pub use notification::*;
pub use user::*;
