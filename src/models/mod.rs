//! Domain model module declarations.

pub mod acknowledgment;
pub mod message;
pub mod user;
