//! API request handlers

pub mod execute;
pub mod health;
pub mod listen;
pub mod session;
