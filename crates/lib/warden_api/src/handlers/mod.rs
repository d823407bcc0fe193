//! Request handlers.

pub mod approval;
pub mod clients;
pub mod engine;
pub mod registration;
