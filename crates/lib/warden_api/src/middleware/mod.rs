//! Request middleware.

pub mod admin;
pub mod gate;
