//! Request handlers, grouped by surface.

pub mod control;
pub mod health;
pub mod push;
