//! API handlers module

pub mod executions;
pub mod health;
