//! Unit tests for individual engine components

pub mod order_flow;
pub mod sizing_rules;
