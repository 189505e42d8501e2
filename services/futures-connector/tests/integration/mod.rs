//! End-to-end tests across connect, stream failure and instrument switches

pub mod session_lifecycle;
