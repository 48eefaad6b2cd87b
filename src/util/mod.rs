//! Small shared helpers

pub mod rate_limit;
