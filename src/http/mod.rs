//! Read-only HTTP status surface

pub mod routes;

pub use routes::build_router;
