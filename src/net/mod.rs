//! TCP line protocol: wire types, sessions and the connection acceptor

pub mod listener;
pub mod protocol;
pub mod session;

pub use listener::serve;
