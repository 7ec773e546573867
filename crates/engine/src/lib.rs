//! Proxy engine crate: accepts client connections, parses proxy requests,
//! tunnels `CONNECT` targets and forwards plain HTTP requests.
//!
//! Admission decisions are delegated to a [`RequestHook`] and a
//! [`ConnectHook`] supplied by the caller.

pub mod error;
pub mod proxy;
pub mod types;

pub use {
    error::{Error, Result},
    types::*,
};
