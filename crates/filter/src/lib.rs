//! Filter crate: blocks proxy traffic to hosts that resolve to private,
//! loopback, or link-local addresses.
//!
//! - [`ranges`]   — reserved address blocks and the per-address classifier
//! - [`resolver`] — hostname resolution seam
//! - [`checker`]  — resolve-and-classify admission check
//! - [`policy`]   — request and `CONNECT` hooks for the proxy engine

pub mod checker;
pub mod error;
pub mod policy;
pub mod ranges;
pub mod resolver;

pub use {
    checker::{HostChecker, Verdict},
    error::{Error, Result},
    policy::SsrfPolicy,
    ranges::PrivateRanges,
    resolver::{Resolver, StaticResolver, SystemResolver},
};
