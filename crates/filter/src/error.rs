use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid private range {cidr:?}: {source}")]
    InvalidCidr {
        cidr: String,
        #[source]
        source: ipnet::AddrParseError,
    },

    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no addresses found for {host}")]
    NoAddresses { host: String },

    #[error("resolving {host} timed out after {timeout:?}")]
    ResolveTimeout { host: String, timeout: Duration },
}

pub type Result<T> = std::result::Result<T, Error>;
