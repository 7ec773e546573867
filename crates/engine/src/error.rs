use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("request headers exceed {limit} bytes")]
    HeadersTooLarge { limit: usize },

    #[error("{0}")]
    Message(String),
}

impl Error {
    #[must_use]
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("reset"));
    }

    #[test]
    fn headers_too_large_mentions_limit() {
        let err = Error::HeadersTooLarge { limit: 1024 };
        assert_eq!(err.to_string(), "request headers exceed 1024 bytes");
    }

    #[test]
    fn message_error() {
        let err = Error::message("malformed request line");
        assert_eq!(err.to_string(), "malformed request line");
        assert!(matches!(err, Error::Message(_)));
    }
}
