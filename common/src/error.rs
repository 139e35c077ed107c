use core::convert::Infallible;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("wifi ssid is not configured")]
    MissingWifiSsid,
    #[error("image server base url is not configured")]
    MissingBaseUrl,
    #[error("image server base url `{0}` must start with http:// or https://")]
    InvalidBaseUrl(String),
    #[error("board `{0}` has no device profile")]
    UnknownBoard(String),
}

#[derive(Debug, Error)]
pub enum NvmError {
    #[error("nvm backing store read failed: {0}")]
    Read(String),
    #[error("nvm backing store write failed: {0}")]
    Write(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("wifi connect failed: {0}")]
    Connect(String),
    #[error("http request failed: {0}")]
    Transport(String),
    #[error("server answered with HTTP {0}")]
    Status(u16),
    #[error("expected image/bmp Content-Type but got {0:?}")]
    UnexpectedContentType(Option<String>),
    #[error("failed reading response body: {0}")]
    Body(String),
}

impl FetchError {
    /// Transient failures are retried within the cycle; everything else ends
    /// the fetch for this wake.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Transport(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SensorError {
    #[error("battery gauge not responding: {0}")]
    Bus(String),
    #[error("battery gauge returned a corrupt reading")]
    Checksum,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("bitmap decode failed: {0}")]
    Decode(String),
    #[error("panel write failed: {0}")]
    Panel(String),
    #[error(transparent)]
    Body(#[from] FetchError),
}

// Drawing into the frame buffer cannot fail.
impl From<Infallible> for RenderError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_failures_are_transient() {
        assert!(FetchError::Connect("timeout".into()).is_transient());
        assert!(FetchError::Transport("reset".into()).is_transient());
        assert!(!FetchError::Status(404).is_transient());
        assert!(!FetchError::UnexpectedContentType(Some("text/html".into())).is_transient());
        assert!(!FetchError::Body("eof".into()).is_transient());
    }
}
