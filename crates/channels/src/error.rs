use {herald_common::Backend, thiserror::Error};

/// Failures shared by every channel adapter.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("{0} is not connected")]
    NotConnected(Backend),

    #[error("{0} is not configured")]
    NotConfigured(Backend),

    #[error("{backend} does not support {what}")]
    Unsupported {
        backend: Backend,
        what: &'static str,
    },
}
