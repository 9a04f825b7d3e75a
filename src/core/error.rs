use crate::bus::BusError;
use crate::messaging::codec::CodecError;
use thiserror::Error;

/// Errors surfaced by the public lifetime-manager operations.
///
/// Inbound handler failures and per-connection write failures are logged and
/// swallowed instead; they never reach a caller.
#[derive(Debug, Error)]
pub enum HubError {
    /// A required identifier was empty.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The broker rejected a publish or subscribe.
    #[error("bus unavailable")]
    Bus(#[from] BusError),
    /// An outbound envelope could not be encoded (e.g. a non-finite float
    /// argument).
    #[error("envelope encoding failed")]
    Codec(#[from] CodecError),
}

pub(crate) fn require_non_empty(value: &str, what: &'static str) -> Result<(), HubError> {
    if value.is_empty() {
        return Err(HubError::InvalidArgument(what));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_identifier_is_rejected() {
        assert!(matches!(
            require_non_empty("", "connection id"),
            Err(HubError::InvalidArgument("connection id"))
        ));
        assert!(require_non_empty("c1", "connection id").is_ok());
    }
}
