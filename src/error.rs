//! Error taxonomy for the BLE transport.
//!
//! Every public operation returns its failure modes as values; nothing in
//! the library path panics on transport conditions.

use thiserror::Error;

/// Failures surfaced by scanning, connecting, and RPC calls.
#[derive(Debug, Error)]
pub enum BleError {
    /// No matching device appeared before the scan deadline.
    #[error("no matching device found")]
    NotFound,

    /// The physical link could not be established or dropped unexpectedly.
    #[error("link failed: {0}")]
    LinkFailed(String),

    /// The wallet service is present but required endpoints are not.
    /// The payload names the missing endpoint(s), e.g. `"write, notify"`.
    #[error("missing characteristics: {0}")]
    CharacteristicsMissing(String),

    /// The request write was rejected by the transport.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// An operation ran out of time. For RPC calls `partial_bytes` counts
    /// whatever had accumulated before the deadline.
    #[error("timed out with {partial_bytes} byte(s) received")]
    Timeout { partial_bytes: usize },

    /// A call was attempted while another one occupies the channel.
    #[error("another request is already in flight")]
    Busy,

    /// The response buffer grew past the accepted maximum.
    #[error("response exceeded {limit} bytes ({received} received)")]
    ResponseTooLarge { limit: usize, received: usize },

    /// An RPC was attempted without an established session.
    #[error("not connected")]
    NotConnected,

    /// Adapter-level failure from the BLE stack.
    #[error(transparent)]
    Adapter(#[from] btleplug::Error),
}

pub type Result<T> = std::result::Result<T, BleError>;
