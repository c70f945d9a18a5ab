//! Error types for probing host members.

use thiserror::Error;

/// Errors raised while reading a host member.
///
/// These never reach callers of [`TickProbe::current_tick`](crate::TickProbe::current_tick);
/// every variant collapses to [`UNKNOWN_TICK`](crate::UNKNOWN_TICK) there.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The host type has no member with this name.
    #[error("no member named `{0}`")]
    NoSuchMember(String),

    /// The member exists but could not be read.
    #[error("member `{0}` is not accessible")]
    Inaccessible(String),

    /// The member was read but did not hold a number.
    #[error("member `{0}` did not yield a number")]
    NotNumeric(String),

    /// The host raised an error while the member was being read.
    #[error("host error: {0}")]
    Host(String),
}

/// Result type for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;
