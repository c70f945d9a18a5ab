//! The member-lookup surface a host exposes to the probe.

use std::any::Any;

use crate::{HostValue, ProbeError, ProbeResult};

/// Name-based access to a host object's members.
///
/// The host's internals are not a stable contract, so the probe asks for
/// members by name and tolerates their absence. Implementors answer for the
/// concrete type: `has_field` must return the same answer for every instance.
///
/// # Example
///
/// ```
/// use rgb_probe::{HostValue, ProbeError, Reflect};
///
/// struct Server {
///     tick_count: i64,
/// }
///
/// impl Reflect for Server {
///     fn has_field(&self, name: &str) -> bool {
///         name == "tickCount"
///     }
///
///     fn read_field(&self, name: &str) -> Result<HostValue, ProbeError> {
///         match name {
///             "tickCount" => Ok(self.tick_count.into()),
///             other => Err(ProbeError::NoSuchMember(other.to_owned())),
///         }
///     }
/// }
/// ```
pub trait Reflect: Any + Send + Sync {
    /// Whether the type declares a data member with this name.
    fn has_field(&self, name: &str) -> bool;

    /// Whether the type declares a zero-argument accessor with this name.
    fn has_method(&self, _name: &str) -> bool {
        false
    }

    /// Read a data member.
    fn read_field(&self, name: &str) -> ProbeResult<HostValue>;

    /// Invoke a zero-argument accessor.
    fn invoke(&self, name: &str) -> ProbeResult<HostValue> {
        Err(ProbeError::NoSuchMember(name.to_owned()))
    }
}
