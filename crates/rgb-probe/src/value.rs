//! Values read out of host members.

/// A value produced by reading a host field or invoking a host accessor.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Int(i32),
    Long(i64),
    Double(f64),
    Bool(bool),
    Text(String),
    Null,
}

impl HostValue {
    /// Coerce the value to an `i32` tick count.
    ///
    /// Wider integers are clamped to the `i32` range instead of wrapping.
    /// Non-numeric values yield `None`.
    #[must_use]
    pub fn to_tick(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Long(v) => Some(saturate(*v)),
            // `as` saturates at the bounds and maps NaN to 0
            Self::Double(v) => Some(*v as i32),
            Self::Bool(_) | Self::Text(_) | Self::Null => None,
        }
    }

    /// Whether the value is numeric.
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Long(_) | Self::Double(_))
    }
}

/// Clamp an `i64` into the `i32` range.
#[inline]
#[must_use]
pub fn saturate(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<i64> for HostValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<u64> for HostValue {
    fn from(value: u64) -> Self {
        Self::Long(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}
