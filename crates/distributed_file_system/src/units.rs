//! Byte sizes and transfer speeds used as the unit of account across the model.

use std::{
    fmt,
    iter::Sum,
    ops::{Add, AddAssign, Sub, SubAssign},
};

use serde::{Deserialize, Serialize};

/// Decimal unit for sizes and speeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unit {
    B,
    KB,
    MB,
    GB,
    TB,
}

impl Unit {
    const ALL: [Unit; 5] = [Unit::B, Unit::KB, Unit::MB, Unit::GB, Unit::TB];

    /// Number of bytes in one unit.
    pub fn multiplier(self) -> u64 {
        match self {
            Unit::B => 1,
            Unit::KB => 1_000,
            Unit::MB => 1_000_000,
            Unit::GB => 1_000_000_000,
            Unit::TB => 1_000_000_000_000,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Unit::B => "B",
            Unit::KB => "KB",
            Unit::MB => "MB",
            Unit::GB => "GB",
            Unit::TB => "TB",
        }
    }

    /// Largest unit in which `bytes` is at least one.
    fn fitting(bytes: f64) -> Unit {
        Unit::ALL
            .iter()
            .rev()
            .copied()
            .find(|unit| bytes >= unit.multiplier() as f64)
            .unwrap_or(Unit::B)
    }
}

/// Amount of bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ByteSize(u64);

impl ByteSize {
    pub const ZERO: ByteSize = ByteSize(0);

    pub const fn new(bytes: u64) -> Self {
        ByteSize(bytes)
    }

    /// Converts `value` expressed in `unit` to bytes, rounding to the nearest byte.
    pub fn from_unit(value: f64, unit: Unit) -> Self {
        ByteSize((value * unit.multiplier() as f64).round().max(0.) as u64)
    }

    pub const fn bytes(self) -> u64 {
        self.0
    }

    pub fn as_unit(self, unit: Unit) -> f64 {
        self.0 as f64 / unit.multiplier() as f64
    }

    pub fn saturating_sub(self, other: ByteSize) -> ByteSize {
        ByteSize(self.0.saturating_sub(other.0))
    }

    pub fn checked_sub(self, other: ByteSize) -> Option<ByteSize> {
        self.0.checked_sub(other.0).map(ByteSize)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for ByteSize {
    fn from(bytes: u64) -> Self {
        ByteSize(bytes)
    }
}

impl Add for ByteSize {
    type Output = ByteSize;

    fn add(self, rhs: ByteSize) -> ByteSize {
        ByteSize(self.0 + rhs.0)
    }
}

impl AddAssign for ByteSize {
    fn add_assign(&mut self, rhs: ByteSize) {
        self.0 += rhs.0;
    }
}

impl Sub for ByteSize {
    type Output = ByteSize;

    fn sub(self, rhs: ByteSize) -> ByteSize {
        ByteSize(self.0 - rhs.0)
    }
}

impl SubAssign for ByteSize {
    fn sub_assign(&mut self, rhs: ByteSize) {
        self.0 -= rhs.0;
    }
}

impl Sum for ByteSize {
    fn sum<I: Iterator<Item = ByteSize>>(iter: I) -> Self {
        ByteSize(iter.map(|size| size.0).sum())
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = Unit::fitting(self.0 as f64);
        if unit == Unit::B {
            write!(f, "{} B", self.0)
        } else {
            write!(f, "{:.2} {}", self.as_unit(unit), unit.suffix())
        }
    }
}

/// Transfer speed in bytes per second.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ByteSpeed(f64);

impl ByteSpeed {
    pub const ZERO: ByteSpeed = ByteSpeed(0.);
    pub const INFINITE: ByteSpeed = ByteSpeed(f64::INFINITY);

    pub const fn new(bytes_per_second: f64) -> Self {
        ByteSpeed(bytes_per_second)
    }

    pub fn from_unit(value: f64, unit: Unit) -> Self {
        ByteSpeed(value * unit.multiplier() as f64)
    }

    pub const fn bytes_per_second(self) -> f64 {
        self.0
    }

    pub fn as_unit(self, unit: Unit) -> f64 {
        self.0 / unit.multiplier() as f64
    }

    /// Seconds needed to move `size` at this speed, infinite for a zero speed.
    pub fn transfer_time(self, size: ByteSize) -> f64 {
        if self.0 <= 0. {
            return f64::INFINITY;
        }
        size.bytes() as f64 / self.0
    }

    /// Bytes moved during `seconds` at this speed.
    pub fn bytes_in(self, seconds: f64) -> f64 {
        (self.0 * seconds).max(0.)
    }

    pub fn min(self, other: ByteSpeed) -> ByteSpeed {
        ByteSpeed(self.0.min(other.0))
    }
}

impl fmt::Display for ByteSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.0.is_finite() {
            return write!(f, "unlimited");
        }
        let unit = Unit::fitting(self.0);
        write!(f, "{:.2} {}/s", self.as_unit(unit), unit.suffix())
    }
}
