//! Precision-safe decimal types for prices and quantities.
//!
//! Every sizing and protection calculation runs on `rust_decimal`, so
//! lot and tick rounding is exact.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Sub};

/// Shared surface of the decimal newtypes: construction, sign checks,
/// display and the arithmetic the pipeline actually performs.
macro_rules! decimal_newtype {
    ($name:ident) => {
        impl $name {
            pub const ZERO: Self = Self(Decimal::ZERO);

            #[inline]
            pub fn new(value: Decimal) -> Self {
                Self(value)
            }

            #[inline]
            pub fn inner(&self) -> Decimal {
                self.0
            }

            #[inline]
            pub fn is_zero(&self) -> bool {
                self.0.is_zero()
            }

            /// Strictly greater than zero.
            #[inline]
            pub fn is_positive(&self) -> bool {
                self.0 > Decimal::ZERO
            }

            /// Floor to a multiple of `step`; a zero step leaves the value as is.
            #[inline]
            fn floor_to(&self, step: Decimal) -> Self {
                if step.is_zero() {
                    return *self;
                }
                Self((self.0 / step).floor() * step)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl Add for $name {
            type Output = Self;

            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $name {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }

        impl Mul<Decimal> for $name {
            type Output = Self;

            fn mul(self, rhs: Decimal) -> Self {
                Self(self.0 * rhs)
            }
        }
    };
}

/// Price with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

decimal_newtype!(Price);

impl Price {
    /// Round down to a multiple of `tick_size`.
    #[inline]
    pub fn round_to_tick(&self, tick_size: Price) -> Self {
        self.floor_to(tick_size.0)
    }

    /// Round up to a multiple of `tick_size`.
    #[inline]
    pub fn ceil_to_tick(&self, tick_size: Price) -> Self {
        if tick_size.is_zero() {
            return *self;
        }
        Self((self.0 / tick_size.0).ceil() * tick_size.0)
    }

    /// `(self - base) / base`, or `None` for a zero base.
    #[inline]
    pub fn return_from(&self, base: Price) -> Option<Decimal> {
        if base.is_zero() {
            return None;
        }
        Some((self.0 - base.0) / base.0)
    }
}

/// Quantity with exact decimal precision.
///
/// Depending on context this is a contract count or a base-asset
/// quantity; field names say which.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Size(pub Decimal);

decimal_newtype!(Size);

impl Size {
    pub const ONE: Self = Self(Decimal::ONE);

    /// Round down to a multiple of `lot_size`.
    #[inline]
    pub fn round_to_lot(&self, lot_size: Size) -> Self {
        self.floor_to(lot_size.0)
    }

    #[inline]
    pub fn is_multiple_of(&self, lot_size: Size) -> bool {
        lot_size.is_zero() || (self.0 % lot_size.0).is_zero()
    }

    /// Quote value of this many units at `price`.
    #[inline]
    pub fn notional(&self, price: Price) -> Decimal {
        self.0 * price.0
    }
}
