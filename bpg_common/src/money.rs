use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, Mul},
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const CEDI_CURRENCY_CODE: &str = "GHS";
pub const CEDI_CURRENCY_CODE_LOWER: &str = "ghs";

/// The number of pesewas in one cedi.
const PESEWAS_PER_CEDI: i64 = 100;

//--------------------------------------       Cedis       -----------------------------------------------------------
/// A fixed-point monetary amount, stored as an integer number of pesewas (1/100 GHS).
///
/// All wallet balances and transaction amounts in the engine use this type, so repeated credit/debit cycles can
/// never accumulate floating-point drift.
#[derive(Debug, Clone, Copy, Default, Type, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct Cedis(i64);

op!(binary Cedis, Add, add);
op!(binary Cedis, Sub, sub);
op!(inplace Cedis, SubAssign, sub_assign);
op!(unary Cedis, Neg, neg);

impl Mul<i64> for Cedis {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self::from(self.value() * rhs)
    }
}

impl Sum for Cedis {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented in pesewas: {0}")]
pub struct CedisConversionError(String);

impl From<i64> for Cedis {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl TryFrom<u64> for Cedis {
    type Error = CedisConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > i64::MAX as u64 {
            Err(CedisConversionError(format!("Value {} is too large to convert to Cedis", value)))
        } else {
            #[allow(clippy::cast_possible_wrap)]
            Ok(Self(value as i64))
        }
    }
}

impl Display for Cedis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let whole = (self.0 / PESEWAS_PER_CEDI).abs();
        let frac = (self.0 % PESEWAS_PER_CEDI).abs();
        write!(f, "{sign}GH₵{whole}.{frac:02}")
    }
}

impl Cedis {
    /// Creates an amount from a whole number of cedis.
    pub fn from_cedis(cedis: i64) -> Self {
        Self(cedis * PESEWAS_PER_CEDI)
    }

    /// Creates an amount from a raw number of pesewas.
    pub fn from_pesewas(pesewas: i64) -> Self {
        Self(pesewas)
    }

    /// The raw amount in pesewas.
    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// The magnitude of the amount, disregarding sign.
    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }
}
