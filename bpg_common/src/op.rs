//! Tiny macro for deriving arithmetic operator impls on i64 newtypes.

/// Implements a binary, in-place or unary operator for a single-field tuple struct.
///
/// Usage:
/// ```ignore
/// op!(binary Cedis, Add, add);
/// op!(inplace Cedis, SubAssign, sub_assign);
/// op!(unary Cedis, Neg, neg);
/// ```
#[macro_export]
macro_rules! op {
    (binary $ty:ident, $trait:ident, $method:ident) => {
        impl std::ops::$trait for $ty {
            type Output = Self;

            fn $method(self, rhs: Self) -> Self::Output {
                Self(std::ops::$trait::$method(self.0, rhs.0))
            }
        }
    };
    (inplace $ty:ident, $trait:ident, $method:ident) => {
        impl std::ops::$trait for $ty {
            fn $method(&mut self, rhs: Self) {
                std::ops::$trait::$method(&mut self.0, rhs.0);
            }
        }
    };
    (unary $ty:ident, $trait:ident, $method:ident) => {
        impl std::ops::$trait for $ty {
            type Output = Self;

            fn $method(self) -> Self::Output {
                Self(std::ops::$trait::$method(self.0))
            }
        }
    };
}
