//! Datatype trait and type tag mapping.
//!
//! This module provides the [`Datatype`] trait, a sealed trait over the Rust
//! primitive types that may travel through collective operations. Each type
//! carries a [`DatatypeTag`], which the fabric records in a collective's
//! signature so that participants disagreeing about the element type are
//! detected instead of silently reinterpreting each other's payloads.
//!
//! # Supported Types
//!
//! | Rust Type | Tag Value |
//! |-----------|-----------|
//! | `f32`     | 0         |
//! | `f64`     | 1         |
//! | `i32`     | 2         |
//! | `i64`     | 3         |
//! | `u8`      | 4         |
//! | `u32`     | 5         |
//! | `u64`     | 6         |

use crate::ReduceOp;

/// Internal module to seal the trait.
mod sealed {
    pub trait Sealed {}
}

/// Element type tag carried in collective signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DatatypeTag {
    /// 32-bit floating point
    F32 = 0,
    /// 64-bit floating point
    F64 = 1,
    /// 32-bit signed integer
    I32 = 2,
    /// 64-bit signed integer
    I64 = 3,
    /// 8-bit unsigned integer
    U8 = 4,
    /// 32-bit unsigned integer
    U32 = 5,
    /// 64-bit unsigned integer
    U64 = 6,
}

/// Trait for types that can be used in collective operations.
///
/// This is a **sealed trait**: it cannot be implemented outside this crate.
/// Supported types: [`f32`], [`f64`], [`i32`], [`i64`], [`u8`], [`u32`], [`u64`].
///
/// # Example
///
/// ```
/// use ferropi::{Datatype, ReduceOp};
///
/// assert_eq!(3u64.combine(4, ReduceOp::Sum), 7);
/// assert_eq!(2.5f64.combine(1.0, ReduceOp::Max), 2.5);
/// ```
pub trait Datatype: sealed::Sealed + Copy + Send + Sync + std::fmt::Debug + 'static {
    /// The tag recorded in collective signatures.
    const TAG: DatatypeTag;

    /// Fold `other` into `self` under `op`.
    fn combine(self, other: Self, op: ReduceOp) -> Self;
}

macro_rules! impl_integer_datatype {
    ($ty:ty, $tag:expr) => {
        impl sealed::Sealed for $ty {}
        impl Datatype for $ty {
            const TAG: DatatypeTag = $tag;

            fn combine(self, other: Self, op: ReduceOp) -> Self {
                match op {
                    ReduceOp::Sum => self.wrapping_add(other),
                    ReduceOp::Max => self.max(other),
                    ReduceOp::Min => self.min(other),
                    ReduceOp::Prod => self.wrapping_mul(other),
                }
            }
        }
    };
}

macro_rules! impl_float_datatype {
    ($ty:ty, $tag:expr) => {
        impl sealed::Sealed for $ty {}
        impl Datatype for $ty {
            const TAG: DatatypeTag = $tag;

            fn combine(self, other: Self, op: ReduceOp) -> Self {
                match op {
                    ReduceOp::Sum => self + other,
                    ReduceOp::Max => self.max(other),
                    ReduceOp::Min => self.min(other),
                    ReduceOp::Prod => self * other,
                }
            }
        }
    };
}

impl_float_datatype!(f32, DatatypeTag::F32);
impl_float_datatype!(f64, DatatypeTag::F64);
impl_integer_datatype!(i32, DatatypeTag::I32);
impl_integer_datatype!(i64, DatatypeTag::I64);
impl_integer_datatype!(u8, DatatypeTag::U8);
impl_integer_datatype!(u32, DatatypeTag::U32);
impl_integer_datatype!(u64, DatatypeTag::U64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datatype_tag_values_are_sequential() {
        let tags = [
            DatatypeTag::F32,
            DatatypeTag::F64,
            DatatypeTag::I32,
            DatatypeTag::I64,
            DatatypeTag::U8,
            DatatypeTag::U32,
            DatatypeTag::U64,
        ];
        for (i, tag) in tags.iter().enumerate() {
            assert_eq!(*tag as i32, i as i32, "Tag {tag:?} should have value {i}");
        }
    }

    #[test]
    fn each_type_reports_its_tag() {
        assert_eq!(f32::TAG, DatatypeTag::F32);
        assert_eq!(f64::TAG, DatatypeTag::F64);
        assert_eq!(i32::TAG, DatatypeTag::I32);
        assert_eq!(i64::TAG, DatatypeTag::I64);
        assert_eq!(u8::TAG, DatatypeTag::U8);
        assert_eq!(u32::TAG, DatatypeTag::U32);
        assert_eq!(u64::TAG, DatatypeTag::U64);
    }

    #[test]
    fn integer_combine_covers_every_op() {
        assert_eq!(6i64.combine(-2, ReduceOp::Sum), 4);
        assert_eq!(6i64.combine(-2, ReduceOp::Max), 6);
        assert_eq!(6i64.combine(-2, ReduceOp::Min), -2);
        assert_eq!(6i64.combine(-2, ReduceOp::Prod), -12);
    }

    #[test]
    fn float_combine_covers_every_op() {
        assert_eq!(1.5f64.combine(0.25, ReduceOp::Sum), 1.75);
        assert_eq!(1.5f64.combine(0.25, ReduceOp::Max), 1.5);
        assert_eq!(1.5f64.combine(0.25, ReduceOp::Min), 0.25);
        assert_eq!(1.5f64.combine(0.25, ReduceOp::Prod), 0.375);
    }

    #[test]
    fn unsigned_sum_wraps_instead_of_panicking() {
        assert_eq!(u8::MAX.combine(2, ReduceOp::Sum), 1);
    }
}
