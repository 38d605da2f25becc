//! Small sets over closed enums.
//!
//! Allowed-state masks are sets; a concrete observation is a single enum
//! value. Membership is tested with [`FlagSet::contains`] and overlap with
//! [`FlagSet::intersects`], never by comparing raw bits.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{BitOr, BitOrAssign};

pub trait Flag: Copy + fmt::Debug + 'static {
    /// Every member, in declaration order.
    const ALL: &'static [Self];

    fn bit(self) -> u16;
}

pub struct FlagSet<T: Flag> {
    bits: u16,
    _marker: PhantomData<T>,
}

impl<T: Flag> FlagSet<T> {
    pub const EMPTY: Self = Self::from_bits(0);

    pub(crate) const fn from_bits(bits: u16) -> Self {
        Self {
            bits,
            _marker: PhantomData,
        }
    }

    /// The set of every member.
    pub fn all() -> Self {
        T::ALL.iter().fold(Self::EMPTY, |set, flag| set | *flag)
    }

    pub fn of(flag: T) -> Self {
        Self::from_bits(flag.bit())
    }

    pub fn contains(self, flag: T) -> bool {
        self.bits & flag.bit() != 0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.bits & other.bits != 0
    }

    pub fn is_empty(self) -> bool {
        self.bits == 0
    }

    pub fn insert(&mut self, flag: T) {
        self.bits |= flag.bit();
    }

    pub fn remove(&mut self, flag: T) {
        self.bits &= !flag.bit();
    }

    pub fn iter(self) -> impl Iterator<Item = T> {
        T::ALL.iter().copied().filter(move |f| self.contains(*f))
    }
}

impl<T: Flag> Clone for FlagSet<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Flag> Copy for FlagSet<T> {}

impl<T: Flag> PartialEq for FlagSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl<T: Flag> Eq for FlagSet<T> {}

impl<T: Flag> Default for FlagSet<T> {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl<T: Flag> fmt::Debug for FlagSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T: Flag> From<T> for FlagSet<T> {
    fn from(flag: T) -> Self {
        Self::of(flag)
    }
}

impl<T: Flag> BitOr for FlagSet<T> {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self::from_bits(self.bits | rhs.bits)
    }
}

impl<T: Flag> BitOr<T> for FlagSet<T> {
    type Output = Self;

    fn bitor(self, rhs: T) -> Self {
        Self::from_bits(self.bits | rhs.bit())
    }
}

impl<T: Flag> BitOrAssign<T> for FlagSet<T> {
    fn bitor_assign(&mut self, rhs: T) {
        self.insert(rhs);
    }
}

/// Implements [`Flag`] for a fieldless enum, one bit per variant in order,
/// plus `A | B` producing a set.
macro_rules! flag_enum {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl $crate::flags::Flag for $ty {
            const ALL: &'static [Self] = &[$($ty::$variant),+];

            fn bit(self) -> u16 {
                1 << (self as u16)
            }
        }

        impl ::std::ops::BitOr for $ty {
            type Output = $crate::flags::FlagSet<$ty>;

            fn bitor(self, rhs: Self) -> Self::Output {
                $crate::flags::FlagSet::of(self) | rhs
            }
        }
    };
}

pub(crate) use flag_enum;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Color {
        Red,
        Green,
        Blue,
    }

    flag_enum!(Color { Red, Green, Blue });

    #[test]
    fn test_membership_and_overlap() {
        let warm = Color::Red | Color::Green;
        assert!(warm.contains(Color::Red));
        assert!(!warm.contains(Color::Blue));
        assert!(warm.intersects(FlagSet::of(Color::Green)));
        assert!(!warm.intersects(FlagSet::of(Color::Blue)));
        assert_eq!(FlagSet::<Color>::all().iter().count(), 3);
        assert!(FlagSet::<Color>::EMPTY.is_empty());
    }

    #[test]
    fn test_insert_remove() {
        let mut set = FlagSet::of(Color::Blue);
        set |= Color::Red;
        set.remove(Color::Blue);
        assert_eq!(set, FlagSet::of(Color::Red));
        assert_eq!(format!("{set:?}"), "{Red}");
    }
}
