use std::marker::PhantomData;
use std::ops::BitOr;

use bincode::de::{BorrowDecoder, Decoder};
use bincode::enc::Encoder;
use bincode::error::{DecodeError, EncodeError};
use bincode::{BorrowDecode, Decode, Encode};

/// A set of flags over a small `#[repr(u8)]` enum, stored as a u16 bitfield.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BitEnum<T: ToPrimitive> {
    value: u16,
    phantom: PhantomData<T>,
}

impl<T: ToPrimitive> Encode for BitEnum<T> {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        self.value.encode(encoder)
    }
}

impl<Context, T: ToPrimitive> Decode<Context> for BitEnum<T> {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        Ok(Self::from_u16(u16::decode(decoder)?))
    }
}

impl<'de, Context, T: ToPrimitive> BorrowDecode<'de, Context> for BitEnum<T> {
    fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        Ok(Self::from_u16(u16::borrow_decode(decoder)?))
    }
}

/// Conversion of a flag enum member to its bit position.
pub trait ToPrimitive: Copy {
    fn to_u16(&self) -> u16;
}

impl<T: ToPrimitive> BitEnum<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            value: 0,
            phantom: PhantomData,
        }
    }

    #[must_use]
    pub fn new_with(flag: T) -> Self {
        let mut s = Self::new();
        s.set(flag);
        s
    }

    #[must_use]
    pub fn from_u16(value: u16) -> Self {
        Self {
            value,
            phantom: PhantomData,
        }
    }

    #[must_use]
    pub fn to_u16(&self) -> u16 {
        self.value
    }

    pub fn set(&mut self, flag: T) {
        self.value |= 1 << flag.to_u16();
    }

    pub fn clear(&mut self, flag: T) {
        self.value &= !(1 << flag.to_u16());
    }

    pub fn set_to(&mut self, flag: T, on: bool) {
        if on {
            self.set(flag);
        } else {
            self.clear(flag);
        }
    }

    #[must_use]
    pub fn contains(&self, flag: T) -> bool {
        self.value & (1 << flag.to_u16()) != 0
    }
}

impl<T: ToPrimitive> Default for BitEnum<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ToPrimitive> BitOr for BitEnum<T> {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self {
            value: self.value | rhs.value,
            phantom: PhantomData,
        }
    }
}

impl<T: ToPrimitive> BitOr<T> for BitEnum<T> {
    type Output = Self;

    fn bitor(mut self, rhs: T) -> Self::Output {
        self.set(rhs);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{BitEnum, ToPrimitive};

    #[derive(Clone, Copy)]
    enum TestFlag {
        A = 0,
        B = 1,
        C = 2,
    }

    impl ToPrimitive for TestFlag {
        fn to_u16(&self) -> u16 {
            *self as u16
        }
    }

    #[test]
    fn test_set_clear_contains() {
        let mut f = BitEnum::new_with(TestFlag::A) | TestFlag::C;
        assert!(f.contains(TestFlag::A));
        assert!(!f.contains(TestFlag::B));
        assert!(f.contains(TestFlag::C));
        f.clear(TestFlag::C);
        assert!(!f.contains(TestFlag::C));
    }
}
