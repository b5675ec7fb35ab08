//! Modular arithmetic over a runtime prime modulus.

use crate::errors::DivByZero;
use std::{
    fmt::{Debug, Display, Formatter},
    ops::{Add, Div, Mul, Neg, Sub},
};

/// A number that performs modular arithmetic in every operation.
///
/// Each element carries its prime modulus, which lets a single run pick its field at startup
/// instead of baking the prime into the type. Operands of an operation must share the modulus;
/// mixing fields is a caller bug and the operation reduces by the left-hand modulus.
///
/// # Examples
///
/// ```
/// use math_lib::modular::ModularNumber;
///
/// let two = ModularNumber::new(2, 17);
/// let one = ModularNumber::one(17);
/// let three = two + &one;
/// let six = three * &two;
///
/// assert_eq!(six, ModularNumber::new(6, 17));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModularNumber {
    value: u64,
    prime: u64,
}

impl ModularNumber {
    /// Constructs an element, reducing the value into the field.
    pub fn new(value: u64, prime: u64) -> Self {
        debug_assert!(prime >= 2, "modulus must be at least 2");
        Self { value: value % prime, prime }
    }

    /// The additive identity of the field.
    pub fn zero(prime: u64) -> Self {
        Self::new(0, prime)
    }

    /// The multiplicative identity of the field.
    pub fn one(prime: u64) -> Self {
        Self::new(1, prime)
    }

    /// The value in normal form, in `[0, prime)`.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// The modulus this element lives under.
    pub fn prime(&self) -> u64 {
        self.prime
    }

    /// Checks whether this is the additive identity.
    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    /// Modular exponentiation by squaring.
    pub fn pow(&self, mut exponent: u64) -> Self {
        let mut base = u128::from(self.value);
        let prime = u128::from(self.prime);
        let mut result: u128 = 1;
        while exponent > 0 {
            if exponent & 1 == 1 {
                result = result * base % prime;
            }
            base = base * base % prime;
            exponent >>= 1;
        }
        Self { value: result as u64, prime: self.prime }
    }

    /// Multiplicative inverse, via Fermat's little theorem.
    pub fn inv(&self) -> Result<Self, DivByZero> {
        if self.value == 0 {
            return Err(DivByZero);
        }
        Ok(self.pow(self.prime - 2))
    }
}

impl Add<&ModularNumber> for ModularNumber {
    type Output = ModularNumber;

    fn add(self, other: &ModularNumber) -> ModularNumber {
        (&self).add(other)
    }
}

impl Add for &ModularNumber {
    type Output = ModularNumber;

    fn add(self, other: &ModularNumber) -> ModularNumber {
        debug_assert_eq!(self.prime, other.prime, "mixed moduli");
        let value = (u128::from(self.value) + u128::from(other.value)) % u128::from(self.prime);
        ModularNumber { value: value as u64, prime: self.prime }
    }
}

impl Sub<&ModularNumber> for ModularNumber {
    type Output = ModularNumber;

    fn sub(self, other: &ModularNumber) -> ModularNumber {
        (&self).sub(other)
    }
}

impl Sub for &ModularNumber {
    type Output = ModularNumber;

    fn sub(self, other: &ModularNumber) -> ModularNumber {
        debug_assert_eq!(self.prime, other.prime, "mixed moduli");
        let value = (u128::from(self.value) + u128::from(self.prime) - u128::from(other.value % self.prime))
            % u128::from(self.prime);
        ModularNumber { value: value as u64, prime: self.prime }
    }
}

impl Mul<&ModularNumber> for ModularNumber {
    type Output = ModularNumber;

    fn mul(self, other: &ModularNumber) -> ModularNumber {
        (&self).mul(other)
    }
}

impl Mul for &ModularNumber {
    type Output = ModularNumber;

    fn mul(self, other: &ModularNumber) -> ModularNumber {
        debug_assert_eq!(self.prime, other.prime, "mixed moduli");
        let value = u128::from(self.value) * u128::from(other.value) % u128::from(self.prime);
        ModularNumber { value: value as u64, prime: self.prime }
    }
}

impl Neg for ModularNumber {
    type Output = ModularNumber;

    fn neg(self) -> ModularNumber {
        (&self).neg()
    }
}

impl Neg for &ModularNumber {
    type Output = ModularNumber;

    fn neg(self) -> ModularNumber {
        ModularNumber { value: (self.prime - self.value) % self.prime, prime: self.prime }
    }
}

impl Div<&ModularNumber> for ModularNumber {
    type Output = Result<ModularNumber, DivByZero>;

    fn div(self, other: &ModularNumber) -> Self::Output {
        (&self).div(other)
    }
}

impl Div for &ModularNumber {
    type Output = Result<ModularNumber, DivByZero>;

    fn div(self, other: &ModularNumber) -> Self::Output {
        let inverse = other.inv()?;
        Ok(self * &inverse)
    }
}

impl Display for ModularNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl Debug for ModularNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (mod {})", self.value, self.prime)
    }
}
