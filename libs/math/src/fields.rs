//! Definitions for fields.

use crate::modular::ModularNumber;
use basic_types::ProcessorId;
use rand::Rng;

/// A prime field, acting as an element factory.
///
/// The field ties together the modulus chosen for a protocol run and the conventions around it,
/// most importantly the processor-to-abscissa mapping: processor `i` evaluates at `x = i`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrimeField {
    prime: u64,
}

impl PrimeField {
    /// Constructs a field with the given prime modulus.
    pub fn new(prime: u64) -> Self {
        Self { prime }
    }

    /// The modulus of this field.
    pub fn prime(&self) -> u64 {
        self.prime
    }

    /// Constructs an element of this field.
    pub fn element(&self, value: u64) -> ModularNumber {
        ModularNumber::new(value, self.prime)
    }

    /// The additive identity.
    pub fn zero(&self) -> ModularNumber {
        ModularNumber::zero(self.prime)
    }

    /// The multiplicative identity.
    pub fn one(&self) -> ModularNumber {
        ModularNumber::one(self.prime)
    }

    /// The abscissa a processor evaluates shares at.
    pub fn abscissa(&self, id: ProcessorId) -> ModularNumber {
        self.element(u64::from(id.as_inner()))
    }

    /// Generates a uniformly random element of this field.
    pub fn gen_random_element<R: Rng>(&self, rng: &mut R) -> ModularNumber {
        ModularNumber::new(rng.gen_range(0..self.prime), self.prime)
    }
}
