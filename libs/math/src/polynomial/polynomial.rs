//! Polynomial in a finite field.

use crate::modular::ModularNumber;
use rand::Rng;
use std::ops::{Add, Mul};

/// Polynomial expression.
///
/// Coefficients are stored lowest power first and kept canonical: no trailing zero coefficients,
/// except that the zero polynomial is represented as the single coefficient `[0]`. Degree is
/// therefore `len - 1`, and the zero polynomial has degree 0.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Polynomial {
    prime: u64,
    coefficients: Vec<ModularNumber>,
}

impl Polynomial {
    /// Creates a new polynomial expression, canonicalizing the coefficients.
    pub fn new(prime: u64, coefficients: Vec<ModularNumber>) -> Self {
        let mut polynomial = Self { prime, coefficients };
        polynomial.canonicalize();
        polynomial
    }

    /// The zero polynomial.
    pub fn zero(prime: u64) -> Self {
        Self { prime, coefficients: vec![ModularNumber::zero(prime)] }
    }

    /// A constant polynomial.
    pub fn constant(value: ModularNumber) -> Self {
        Self { prime: value.prime(), coefficients: vec![value] }
    }

    /// Samples a polynomial of exactly the given degree bound with a prescribed constant term.
    ///
    /// All non-constant coefficients are uniform in the field; the degree of the result is at
    /// most `degree` (high coefficients may sample to zero).
    pub fn random<R: Rng>(constant: ModularNumber, degree: usize, rng: &mut R) -> Self {
        let prime = constant.prime();
        let mut coefficients = vec![constant];
        for _ in 0..degree {
            coefficients.push(ModularNumber::new(rng.gen_range(0..prime), prime));
        }
        Self::new(prime, coefficients)
    }

    /// The field modulus of the coefficients.
    pub fn prime(&self) -> u64 {
        self.prime
    }

    /// The coefficients, lowest power first.
    pub fn coefficients(&self) -> &[ModularNumber] {
        &self.coefficients
    }

    /// The degree of the polynomial.
    pub fn degree(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }

    /// Checks whether this is the zero polynomial.
    pub fn is_zero(&self) -> bool {
        self.coefficients.iter().all(ModularNumber::is_zero)
    }

    /// The constant term, i.e. the evaluation at zero.
    pub fn constant_term(&self) -> ModularNumber {
        self.coefficients.first().copied().unwrap_or(ModularNumber::zero(self.prime))
    }

    /// Evaluates the polynomial at a given x using Horner's method.
    pub fn eval(&self, x: &ModularNumber) -> ModularNumber {
        let mut eval = ModularNumber::zero(self.prime);
        for coefficient in self.coefficients.iter().rev() {
            eval = eval * x + coefficient;
        }
        eval
    }

    /// Multiplies every coefficient by a scalar, in place.
    pub fn scale(&mut self, factor: &ModularNumber) {
        for coefficient in &mut self.coefficients {
            *coefficient = *coefficient * factor;
        }
        self.canonicalize();
    }

    // Remove trailing zeros, keeping at least the constant coefficient.
    fn canonicalize(&mut self) {
        while self.coefficients.len() > 1 && self.coefficients.last().map(ModularNumber::is_zero).unwrap_or(false) {
            self.coefficients.pop();
        }
        if self.coefficients.is_empty() {
            self.coefficients.push(ModularNumber::zero(self.prime));
        }
    }
}

impl Add for &Polynomial {
    type Output = Polynomial;

    fn add(self, other: &Polynomial) -> Polynomial {
        let zero = ModularNumber::zero(self.prime);
        let length = self.coefficients.len().max(other.coefficients.len());
        let mut coefficients = Vec::with_capacity(length);
        for index in 0..length {
            let left = self.coefficients.get(index).unwrap_or(&zero);
            let right = other.coefficients.get(index).unwrap_or(&zero);
            coefficients.push(*left + right);
        }
        Polynomial::new(self.prime, coefficients)
    }
}

impl Mul for &Polynomial {
    type Output = Polynomial;

    fn mul(self, other: &Polynomial) -> Polynomial {
        let zero = ModularNumber::zero(self.prime);
        let length = self.coefficients.len() + other.coefficients.len();
        let mut coefficients = vec![zero; length.saturating_sub(1).max(1)];
        for (i, left) in self.coefficients.iter().enumerate() {
            for (j, right) in other.coefficients.iter().enumerate() {
                if let Some(target) = coefficients.get_mut(i + j) {
                    *target = *target + &(*left * right);
                }
            }
        }
        Polynomial::new(self.prime, coefficients)
    }
}
