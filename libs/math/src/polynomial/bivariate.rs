//! Bivariate polynomial in a finite field.

use crate::{modular::ModularNumber, polynomial::Polynomial};
use rand::Rng;

/// Bivariate polynomial expression.
///
/// `rows[i]` is the coefficient polynomial in `y` attached to `x^i`, so
/// `P(x, y) = Σ_i x^i · rows[i](y)`. Rows are kept canonical: trailing zero rows are trimmed
/// down to at least one row.
///
/// The two univariate slices are [`reduce_x`][Bivariate::reduce_x] (fix `x`, a polynomial in
/// `y`) and [`reduce_y`][Bivariate::reduce_y] (fix `y`, a polynomial in `x`). For any `j`, `k`:
/// `reduce_x(j).eval(k) == reduce_y(k).eval(j) == eval(j, k)`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bivariate {
    prime: u64,
    rows: Vec<Polynomial>,
}

impl Bivariate {
    /// Creates a new bivariate expression, canonicalizing the rows.
    pub fn new(prime: u64, rows: Vec<Polynomial>) -> Self {
        let mut bivariate = Self { prime, rows };
        bivariate.canonicalize();
        bivariate
    }

    /// Samples a bivariate polynomial of the given degree in both variables with a prescribed
    /// secret at the origin, `P(0, 0) = secret`.
    pub fn random<R: Rng>(secret: ModularNumber, degree: usize, rng: &mut R) -> Self {
        let prime = secret.prime();
        let mut rows = Vec::with_capacity(degree + 1);
        for row_index in 0..=degree {
            let mut coefficients = Vec::with_capacity(degree + 1);
            for column_index in 0..=degree {
                if row_index == 0 && column_index == 0 {
                    coefficients.push(secret);
                } else {
                    coefficients.push(ModularNumber::new(rng.gen_range(0..prime), prime));
                }
            }
            rows.push(Polynomial::new(prime, coefficients));
        }
        Self::new(prime, rows)
    }

    /// The field modulus of the coefficients.
    pub fn prime(&self) -> u64 {
        self.prime
    }

    /// The coefficient rows, lowest `x` power first.
    pub fn rows(&self) -> &[Polynomial] {
        &self.rows
    }

    /// The degree in `x`.
    pub fn degree_x(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }

    /// The degree in `y`.
    pub fn degree_y(&self) -> usize {
        self.rows.iter().map(Polynomial::degree).max().unwrap_or(0)
    }

    /// Evaluates the polynomial at `(x, y)`.
    pub fn eval(&self, x: &ModularNumber, y: &ModularNumber) -> ModularNumber {
        let mut eval = ModularNumber::zero(self.prime);
        for row in self.rows.iter().rev() {
            eval = eval * x + &row.eval(y);
        }
        eval
    }

    /// The polynomial in `y` obtained by fixing `x`.
    pub fn reduce_x(&self, x: &ModularNumber) -> Polynomial {
        let zero = ModularNumber::zero(self.prime);
        let mut coefficients = vec![zero; self.degree_y() + 1];
        let mut power = ModularNumber::one(self.prime);
        for row in &self.rows {
            for (index, coefficient) in row.coefficients().iter().enumerate() {
                if let Some(target) = coefficients.get_mut(index) {
                    *target = *target + &(*coefficient * &power);
                }
            }
            power = power * x;
        }
        Polynomial::new(self.prime, coefficients)
    }

    /// The polynomial in `x` obtained by fixing `y`.
    pub fn reduce_y(&self, y: &ModularNumber) -> Polynomial {
        let coefficients = self.rows.iter().map(|row| row.eval(y)).collect();
        Polynomial::new(self.prime, coefficients)
    }

    // Trim trailing zero rows, keeping at least one.
    fn canonicalize(&mut self) {
        while self.rows.len() > 1 && self.rows.last().map(Polynomial::is_zero).unwrap_or(false) {
            self.rows.pop();
        }
        if self.rows.is_empty() {
            self.rows.push(Polynomial::zero(self.prime));
        }
    }
}
