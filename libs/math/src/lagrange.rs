//! Lagrange interpolation in a finite field.

use crate::{
    errors::InterpolationError,
    modular::ModularNumber,
    polynomial::{point_sequence::PointSequence, Polynomial},
};

/// Construct the unique polynomial of degree `< k` through `k` points, O(n³).
///
/// Interpolation is exact field arithmetic, so evaluating the result at any of the input
/// abscissas reproduces the input ordinates.
pub fn lagrange_polynomial(sequence: &PointSequence) -> Result<Polynomial, InterpolationError> {
    let first = sequence.points().first().ok_or(InterpolationError::EmptySequence)?;
    if sequence.has_duplicates() {
        return Err(InterpolationError::DuplicateAbscissas);
    }
    let prime = first.x.prime();
    let mut result = Polynomial::zero(prime);
    for (i, pi) in sequence.points().iter().enumerate() {
        let mut den = ModularNumber::one(prime);
        let mut num = Polynomial::constant(ModularNumber::one(prime));
        for (j, pj) in sequence.points().iter().enumerate() {
            if j != i {
                den = den * &(pi.x - &pj.x);
                let root = Polynomial::new(prime, vec![-pj.x, ModularNumber::one(prime)]);
                num = &num * &root;
            }
        }
        let factor = (pi.y / &den)?;
        num.scale(&factor);
        result = &result + &num;
    }
    Ok(result)
}
