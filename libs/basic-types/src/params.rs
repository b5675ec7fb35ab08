//! Protocol parameters.

use crate::party::ProcessorId;
use thiserror::Error;

/// The static configuration of a protocol run.
///
/// Holds the network size `n`, the adversary bound `t`, and the prime modulus of the field all
/// shares live in. The resilience condition `n > 3t` and the field size condition
/// `prime >= n + 1` are enforced at construction so the rest of the code can rely on them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProtocolParams {
    n: u32,
    t: u32,
    prime: u64,
}

impl ProtocolParams {
    /// Constructs parameters with an explicit field modulus.
    ///
    /// The modulus must be a prime `>= n + 1`; interpolation correctness depends on it.
    pub fn new(n: u32, t: u32, prime: u64) -> Result<Self, InvalidParams> {
        if n == 0 || n <= 3 * t {
            return Err(InvalidParams::Resilience { n, t });
        }
        if prime < u64::from(n) + 1 {
            return Err(InvalidParams::FieldTooSmall { prime, n });
        }
        if !is_prime(prime) {
            return Err(InvalidParams::NotPrime(prime));
        }
        Ok(Self { n, t, prime })
    }

    /// Constructs parameters using the smallest prime `>= n²` as the field modulus.
    ///
    /// `n²` mirrors the field size used by the statistical analysis; any prime `>= n + 1` works
    /// through [`ProtocolParams::new`].
    pub fn with_derived_prime(n: u32, t: u32) -> Result<Self, InvalidParams> {
        let target = u64::from(n) * u64::from(n);
        Self::new(n, t, smallest_prime_at_least(target))
    }

    /// The number of processors.
    pub fn n(&self) -> u32 {
        self.n
    }

    /// The adversary bound.
    pub fn t(&self) -> u32 {
        self.t
    }

    /// The field modulus.
    pub fn prime(&self) -> u64 {
        self.prime
    }

    /// The quorum threshold `q = n - t`.
    pub fn quorum(&self) -> usize {
        (self.n - self.t) as usize
    }

    /// The number of points needed to reconstruct a degree-`t` polynomial.
    pub fn reconstruction_threshold(&self) -> usize {
        (self.t + 1) as usize
    }

    /// All processor ids, in ascending order.
    pub fn processors(&self) -> impl Iterator<Item = ProcessorId> {
        (1..=self.n).map(ProcessorId::new)
    }
}

/// The parameters are not usable for a protocol run.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum InvalidParams {
    /// The resilience condition `n > 3t` does not hold.
    #[error("resilience condition violated: n = {n} must exceed 3t = {}", 3 * t)]
    Resilience {
        /// The network size.
        n: u32,
        /// The adversary bound.
        t: u32,
    },

    /// The field cannot assign a distinct abscissa to every processor.
    #[error("field modulus {prime} is smaller than n + 1 = {}", n + 1)]
    FieldTooSmall {
        /// The field modulus.
        prime: u64,
        /// The network size.
        n: u32,
    },

    /// The field modulus is not prime.
    #[error("field modulus {0} is not prime")]
    NotPrime(u64),
}

// Trial division is plenty for simulation-sized fields.
fn is_prime(candidate: u64) -> bool {
    if candidate < 2 {
        return false;
    }
    if candidate % 2 == 0 {
        return candidate == 2;
    }
    let mut divisor: u64 = 3;
    while divisor.saturating_mul(divisor) <= candidate {
        if candidate % divisor == 0 {
            return false;
        }
        divisor += 2;
    }
    true
}

fn smallest_prime_at_least(target: u64) -> u64 {
    let mut candidate = target.max(2);
    while !is_prime(candidate) {
        candidate += 1;
    }
    candidate
}
