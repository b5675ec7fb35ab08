//! Statistical verifiable secret sharing.
//!
//! The dealer shares a bivariate polynomial through an `n×n` grid of MW invocations: every
//! processor deals its row and column values under every possible moderator, with the g and h
//! sides crossing so that the bivariate symmetry `g_j(k) = h_k(j)` is what moderators check.
//! Completed MW pairs accumulate into the dealer's consistency graph; once a stable core of
//! quorum size survives `t + 1` pruning rounds, the dealer publishes the graph and everyone
//! reconstructs through the MW values along its edges.

pub mod reconstruct;
pub mod share;
