//! SVSS-Reconstruct: pairwise consistency across the graph and the final interpolation.

use crate::{errors::ProtocolError, message::SvssTag, processor::Processor};
use basic_types::ProcessorId;
use itertools::iproduct;
use math_lib::{
    lagrange::lagrange_polynomial,
    modular::ModularNumber,
    polynomial::{point::Point, point_sequence::PointSequence, Polynomial},
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// The outcome of a reconstruction.
///
/// The abort sentinel is distinct from every field value; readers propagate it instead of
/// raising errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconstructionOutcome {
    /// The secret was reconstructed.
    Success(ModularNumber),

    /// Adversarial interference defeated reconstruction.
    Abort,
}

impl ReconstructionOutcome {
    /// The reconstructed value, if there is one.
    pub fn value(&self) -> Option<&ModularNumber> {
        match self {
            Self::Success(value) => Some(value),
            Self::Abort => None,
        }
    }

    /// Checks whether reconstruction was aborted.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Abort)
    }
}

impl Processor {
    // Reconstruction of a sharing is ready once, on both sides, every core member has MW values
    // recorded in both directions against each of its graph neighbors.
    pub(crate) fn check_svss_rec_done(&mut self, base: SvssTag) -> Result<(), ProtocolError> {
        if self.svss_values.contains_key(&base) {
            return Ok(());
        }
        let (Some(adjacency), Some(core)) = (self.adjacency.get(&base), self.cores.get(&base)) else {
            return Ok(());
        };
        for side in [base, base.sibling()] {
            let Some(values) = self.mw_values.get(&side) else {
                return Ok(());
            };
            for k in core {
                let Some(k_values) = values.get(k) else {
                    return Ok(());
                };
                let Some(neighbors) = adjacency.get(k) else {
                    return Ok(());
                };
                for m in neighbors {
                    let Some(m_values) = values.get(m) else {
                        return Ok(());
                    };
                    if !k_values.contains_key(m) || !m_values.contains_key(k) {
                        return Ok(());
                    }
                }
            }
        }
        self.interpolate_svss_val(base)
    }

    // Interpolate each core member's g and h polynomials from the values along its edges,
    // exclude members with aborted values or degree violations, check pairwise consistency over
    // the survivors, and require the two free-term reconstructions to agree.
    fn interpolate_svss_val(&mut self, base: SvssTag) -> Result<(), ProtocolError> {
        let degree_bound = self.params.t() as usize;
        let quorum = self.params.quorum();
        let (Some(adjacency), Some(core)) = (self.adjacency.get(&base), self.cores.get(&base)) else {
            return Ok(());
        };
        let (Some(g_values), Some(h_values)) =
            (self.mw_values.get(&base), self.mw_values.get(&base.sibling()))
        else {
            return Ok(());
        };

        let mut g_polys: BTreeMap<ProcessorId, Polynomial> = BTreeMap::new();
        let mut h_polys: BTreeMap<ProcessorId, Polynomial> = BTreeMap::new();
        let mut excluded: BTreeSet<ProcessorId> = BTreeSet::new();
        'members: for k in core {
            let Some(neighbors) = adjacency.get(k) else {
                excluded.insert(*k);
                continue;
            };
            let mut g_points = PointSequence::default();
            let mut h_points = PointSequence::default();
            for l in neighbors {
                let g_value = g_values.get(k).and_then(|values| values.get(l));
                let h_value = h_values.get(k).and_then(|values| values.get(l));
                match (g_value, h_value) {
                    (Some(ReconstructionOutcome::Success(g)), Some(ReconstructionOutcome::Success(h))) => {
                        let x = self.field.abscissa(*l);
                        g_points.push(Point::new(x, *g));
                        h_points.push(Point::new(x, *h));
                    }
                    _ => {
                        excluded.insert(*k);
                        continue 'members;
                    }
                }
            }
            let g_poly = lagrange_polynomial(&g_points)?;
            let h_poly = lagrange_polynomial(&h_points)?;
            if g_poly.degree() > degree_bound || h_poly.degree() > degree_bound {
                excluded.insert(*k);
            } else {
                g_polys.insert(*k, g_poly);
                h_polys.insert(*k, h_poly);
            }
        }

        let survivors: Vec<ProcessorId> = core.iter().filter(|k| !excluded.contains(k)).copied().collect();
        if survivors.len() < quorum {
            debug!("processor {} aborting {}: only {} consistent members", self.id, base, survivors.len());
            self.record_svss_value(base, ReconstructionOutcome::Abort);
            return Ok(());
        }

        for (i, j) in iproduct!(&survivors, &survivors) {
            let row_value = g_polys.get(i).map(|poly| poly.eval(&self.field.abscissa(*j)));
            let column_value = h_polys.get(j).map(|poly| poly.eval(&self.field.abscissa(*i)));
            if row_value != column_value {
                debug!("processor {} aborting {}: rows of {} and columns of {} disagree", self.id, base, i, j);
                self.record_svss_value(base, ReconstructionOutcome::Abort);
                return Ok(());
            }
        }

        let g_points: PointSequence =
            g_polys.iter().map(|(i, poly)| Point::new(self.field.abscissa(*i), poly.constant_term())).collect();
        let h_points: PointSequence =
            h_polys.iter().map(|(i, poly)| Point::new(self.field.abscissa(*i), poly.constant_term())).collect();
        let g_free = lagrange_polynomial(&g_points)?.constant_term();
        let h_free = lagrange_polynomial(&h_points)?.constant_term();

        let outcome = if g_free == h_free {
            ReconstructionOutcome::Success(g_free)
        } else {
            debug!("processor {} aborting {}: free terms disagree", self.id, base);
            ReconstructionOutcome::Abort
        };
        self.record_svss_value(base, outcome);
        Ok(())
    }

    // Results are immutable once set.
    pub(crate) fn record_svss_value(&mut self, base: SvssTag, outcome: ReconstructionOutcome) {
        self.svss_values.entry(base).or_insert_with(|| {
            debug!("processor {} recorded outcome {:?} for {}", self.id, outcome, base);
            outcome
        });
    }
}
