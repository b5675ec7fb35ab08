//! SVSS-Share handlers: dealing, the MW grid fan-out, and the consistency graph.

use crate::{
    dmm::SimTime,
    errors::ProtocolError,
    message::{MwTag, Outbound, Payload, ProtocolMessage, SvssTag, Tag},
    processor::Processor,
};
use basic_types::ProcessorId;
use math_lib::{modular::ModularNumber, polynomial::Bivariate};
use std::collections::BTreeSet;
use tracing::debug;

// The four MW invocations that tie a `(dealer, moderator)` pair to one sharing: both
// orientations on both sides.
pub(crate) fn pair_tags(base: SvssTag, left: ProcessorId, right: ProcessorId) -> [MwTag; 4] {
    [
        MwTag::new(base.c, base.dealer, left, right),
        MwTag::new(base.c + 1, base.dealer, left, right),
        MwTag::new(base.c, base.dealer, right, left),
        MwTag::new(base.c + 1, base.dealer, right, left),
    ]
}

impl Processor {
    /// Starts sharing a secret with this processor as SVSS dealer.
    ///
    /// Samples a bivariate polynomial of degree `t` in both variables with the secret at the
    /// origin and hands every processor its row and column slices.
    pub fn deal_svss(
        &mut self,
        secret: ModularNumber,
        now: SimTime,
    ) -> Result<(SvssTag, Vec<Outbound>), ProtocolError> {
        self.counter += 2;
        let tag = SvssTag::new(self.counter, self.id);
        self.invocations.observe(Tag::Svss(tag), now);

        let degree = self.params.t() as usize;
        let poly = Bivariate::random(secret, degree, &mut self.rng);

        let mut out = Vec::new();
        for j in self.params.processors() {
            let x = self.field.abscissa(j);
            let g = poly.reduce_x(&x);
            let h = poly.reduce_y(&x);
            let message = ProtocolMessage::new(tag, self.id, None, Payload::SvssValues { g, h });
            out.push(Outbound::unicast(j, message));
        }
        debug!("dealer {} started sharing {}", self.id, tag);
        Ok((tag, out))
    }

    // A participant receives its slices and fans out the MW grid: for every moderator `k` it
    // deals both of its values, and moderates the crossed side of `k`'s dealings, reflecting
    // `g_j(k) = h_k(j)`.
    pub(crate) fn receive_svss_values(
        &mut self,
        tag: SvssTag,
        message: ProtocolMessage,
        now: SimTime,
        out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        let Payload::SvssValues { g, h } = message.payload else {
            return Ok(());
        };
        for k in self.params.processors() {
            let x = self.field.abscissa(k);
            self.deal_mw_inner(g.eval(&x), tag.c, tag.dealer, k, now, out)?;
            self.deal_mw_inner(h.eval(&x), tag.c + 1, tag.dealer, k, now, out)?;
            self.mw_moderate_inner(g.eval(&x), tag.c + 1, tag.dealer, k, now, out)?;
            self.mw_moderate_inner(h.eval(&x), tag.c, tag.dealer, k, now, out)?;
        }
        Ok(())
    }

    // Every MW completion feeds both the dealer's graph accumulation and the participant's
    // share-done check.
    pub(crate) fn check_svss_share_done(
        &mut self,
        tag: MwTag,
        now: SimTime,
        out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        if tag.svss_dealer == self.id {
            self.dealer_check_svss_share_done(tag, out)?;
        }
        let base = tag.base();
        if self.adjacency.contains_key(&base) {
            self.helper_svss_share_done(base, now, out)?;
        }
        Ok(())
    }

    // The dealer records the pair behind a completed MW invocation once all four of its tags
    // completed, then iterates the core sets and publishes the graph when a quorum-sized core
    // survives.
    pub(crate) fn dealer_check_svss_share_done(
        &mut self,
        tag: MwTag,
        out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        let base = tag.base();
        if self.g_sent.contains(&base) {
            return Ok(());
        }
        let processors: Vec<ProcessorId> = self.params.processors().collect();
        let pair_done = pair_tags(base, tag.dealer, tag.moderator)
            .iter()
            .all(|pair_tag| self.mw_share_done.contains(pair_tag));
        let adjacency = self
            .g_dealer
            .entry(base)
            .or_insert_with(|| processors.iter().map(|p| (*p, BTreeSet::new())).collect());
        if pair_done {
            if let Some(neighbors) = adjacency.get_mut(&tag.moderator) {
                neighbors.insert(tag.dealer);
            }
            if let Some(neighbors) = adjacency.get_mut(&tag.dealer) {
                neighbors.insert(tag.moderator);
            }
        }

        // Iterate the cores: S[0] is everyone; a processor survives a round if it still has a
        // quorum of neighbors inside the previous core.
        let quorum = self.params.quorum();
        let mut layers: Vec<BTreeSet<ProcessorId>> = vec![processors.iter().copied().collect()];
        for _ in 0..=self.params.t() {
            let Some(previous) = layers.last() else {
                break;
            };
            let next = previous
                .iter()
                .filter(|j| {
                    adjacency
                        .get(j)
                        .map(|neighbors| neighbors.intersection(previous).count() >= quorum)
                        .unwrap_or(false)
                })
                .copied()
                .collect();
            layers.push(next);
        }

        if layers.last().map(BTreeSet::len).unwrap_or(0) >= quorum {
            debug!("dealer {} publishing consistency graph for {}", self.id, base);
            let adjacency = adjacency.clone();
            self.g_sent.insert(base);
            let message = ProtocolMessage::new(base, self.id, None, Payload::SvssG { layers, adjacency });
            out.push(Outbound::broadcast(message));
        }
        Ok(())
    }

    // A participant validates the dealer's published graph: the layer structure, the per-layer
    // quorum condition, and adjacency symmetry.
    pub(crate) fn receive_svss_g(
        &mut self,
        tag: SvssTag,
        message: ProtocolMessage,
        now: SimTime,
        out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        let Payload::SvssG { layers, adjacency } = &message.payload else {
            return Ok(());
        };
        let quorum = self.params.quorum();
        let everyone: BTreeSet<ProcessorId> = self.params.processors().collect();
        if layers.first() != Some(&everyone) {
            return Ok(());
        }
        if layers.len() != self.params.t() as usize + 2 {
            return Ok(());
        }
        let Some(core) = layers.last() else {
            return Ok(());
        };
        if core.len() < quorum {
            return Ok(());
        }
        for window in layers.windows(2) {
            let [previous, next] = window else {
                continue;
            };
            for j in next {
                let covered = adjacency
                    .get(j)
                    .map(|neighbors| neighbors.intersection(previous).count() >= quorum)
                    .unwrap_or(false);
                if !covered {
                    return Ok(());
                }
            }
        }
        for (j, neighbors) in adjacency {
            for k in neighbors {
                if !adjacency.get(k).map(|back| back.contains(j)).unwrap_or(false) {
                    return Ok(());
                }
            }
        }

        self.adjacency.insert(tag, adjacency.clone());
        self.cores.insert(tag, core.clone());
        self.helper_svss_share_done(tag, now, out)
    }

    // The share phase completes once all four MW invocations of every graph edge completed.
    pub(crate) fn helper_svss_share_done(
        &mut self,
        base: SvssTag,
        now: SimTime,
        out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        let base = base.base();
        if self.svss_share_done.contains(&base) {
            return Ok(());
        }
        let Some(adjacency) = self.adjacency.get(&base) else {
            return Ok(());
        };
        for (i, neighbors) in adjacency {
            for j in neighbors {
                if !pair_tags(base, *i, *j).iter().all(|pair_tag| self.mw_share_done.contains(pair_tag)) {
                    return Ok(());
                }
            }
        }
        debug!("processor {} finished share phase of {}", self.id, base);
        self.svss_share_done.insert(base);
        self.svss_reconstruct(base, now, out)
    }

    // Reconstruction chains through the MW invocations of every graph edge.
    pub(crate) fn svss_reconstruct(
        &mut self,
        base: SvssTag,
        now: SimTime,
        out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        let Some(adjacency) = self.adjacency.get(&base).cloned() else {
            return Ok(());
        };
        for (i, neighbors) in &adjacency {
            for j in neighbors {
                for pair_tag in pair_tags(base, *i, *j) {
                    self.start_mw_reconstruct_inner(pair_tag, now, out)?;
                }
            }
        }
        Ok(())
    }
}
