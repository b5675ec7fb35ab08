//! MW-Reconstruct: broadcast of row evaluations and degree-checked interpolation.

use crate::{
    dmm::SimTime,
    errors::ProtocolError,
    message::{MwTag, Outbound, Payload, ProtocolMessage, Tag},
    processor::Processor,
    svss::reconstruct::ReconstructionOutcome,
};
use math_lib::{
    lagrange::lagrange_polynomial,
    polynomial::{point::Point, point_sequence::PointSequence},
};
use tracing::debug;

impl Processor {
    /// Starts reconstruction of one MW invocation.
    ///
    /// Idempotent; the first call initializes the per-row buffers from the moderator's quorum,
    /// replays reconstruction points that arrived early, and broadcasts this processor's own
    /// evaluation of every row whose corroborating set it belongs to.
    pub fn start_mw_reconstruct(&mut self, tag: MwTag, now: SimTime) -> Result<Vec<Outbound>, ProtocolError> {
        let mut out = Vec::new();
        self.start_mw_reconstruct_inner(tag, now, &mut out)?;
        Ok(out)
    }

    pub(crate) fn start_mw_reconstruct_inner(
        &mut self,
        tag: MwTag,
        now: SimTime,
        out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        let Some(m_set) = self.mw.get(&tag).and_then(|state| state.m_set.clone()) else {
            return Ok(());
        };
        let reconstruction = self.reconstructions.entry(tag).or_default();
        if reconstruction.started {
            return Ok(());
        }
        reconstruction.started = true;
        reconstruction.rows = m_set.iter().map(|row| (*row, Vec::new())).collect();
        let buffered = std::mem::take(&mut reconstruction.buffered);
        for message in buffered {
            self.receive(message, now, out)?;
        }

        let Some(state) = self.mw.get(&tag) else {
            return Ok(());
        };
        let Some(data) = &state.data else {
            return Ok(());
        };
        for row in &m_set {
            let in_l_set = state.l_sets.get(row).map(|l_set| l_set.contains(&self.id)).unwrap_or(false);
            if !in_l_set {
                continue;
            }
            let Some(value) = data.cross.get(row) else {
                continue;
            };
            let message = ProtocolMessage::new(
                tag,
                self.id,
                Some(tag.moderator),
                Payload::MwRec { row: *row, value: *value },
            );
            out.push(Outbound::broadcast(message));
        }
        Ok(())
    }

    // A reconstruction point, carried by reliable broadcast.
    pub(crate) fn receive_mw_rec(
        &mut self,
        tag: MwTag,
        message: ProtocolMessage,
        now: SimTime,
        _out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        let Payload::MwRec { row, value } = &message.payload else {
            return Ok(());
        };
        let (row, value) = (*row, *value);
        let sender = message.sender;
        {
            let reconstruction = self.reconstructions.entry(tag).or_default();
            if !reconstruction.started {
                reconstruction.buffered.push(message);
                return Ok(());
            }
        }

        // Only points for rows in the moderator's quorum, from members of the row's
        // corroborating set, count.
        let admissible = self.mw.get(&tag).map_or(false, |state| {
            state.m_set.as_ref().map_or(false, |m_set| m_set.contains(&row))
                && state.l_sets.get(&row).map_or(false, |l_set| l_set.contains(&sender))
        });
        if !admissible {
            return Ok(());
        }

        let threshold = self.params.reconstruction_threshold();
        if let Some(points) = self.reconstructions.get_mut(&tag).and_then(|rec| rec.rows.get_mut(&row)) {
            let duplicate = points.iter().any(|(existing, _)| *existing == sender);
            if !duplicate && points.len() < threshold {
                points.push((sender, value));
            }
        }
        self.check_mw_reconstruction(tag, now)
    }

    // Once every row has `t + 1` points, interpolate each row polynomial and then the free-term
    // polynomial; any interpolation exceeding degree `t` aborts the invocation.
    pub(crate) fn check_mw_reconstruction(&mut self, tag: MwTag, now: SimTime) -> Result<(), ProtocolError> {
        if self.mw_value(&tag.side(), tag.dealer, tag.moderator).is_some() {
            return Ok(());
        }
        let threshold = self.params.reconstruction_threshold();
        let degree_bound = self.params.t() as usize;
        let rows = {
            let Some(reconstruction) = self.reconstructions.get(&tag) else {
                return Ok(());
            };
            if reconstruction.rows.is_empty() || reconstruction.rows.values().any(|points| points.len() < threshold) {
                return Ok(());
            }
            reconstruction.rows.clone()
        };

        let mut free_points = PointSequence::default();
        for (row, points) in rows {
            let sequence: PointSequence = points
                .iter()
                .map(|(sender, value)| Point::new(self.field.abscissa(*sender), *value))
                .collect();
            let row_poly = lagrange_polynomial(&sequence)?;
            if row_poly.degree() > degree_bound {
                debug!("processor {} aborting reconstruction of {}: row {} exceeds degree bound", self.id, tag, row);
                self.invocations.complete(Tag::Mw(tag), now);
                return self.set_mw_value(tag, ReconstructionOutcome::Abort);
            }
            free_points.push(Point::new(self.field.abscissa(row), row_poly.constant_term()));
        }
        self.invocations.complete(Tag::Mw(tag), now);

        let free_poly = lagrange_polynomial(&free_points)?;
        let outcome = if free_poly.degree() > degree_bound {
            debug!("processor {} aborting reconstruction of {}: free polynomial exceeds degree bound", self.id, tag);
            ReconstructionOutcome::Abort
        } else {
            ReconstructionOutcome::Success(free_poly.constant_term())
        };
        self.set_mw_value(tag, outcome)
    }

    // Record a reconstruction result and cascade into the SVSS completion check.
    pub(crate) fn set_mw_value(&mut self, tag: MwTag, outcome: ReconstructionOutcome) -> Result<(), ProtocolError> {
        self.mw_values
            .entry(tag.side())
            .or_default()
            .entry(tag.dealer)
            .or_default()
            .insert(tag.moderator, outcome);
        self.check_svss_rec_done(tag.base())
    }
}
