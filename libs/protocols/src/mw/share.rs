//! MW-Share handlers: dealing, corroboration, the DEAL and moderator quorums, and completion.

use crate::{
    dmm::SimTime,
    errors::ProtocolError,
    message::{MwTag, Outbound, Payload, ProtocolMessage, Tag},
    mw::state::{CorroborateSlot, DealerState, ModCorroborateSlot, ModeratorSlot, MwValuesData},
    processor::Processor,
};
use basic_types::{ProcessorId, QuorumInsert, QuorumSet};
use math_lib::{modular::ModularNumber, polynomial::Polynomial};
use std::collections::BTreeMap;
use tracing::debug;

impl Processor {
    /// Starts one MW sharing with this processor as dealer.
    ///
    /// Samples the secret polynomial `f` of degree `t` with `f(0) = secret` and one row
    /// polynomial per participant with `f_j(0) = f(j)`, then hands every participant its row
    /// plus the cross evaluations and the moderator the secret polynomial itself.
    pub fn deal_mw(
        &mut self,
        secret: ModularNumber,
        c: u64,
        svss_dealer: ProcessorId,
        moderator: ProcessorId,
        now: SimTime,
    ) -> Result<Vec<Outbound>, ProtocolError> {
        let mut out = Vec::new();
        self.deal_mw_inner(secret, c, svss_dealer, moderator, now, &mut out)?;
        Ok(out)
    }

    pub(crate) fn deal_mw_inner(
        &mut self,
        secret: ModularNumber,
        c: u64,
        svss_dealer: ProcessorId,
        moderator: ProcessorId,
        now: SimTime,
        out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        let tag = MwTag::new(c, svss_dealer, self.id, moderator);
        self.invocations.observe(Tag::Mw(tag), now);

        let degree = self.params.t() as usize;
        let secret_poly = Polynomial::random(secret, degree, &mut self.rng);
        let mut row_polys = BTreeMap::new();
        for j in self.params.processors() {
            let constant = secret_poly.eval(&self.field.abscissa(j));
            row_polys.insert(j, Polynomial::random(constant, degree, &mut self.rng));
        }

        for i in self.params.processors() {
            let x = self.field.abscissa(i);
            let Some(share) = row_polys.get(&i).cloned() else {
                continue;
            };
            let cross = row_polys.iter().map(|(j, row)| (*j, row.eval(&x))).collect();
            let message =
                ProtocolMessage::new(tag, self.id, Some(moderator), Payload::MwValues { share, cross });
            out.push(Outbound::unicast(i, message));
        }
        let moderator_message = ProtocolMessage::new(
            tag,
            self.id,
            Some(moderator),
            Payload::MwModeratorValues { poly: secret_poly.clone() },
        );
        out.push(Outbound::unicast(moderator, moderator_message));

        self.disputes.init_ack(Tag::Mw(tag));
        self.dealings.insert(tag, DealerState { secret_poly, row_polys, ok_sent: false });
        Ok(())
    }

    /// Announces the value this processor moderates for an MW sharing dealt by `mw_dealer`.
    ///
    /// The dealer's VALUES message and this call race; whichever arrives second triggers the
    /// acceptance check.
    pub fn mw_moderate(
        &mut self,
        value: ModularNumber,
        c: u64,
        svss_dealer: ProcessorId,
        mw_dealer: ProcessorId,
        now: SimTime,
    ) -> Result<Vec<Outbound>, ProtocolError> {
        let mut out = Vec::new();
        self.mw_moderate_inner(value, c, svss_dealer, mw_dealer, now, &mut out)?;
        Ok(out)
    }

    pub(crate) fn mw_moderate_inner(
        &mut self,
        value: ModularNumber,
        c: u64,
        svss_dealer: ProcessorId,
        mw_dealer: ProcessorId,
        now: SimTime,
        out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        let tag = MwTag::new(c, svss_dealer, mw_dealer, self.id);
        let state = self.moderators.entry(tag).or_default();
        match state.slot.take() {
            Some(ModeratorSlot::PendingValues(message)) => {
                state.slot = Some(ModeratorSlot::Value(value));
                self.receive(*message, now, out)?;
            }
            _ => {
                state.slot = Some(ModeratorSlot::Value(value));
            }
        }
        Ok(())
    }

    // A participant receives its row polynomial and cross evaluations.
    pub(crate) fn receive_mw_values(
        &mut self,
        tag: MwTag,
        message: ProtocolMessage,
        out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        let Payload::MwValues { share, cross } = message.payload else {
            return Ok(());
        };

        let ack = ProtocolMessage::new(tag, self.id, message.moderator, Payload::MwAck);
        out.push(Outbound::broadcast(ack));
        for (i, value) in &cross {
            let corroboration =
                ProtocolMessage::new(tag, self.id, message.moderator, Payload::MwCorroborate { value: *value });
            out.push(Outbound::unicast(*i, corroboration));
        }

        let state = self.mw.entry(tag).or_default();
        state.data = Some(MwValuesData { share, cross });
        let buffered = match std::mem::replace(&mut state.corroborate, CorroborateSlot::Verified(BTreeMap::new())) {
            CorroborateSlot::Buffered(messages) => messages,
            CorroborateSlot::Verified(map) => {
                // Values arrived twice; keep what was already verified.
                state.corroborate = CorroborateSlot::Verified(map);
                Vec::new()
            }
        };
        self.disputes.init_deal(Tag::Mw(tag));

        for buffered_message in buffered {
            self.receive_mw_corroborate(tag, buffered_message, out)?;
        }
        Ok(())
    }

    // The moderator receives the dealer's secret polynomial.
    pub(crate) fn receive_mw_values_moderator(
        &mut self,
        tag: MwTag,
        message: ProtocolMessage,
        _now: SimTime,
        out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        let quorum = self.params.quorum();
        let state = self.moderators.entry(tag).or_default();
        let Some(slot) = &state.slot else {
            // `mw_moderate` has not been called yet; park the message until it is.
            state.slot = Some(ModeratorSlot::PendingValues(Box::new(message)));
            return Ok(());
        };
        let ModeratorSlot::Value(expected) = slot else {
            return Ok(());
        };
        if state.data.is_some() {
            return Ok(());
        }
        let Payload::MwModeratorValues { poly } = &message.payload else {
            return Ok(());
        };
        if poly.constant_term() != *expected {
            debug!("moderator {} rejecting values for {}: free term mismatch", self.id, tag);
            return Ok(());
        }

        state.data = Some(poly.clone());
        state.quorum = Some(QuorumSet::new(quorum));
        let buffered = match std::mem::replace(&mut state.corroborate, ModCorroborateSlot::Verified(Default::default()))
        {
            ModCorroborateSlot::Buffered(messages) => messages,
            ModCorroborateSlot::Verified(set) => {
                state.corroborate = ModCorroborateSlot::Verified(set);
                Vec::new()
            }
        };
        for buffered_message in buffered {
            self.receive_mw_l_mod(tag, buffered_message, out)?;
        }
        Ok(())
    }

    // A participant's cross evaluation of this processor's row.
    pub(crate) fn receive_mw_corroborate(
        &mut self,
        tag: MwTag,
        message: ProtocolMessage,
        out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        let Payload::MwCorroborate { value } = &message.payload else {
            return Ok(());
        };
        let sender = message.sender;
        let state = self.mw.entry(tag).or_default();
        match &state.data {
            Some(data) => {
                let expected = data.share.eval(&self.field.abscissa(sender));
                if expected == *value {
                    if let CorroborateSlot::Verified(map) = &mut state.corroborate {
                        map.insert(sender, *value);
                    }
                    self.process_mw_ack_corr(tag, sender, out)?;
                }
                // Mismatches are never recorded; the sender just fails to reach this
                // processor's quorum.
            }
            None => {
                if let CorroborateSlot::Buffered(messages) = &mut state.corroborate {
                    messages.push(message);
                }
            }
        }
        Ok(())
    }

    // A participant's acknowledgement, carried by reliable broadcast.
    pub(crate) fn receive_mw_ack(
        &mut self,
        tag: MwTag,
        message: ProtocolMessage,
        now: SimTime,
        out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        let sender = message.sender;
        self.mw.entry(tag).or_default().ack.insert(sender);

        self.process_mw_ack_corr(tag, sender, out)?;
        if message.moderator == Some(self.id) {
            self.process_mw_ack_l(tag, sender, out)?;
        }
        if tag.dealer == self.id {
            self.dealer_check_ok(tag, out)?;
        }
        self.check_mw_share_done(tag, now, out)
    }

    // Move a participant into DEAL once it both corroborated and acknowledged; at exactly the
    // quorum size, broadcast the corroborating set and send the free term to the moderator.
    pub(crate) fn process_mw_ack_corr(
        &mut self,
        tag: MwTag,
        sender: ProcessorId,
        out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        let quorum = self.params.quorum();
        self.disputes.init_deal(Tag::Mw(tag));
        let Some(state) = self.mw.get_mut(&tag) else {
            return Ok(());
        };
        let Some(data) = &state.data else {
            return Ok(());
        };
        let CorroborateSlot::Verified(corroborations) = &mut state.corroborate else {
            return Ok(());
        };
        if !state.ack.contains(&sender) || self.disputes.deal_len(&Tag::Mw(tag)) >= quorum {
            return Ok(());
        }
        let Some(value) = corroborations.remove(&sender) else {
            return Ok(());
        };
        self.disputes.record_deal_point(Tag::Mw(tag), sender, value);

        if self.disputes.deal_len(&Tag::Mw(tag)) == quorum {
            debug!("processor {} reached DEAL quorum on {}", self.id, tag);
            let members = self.disputes.deal_members(&Tag::Mw(tag));
            let l_broadcast = ProtocolMessage::new(tag, self.id, Some(tag.moderator), Payload::MwLSet { members });
            out.push(Outbound::broadcast(l_broadcast));

            let value = data.share.constant_term();
            let l_point = ProtocolMessage::new(tag, self.id, Some(tag.moderator), Payload::MwLPoint { value });
            out.push(Outbound::unicast(tag.moderator, l_point));
        }
        Ok(())
    }

    // A participant's corroborating set, carried by reliable broadcast.
    pub(crate) fn receive_mw_l(
        &mut self,
        tag: MwTag,
        message: ProtocolMessage,
        now: SimTime,
        out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        let Payload::MwLSet { members } = &message.payload else {
            return Ok(());
        };
        if members.len() < self.params.quorum() {
            return Ok(());
        }
        let sender = message.sender;
        self.mw.entry(tag).or_default().l_sets.insert(sender, members.clone());

        if message.moderator == Some(self.id) {
            self.process_mw_ack_l(tag, sender, out)?;
        }
        if tag.dealer == self.id {
            self.dealer_check_ok(tag, out)?;
        }
        self.check_mw_share_done(tag, now, out)
    }

    // A participant's free term, unicast to the moderator.
    pub(crate) fn receive_mw_l_mod(
        &mut self,
        tag: MwTag,
        message: ProtocolMessage,
        out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        let Payload::MwLPoint { value } = &message.payload else {
            return Ok(());
        };
        let sender = message.sender;
        let expected = {
            let state = self.moderators.entry(tag).or_default();
            match &state.data {
                Some(data) => Some(data.eval(&self.field.abscissa(sender))),
                None => {
                    if let ModCorroborateSlot::Buffered(messages) = &mut state.corroborate {
                        messages.push(message.clone());
                    }
                    None
                }
            }
        };
        if let Some(expected) = expected {
            if expected == *value {
                if let Some(state) = self.moderators.get_mut(&tag) {
                    if let ModCorroborateSlot::Verified(senders) = &mut state.corroborate {
                        senders.insert(sender);
                    }
                }
            }
        }
        self.process_mw_ack_l(tag, sender, out)
    }

    // Move a participant into the moderator's quorum once it both corroborated the free term
    // and acknowledged; at exactly the quorum size, broadcast the set.
    pub(crate) fn process_mw_ack_l(
        &mut self,
        tag: MwTag,
        sender: ProcessorId,
        out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        let acked = self.mw.get(&tag).map(|state| state.ack.contains(&sender)).unwrap_or(false);
        let Some(state) = self.moderators.get_mut(&tag) else {
            return Ok(());
        };
        if state.data.is_none() || !acked {
            return Ok(());
        }
        let ModCorroborateSlot::Verified(corroborated) = &state.corroborate else {
            return Ok(());
        };
        if !corroborated.contains(&sender) {
            return Ok(());
        }
        let Some(quorum) = &mut state.quorum else {
            return Ok(());
        };
        if let QuorumInsert::JustFilled = quorum.insert(sender) {
            debug!("moderator {} reached quorum on {}", self.id, tag);
            let members = quorum.members().clone();
            let message = ProtocolMessage::new(tag, self.id, Some(self.id), Payload::MwMSet { members });
            out.push(Outbound::broadcast(message));
        }
        Ok(())
    }

    // The moderator's quorum, carried by reliable broadcast.
    pub(crate) fn receive_mw_m(
        &mut self,
        tag: MwTag,
        message: ProtocolMessage,
        now: SimTime,
        out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        let Payload::MwMSet { members } = &message.payload else {
            return Ok(());
        };
        if members.len() < self.params.quorum() {
            return Ok(());
        }
        self.mw.entry(tag).or_default().m_set = Some(members.clone());

        if tag.dealer == self.id {
            self.dealer_check_ok(tag, out)?;
        }
        self.check_mw_share_done(tag, now, out)
    }

    // The dealer checks whether the moderator's quorum is fully covered by corroborating sets
    // and acknowledgements; if so it records the expected reconstruction points and announces OK.
    pub(crate) fn dealer_check_ok(&mut self, tag: MwTag, out: &mut Vec<Outbound>) -> Result<(), ProtocolError> {
        let Some(dealing) = self.dealings.get(&tag) else {
            return Ok(());
        };
        if dealing.ok_sent {
            return Ok(());
        }
        let Some(state) = self.mw.get(&tag) else {
            return Ok(());
        };
        let Some(m_set) = &state.m_set else {
            return Ok(());
        };
        for j in m_set {
            let Some(l_set) = state.l_sets.get(j) else {
                return Ok(());
            };
            if !l_set.iter().all(|l| state.ack.contains(l)) {
                return Ok(());
            }
        }

        let mut points = Vec::new();
        for j in m_set {
            let Some(l_set) = state.l_sets.get(j) else {
                return Ok(());
            };
            let Some(row) = dealing.row_polys.get(j) else {
                return Ok(());
            };
            for l in l_set {
                points.push(((*j, *l), row.eval(&self.field.abscissa(*l))));
            }
        }
        self.disputes.record_ack_points(Tag::Mw(tag), points);
        if let Some(dealing) = self.dealings.get_mut(&tag) {
            dealing.ok_sent = true;
        }
        debug!("dealer {} announcing OK on {}", self.id, tag);
        let message = ProtocolMessage::new(tag, self.id, Some(tag.moderator), Payload::MwOk);
        out.push(Outbound::broadcast(message));
        Ok(())
    }

    // The dealer's OK, carried by reliable broadcast.
    pub(crate) fn receive_mw_ok(
        &mut self,
        tag: MwTag,
        now: SimTime,
        out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        self.mw.entry(tag).or_default().ok_received = true;
        self.check_mw_share_done(tag, now, out)
    }

    // The share phase of an invocation is done once OK arrived and every member of the
    // moderator's quorum has a corroborating set that is fully acknowledged. A processor outside
    // the moderator's quorum owes no evidence and clears its DEAL map.
    pub(crate) fn check_mw_share_done(
        &mut self,
        tag: MwTag,
        now: SimTime,
        out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        if self.mw_share_done.contains(&tag) {
            return Ok(());
        }
        let (cleared, covered) = {
            let Some(state) = self.mw.get(&tag) else {
                return Ok(());
            };
            if !state.ok_received {
                return Ok(());
            }
            let Some(m_set) = &state.m_set else {
                return Ok(());
            };
            let cleared = if !m_set.contains(&self.id) { self.disputes.clear_deal(&Tag::Mw(tag)) } else { false };
            let covered = m_set.iter().all(|l| {
                state.l_sets.get(l).map(|l_set| l_set.iter().all(|k| state.ack.contains(k))).unwrap_or(false)
            });
            (cleared, covered)
        };

        if covered {
            debug!("processor {} finished share phase of {}", self.id, tag);
            self.mw_share_done.insert(tag);
            self.check_svss_share_done(tag, now, out)?;
        }
        if cleared {
            // Evidence shrank; deferred messages may pass the delay rule now.
            self.rescan_waiting(now, out)?;
        }
        Ok(())
    }
}
