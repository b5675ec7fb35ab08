//! Cross-invocation dispute memory.
//!
//! Every processor keeps three pieces of evidence that outlive individual invocations: the set
//! `D` of processors proven to have equivocated, the dealer-side `ACK` points recorded when an
//! MW sharing completes, and the participant-side `DEAL` points recorded while corroborating.
//! The memory plays a dual role: reconstruction messages are reconciled against it (detecting
//! liars), and the delay module consults it to hold back messages from processors that still owe
//! evidence from a closed invocation.

use crate::message::Tag;
use basic_types::ProcessorId;
use math_lib::modular::ModularNumber;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// An ACK point: the row a value belongs to and the processor it was evaluated at.
pub type AckPoint = (ProcessorId, ProcessorId);

/// The outcome of reconciling a claimed value against recorded evidence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reconciliation {
    /// The claim matches the recorded point; the evidence was consumed.
    Match,

    /// The claim contradicts the recorded point; the sender lied somewhere.
    Mismatch,

    /// No evidence was recorded for this claim.
    Unknown,
}

/// Per-processor dispute memory: the sets `D`, `ACK` and `DEAL`.
#[derive(Debug, Default)]
pub struct DisputeMemory {
    liars: BTreeSet<ProcessorId>,
    ack: HashMap<Tag, HashMap<AckPoint, ModularNumber>>,
    deal: HashMap<Tag, BTreeMap<ProcessorId, ModularNumber>>,
}

impl DisputeMemory {
    /// Marks a processor as a proven liar. `D` only ever grows.
    pub fn add_liar(&mut self, processor: ProcessorId) -> bool {
        self.liars.insert(processor)
    }

    /// Checks whether a processor was proven to lie.
    pub fn is_liar(&self, processor: ProcessorId) -> bool {
        self.liars.contains(&processor)
    }

    /// The set of proven liars.
    pub fn liars(&self) -> &BTreeSet<ProcessorId> {
        &self.liars
    }

    /// Registers an (initially empty) ACK map for an invocation. Dealer only.
    pub fn init_ack(&mut self, tag: Tag) {
        self.ack.entry(tag).or_default();
    }

    /// Records the dealer's expected reconstruction points for an invocation.
    pub fn record_ack_points(&mut self, tag: Tag, points: impl IntoIterator<Item = (AckPoint, ModularNumber)>) {
        self.ack.entry(tag).or_default().extend(points);
    }

    /// Registers an (initially empty) DEAL map for an invocation.
    pub fn init_deal(&mut self, tag: Tag) {
        self.deal.entry(tag).or_default();
    }

    /// Records a corroborated DEAL point. Callers cap the map at the quorum size.
    pub fn record_deal_point(&mut self, tag: Tag, sender: ProcessorId, value: ModularNumber) {
        self.deal.entry(tag).or_default().insert(sender, value);
    }

    /// Checks whether a DEAL map was registered for an invocation, even an empty one.
    pub fn deal_registered(&self, tag: &Tag) -> bool {
        self.deal.contains_key(tag)
    }

    /// The number of DEAL points recorded for an invocation.
    pub fn deal_len(&self, tag: &Tag) -> usize {
        self.deal.get(tag).map(BTreeMap::len).unwrap_or(0)
    }

    /// The processors recorded in an invocation's DEAL map, in ascending order.
    pub fn deal_members(&self, tag: &Tag) -> BTreeSet<ProcessorId> {
        self.deal.get(tag).map(|points| points.keys().copied().collect()).unwrap_or_default()
    }

    /// Drops an invocation's DEAL map, returning whether anything was removed.
    ///
    /// Called when the share phase completes without this processor in the moderator's set: it
    /// then owes no evidence from the invocation.
    pub fn clear_deal(&mut self, tag: &Tag) -> bool {
        self.deal.remove(tag).is_some()
    }

    /// Reconciles a claimed reconstruction value against the dealer's ACK evidence.
    pub fn consume_ack(&mut self, tag: &Tag, point: AckPoint, value: &ModularNumber) -> Reconciliation {
        let Some(points) = self.ack.get_mut(tag) else {
            return Reconciliation::Unknown;
        };
        let Some(recorded) = points.get(&point) else {
            return Reconciliation::Unknown;
        };
        if recorded == value {
            points.remove(&point);
            if points.is_empty() {
                self.ack.remove(tag);
            }
            Reconciliation::Match
        } else {
            Reconciliation::Mismatch
        }
    }

    /// Reconciles a claimed reconstruction value against this processor's DEAL evidence.
    pub fn consume_deal(&mut self, tag: &Tag, sender: ProcessorId, value: &ModularNumber) -> Reconciliation {
        let Some(points) = self.deal.get_mut(tag) else {
            return Reconciliation::Unknown;
        };
        let Some(recorded) = points.get(&sender) else {
            return Reconciliation::Unknown;
        };
        if recorded == value {
            points.remove(&sender);
            if points.is_empty() {
                self.deal.remove(tag);
            }
            Reconciliation::Match
        } else {
            Reconciliation::Mismatch
        }
    }

    /// The invocations with outstanding ACK evidence naming the given processor.
    pub fn ack_tags_naming(&self, sender: ProcessorId) -> impl Iterator<Item = &Tag> {
        self.ack
            .iter()
            .filter(move |(_, points)| points.keys().any(|(_, evaluee)| *evaluee == sender))
            .map(|(tag, _)| tag)
    }

    /// The invocations with outstanding DEAL evidence naming the given processor.
    pub fn deal_tags_naming(&self, sender: ProcessorId) -> impl Iterator<Item = &Tag> {
        self.deal.iter().filter(move |(_, points)| points.contains_key(&sender)).map(|(tag, _)| tag)
    }

    /// Checks whether no ACK evidence is outstanding.
    pub fn ack_is_empty(&self) -> bool {
        self.ack.values().all(HashMap::is_empty)
    }

    /// Checks whether no DEAL evidence is outstanding.
    pub fn deal_is_empty(&self) -> bool {
        self.deal.values().all(BTreeMap::is_empty)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::SvssTag;

    const P: u64 = 17;

    fn tag() -> Tag {
        Tag::Svss(SvssTag::new(2, ProcessorId::new(1)))
    }

    fn num(value: u64) -> ModularNumber {
        ModularNumber::new(value, P)
    }

    #[test]
    fn liars_are_monotone() {
        let mut memory = DisputeMemory::default();
        assert!(memory.add_liar(ProcessorId::new(3)));
        assert!(!memory.add_liar(ProcessorId::new(3)));
        assert!(memory.is_liar(ProcessorId::new(3)));
        assert!(!memory.is_liar(ProcessorId::new(4)));
    }

    #[test]
    fn ack_reconciliation() {
        let mut memory = DisputeMemory::default();
        let point = (ProcessorId::new(2), ProcessorId::new(3));
        memory.record_ack_points(tag(), [(point, num(5))]);

        assert_eq!(memory.consume_ack(&tag(), (ProcessorId::new(9), ProcessorId::new(9)), &num(5)), Reconciliation::Unknown);
        assert_eq!(memory.consume_ack(&tag(), point, &num(6)), Reconciliation::Mismatch);
        // A mismatch does not consume the evidence.
        assert_eq!(memory.consume_ack(&tag(), point, &num(5)), Reconciliation::Match);
        // The matching claim consumed it, and the empty tag entry is pruned.
        assert_eq!(memory.consume_ack(&tag(), point, &num(5)), Reconciliation::Unknown);
        assert!(memory.ack_is_empty());
        assert_eq!(memory.ack_tags_naming(ProcessorId::new(3)).count(), 0);
    }

    #[test]
    fn deal_reconciliation() {
        let mut memory = DisputeMemory::default();
        memory.init_deal(tag());
        memory.record_deal_point(tag(), ProcessorId::new(2), num(7));
        assert_eq!(memory.deal_len(&tag()), 1);
        assert!(memory.deal_members(&tag()).contains(&ProcessorId::new(2)));

        assert_eq!(memory.consume_deal(&tag(), ProcessorId::new(4), &num(7)), Reconciliation::Unknown);
        assert_eq!(memory.consume_deal(&tag(), ProcessorId::new(2), &num(8)), Reconciliation::Mismatch);
        assert_eq!(memory.consume_deal(&tag(), ProcessorId::new(2), &num(7)), Reconciliation::Match);
        assert!(memory.deal_is_empty());
    }

    #[test]
    fn naming_lookups() {
        let mut memory = DisputeMemory::default();
        memory.record_deal_point(tag(), ProcessorId::new(2), num(7));
        memory.record_ack_points(tag(), [((ProcessorId::new(1), ProcessorId::new(5)), num(3))]);

        assert_eq!(memory.deal_tags_naming(ProcessorId::new(2)).count(), 1);
        assert_eq!(memory.deal_tags_naming(ProcessorId::new(5)).count(), 0);
        // ACK evidence names the processor the row was evaluated at.
        assert_eq!(memory.ack_tags_naming(ProcessorId::new(5)).count(), 1);
        assert_eq!(memory.ack_tags_naming(ProcessorId::new(1)).count(), 0);
    }

    #[test]
    fn clear_deal_reports_removal() {
        let mut memory = DisputeMemory::default();
        assert!(!memory.clear_deal(&tag()));
        memory.init_deal(tag());
        assert!(memory.clear_deal(&tag()));
    }
}
