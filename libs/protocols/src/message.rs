//! Message and invocation-tag model.

use basic_types::ProcessorId;
use math_lib::{modular::ModularNumber, polynomial::Polynomial};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Display, Formatter},
};

/// Protocol stages, ordered causally.
///
/// The ordering is load bearing: the router ignores any stage up to [`Stage::MwOk`] once the
/// invocation's share phase completed, and the invocation log stamps every stage on arrival.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Dealer values, to participants and to the moderator.
    MwValues,
    /// Participant acknowledgement of its values.
    MwAck,
    /// Pairwise corroboration of cross evaluations.
    MwCorroborate,
    /// A participant's corroborating set (broadcast) or its free term (to the moderator).
    MwL,
    /// The moderator's corroborating set.
    MwM,
    /// The dealer's completion announcement.
    MwOk,
    /// A reconstruction point.
    MwRec,
    /// The SVSS dealer's row/column polynomials.
    SvssValues,
    /// The SVSS dealer's consistency graph.
    SvssG,
}

/// Identifies one MW invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MwTag {
    /// The sharing counter. Even counters carry g-side values, odd counters h-side values.
    pub c: u64,

    /// The SVSS dealer whose sharing this invocation serves.
    pub svss_dealer: ProcessorId,

    /// The MW dealer.
    pub dealer: ProcessorId,

    /// The MW moderator.
    pub moderator: ProcessorId,
}

impl MwTag {
    /// Constructs a new MW tag.
    pub fn new(c: u64, svss_dealer: ProcessorId, dealer: ProcessorId, moderator: ProcessorId) -> Self {
        Self { c, svss_dealer, dealer, moderator }
    }

    /// The side (g or h) this invocation contributes to, keyed by its own counter.
    pub fn side(&self) -> SvssTag {
        SvssTag::new(self.c, self.svss_dealer)
    }

    /// The SVSS sharing this invocation belongs to, with the counter rounded down to even.
    pub fn base(&self) -> SvssTag {
        self.side().base()
    }
}

impl Display for MwTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.c, self.svss_dealer, self.dealer, self.moderator)
    }
}

/// Identifies one SVSS sharing, or one side of it.
///
/// A sharing proper always has an even counter; the odd sibling identifies the h side of the
/// same sharing in per-side value maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SvssTag {
    /// The sharing counter.
    pub c: u64,

    /// The SVSS dealer.
    pub dealer: ProcessorId,
}

impl SvssTag {
    /// Constructs a new SVSS tag.
    pub fn new(c: u64, dealer: ProcessorId) -> Self {
        Self { c, dealer }
    }

    /// The sharing this side belongs to, with the counter rounded down to even.
    pub fn base(&self) -> SvssTag {
        Self::new(self.c - self.c % 2, self.dealer)
    }

    /// The odd (h-side) sibling of this sharing.
    pub fn sibling(&self) -> SvssTag {
        Self::new(self.base().c + 1, self.dealer)
    }
}

impl Display for SvssTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.c, self.dealer)
    }
}

/// An invocation tag, MW or SVSS.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tag {
    /// An MW invocation tag.
    Mw(MwTag),

    /// An SVSS invocation tag.
    Svss(SvssTag),
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Mw(tag) => write!(f, "{tag}"),
            Tag::Svss(tag) => write!(f, "{tag}"),
        }
    }
}

impl From<MwTag> for Tag {
    fn from(tag: MwTag) -> Self {
        Tag::Mw(tag)
    }
}

impl From<SvssTag> for Tag {
    fn from(tag: SvssTag) -> Self {
        Tag::Svss(tag)
    }
}

/// The stage-dependent payload of a message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Dealer values for a participant: its share polynomial plus the cross evaluations
    /// `j -> f_j(i)` of every other row at this participant's abscissa.
    MwValues {
        /// The participant's row polynomial `f_i`.
        share: Polynomial,

        /// Every row evaluated at this participant, `j -> f_j(i)`.
        cross: BTreeMap<ProcessorId, ModularNumber>,
    },

    /// Dealer values for the moderator: the secret polynomial `f` itself.
    MwModeratorValues {
        /// The dealer's secret polynomial.
        poly: Polynomial,
    },

    /// A participant acknowledges having received usable values.
    MwAck,

    /// A participant's evaluation of the receiver's row at its own abscissa.
    MwCorroborate {
        /// The value `f_receiver(sender)`.
        value: ModularNumber,
    },

    /// A participant's corroborating quorum, broadcast.
    MwLSet {
        /// The members of the sender's DEAL quorum.
        members: BTreeSet<ProcessorId>,
    },

    /// A participant's free term, unicast to the moderator.
    MwLPoint {
        /// The value `f_sender(0)`.
        value: ModularNumber,
    },

    /// The moderator's corroborating quorum, broadcast.
    MwMSet {
        /// The members of the moderator's quorum.
        members: BTreeSet<ProcessorId>,
    },

    /// The dealer's completion announcement.
    MwOk,

    /// A reconstruction point: the sender's evaluation of row `row`.
    MwRec {
        /// The row the point belongs to.
        row: ProcessorId,

        /// The value `f_row(sender)`.
        value: ModularNumber,
    },

    /// The SVSS dealer's slices for one participant.
    SvssValues {
        /// The row slice `g_j = P(j, ·)`.
        g: Polynomial,

        /// The column slice `h_j = P(·, j)`.
        h: Polynomial,
    },

    /// The SVSS dealer's consistency structure.
    SvssG {
        /// The iterated core sets `S[0..=t+1]`.
        layers: Vec<BTreeSet<ProcessorId>>,

        /// The adjacency sets of completed MW pairs.
        adjacency: BTreeMap<ProcessorId, BTreeSet<ProcessorId>>,
    },
}

impl Payload {
    /// The stage this payload belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            Payload::MwValues { .. } | Payload::MwModeratorValues { .. } => Stage::MwValues,
            Payload::MwAck => Stage::MwAck,
            Payload::MwCorroborate { .. } => Stage::MwCorroborate,
            Payload::MwLSet { .. } | Payload::MwLPoint { .. } => Stage::MwL,
            Payload::MwMSet { .. } => Stage::MwM,
            Payload::MwOk => Stage::MwOk,
            Payload::MwRec { .. } => Stage::MwRec,
            Payload::SvssValues { .. } => Stage::SvssValues,
            Payload::SvssG { .. } => Stage::SvssG,
        }
    }
}

/// A protocol message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    /// The invocation this message belongs to.
    pub tag: Tag,

    /// The sending processor.
    pub sender: ProcessorId,

    /// The moderator of the invocation, when the stage has one.
    pub moderator: Option<ProcessorId>,

    /// Whether this message was carried by reliable broadcast.
    pub rb: bool,

    /// The stage-dependent payload.
    pub payload: Payload,
}

impl ProtocolMessage {
    /// Constructs a new unicast message.
    pub fn new(tag: impl Into<Tag>, sender: ProcessorId, moderator: Option<ProcessorId>, payload: Payload) -> Self {
        Self { tag: tag.into(), sender, moderator, rb: false, payload }
    }

    /// The stage of this message.
    pub fn stage(&self) -> Stage {
        self.payload.stage()
    }
}

/// How an output message should be routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Deliver to a single processor.
    Unicast(ProcessorId),

    /// Deliver to every processor through reliable broadcast.
    Broadcast,
}

/// An output message produced by a handler, addressed for the scheduler to route.
#[derive(Clone, Debug)]
pub struct Outbound {
    /// The routing of this message.
    pub dispatch: Dispatch,

    /// The message itself.
    pub message: ProtocolMessage,
}

impl Outbound {
    /// Addresses a message to a single processor.
    pub fn unicast(to: ProcessorId, message: ProtocolMessage) -> Self {
        Self { dispatch: Dispatch::Unicast(to), message }
    }

    /// Addresses a message to everyone, marking it as reliable broadcast.
    pub fn broadcast(mut message: ProtocolMessage) -> Self {
        message.rb = true;
        Self { dispatch: Dispatch::Broadcast, message }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stage_ordering() {
        assert!(Stage::MwValues < Stage::MwAck);
        assert!(Stage::MwOk < Stage::MwRec);
        assert!(Stage::MwRec < Stage::SvssValues);
        assert!(Stage::SvssValues < Stage::SvssG);
    }

    #[test]
    fn tag_sides() {
        let tag = MwTag::new(5, ProcessorId::new(2), ProcessorId::new(3), ProcessorId::new(4));
        assert_eq!(tag.side(), SvssTag::new(5, ProcessorId::new(2)));
        assert_eq!(tag.base(), SvssTag::new(4, ProcessorId::new(2)));
        assert_eq!(tag.base().sibling(), SvssTag::new(5, ProcessorId::new(2)));
        assert_eq!(tag.base().base(), tag.base());
    }

    #[test]
    fn broadcast_marks_rb() {
        let tag = SvssTag::new(2, ProcessorId::new(1));
        let message = ProtocolMessage::new(tag, ProcessorId::new(1), None, Payload::MwOk);
        assert!(!message.rb);
        let outbound = Outbound::broadcast(message);
        assert!(outbound.message.rb);
        assert_eq!(outbound.dispatch, Dispatch::Broadcast);
    }
}
