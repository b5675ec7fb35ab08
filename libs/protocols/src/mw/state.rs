//! Per-invocation MW state.

use crate::message::ProtocolMessage;
use basic_types::{ProcessorId, QuorumSet};
use math_lib::{modular::ModularNumber, polynomial::Polynomial};
use std::collections::{BTreeMap, BTreeSet};

/// The values a participant received from the MW dealer.
#[derive(Clone, Debug)]
pub struct MwValuesData {
    /// This participant's row polynomial.
    pub share: Polynomial,

    /// Every row evaluated at this participant, `j -> f_j(i)`.
    pub cross: BTreeMap<ProcessorId, ModularNumber>,
}

/// Corroboration messages arrive before the dealer's values often enough that the slot is
/// either a buffer of raw messages or the verified map, never both.
#[derive(Debug)]
pub enum CorroborateSlot {
    /// Values have not arrived; corroborations are buffered unverified.
    Buffered(Vec<ProtocolMessage>),

    /// Values arrived; corroborations are verified against the own row on receipt.
    Verified(BTreeMap<ProcessorId, ModularNumber>),
}

impl Default for CorroborateSlot {
    fn default() -> Self {
        Self::Buffered(Vec::new())
    }
}

/// The participant-and-observer side of one MW invocation.
#[derive(Debug, Default)]
pub struct MwShareState {
    /// The dealer's values for this participant, once received.
    pub data: Option<MwValuesData>,

    /// Corroborations, buffered or verified.
    pub corroborate: CorroborateSlot,

    /// Processors whose acknowledgement was delivered.
    pub ack: BTreeSet<ProcessorId>,

    /// The corroborating sets broadcast by participants that reached their quorum.
    pub l_sets: BTreeMap<ProcessorId, BTreeSet<ProcessorId>>,

    /// The moderator's broadcast quorum, once received.
    pub m_set: Option<BTreeSet<ProcessorId>>,

    /// Whether the dealer's OK was delivered.
    pub ok_received: bool,
}

/// The moderator's slot for the value it moderates: the local `mw_moderate` call and the
/// dealer's VALUES message race, so whichever arrives first parks here.
#[derive(Debug)]
pub enum ModeratorSlot {
    /// `mw_moderate` was called with this value.
    Value(ModularNumber),

    /// The dealer's VALUES message arrived before `mw_moderate`.
    PendingValues(Box<ProtocolMessage>),
}

/// Free-term corroborations also race the dealer's VALUES message.
#[derive(Debug)]
pub enum ModCorroborateSlot {
    /// The secret polynomial is unknown; L points are buffered unverified.
    Buffered(Vec<ProtocolMessage>),

    /// The secret polynomial is known; senders whose free term checked out.
    Verified(BTreeSet<ProcessorId>),
}

impl Default for ModCorroborateSlot {
    fn default() -> Self {
        Self::Buffered(Vec::new())
    }
}

/// The moderator side of one MW invocation.
#[derive(Debug, Default)]
pub struct ModeratorState {
    /// The moderated value or the early VALUES message.
    pub slot: Option<ModeratorSlot>,

    /// The dealer's secret polynomial, once accepted.
    pub data: Option<Polynomial>,

    /// Free-term corroborations, buffered or verified.
    pub corroborate: ModCorroborateSlot,

    /// The quorum this moderator accumulates; present once values were accepted.
    pub quorum: Option<QuorumSet>,
}

/// The dealer side of one MW invocation.
#[derive(Debug)]
pub struct DealerState {
    /// The secret polynomial `f`.
    pub secret_poly: Polynomial,

    /// The per-participant row polynomials, `j -> f_j` with `f_j(0) = f(j)`.
    pub row_polys: BTreeMap<ProcessorId, Polynomial>,

    /// Whether OK was already broadcast.
    pub ok_sent: bool,
}

/// Reconstruction buffers of one MW invocation.
#[derive(Debug, Default)]
pub struct ReconstructState {
    /// Whether reconstruction was started on this processor.
    pub started: bool,

    /// Collected points per row, capped at `t + 1`.
    pub rows: BTreeMap<ProcessorId, Vec<(ProcessorId, ModularNumber)>>,

    /// REC messages that arrived before reconstruction started.
    pub buffered: Vec<ProtocolMessage>,
}
