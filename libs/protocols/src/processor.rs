//! The per-processor protocol state machine.

use crate::{
    dispute::{DisputeMemory, Reconciliation},
    dmm::{self, DelayQueue, InvocationLog, SimTime},
    errors::ProtocolError,
    message::{MwTag, Outbound, Payload, ProtocolMessage, Stage, SvssTag, Tag},
    mw::state::{DealerState, ModeratorState, MwShareState, ReconstructState},
    svss::reconstruct::ReconstructionOutcome,
};
use basic_types::{ProcessorId, ProtocolParams};
use math_lib::fields::PrimeField;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, trace};

/// Adjacency sets over processors, the dealer's record of mutually completed MW pairs.
pub type Adjacency = BTreeMap<ProcessorId, BTreeSet<ProcessorId>>;

/// A processor: one participant of the protocol, driven entirely by admitted messages.
///
/// All state is exclusively owned; the only coupling between processors is the messages the
/// handlers return, which the scheduler routes. Handlers run to completion and never suspend.
pub struct Processor {
    pub(crate) id: ProcessorId,
    pub(crate) params: ProtocolParams,
    pub(crate) field: PrimeField,
    pub(crate) counter: u64,
    pub(crate) rng: ChaCha20Rng,

    pub(crate) disputes: DisputeMemory,
    pub(crate) invocations: InvocationLog,
    pub(crate) waiting: DelayQueue,

    // MW per-invocation state.
    pub(crate) mw: HashMap<MwTag, MwShareState>,
    pub(crate) moderators: HashMap<MwTag, ModeratorState>,
    pub(crate) dealings: HashMap<MwTag, DealerState>,
    pub(crate) reconstructions: HashMap<MwTag, ReconstructState>,
    pub(crate) mw_share_done: BTreeSet<MwTag>,
    // Reconstructed MW values, keyed by side tag, then MW dealer, then moderator.
    pub(crate) mw_values: HashMap<SvssTag, BTreeMap<ProcessorId, BTreeMap<ProcessorId, ReconstructionOutcome>>>,

    // SVSS state.
    pub(crate) adjacency: HashMap<SvssTag, Adjacency>,
    pub(crate) cores: HashMap<SvssTag, BTreeSet<ProcessorId>>,
    pub(crate) g_dealer: HashMap<SvssTag, Adjacency>,
    pub(crate) g_sent: BTreeSet<SvssTag>,
    pub(crate) svss_share_done: BTreeSet<SvssTag>,
    pub(crate) svss_values: HashMap<SvssTag, ReconstructionOutcome>,
}

impl Processor {
    /// Constructs a processor with an entropy-seeded sampling RNG.
    pub fn new(params: ProtocolParams, id: ProcessorId) -> Self {
        Self::with_rng(params, id, ChaCha20Rng::from_entropy())
    }

    /// Constructs a processor with a deterministic sampling RNG.
    pub fn from_seed(params: ProtocolParams, id: ProcessorId, seed: u64) -> Self {
        Self::with_rng(params, id, ChaCha20Rng::seed_from_u64(seed))
    }

    fn with_rng(params: ProtocolParams, id: ProcessorId, rng: ChaCha20Rng) -> Self {
        Self {
            id,
            params,
            field: PrimeField::new(params.prime()),
            counter: 0,
            rng,
            disputes: DisputeMemory::default(),
            invocations: InvocationLog::default(),
            waiting: DelayQueue::default(),
            mw: HashMap::new(),
            moderators: HashMap::new(),
            dealings: HashMap::new(),
            reconstructions: HashMap::new(),
            mw_share_done: BTreeSet::new(),
            mw_values: HashMap::new(),
            adjacency: HashMap::new(),
            cores: HashMap::new(),
            g_dealer: HashMap::new(),
            g_sent: BTreeSet::new(),
            svss_share_done: BTreeSet::new(),
            svss_values: HashMap::new(),
        }
    }

    /// This processor's id.
    pub fn id(&self) -> ProcessorId {
        self.id
    }

    /// The parameters of the run.
    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    /// The field shares live in.
    pub fn field(&self) -> &PrimeField {
        &self.field
    }

    /// The dispute memory of this processor.
    pub fn dispute_memory(&self) -> &DisputeMemory {
        &self.disputes
    }

    /// The processors this one has proven to lie.
    pub fn liars(&self) -> &BTreeSet<ProcessorId> {
        self.disputes.liars()
    }

    /// The invocation window of a tag, if the invocation was seen.
    pub fn invocation(&self, tag: &Tag) -> Option<&crate::dmm::Invocation> {
        self.invocations.get(tag)
    }

    /// The number of messages currently deferred by the delay module.
    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    /// Whether the share phase of an MW invocation completed on this processor.
    pub fn is_mw_share_done(&self, tag: &MwTag) -> bool {
        self.mw_share_done.contains(tag)
    }

    /// The MW invocations whose share phase completed on this processor.
    pub fn mw_share_done(&self) -> &BTreeSet<MwTag> {
        &self.mw_share_done
    }

    /// The reconstructed MW value for a `(side, dealer, moderator)` triple, if set.
    pub fn mw_value(
        &self,
        side: &SvssTag,
        dealer: ProcessorId,
        moderator: ProcessorId,
    ) -> Option<&ReconstructionOutcome> {
        self.mw_values.get(side)?.get(&dealer)?.get(&moderator)
    }

    /// The outcome of an SVSS sharing, if reconstruction finished.
    pub fn svss_value(&self, tag: &SvssTag) -> Option<&ReconstructionOutcome> {
        self.svss_values.get(tag)
    }

    /// Decides whether a message from `sender` on `tag` would currently be deferred.
    ///
    /// Exposed because the reliable-broadcast gate evaluates willingness with hypothetical
    /// messages before releasing a broadcast.
    pub fn should_delay(&self, sender: ProcessorId, tag: &Tag) -> bool {
        dmm::should_delay(&self.disputes, &self.invocations, sender, tag)
    }

    /// Admits one inbound message through the delay/memory module.
    ///
    /// Reliable-broadcast reconstruction points are first reconciled against the ACK and DEAL
    /// evidence; a mismatch proves the sender lied (it is still delivered), a match consumes
    /// the evidence and re-scans the deferred messages once the current one is handled.
    pub fn deliver(&mut self, message: ProtocolMessage, now: SimTime) -> Result<Vec<Outbound>, ProtocolError> {
        let mut out = Vec::new();
        let mut rescan = false;
        if message.rb {
            if let Payload::MwRec { row, value } = &message.payload {
                match self.disputes.consume_ack(&message.tag, (*row, message.sender), value) {
                    Reconciliation::Match => rescan = true,
                    Reconciliation::Mismatch => {
                        debug!("processor {} caught {} lying against ACK on {}", self.id, message.sender, message.tag);
                        self.disputes.add_liar(message.sender);
                    }
                    Reconciliation::Unknown => (),
                }
                if *row == self.id {
                    match self.disputes.consume_deal(&message.tag, message.sender, value) {
                        Reconciliation::Match => rescan = true,
                        Reconciliation::Mismatch => {
                            debug!(
                                "processor {} caught {} lying against DEAL on {}",
                                self.id, message.sender, message.tag
                            );
                            self.disputes.add_liar(message.sender);
                        }
                        Reconciliation::Unknown => (),
                    }
                }
            }
            self.receive(message, now, &mut out)?;
        } else if self.disputes.is_liar(message.sender) {
            trace!("processor {} dropping message from liar {}", self.id, message.sender);
        } else if self.should_delay(message.sender, &message.tag) {
            trace!("processor {} deferring {:?} message from {}", self.id, message.stage(), message.sender);
            self.waiting.defer(message);
        } else {
            self.receive(message, now, &mut out)?;
        }

        if rescan {
            self.rescan_waiting(now, &mut out)?;
        }
        Ok(out)
    }

    // Re-admits every deferred message that passes the delay rule, in original order.
    pub(crate) fn rescan_waiting(&mut self, now: SimTime, out: &mut Vec<Outbound>) -> Result<(), ProtocolError> {
        let ready = self.waiting.drain_ready(&self.disputes, &self.invocations);
        for message in ready {
            self.receive(message, now, out)?;
        }
        Ok(())
    }

    // The dispatch table: route an admitted message to its stage handler, subject to the
    // role guards of the stage.
    pub(crate) fn receive(
        &mut self,
        message: ProtocolMessage,
        now: SimTime,
        out: &mut Vec<Outbound>,
    ) -> Result<(), ProtocolError> {
        self.invocations.observe(message.tag, now);

        let stage = message.stage();
        if stage <= Stage::MwOk {
            let Tag::Mw(tag) = message.tag else {
                return Ok(());
            };
            if self.mw_share_done.contains(&tag) {
                return Ok(());
            }
            match &message.payload {
                Payload::MwValues { .. } => self.receive_mw_values(tag, message, out),
                Payload::MwModeratorValues { .. } if message.moderator == Some(self.id) => {
                    self.receive_mw_values_moderator(tag, message, now, out)
                }
                Payload::MwCorroborate { .. } => self.receive_mw_corroborate(tag, message, out),
                Payload::MwAck if message.rb => self.receive_mw_ack(tag, message, now, out),
                Payload::MwLSet { .. } if message.rb => self.receive_mw_l(tag, message, now, out),
                Payload::MwLPoint { .. } if message.moderator == Some(self.id) => {
                    self.receive_mw_l_mod(tag, message, out)
                }
                Payload::MwMSet { .. } if message.rb && Some(message.sender) == message.moderator => {
                    self.receive_mw_m(tag, message, now, out)
                }
                Payload::MwOk if message.rb && message.sender == tag.dealer => {
                    self.receive_mw_ok(tag, now, out)
                }
                _ => Ok(()),
            }
        } else {
            match &message.payload {
                Payload::MwRec { .. } if message.rb => {
                    let Tag::Mw(tag) = message.tag else {
                        return Ok(());
                    };
                    self.receive_mw_rec(tag, message, now, out)
                }
                Payload::SvssValues { .. } => {
                    let Tag::Svss(tag) = message.tag else {
                        return Ok(());
                    };
                    if tag.dealer != message.sender {
                        return Ok(());
                    }
                    self.receive_svss_values(tag, message, now, out)
                }
                Payload::SvssG { .. } if message.rb => {
                    let Tag::Svss(tag) = message.tag else {
                        return Ok(());
                    };
                    if tag.dealer != message.sender {
                        return Ok(());
                    }
                    self.receive_svss_g(tag, message, now, out)
                }
                _ => Ok(()),
            }
        }
    }
}
