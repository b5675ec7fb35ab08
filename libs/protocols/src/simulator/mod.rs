//! Simulated transport.
//!
//! Drives a whole network of processors with step-wise random delivery. Unicasts sit in one
//! pending queue; reliable broadcasts either join it immediately or wait behind a quorum gate
//! that models the willingness precondition of a real reliable-broadcast protocol: a broadcast
//! is released once a quorum of processors would accept a message on its tag from a quorum of
//! mutually non-delaying senders.
//!
//! There is no networking here. The simulator simply routes the messages handlers return, the
//! way the symmetric protocol simulators used for testing do, with adversarial controls (point
//! tampering, held-back broadcasts) bolted on for fault scenarios.

use crate::{
    dmm::SimTime,
    message::{Dispatch, MwTag, Outbound, Payload, ProtocolMessage, SvssTag},
    processor::Processor,
};
use anyhow::{anyhow, bail, Error};
use basic_types::{ProcessorId, ProtocolParams};
use math_lib::modular::ModularNumber;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// How reliable broadcasts are admitted into the delivery queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RbGate {
    /// Broadcasts are delivered like any other message, to all processors in one step.
    Immediate,

    /// Broadcasts wait until a quorum of processors is willing to participate with a quorum of
    /// mutually willing senders on the message's tag. For full strictness the check could be
    /// iterated `t + 1` times; one round suffices for every scenario exercised here.
    QuorumGated,
}

/// Adversarial controls for fault scenarios.
#[derive(Clone, Copy, Debug, Default)]
pub struct FaultPlan {
    /// A processor whose outgoing reconstruction points are off by one.
    pub rec_tamperer: Option<ProcessorId>,

    /// Hold back the first reconstruction broadcast until released.
    pub hold_first_rec: bool,
}

enum Envelope {
    Unicast(ProcessorId, ProtocolMessage),
    Broadcast(ProtocolMessage),
}

/// A network of processors plus the message queues between them.
pub struct NetworkSimulator {
    params: ProtocolParams,
    processors: BTreeMap<ProcessorId, Processor>,
    pending: Vec<Envelope>,
    pending_rb: Vec<ProtocolMessage>,
    gate: RbGate,
    clock: SimTime,
    rng: ChaCha20Rng,
    faults: FaultPlan,
    held: Option<ProtocolMessage>,
    held_armed: bool,
    auto_reconstruct_mw: bool,
    reconstruct_started: BTreeMap<MwTag, BTreeSet<ProcessorId>>,
}

impl NetworkSimulator {
    /// Constructs a simulator with `n` processors and a deterministic delivery order.
    pub fn new(params: ProtocolParams, gate: RbGate, seed: u64) -> Self {
        let processors = params
            .processors()
            .map(|id| (id, Processor::from_seed(params, id, seed.wrapping_add(u64::from(id.as_inner())))))
            .collect();
        Self {
            params,
            processors,
            pending: Vec::new(),
            pending_rb: Vec::new(),
            gate,
            clock: 0,
            rng: ChaCha20Rng::seed_from_u64(seed),
            faults: FaultPlan::default(),
            held: None,
            held_armed: false,
            auto_reconstruct_mw: false,
            reconstruct_started: BTreeMap::new(),
        }
    }

    /// Installs adversarial controls.
    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    /// Starts MW reconstruction on every processor as soon as its share phase completes.
    ///
    /// MW-level runs only; SVSS runs chain into reconstruction through the protocol itself.
    pub fn with_auto_reconstruct_mw(mut self) -> Self {
        self.auto_reconstruct_mw = true;
        self
    }

    /// The parameters of the simulated network.
    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    /// The current clock value.
    pub fn time(&self) -> SimTime {
        self.clock
    }

    /// A processor by id.
    pub fn processor(&self, id: ProcessorId) -> Option<&Processor> {
        self.processors.get(&id)
    }

    /// All processors, in id order.
    pub fn processors(&self) -> impl Iterator<Item = &Processor> {
        self.processors.values()
    }

    /// Starts an SVSS sharing on the given dealer and returns its tag.
    pub fn deal_svss(&mut self, dealer: ProcessorId, secret: u64) -> Result<SvssTag, Error> {
        let secret = ModularNumber::new(secret, self.params.prime());
        let now = self.clock;
        let processor = self.processors.get_mut(&dealer).ok_or_else(|| anyhow!("no processor {dealer}"))?;
        let (tag, outbound) = processor.deal_svss(secret, now)?;
        self.dispatch(dealer, outbound);
        Ok(tag)
    }

    /// Starts one MW sharing on the given dealer and returns its tag.
    pub fn deal_mw(
        &mut self,
        dealer: ProcessorId,
        secret: u64,
        c: u64,
        svss_dealer: ProcessorId,
        moderator: ProcessorId,
    ) -> Result<MwTag, Error> {
        let secret = ModularNumber::new(secret, self.params.prime());
        let now = self.clock;
        let processor = self.processors.get_mut(&dealer).ok_or_else(|| anyhow!("no processor {dealer}"))?;
        let outbound = processor.deal_mw(secret, c, svss_dealer, moderator, now)?;
        self.dispatch(dealer, outbound);
        Ok(MwTag::new(c, svss_dealer, dealer, moderator))
    }

    /// Announces the moderated value of one MW sharing on the given moderator.
    pub fn mw_moderate(
        &mut self,
        moderator: ProcessorId,
        value: u64,
        c: u64,
        svss_dealer: ProcessorId,
        mw_dealer: ProcessorId,
    ) -> Result<(), Error> {
        let value = ModularNumber::new(value, self.params.prime());
        let now = self.clock;
        let processor = self.processors.get_mut(&moderator).ok_or_else(|| anyhow!("no processor {moderator}"))?;
        let outbound = processor.mw_moderate(value, c, svss_dealer, mw_dealer, now)?;
        self.dispatch(moderator, outbound);
        Ok(())
    }

    /// Checks whether any message can still be delivered.
    pub fn remaining(&mut self) -> bool {
        if !self.pending.is_empty() {
            return true;
        }
        self.retry_rb();
        !self.pending.is_empty()
    }

    /// Delivers one randomly chosen pending message.
    pub fn step(&mut self) -> Result<(), Error> {
        self.retry_rb();
        if self.pending.is_empty() {
            return Ok(());
        }
        let index = self.rng.gen_range(0..self.pending.len());
        let envelope = self.pending.swap_remove(index);
        match envelope {
            Envelope::Unicast(to, message) => self.deliver_to(to, message)?,
            Envelope::Broadcast(message) => {
                let ids: Vec<ProcessorId> = self.processors.keys().copied().collect();
                for id in ids {
                    self.deliver_to(id, message.clone())?;
                }
            }
        }
        if self.auto_reconstruct_mw {
            self.drive_mw_reconstruction()?;
        }
        self.clock += 1;
        Ok(())
    }

    /// Runs until no message can be delivered any more.
    pub fn run_to_quiescence(&mut self, max_steps: usize) -> Result<(), Error> {
        let mut steps = 0;
        while self.remaining() {
            self.step()?;
            steps += 1;
            if steps > max_steps {
                bail!("exceeded {max_steps} steps without reaching quiescence");
            }
        }
        Ok(())
    }

    /// Re-injects the held-back broadcast, if there is one.
    pub fn release_held(&mut self) {
        if let Some(message) = self.held.take() {
            self.enqueue_broadcast(message);
        }
    }

    fn deliver_to(&mut self, id: ProcessorId, message: ProtocolMessage) -> Result<(), Error> {
        let now = self.clock;
        let Some(processor) = self.processors.get_mut(&id) else {
            return Ok(());
        };
        let outbound = processor.deliver(message, now)?;
        self.dispatch(id, outbound);
        Ok(())
    }

    fn dispatch(&mut self, from: ProcessorId, outbound: Vec<Outbound>) {
        for message in outbound {
            match message.dispatch {
                Dispatch::Unicast(to) => self.pending.push(Envelope::Unicast(to, message.message)),
                Dispatch::Broadcast => {
                    let mut message = message.message;
                    if let Payload::MwRec { value, .. } = &mut message.payload {
                        if self.faults.rec_tamperer == Some(from) {
                            // An equivocating processor shifts its reconstruction points.
                            *value = *value + &ModularNumber::one(value.prime());
                        }
                        if self.faults.hold_first_rec && !self.held_armed {
                            trace!("holding back reconstruction broadcast from {from}");
                            self.held_armed = true;
                            self.held = Some(message);
                            continue;
                        }
                    }
                    self.enqueue_broadcast(message);
                }
            }
        }
    }

    fn enqueue_broadcast(&mut self, message: ProtocolMessage) {
        match self.gate {
            RbGate::Immediate => self.pending.push(Envelope::Broadcast(message)),
            RbGate::QuorumGated => self.pending_rb.push(message),
        }
    }

    // Release every gated broadcast whose willingness precondition holds: a quorum of
    // processors that would accept the broadcast itself, each backed by a quorum of processors
    // that would accept a message from them on the same tag.
    fn retry_rb(&mut self) {
        if self.pending_rb.is_empty() {
            return;
        }
        let quorum = self.params.quorum();
        let mut kept = Vec::new();
        for message in std::mem::take(&mut self.pending_rb) {
            let mut willing = 0;
            for processor in self.processors.values() {
                if processor.should_delay(message.sender, &message.tag) {
                    continue;
                }
                let backers = self
                    .processors
                    .values()
                    .filter(|peer| !peer.should_delay(processor.id(), &message.tag))
                    .count();
                if backers >= quorum {
                    willing += 1;
                }
            }
            if willing >= quorum {
                // Individual deliveries, so the random order interleaves receivers.
                for id in self.processors.keys() {
                    self.pending.push(Envelope::Unicast(*id, message.clone()));
                }
            } else {
                kept.push(message);
            }
        }
        self.pending_rb = kept;
    }

    // Kick off reconstruction for every processor that just finished a share phase.
    fn drive_mw_reconstruction(&mut self) -> Result<(), Error> {
        let now = self.clock;
        let mut ready: Vec<(ProcessorId, MwTag)> = Vec::new();
        for (id, processor) in &self.processors {
            for tag in processor.mw_share_done() {
                let started = self.reconstruct_started.get(tag).map(|ids| ids.contains(id)).unwrap_or(false);
                if !started {
                    ready.push((*id, *tag));
                }
            }
        }
        for (id, tag) in ready {
            self.reconstruct_started.entry(tag).or_default().insert(id);
            if let Some(processor) = self.processors.get_mut(&id) {
                let outbound = processor.start_mw_reconstruct(tag, now)?;
                self.dispatch(id, outbound);
            }
        }
        Ok(())
    }
}
