//! Delay/Memory module.
//!
//! The admission filter in front of every processor's state machine. Messages from proven liars
//! are dropped, reliable-broadcast messages pass unconditionally, and everything else is checked
//! against a causal rule: a processor that still owes evidence against the sender from a closed
//! prior invocation must not yet be swayed by the sender's newer messages. Deferred messages are
//! re-admitted, in their original relative order, whenever the evidence shrinks.

use crate::{
    dispute::DisputeMemory,
    message::{ProtocolMessage, Tag},
};
use basic_types::ProcessorId;
use std::collections::HashMap;

/// The scheduler's monotone clock.
pub type SimTime = u64;

/// The wall-clock window of one invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Invocation {
    /// When the first message for the invocation arrived.
    pub begin: SimTime,

    /// When the invocation completed, if it has.
    pub end: Option<SimTime>,
}

/// The per-processor log of invocation windows.
#[derive(Debug, Default)]
pub struct InvocationLog {
    windows: HashMap<Tag, Invocation>,
}

impl InvocationLog {
    /// Stamps the begin of an invocation if this is the first time it is seen.
    pub fn observe(&mut self, tag: Tag, now: SimTime) {
        self.windows.entry(tag).or_insert(Invocation { begin: now, end: None });
    }

    /// Stamps the end of an invocation.
    pub fn complete(&mut self, tag: Tag, now: SimTime) {
        self.windows.entry(tag).or_insert(Invocation { begin: now, end: None }).end = Some(now);
    }

    /// The window of an invocation, if it was seen.
    pub fn get(&self, tag: &Tag) -> Option<&Invocation> {
        self.windows.get(tag)
    }

    /// Overrides an invocation window. Test hook.
    pub fn set(&mut self, tag: Tag, begin: SimTime, end: Option<SimTime>) {
        self.windows.insert(tag, Invocation { begin, end });
    }
}

/// Decides whether a message from `sender` on `tag` must be deferred.
///
/// For every completed prior invocation whose ACK or DEAL evidence still names the sender,
/// the message is delayed iff its own invocation is unknown or began after that completion.
pub fn should_delay(disputes: &DisputeMemory, invocations: &InvocationLog, sender: ProcessorId, tag: &Tag) -> bool {
    let owing = disputes.ack_tags_naming(sender).chain(disputes.deal_tags_naming(sender));
    for prior in owing {
        let Some(end) = invocations.get(prior).and_then(|window| window.end) else {
            continue;
        };
        match invocations.get(tag) {
            None => return true,
            Some(window) if end < window.begin => return true,
            Some(_) => (),
        }
    }
    false
}

/// The ordered buffer of deferred messages.
#[derive(Debug, Default)]
pub struct DelayQueue {
    waiting: Vec<ProtocolMessage>,
}

impl DelayQueue {
    /// Defers a message.
    pub fn defer(&mut self, message: ProtocolMessage) {
        self.waiting.push(message);
    }

    /// The number of deferred messages.
    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    /// Checks whether no message is deferred.
    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Removes and returns every message that now passes [`should_delay`], preserving the
    /// original relative order of both the returned and the remaining messages.
    pub fn drain_ready(&mut self, disputes: &DisputeMemory, invocations: &InvocationLog) -> Vec<ProtocolMessage> {
        let mut ready = Vec::new();
        let mut still_waiting = Vec::new();
        for message in std::mem::take(&mut self.waiting) {
            if should_delay(disputes, invocations, message.sender, &message.tag) {
                still_waiting.push(message);
            } else {
                ready.push(message);
            }
        }
        self.waiting = still_waiting;
        ready
    }
}
