//! MW protocol tests: staged unit flows plus end-to-end runs over the simulated transport.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use crate::{
    message::{Dispatch, MwTag, Outbound, Stage, SvssTag, Tag},
    mw::state::CorroborateSlot,
    processor::Processor,
    simulator::{FaultPlan, NetworkSimulator, RbGate},
    svss::reconstruct::ReconstructionOutcome,
};
use basic_types::{ProcessorId, ProtocolParams};
use math_lib::modular::ModularNumber;
use rand::{thread_rng, Rng};
use std::collections::BTreeMap;

const MAX_STEPS: usize = 100_000;

fn params() -> ProtocolParams {
    ProtocolParams::with_derived_prime(4, 1).unwrap()
}

fn id(value: u32) -> ProcessorId {
    ProcessorId::new(value)
}

fn num(value: u64) -> ModularNumber {
    ModularNumber::new(value, params().prime())
}

// A hand-driven network for the staged unit flows: processors plus a growing pool of produced
// messages, routed selectively by stage the way the protocol hands off between them.
struct StagedNetwork {
    processors: BTreeMap<ProcessorId, Processor>,
    pool: Vec<Outbound>,
}

impl StagedNetwork {
    fn new() -> Self {
        test_logger::setup();
        let params = params();
        let processors = params
            .processors()
            .map(|id| (id, Processor::from_seed(params, id, 0xbeef + u64::from(id.as_inner()))))
            .collect();
        Self { processors, pool: Vec::new() }
    }

    fn processor(&self, id_value: u32) -> &Processor {
        self.processors.get(&id(id_value)).unwrap()
    }

    fn deal_mw(&mut self, dealer: u32, secret: u64, c: u64, svss_dealer: u32, moderator: u32) -> MwTag {
        let outbound = self
            .processors
            .get_mut(&id(dealer))
            .unwrap()
            .deal_mw(num(secret), c, id(svss_dealer), id(moderator), 0)
            .unwrap();
        self.pool.extend(outbound);
        MwTag::new(c, id(svss_dealer), id(dealer), id(moderator))
    }

    fn mw_moderate(&mut self, moderator: u32, value: u64, c: u64, svss_dealer: u32, mw_dealer: u32) {
        let outbound = self
            .processors
            .get_mut(&id(moderator))
            .unwrap()
            .mw_moderate(num(value), c, id(svss_dealer), id(mw_dealer), 0)
            .unwrap();
        self.pool.extend(outbound);
    }

    // Deliver every pooled message of one stage to the receivers the filter admits. Messages
    // produced along the way join the pool and the same pass picks them up.
    fn route(&mut self, stage: Stage, admit: impl Fn(ProcessorId) -> bool) {
        let mut index = 0;
        while index < self.pool.len() {
            let item = self.pool[index].clone();
            index += 1;
            if item.message.stage() != stage {
                continue;
            }
            let receivers: Vec<ProcessorId> = match item.dispatch {
                Dispatch::Unicast(to) => vec![to],
                Dispatch::Broadcast => self.processors.keys().copied().collect(),
            };
            for to in receivers {
                if !admit(to) {
                    continue;
                }
                let produced = self.processors.get_mut(&to).unwrap().deliver(item.message.clone(), 0).unwrap();
                self.pool.extend(produced);
            }
        }
    }

    fn route_all(&mut self, stage: Stage) {
        self.route(stage, |_| true);
    }

    fn stage_count(&self, stage: Stage) -> usize {
        self.pool.iter().filter(|item| item.message.stage() == stage).count()
    }

    fn start_reconstruction(&mut self, tag: MwTag) {
        let ids: Vec<ProcessorId> = self.processors.keys().copied().collect();
        for to in ids {
            let produced = self.processors.get_mut(&to).unwrap().start_mw_reconstruct(tag, 0).unwrap();
            self.pool.extend(produced);
        }
    }
}

#[test]
fn deal_produces_values_for_everyone() {
    let mut network = StagedNetwork::new();
    network.deal_mw(1, 1, 1, 1, 1);
    network.mw_moderate(1, 1, 1, 1, 1);

    // One values message per participant plus one for the moderator, all unicast.
    let values: Vec<_> =
        network.pool.iter().filter(|item| item.message.stage() == Stage::MwValues).collect();
    assert_eq!(values.len(), 5, "wrong number of values messages");
    assert!(values.iter().all(|item| matches!(item.dispatch, Dispatch::Unicast(_))));
}

#[test]
fn values_initialize_participant_state() {
    let mut network = StagedNetwork::new();
    let tag = network.deal_mw(1, 1, 1, 1, 2);
    network.route(Stage::MwValues, |to| to == id(1));

    let processor = network.processor(1);
    let state = processor.mw.get(&tag).expect("no participant state");
    let data = state.data.as_ref().expect("values not registered");
    assert_eq!(data.cross.len(), 4, "not enough cross evaluations");
    assert!(matches!(state.corroborate, CorroborateSlot::Verified(_)), "corroborations not verified");
    assert!(processor.dispute_memory().deal_registered(&Tag::Mw(tag)), "no DEAL map");
    // The acknowledgement went out and corroborations were sent to everyone.
    assert_eq!(network.stage_count(Stage::MwAck), 1);
    assert_eq!(network.stage_count(Stage::MwCorroborate), 4);
}

#[test]
fn values_reach_moderator() {
    let mut network = StagedNetwork::new();
    let tag = network.deal_mw(1, 1, 1, 1, 1);
    network.mw_moderate(1, 1, 1, 1, 1);
    network.route(Stage::MwValues, |to| to == id(1));

    let processor = network.processor(1);
    let moderator_state = processor.moderators.get(&tag).expect("no moderator state");
    assert!(moderator_state.data.is_some(), "moderator data not registered");
    assert!(moderator_state.quorum.is_some(), "moderator quorum not initialized");
    assert!(processor.mw.get(&tag).and_then(|state| state.data.as_ref()).is_some());
}

#[test]
fn corroboration_is_recorded_against_own_row() {
    let mut network = StagedNetwork::new();
    let tag = network.deal_mw(1, 1, 1, 1, 2);
    network.route(Stage::MwValues, |to| to == id(1));
    network.route(Stage::MwCorroborate, |to| to == id(1));

    let state = network.processor(1).mw.get(&tag).unwrap();
    let CorroborateSlot::Verified(corroborations) = &state.corroborate else {
        panic!("corroborations not verified");
    };
    assert_eq!(corroborations.len(), 1, "wrong number recorded");
    assert!(corroborations.contains_key(&id(1)), "own corroboration missing");
}

#[test]
fn acknowledged_corroborations_move_into_deal() {
    let mut network = StagedNetwork::new();
    let tag = network.deal_mw(1, 1, 1, 2, 1);
    network.route(Stage::MwValues, |to| to == id(1));
    network.route(Stage::MwCorroborate, |to| to == id(1));
    network.route(Stage::MwAck, |to| to == id(1));

    let processor = network.processor(1);
    let state = processor.mw.get(&tag).unwrap();
    assert!(state.ack.contains(&id(1)), "acknowledgement not recorded");
    assert!(processor.dispute_memory().deal_members(&Tag::Mw(tag)).contains(&id(1)), "not moved into DEAL");
}

#[test]
fn corroborations_before_values_are_buffered() {
    let mut network = StagedNetwork::new();
    let tag = network.deal_mw(1, 1, 1, 1, 2);

    // Processor 1 works through its own messages first.
    network.route(Stage::MwValues, |to| to == id(1));
    network.route(Stage::MwCorroborate, |to| to == id(1));
    network.route(Stage::MwAck, |to| to == id(1));

    // Processor 2 sees the acknowledgement and the corroboration before its values.
    network.route(Stage::MwAck, |to| to == id(2));
    let observer = network.processor(2);
    assert!(observer.mw.get(&tag).map_or(false, |state| state.ack.contains(&id(1))), "ack not saved");

    network.route(Stage::MwCorroborate, |to| to == id(2));
    let observer = network.processor(2);
    let state = observer.mw.get(&tag).unwrap();
    let CorroborateSlot::Buffered(buffered) = &state.corroborate else {
        panic!("early corroboration should stay buffered");
    };
    assert_eq!(buffered.len(), 1);

    // Values arrive last: the buffer drains and the sender lands straight in DEAL.
    network.route(Stage::MwValues, |to| to == id(2));
    let observer = network.processor(2);
    let state = observer.mw.get(&tag).unwrap();
    let CorroborateSlot::Verified(corroborations) = &state.corroborate else {
        panic!("corroborations not verified after values");
    };
    assert!(corroborations.is_empty(), "corroboration not moved out");
    assert!(observer.dispute_memory().deal_members(&Tag::Mw(tag)).contains(&id(1)), "not moved into DEAL");
}

#[test]
fn quorums_fill_and_moderator_announces() {
    let mut network = StagedNetwork::new();
    let tag = network.deal_mw(1, 1, 1, 1, 1);
    network.mw_moderate(1, 1, 1, 1, 1);

    network.route_all(Stage::MwValues);
    network.route_all(Stage::MwCorroborate);
    network.route_all(Stage::MwAck);
    network.route_all(Stage::MwL);

    let moderator = network.processor(1);
    let state = moderator.mw.get(&tag).unwrap();
    assert_eq!(state.ack.len(), 4, "wrong number of acks");
    assert_eq!(state.l_sets.len(), 4, "wrong number of corroborating sets");
    let moderator_state = moderator.moderators.get(&tag).unwrap();
    assert_eq!(moderator_state.quorum.as_ref().unwrap().len(), 3, "wrong moderator quorum size");
    let CorroborateSlot::Verified(corroborations) = &state.corroborate else {
        panic!("corroborations not verified");
    };
    // Three of the four corroborations moved into DEAL.
    assert_eq!(corroborations.len(), 1, "corroborations not reduced");
    assert!(network.stage_count(Stage::MwM) > 0, "no moderator set announced");

    // Neither quorum ever exceeds q.
    let quorum = params().quorum();
    for processor in network.processors.values() {
        assert!(processor.dispute_memory().deal_len(&Tag::Mw(tag)) <= quorum);
        if let Some(state) = processor.moderators.get(&tag) {
            assert!(state.quorum.as_ref().map_or(0, |q| q.len()) <= quorum);
        }
    }
}

#[test]
fn dealer_announces_ok_once_covered() {
    let mut network = StagedNetwork::new();
    network.deal_mw(1, 1, 1, 1, 1);
    network.mw_moderate(1, 1, 1, 1, 1);

    network.route_all(Stage::MwValues);
    network.route_all(Stage::MwCorroborate);
    network.route_all(Stage::MwAck);
    network.route_all(Stage::MwL);
    network.route_all(Stage::MwM);

    assert!(network.stage_count(Stage::MwOk) > 0, "no OK announced");
}

#[test]
fn ok_completes_the_share_phase() {
    let mut network = StagedNetwork::new();
    let tag = network.deal_mw(1, 1, 1, 1, 1);
    network.mw_moderate(1, 1, 1, 1, 1);

    for stage in [Stage::MwValues, Stage::MwCorroborate, Stage::MwAck, Stage::MwL, Stage::MwM, Stage::MwOk] {
        network.route_all(stage);
    }
    for processor in network.processors.values() {
        assert!(processor.is_mw_share_done(&tag), "processor {} did not finish", processor.id());
    }
}

#[test]
fn reconstruction_recovers_the_secret() {
    let mut network = StagedNetwork::new();
    let secret = thread_rng().gen_range(1..=40);
    let tag = network.deal_mw(1, secret, 1, 1, 1);
    network.mw_moderate(1, secret, 1, 1, 1);

    for stage in [Stage::MwValues, Stage::MwCorroborate, Stage::MwAck, Stage::MwL, Stage::MwM, Stage::MwOk] {
        network.route_all(stage);
    }
    network.start_reconstruction(tag);
    network.route_all(Stage::MwRec);

    let side = SvssTag::new(1, id(1));
    for processor in network.processors.values() {
        assert_eq!(
            processor.mw_value(&side, id(1), id(1)),
            Some(&ReconstructionOutcome::Success(num(secret))),
            "processor {} reconstructed wrong value",
            processor.id()
        );
    }
}

// Reliable broadcasts bypass the delay module, so the whole body of ACK/L/M/OK evidence can
// reach a processor before its own values unicast is drawn from the queue. The share phase
// then closes with no data on that processor. It never acknowledged, and covered corroborating
// sets only contain acknowledged members, so it sits outside every row and owes no
// reconstruction points; each row keeps a full quorum of contributors without it.
#[test]
fn evidence_can_outrun_a_participants_own_values() {
    let mut network = StagedNetwork::new();
    let held_back = id(4);
    let tag = network.deal_mw(1, 29, 1, 1, 1);
    network.mw_moderate(1, 29, 1, 1, 1);

    // Everyone but processor 4 works through the share phase; the broadcasts reach 4 anyway.
    network.route(Stage::MwValues, |to| to != held_back);
    network.route(Stage::MwCorroborate, |to| to != held_back);
    for stage in [Stage::MwAck, Stage::MwL, Stage::MwM, Stage::MwOk] {
        network.route_all(stage);
    }

    let late = network.processor(4);
    assert!(late.is_mw_share_done(&tag), "evidence alone should close the share phase");
    let state = late.mw.get(&tag).unwrap();
    assert!(state.data.is_none(), "values are still outstanding");
    let m_set = state.m_set.as_ref().unwrap();
    assert!(!m_set.contains(&held_back));
    for l_set in state.l_sets.values() {
        assert!(!l_set.contains(&held_back), "an unacknowledged processor cannot corroborate");
    }

    // The values finally arrive; the closed invocation ignores them and no late
    // acknowledgement goes out.
    let acks_before = network.stage_count(Stage::MwAck);
    network.route(Stage::MwValues, |to| to == held_back);
    let late = network.processor(4);
    assert!(late.mw.get(&tag).unwrap().data.is_none(), "late values must not reopen the invocation");
    assert_eq!(network.stage_count(Stage::MwAck), acks_before, "late values must not trigger an ack");

    // Reconstruction runs without processor 4: it has no points to contribute, and every row
    // still clears the threshold through the other members.
    network.start_reconstruction(tag);
    network.route_all(Stage::MwRec);
    assert!(
        network
            .pool
            .iter()
            .all(|item| !(item.message.stage() == Stage::MwRec && item.message.sender == held_back)),
        "a processor without values has no points to broadcast"
    );
    let side = SvssTag::new(1, id(1));
    for processor in network.processors.values() {
        assert_eq!(
            processor.mw_value(&side, id(1), id(1)),
            Some(&ReconstructionOutcome::Success(num(29))),
            "processor {} reconstructed wrong value",
            processor.id()
        );
        assert!(processor.dispute_memory().deal_is_empty(), "DEAL not empty on {}", processor.id());
        assert!(processor.dispute_memory().ack_is_empty(), "ACK not empty on {}", processor.id());
    }
}

// End-to-end runs over the simulated transport.

fn run_single_mw(
    seed: u64,
    dealer: u32,
    moderator: u32,
    secret: u64,
    faults: FaultPlan,
) -> (NetworkSimulator, MwTag) {
    test_logger::setup();
    let mut simulator =
        NetworkSimulator::new(params(), RbGate::Immediate, seed).with_faults(faults).with_auto_reconstruct_mw();
    let tag = simulator.deal_mw(id(dealer), secret, 1, id(1), id(moderator)).unwrap();
    simulator.mw_moderate(id(moderator), secret, 1, id(1), id(dealer)).unwrap();
    simulator.run_to_quiescence(MAX_STEPS).unwrap();
    (simulator, tag)
}

#[test]
fn random_order_run_reconstructs_fixed_secret() {
    let (simulator, tag) = run_single_mw(11, 1, 1, 17, FaultPlan::default());
    let side = SvssTag::new(1, id(1));
    for processor in simulator.processors() {
        assert_eq!(processor.mw_value(&side, id(1), id(1)), Some(&ReconstructionOutcome::Success(num(17))));
        assert!(processor.invocation(&Tag::Mw(tag)).unwrap().end.is_some(), "timeline not updated");
        assert!(processor.liars().is_empty(), "D not empty");
        assert!(processor.dispute_memory().deal_is_empty(), "DEAL not empty");
        assert!(processor.dispute_memory().ack_is_empty(), "ACK not empty");
    }
}

#[test]
fn randomized_runs_reconstruct() {
    let mut rng = thread_rng();
    for _ in 0..25 {
        let dealer = rng.gen_range(1..=4);
        let moderator = rng.gen_range(1..=4);
        let secret = rng.gen_range(1..=40);
        let (simulator, _) = run_single_mw(rng.gen(), dealer, moderator, secret, FaultPlan::default());
        let side = SvssTag::new(1, id(1));
        for processor in simulator.processors() {
            assert_eq!(
                processor.mw_value(&side, id(dealer), id(moderator)),
                Some(&ReconstructionOutcome::Success(num(secret))),
                "wrong secret for dealer {dealer} moderator {moderator}"
            );
            assert!(processor.liars().is_empty());
            assert!(processor.dispute_memory().deal_is_empty());
            assert!(processor.dispute_memory().ack_is_empty());
        }
    }
}

#[test]
fn moderator_disagreement_stalls_the_invocation() {
    test_logger::setup();
    let mut simulator = NetworkSimulator::new(params(), RbGate::Immediate, 13).with_auto_reconstruct_mw();
    let tag = simulator.deal_mw(id(2), 17, 1, id(1), id(3)).unwrap();
    simulator.mw_moderate(id(3), 18, 1, id(1), id(2)).unwrap();
    simulator.run_to_quiescence(MAX_STEPS).unwrap();

    let side = SvssTag::new(1, id(1));
    for processor in simulator.processors() {
        assert!(processor.mw_value(&side, id(2), id(3)).is_none(), "reconstructed an impossible secret");
        let advanced = processor
            .mw
            .get(&tag)
            .map_or(false, |state| state.m_set.is_some() || state.ok_received);
        assert!(!advanced, "processor {} advanced past the moderator check", processor.id());
    }
}

#[test]
fn concurrent_invocations_stay_separate() {
    test_logger::setup();
    let mut simulator = NetworkSimulator::new(params(), RbGate::Immediate, 17).with_auto_reconstruct_mw();
    let mut rng = thread_rng();
    let mut expected = Vec::new();
    for run in 0..5u64 {
        let c = 2 * run + 1;
        let dealer = rng.gen_range(1..=4);
        let moderator = rng.gen_range(1..=4);
        let secret = rng.gen_range(1..=40);
        simulator.deal_mw(id(dealer), secret, c, id(1), id(moderator)).unwrap();
        simulator.mw_moderate(id(moderator), secret, c, id(1), id(dealer)).unwrap();
        expected.push((c, dealer, moderator, secret));
    }
    simulator.run_to_quiescence(MAX_STEPS).unwrap();

    for (c, dealer, moderator, secret) in expected {
        let side = SvssTag::new(c, id(1));
        for processor in simulator.processors() {
            assert_eq!(
                processor.mw_value(&side, id(dealer), id(moderator)),
                Some(&ReconstructionOutcome::Success(num(secret))),
                "run {c} leaked or lost its secret"
            );
        }
    }
    for processor in simulator.processors() {
        assert!(processor.liars().is_empty());
        assert!(processor.dispute_memory().deal_is_empty());
        assert!(processor.dispute_memory().ack_is_empty());
    }
}

#[test]
fn tampered_reconstruction_points_expose_the_liar() {
    let mut rng = thread_rng();
    for _ in 0..10 {
        let dealer = rng.gen_range(1..=4);
        let moderator = rng.gen_range(1..=4);
        let secret = rng.gen_range(1..=40);
        let faults = FaultPlan { rec_tamperer: Some(id(4)), ..Default::default() };
        let (simulator, tag) = run_single_mw(rng.gen(), dealer, moderator, secret, faults);

        // Whether the evil processor mattered depends on whether it landed in a used
        // corroborating set.
        let observer = simulator.processor(id(1)).unwrap();
        let state = observer.mw.get(&tag).unwrap();
        let used = state
            .m_set
            .as_ref()
            .map_or(false, |m_set| {
                m_set.iter().any(|row| state.l_sets.get(row).map_or(false, |l_set| l_set.contains(&id(4))))
            });

        if used {
            assert!(
                simulator.processors().any(|processor| processor.liars().contains(&id(4))),
                "liar not added to D"
            );
        } else {
            let side = SvssTag::new(1, id(1));
            for processor in simulator.processors() {
                assert_eq!(
                    processor.mw_value(&side, id(dealer), id(moderator)),
                    Some(&ReconstructionOutcome::Success(num(secret)))
                );
                assert!(processor.liars().is_empty());
                assert!(processor.dispute_memory().deal_is_empty());
                assert!(processor.dispute_memory().ack_is_empty());
            }
        }
    }
}

#[test]
fn held_back_point_leaves_evidence_and_delays_the_next_run() {
    test_logger::setup();
    let faults = FaultPlan { hold_first_rec: true, ..Default::default() };
    let mut simulator =
        NetworkSimulator::new(params(), RbGate::Immediate, 23).with_faults(faults).with_auto_reconstruct_mw();
    let tag = simulator.deal_mw(id(2), 21, 1, id(1), id(3)).unwrap();
    simulator.mw_moderate(id(3), 21, 1, id(1), id(2)).unwrap();
    simulator.run_to_quiescence(MAX_STEPS).unwrap();

    // The run still completes, but somebody is left holding unconsumed evidence.
    let side = SvssTag::new(1, id(1));
    for processor in simulator.processors() {
        assert_eq!(processor.mw_value(&side, id(2), id(3)), Some(&ReconstructionOutcome::Success(num(21))));
        assert!(processor.liars().is_empty(), "D not empty");
        assert!(processor.invocation(&Tag::Mw(tag)).unwrap().end.is_some(), "timeline not updated");
    }
    assert!(
        simulator.processors().any(|processor| !processor.dispute_memory().deal_is_empty()),
        "DEAL empty for everybody"
    );
    assert!(
        simulator.processors().any(|processor| !processor.dispute_memory().ack_is_empty()),
        "ACK empty for everybody"
    );

    // A second invocation: anybody deferring messages must still be owed evidence.
    simulator.deal_mw(id(4), 33, 3, id(1), id(1)).unwrap();
    simulator.mw_moderate(id(1), 33, 3, id(1), id(4)).unwrap();
    simulator.run_to_quiescence(MAX_STEPS).unwrap();
    for processor in simulator.processors() {
        if processor.waiting_len() > 0 {
            assert!(
                !processor.dispute_memory().deal_is_empty() || !processor.dispute_memory().ack_is_empty(),
                "incompatible DEAL/ACK and waiting"
            );
        }
    }

    // Releasing the held point drains all evidence and every deferred message.
    simulator.release_held();
    simulator.run_to_quiescence(MAX_STEPS).unwrap();
    for processor in simulator.processors() {
        assert_eq!(processor.waiting_len(), 0, "message still waiting");
        assert!(processor.dispute_memory().deal_is_empty(), "DEAL full for somebody");
        assert!(processor.dispute_memory().ack_is_empty(), "ACK full for somebody");
    }
}
