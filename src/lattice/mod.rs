/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Lattice agreement: round-based set-valued consensus over best-effort
//! broadcast.
//!
//! Each round runs an independent instance. A proposer broadcasts its value
//! set; a receiver acks a proposal contained in its own accepted set and
//! nacks otherwise, carrying back the union. The proposer refines its
//! proposal on every nack and decides once a majority acks the same attempt,
//! so every decided set contains the proposer's initial values and is
//! contained in the union of everything proposed or nacked in the round.
//!
//! Rounds are strictly sequential on the proposer side: a dedicated driver
//! thread pops one pending proposal at a time, advances `current_round`, and
//! blocks until the round decides. Messages for rounds this process has not
//! reached yet are buffered ahead of time and replayed in arrival order the
//! moment their round becomes current; without this, a fast peer's round-`r`
//! traffic would be lost while we are still deciding round `r - 1`.

pub(crate) mod messages;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crate::broadcast::beb::BestEffortBroadcast;
use crate::broadcast::{BroadcastMessage, MessageSink, Relay};
use crate::config::{is_majority, Configuration};
use crate::events::{DecideEvent, Event, ProposeEvent};
use crate::journal::Journal;
use crate::lattice::messages::{sorted, AgreementFrame, AgreementKind};
use crate::transport::Transport;
use crate::types::{ProcessId, ProposalNumber, Round};

/// How often the driver re-checks the proposal queue when idle.
const PROPOSAL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How often the driver wakes while waiting for the current round's decision
/// to check for shutdown.
const DECISION_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A numbered proposal attempt. The number increases only on nack-driven
/// revision, never decreases.
#[derive(Clone)]
struct Proposal {
    number: ProposalNumber,
    values: HashSet<u32>,
}

/// Everything a round accumulates: the in-flight attempt, the vote tallies
/// for it, and the union of all values seen acceptable in the round.
#[derive(Clone)]
struct ProposalState {
    proposal: Proposal,
    active: bool,
    ack_count: usize,
    nack_count: usize,
    accepted: HashSet<u32>,
}

impl ProposalState {
    fn new(values: HashSet<u32>) -> ProposalState {
        ProposalState {
            proposal: Proposal {
                number: ProposalNumber::new(1),
                values: values.clone(),
            },
            active: true,
            // Our own copy is pre-counted.
            ack_count: 1,
            nack_count: 0,
            accepted: values,
        }
    }
}

/// State that must change atomically with respect to round transitions: the
/// current round number, its proposal state, and the mailboxes of rounds we
/// have not reached yet.
struct RoundCore {
    round: Round,
    state: Option<ProposalState>,
    ahead_of_time: HashMap<Round, VecDeque<(ProcessId, AgreementFrame)>>,
}

/// What a handled frame obliges us to do once the locks are released. No
/// lock is held across network sends.
enum Outbound {
    Reply(ProcessId, AgreementFrame),
    Rebroadcast(AgreementFrame),
    Decide(Round, Vec<u32>),
}

pub struct LatticeAgreement<T: Transport> {
    me: ProcessId,
    num_processes: usize,
    beb: Arc<BestEffortBroadcast<T>>,
    journal: Arc<dyn Journal>,
    event_publisher: Option<Sender<Event>>,
    core: Mutex<RoundCore>,
    /// Decided rounds, append-only; each entry is written exactly once and
    /// keeps answering late proposals for its round.
    agreed_proposals: RwLock<HashMap<Round, ProposalState>>,
    proposal_queue: Mutex<VecDeque<HashSet<u32>>>,
    decided_sender: Sender<Round>,
    decided_receiver: Mutex<Option<Receiver<Round>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    driver_shutdown: Mutex<Option<Sender<()>>>,
}

impl<T: Transport> LatticeAgreement<T> {
    pub fn new(
        config: Configuration,
        transport: T,
        journal: Arc<dyn Journal>,
        event_publisher: Option<Sender<Event>>,
    ) -> Arc<LatticeAgreement<T>> {
        let me = config.me;
        let num_processes = config.num_processes();
        let beb = BestEffortBroadcast::new(config, transport, None, event_publisher.clone(), true);
        let (decided_sender, decided_receiver) = mpsc::channel();

        let agreement = Arc::new(LatticeAgreement {
            me,
            num_processes,
            beb: beb.clone(),
            journal,
            event_publisher,
            core: Mutex::new(RoundCore {
                round: Round::new(0),
                state: None,
                ahead_of_time: HashMap::new(),
            }),
            agreed_proposals: RwLock::new(HashMap::new()),
            proposal_queue: Mutex::new(VecDeque::new()),
            decided_sender,
            decided_receiver: Mutex::new(Some(decided_receiver)),
            driver: Mutex::new(None),
            driver_shutdown: Mutex::new(None),
        });
        beb.set_upper(agreement.clone());
        agreement
    }

    /// Enqueue a candidate value set. Fire-and-forget: the driver thread
    /// starts a round for it once every earlier proposal has decided, and
    /// the decision surfaces through the `Decide` event.
    pub fn propose(&self, values: Vec<u32>) {
        self.proposal_queue
            .lock()
            .unwrap()
            .push_back(values.into_iter().collect());
    }

    /// The decided value set of a round, if that round has decided.
    pub fn decided(&self, round: Round) -> Option<Vec<u32>> {
        self.agreed_proposals
            .read()
            .unwrap()
            .get(&round)
            .map(|state| sorted(&state.proposal.values))
    }

    /// Start the underlying broadcast stack and the driver thread.
    pub fn start(self: &Arc<Self>) {
        let mut driver = self.driver.lock().unwrap();
        if driver.is_some() {
            return;
        }
        self.beb.start();

        let (shutdown, shutdown_receiver) = mpsc::channel();
        let decided_receiver = self
            .decided_receiver
            .lock()
            .unwrap()
            .take()
            .expect("the driver thread can only be started once");
        let agreement = self.clone();
        *driver = Some(thread::spawn(move || {
            agreement.drive(decided_receiver, shutdown_receiver)
        }));
        *self.driver_shutdown.lock().unwrap() = Some(shutdown);
    }

    /// Stop the driver and the broadcast stack, joining every thread.
    pub fn stop(&self) {
        let driver = self.driver.lock().unwrap().take();
        if let Some(driver) = driver {
            if let Some(shutdown) = self.driver_shutdown.lock().unwrap().take() {
                let _ = shutdown.send(());
            }
            let _ = driver.join();
        }
        self.beb.stop();
        self.journal.flush();
    }

    fn drive(&self, decided: Receiver<Round>, shutdown: Receiver<()>) {
        loop {
            let values = self.proposal_queue.lock().unwrap().pop_front();
            let values = match values {
                Some(values) => values,
                None => match shutdown.recv_timeout(PROPOSAL_POLL_INTERVAL) {
                    Ok(()) => return,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => {
                        panic!("Driver thread disconnected from main thread")
                    }
                },
            };

            let round = self.begin_round(values);

            // One decision arrives per round, in round order, so waiting for
            // this round's number is enough.
            loop {
                match shutdown.try_recv() {
                    Ok(()) => return,
                    Err(TryRecvError::Empty) => (),
                    Err(TryRecvError::Disconnected) => {
                        panic!("Driver thread disconnected from main thread")
                    }
                }
                match decided.recv_timeout(DECISION_POLL_INTERVAL) {
                    Ok(decided_round) if decided_round == round => break,
                    Ok(_) => (),
                    Err(RecvTimeoutError::Timeout) => (),
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
        }
    }

    /// Advance to the next round with a fresh proposal, broadcast it, and
    /// replay the round's ahead-of-time mailbox.
    fn begin_round(&self, values: HashSet<u32>) -> Round {
        let (round, buffered) = {
            let mut core = self.core.lock().unwrap();
            core.round = core.round + 1;
            core.state = Some(ProposalState::new(values.clone()));
            // Take the new round's mailbox while the transition is still
            // atomic; anything arriving from here on is processed live.
            let current_round = core.round;
            let buffered = core.ahead_of_time.remove(&current_round).unwrap_or_default();
            (current_round, buffered)
        };

        Event::publish(
            &self.event_publisher,
            Event::Propose(ProposeEvent {
                timestamp: SystemTime::now(),
                round,
                number: ProposalNumber::new(1),
                values: sorted(&values),
            }),
        );
        self.beb
            .broadcast(&AgreementFrame::proposal(round, ProposalNumber::new(1), &values).serialize());

        for (sender, frame) in buffered {
            self.handle_frame(sender, frame);
        }

        round
    }

    fn handle_frame(&self, sender: ProcessId, frame: AgreementFrame) {
        let outbound = {
            let mut core = self.core.lock().unwrap();
            if frame.round > core.round {
                core.ahead_of_time
                    .entry(frame.round)
                    .or_default()
                    .push_back((sender, frame));
                return;
            }
            if frame.round == core.round {
                self.process_current(&mut core, sender, frame)
            } else {
                drop(core);
                self.process_decided_round(sender, frame)
            }
        };

        match outbound {
            None => (),
            Some(Outbound::Reply(peer, reply)) => self.beb.send_to(peer, &reply.serialize()),
            Some(Outbound::Rebroadcast(proposal)) => {
                self.beb.broadcast(&proposal.serialize());
            }
            Some(Outbound::Decide(round, values)) => {
                self.journal.append(
                    &values
                        .iter()
                        .map(|v| v.to_string())
                        .collect::<Vec<String>>()
                        .join(" "),
                );
                Event::publish(
                    &self.event_publisher,
                    Event::Decide(DecideEvent {
                        timestamp: SystemTime::now(),
                        round,
                        values,
                    }),
                );
                let _ = self.decided_sender.send(round);
            }
        }
    }

    fn process_current(
        &self,
        core: &mut RoundCore,
        sender: ProcessId,
        frame: AgreementFrame,
    ) -> Option<Outbound> {
        let round = core.round;
        let state = core.state.as_mut()?;

        match frame.kind {
            AgreementKind::Proposal => {
                Some(answer_proposal(round, state, &frame, sender))
            }
            AgreementKind::Ack => {
                // Acks for superseded attempts must not count towards the
                // current one; the number ties an ack to its attempt.
                if !state.active || frame.number != state.proposal.number {
                    return None;
                }
                state.ack_count += 1;
                if !is_majority(state.ack_count, self.num_processes) {
                    return None;
                }

                state.active = false;
                let decided = sorted(&state.proposal.values);
                self.agreed_proposals
                    .write()
                    .unwrap()
                    .entry(round)
                    .or_insert_with(|| state.clone());
                Some(Outbound::Decide(round, decided))
            }
            AgreementKind::Nack => {
                if !state.active || frame.number != state.proposal.number {
                    return None;
                }
                state.nack_count += 1;
                state.accepted.extend(frame.values.iter().copied());
                state.proposal.number += 1;
                state.proposal.values = state.accepted.clone();
                state.ack_count = 1;
                state.nack_count = 0;

                Event::publish(
                    &self.event_publisher,
                    Event::Propose(ProposeEvent {
                        timestamp: SystemTime::now(),
                        round,
                        number: state.proposal.number,
                        values: sorted(&state.proposal.values),
                    }),
                );
                Some(Outbound::Rebroadcast(AgreementFrame::proposal(
                    round,
                    state.proposal.number,
                    &state.proposal.values,
                )))
            }
        }
    }

    /// A frame for a round below the current one. Every such round has
    /// decided already; proposals still deserve an answer (their proposer
    /// may be lagging behind us), stale acks and nacks do not.
    fn process_decided_round(&self, sender: ProcessId, frame: AgreementFrame) -> Option<Outbound> {
        match frame.kind {
            AgreementKind::Proposal => {
                let mut agreed = self.agreed_proposals.write().unwrap();
                let state = agreed.get_mut(&frame.round)?;
                Some(answer_proposal(frame.round, state, &frame, sender))
            }
            AgreementKind::Ack | AgreementKind::Nack => None,
        }
    }
}

/// Ack a proposal contained in our accepted set; otherwise absorb its values
/// and nack with the union.
fn answer_proposal(
    round: Round,
    state: &mut ProposalState,
    frame: &AgreementFrame,
    sender: ProcessId,
) -> Outbound {
    let is_subset = frame.values.iter().all(|v| state.accepted.contains(v));
    if is_subset {
        Outbound::Reply(sender, AgreementFrame::ack(round, frame.number))
    } else {
        state.accepted.extend(frame.values.iter().copied());
        Outbound::Reply(
            sender,
            AgreementFrame::nack(round, frame.number, &state.accepted),
        )
    }
}

impl<T: Transport> MessageSink for LatticeAgreement<T> {
    fn on_deliver(&self, msg: BroadcastMessage) {
        // Our own loopback copy: the proposal state pre-counts self.
        if msg.id.author == self.me {
            return;
        }
        let frame = match AgreementFrame::parse(&msg.payload) {
            Ok(frame) => frame,
            Err(_) => return,
        };
        self.handle_frame(msg.sender, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{configuration, MemoryJournal, RecordingTransport};

    fn harness(
        num_processes: u64,
    ) -> (
        Arc<LatticeAgreement<RecordingTransport>>,
        RecordingTransport,
        Arc<MemoryJournal>,
    ) {
        let transport = RecordingTransport::new();
        let journal = MemoryJournal::new();
        let agreement = LatticeAgreement::new(
            configuration(1, num_processes),
            transport.clone(),
            journal.clone(),
            None,
        );
        (agreement, transport, journal)
    }

    fn values(vs: &[u32]) -> HashSet<u32> {
        vs.iter().copied().collect()
    }

    fn p(id: u64) -> ProcessId {
        ProcessId::new(id)
    }

    /// All agreement frames this process has put on the wire, with their
    /// destinations, in send order.
    fn sent_frames(transport: &RecordingTransport) -> Vec<(ProcessId, AgreementFrame)> {
        transport
            .sent_broadcasts(p(1))
            .into_iter()
            .filter_map(|(dest, msg)| AgreementFrame::parse(&msg.payload).ok().map(|f| (dest, f)))
            .collect()
    }

    #[test]
    fn majority_of_acks_decides_exactly_once() {
        let (agreement, _, journal) = harness(5);
        let round = agreement.begin_round(values(&[1, 2]));

        // Self is pre-counted; two more acks make 3 of 5.
        agreement.handle_frame(p(2), AgreementFrame::ack(round, ProposalNumber::new(1)));
        assert_eq!(agreement.decided(round), None);

        agreement.handle_frame(p(3), AgreementFrame::ack(round, ProposalNumber::new(1)));
        assert_eq!(agreement.decided(round), Some(vec![1, 2]));

        // A late ack must not decide (or journal) a second time.
        agreement.handle_frame(p(4), AgreementFrame::ack(round, ProposalNumber::new(1)));
        assert_eq!(*journal.lines.lock().unwrap(), vec!["1 2".to_string()]);
    }

    #[test]
    fn nack_merges_values_and_bumps_the_attempt_number() {
        let (agreement, transport, _) = harness(3);
        let round = agreement.begin_round(values(&[1, 2]));

        agreement.handle_frame(
            p(2),
            AgreementFrame::nack(round, ProposalNumber::new(1), &values(&[2, 3])),
        );

        // The revised proposal carries the union under the bumped number.
        let reproposal = sent_frames(&transport)
            .into_iter()
            .find(|(_, f)| f.kind == AgreementKind::Proposal && f.number == ProposalNumber::new(2))
            .expect("a revised proposal should have been broadcast");
        assert_eq!(reproposal.1.values, vec![1, 2, 3]);
        assert_eq!(reproposal.1.round, round);

        // An ack for the superseded attempt is stale and must not count.
        agreement.handle_frame(p(3), AgreementFrame::ack(round, ProposalNumber::new(1)));
        assert_eq!(agreement.decided(round), None);

        // An ack for the current attempt completes the majority of 3.
        agreement.handle_frame(p(3), AgreementFrame::ack(round, ProposalNumber::new(2)));
        assert_eq!(agreement.decided(round), Some(vec![1, 2, 3]));
    }

    #[test]
    fn proposals_are_acked_iff_contained_in_the_accepted_set() {
        let (agreement, transport, _) = harness(3);
        let round = agreement.begin_round(values(&[1, 2]));

        agreement.handle_frame(
            p(2),
            AgreementFrame::proposal(round, ProposalNumber::new(1), &values(&[1])),
        );
        let (dest, reply) = sent_frames(&transport)
            .into_iter()
            .find(|(_, f)| f.kind == AgreementKind::Ack)
            .expect("a contained proposal should be acked");
        assert_eq!(dest, p(2));
        assert_eq!(reply.number, ProposalNumber::new(1));

        agreement.handle_frame(
            p(3),
            AgreementFrame::proposal(round, ProposalNumber::new(1), &values(&[3])),
        );
        let (dest, reply) = sent_frames(&transport)
            .into_iter()
            .find(|(_, f)| f.kind == AgreementKind::Nack)
            .expect("an uncontained proposal should be nacked");
        assert_eq!(dest, p(3));
        // The nack carries back the union of what we have accepted.
        assert_eq!(reply.values, vec![1, 2, 3]);
    }

    #[test]
    fn future_round_traffic_is_buffered_and_replayed() {
        let (agreement, _, _) = harness(3);
        let first = agreement.begin_round(values(&[1]));

        // Round 2 does not exist here yet; its ack must wait, not be lost.
        agreement.handle_frame(p(2), AgreementFrame::ack(Round::new(2), ProposalNumber::new(1)));
        agreement.handle_frame(p(3), AgreementFrame::ack(first, ProposalNumber::new(1)));
        assert_eq!(agreement.decided(first), Some(vec![1]));
        assert_eq!(agreement.decided(Round::new(2)), None);

        // Entering round 2 replays the buffered ack, which completes the
        // majority of 3 on its own.
        let second = agreement.begin_round(values(&[5]));
        assert_eq!(second, Round::new(2));
        assert_eq!(agreement.decided(second), Some(vec![5]));
    }

    #[test]
    fn decided_rounds_still_answer_late_proposals() {
        let (agreement, transport, _) = harness(3);
        let first = agreement.begin_round(values(&[1, 2]));
        agreement.handle_frame(p(2), AgreementFrame::ack(first, ProposalNumber::new(1)));
        assert_eq!(agreement.decided(first), Some(vec![1, 2]));

        let _second = agreement.begin_round(values(&[9]));

        // A lagging proposer asks about round 1; it deserves an answer from
        // the decided state.
        agreement.handle_frame(
            p(3),
            AgreementFrame::proposal(first, ProposalNumber::new(4), &values(&[1])),
        );
        let (_, reply) = sent_frames(&transport)
            .into_iter()
            .find(|(dest, f)| *dest == p(3) && f.kind == AgreementKind::Ack)
            .expect("the decided round should ack the lagging proposer");
        assert_eq!(reply.round, first);
        assert_eq!(reply.number, ProposalNumber::new(4));
    }

    #[test]
    fn stale_acks_for_decided_rounds_are_dropped() {
        let (agreement, _, journal) = harness(3);
        let first = agreement.begin_round(values(&[4]));
        agreement.handle_frame(p(2), AgreementFrame::ack(first, ProposalNumber::new(1)));
        let _second = agreement.begin_round(values(&[6]));

        agreement.handle_frame(p(3), AgreementFrame::ack(first, ProposalNumber::new(1)));
        agreement.handle_frame(
            p(3),
            AgreementFrame::nack(first, ProposalNumber::new(1), &values(&[7])),
        );
        // Only round 1's decision has been journaled, and only once.
        assert_eq!(*journal.lines.lock().unwrap(), vec!["4".to_string()]);
        assert_eq!(agreement.decided(first), Some(vec![4]));
    }
}
