//! Protocol messages exchanged between simulated processes
//!
//! Messages are immutable once built: fields are private and only the
//! constructors below can assemble them. Every constructor pairs a
//! [`MessageKind`] with the payload shape its handlers expect.

use crate::ProcessId;

/// Message kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Election probe (bully) or candidate relay (ring)
    Election,
    /// Acknowledgement: election answer, coordinator receipt, correction receipt
    Ok,
    /// Coordinator announcement
    Coordinator,
    /// Mutual exclusion token
    Token,
    /// Berkeley master polls a clock
    TimeRequest,
    /// Clock reading sent back to the master
    TimeReply,
    /// Berkeley correction sent by the master
    TimeAdjust,
}

/// Delivery target
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Recipient {
    One(ProcessId),
    /// Every mailbox except the sender's
    Broadcast,
}

/// A message circulating along a ring snapshot
#[derive(Clone, Debug, PartialEq)]
pub struct RingPass {
    /// Election epoch
    pub epoch: u64,
    /// Retry within the epoch, 0 for the first pass
    pub attempt: u32,
    /// Process that started the pass; the pass ends when it returns here
    pub initiator: ProcessId,
    /// Ring order captured when the pass started
    pub ring: Vec<ProcessId>,
    /// Ids appended by each visited process, initiator first
    pub ids: Vec<ProcessId>,
}

impl RingPass {
    pub fn new(epoch: u64, initiator: ProcessId, ring: Vec<ProcessId>) -> Self {
        RingPass {
            epoch,
            attempt: 0,
            initiator,
            ring,
            ids: vec![initiator],
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Highest id collected so far
    pub fn max_id(&self) -> Option<ProcessId> {
        self.ids.iter().max().copied()
    }
}

/// The circulating mutual exclusion token
#[derive(Clone, Debug, PartialEq)]
pub struct TokenPass {
    /// Holder that started the current run
    pub initiator: ProcessId,
    /// Holders visited during the current rotation, in order
    pub visited: Vec<ProcessId>,
    /// Rotations left before the token parks; `None` circulates forever
    pub remaining: Option<u32>,
    /// Completed rotations
    pub completed: u32,
    /// Holders that entered the critical section during this run
    pub served: Vec<ProcessId>,
}

impl TokenPass {
    pub fn new(initiator: ProcessId, rotations: Option<u32>) -> Self {
        TokenPass {
            initiator,
            visited: Vec::new(),
            remaining: rotations,
            completed: 0,
            served: Vec::new(),
        }
    }

    /// A token that only moves to a new holder and stays there
    pub fn parked(holder: ProcessId) -> Self {
        Self::new(holder, Some(0))
    }

    pub fn is_parked(&self) -> bool {
        self.remaining == Some(0)
    }
}

/// Message payload
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Empty,
    /// Round or epoch number (requests, bully probes, acknowledgements)
    Round(u64),
    /// Clock reading for a Berkeley round
    Reading { round: u64, value: f64 },
    /// Signed clock correction for a Berkeley round
    Correction { round: u64, delta: f64 },
    /// Ring election candidate list
    Ring(RingPass),
    /// Coordinator announcement, relayed along the ring when `pass` is set
    Leader {
        epoch: u64,
        coordinator: ProcessId,
        pass: Option<RingPass>,
    },
    Token(TokenPass),
}

/// Message between simulated processes
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    kind: MessageKind,
    sender: ProcessId,
    recipient: Recipient,
    payload: Payload,
}

impl Message {
    pub fn new(kind: MessageKind, sender: ProcessId, recipient: Recipient, payload: Payload) -> Self {
        Message {
            kind,
            sender,
            recipient,
            payload,
        }
    }

    pub fn time_request(master: ProcessId, to: ProcessId, round: u64) -> Self {
        Self::new(
            MessageKind::TimeRequest,
            master,
            Recipient::One(to),
            Payload::Round(round),
        )
    }

    pub fn time_reply(from: ProcessId, master: ProcessId, round: u64, value: f64) -> Self {
        Self::new(
            MessageKind::TimeReply,
            from,
            Recipient::One(master),
            Payload::Reading { round, value },
        )
    }

    pub fn time_adjust(master: ProcessId, to: ProcessId, round: u64, delta: f64) -> Self {
        Self::new(
            MessageKind::TimeAdjust,
            master,
            Recipient::One(to),
            Payload::Correction { round, delta },
        )
    }

    /// Plain acknowledgement of a round or epoch
    pub fn ack(from: ProcessId, to: ProcessId, round: u64) -> Self {
        Self::new(MessageKind::Ok, from, Recipient::One(to), Payload::Round(round))
    }

    /// Bully election probe
    pub fn election(from: ProcessId, to: ProcessId, epoch: u64) -> Self {
        Self::new(
            MessageKind::Election,
            from,
            Recipient::One(to),
            Payload::Round(epoch),
        )
    }

    /// Ring election candidate relay
    pub fn ring_election(from: ProcessId, to: ProcessId, pass: RingPass) -> Self {
        Self::new(
            MessageKind::Election,
            from,
            Recipient::One(to),
            Payload::Ring(pass),
        )
    }

    /// Coordinator announcement to every other process
    pub fn coordinator_broadcast(from: ProcessId, coordinator: ProcessId, epoch: u64) -> Self {
        Self::new(
            MessageKind::Coordinator,
            from,
            Recipient::Broadcast,
            Payload::Leader {
                epoch,
                coordinator,
                pass: None,
            },
        )
    }

    /// Coordinator announcement relayed along the ring
    pub fn coordinator_relay(
        from: ProcessId,
        to: ProcessId,
        coordinator: ProcessId,
        pass: RingPass,
    ) -> Self {
        Self::new(
            MessageKind::Coordinator,
            from,
            Recipient::One(to),
            Payload::Leader {
                epoch: pass.epoch,
                coordinator,
                pass: Some(pass),
            },
        )
    }

    /// Receipt of a coordinator announcement
    pub fn coordinator_ack(
        from: ProcessId,
        to: ProcessId,
        coordinator: ProcessId,
        epoch: u64,
    ) -> Self {
        Self::new(
            MessageKind::Ok,
            from,
            Recipient::One(to),
            Payload::Leader {
                epoch,
                coordinator,
                pass: None,
            },
        )
    }

    pub fn token(from: ProcessId, to: ProcessId, pass: TokenPass) -> Self {
        Self::new(
            MessageKind::Token,
            from,
            Recipient::One(to),
            Payload::Token(pass),
        )
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn sender(&self) -> ProcessId {
        self.sender
    }

    pub fn recipient(&self) -> Recipient {
        self.recipient
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient == Recipient::Broadcast
    }

    /// True for an `OK` acknowledging `round`
    pub fn acknowledges(&self, round: u64) -> bool {
        self.kind == MessageKind::Ok && self.payload == Payload::Round(round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_pair_kind_and_payload() {
        let a = ProcessId(1);
        let b = ProcessId(2);

        let req = Message::time_request(a, b, 7);
        assert_eq!(req.kind(), MessageKind::TimeRequest);
        assert_eq!(req.payload(), &Payload::Round(7));
        assert_eq!(req.recipient(), Recipient::One(b));

        let reply = Message::time_reply(b, a, 7, 842.0);
        assert_eq!(reply.sender(), b);
        assert!(matches!(
            reply.payload(),
            Payload::Reading { round: 7, value } if *value == 842.0
        ));

        let announce = Message::coordinator_broadcast(a, b, 3);
        assert!(announce.is_broadcast());
    }

    #[test]
    fn test_acknowledges_only_matching_round() {
        let ack = Message::ack(ProcessId(2), ProcessId(1), 9);
        assert!(ack.acknowledges(9));
        assert!(!ack.acknowledges(10));

        let probe = Message::election(ProcessId(1), ProcessId(2), 9);
        assert!(!probe.acknowledges(9));
    }

    #[test]
    fn test_ring_pass_starts_with_initiator() {
        let ring = vec![ProcessId(1), ProcessId(2), ProcessId(3)];
        let mut pass = RingPass::new(1, ProcessId(2), ring);
        assert_eq!(pass.ids, vec![ProcessId(2)]);

        pass.ids.push(ProcessId(3));
        pass.ids.push(ProcessId(1));
        assert_eq!(pass.max_id(), Some(ProcessId(3)));
    }
}
