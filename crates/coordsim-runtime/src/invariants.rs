//! Runtime check of the token ring's safety properties
//!
//! Every token acquisition and hand-off is recorded in a single ledger, so
//! two simultaneous holders are caught at the moment the second one takes
//! the token rather than by comparing snapshots that were never consistent.
//!
//! # Properties
//!
//! 1. **Single holder** - at most one process holds the token
//! 2. **Exclusive section** - at most one process is in its critical section
//! 3. **No loss** - once issued, the token is held or in flight to a live process

use parking_lot::Mutex;

use coordsim_core::{CoordError, CoordResult, ProcessId};

/// Recorded breach of a token property
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenViolation {
    /// A process acquired the token while another still held it
    DuplicateHolder { holders: Vec<ProcessId> },
    /// Two processes were in the critical section together
    ConcurrentCriticalSection { holders: Vec<ProcessId> },
}

impl From<TokenViolation> for CoordError {
    fn from(violation: TokenViolation) -> Self {
        match violation {
            TokenViolation::DuplicateHolder { holders }
            | TokenViolation::ConcurrentCriticalSection { holders } => {
                CoordError::DuplicateToken { holders }
            }
        }
    }
}

#[derive(Debug, Default)]
struct Ledger {
    issued: bool,
    holder: Option<ProcessId>,
    /// `(from, to)` of the hand-off in progress
    in_flight: Option<(ProcessId, ProcessId)>,
    parked: bool,
    in_critical_section: Option<ProcessId>,
    acquisitions: u64,
    hand_offs: u64,
    violations: Vec<TokenViolation>,
}

/// Where the token currently is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenLocation {
    NotIssued,
    Held { holder: ProcessId, parked: bool },
    InFlight { from: ProcessId, to: ProcessId },
    Lost,
}

/// Token ledger shared by every process
#[derive(Debug, Default)]
pub struct TokenMonitor {
    ledger: Mutex<Ledger>,
}

impl TokenMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `id` now holds the token
    pub fn acquire(&self, id: ProcessId) {
        let mut ledger = self.ledger.lock();
        if let Some(other) = ledger.holder.filter(|holder| *holder != id) {
            tracing::error!(holder = %other, contender = %id, "token acquired twice");
            ledger.violations.push(TokenViolation::DuplicateHolder {
                holders: vec![other, id],
            });
        }
        ledger.issued = true;
        ledger.holder = Some(id);
        ledger.in_flight = None;
        ledger.parked = false;
        ledger.acquisitions += 1;
    }

    /// Record that `id` holds the token and keeps it until the next run
    pub fn park(&self, id: ProcessId) {
        self.acquire(id);
        self.ledger.lock().parked = true;
    }

    /// Record that `from` released the token towards `to`
    pub fn hand_off(&self, from: ProcessId, to: ProcessId) {
        let mut ledger = self.ledger.lock();
        if let Some(other) = ledger.holder.filter(|holder| *holder != from) {
            tracing::error!(holder = %other, sender = %from, "token sent by a non-holder");
            ledger.violations.push(TokenViolation::DuplicateHolder {
                holders: vec![other, from],
            });
        }
        ledger.holder = None;
        ledger.in_flight = Some((from, to));
        ledger.parked = false;
        ledger.hand_offs += 1;
    }

    /// Forget a token that was held by, or travelling to, a crashed
    /// process and could not be recovered
    pub fn discard(&self, id: ProcessId) {
        let mut ledger = self.ledger.lock();
        let at_id = ledger.holder == Some(id)
            || ledger.in_flight.map(|(_, to)| to) == Some(id);
        if at_id {
            tracing::warn!(process = %id, "token lost with crashed process");
            ledger.holder = None;
            ledger.in_flight = None;
            ledger.parked = false;
        }
    }

    pub fn enter_critical_section(&self, id: ProcessId) {
        let mut ledger = self.ledger.lock();
        if let Some(other) = ledger.in_critical_section.filter(|p| *p != id) {
            tracing::error!(inside = %other, entering = %id, "critical sections overlap");
            ledger
                .violations
                .push(TokenViolation::ConcurrentCriticalSection {
                    holders: vec![other, id],
                });
        }
        ledger.in_critical_section = Some(id);
    }

    pub fn exit_critical_section(&self, id: ProcessId) {
        let mut ledger = self.ledger.lock();
        if ledger.in_critical_section == Some(id) {
            ledger.in_critical_section = None;
        }
    }

    pub fn location(&self) -> TokenLocation {
        let ledger = self.ledger.lock();
        match (ledger.holder, ledger.in_flight) {
            _ if !ledger.issued => TokenLocation::NotIssued,
            (Some(holder), _) => TokenLocation::Held {
                holder,
                parked: ledger.parked,
            },
            (None, Some((from, to))) => TokenLocation::InFlight { from, to },
            (None, None) => TokenLocation::Lost,
        }
    }

    /// Holder of a parked token, if the token is resting
    pub fn parked_holder(&self) -> Option<ProcessId> {
        match self.location() {
            TokenLocation::Held {
                holder,
                parked: true,
            } => Some(holder),
            _ => None,
        }
    }

    pub fn is_issued(&self) -> bool {
        self.ledger.lock().issued
    }

    pub fn acquisitions(&self) -> u64 {
        self.ledger.lock().acquisitions
    }

    pub fn hand_offs(&self) -> u64 {
        self.ledger.lock().hand_offs
    }

    pub fn violations(&self) -> Vec<TokenViolation> {
        self.ledger.lock().violations.clone()
    }

    /// Check every property. `is_alive` decides whether the recorded
    /// holder or recipient can still carry the token.
    pub fn check(&self, is_alive: impl Fn(ProcessId) -> bool) -> CoordResult<()> {
        if let Some(violation) = self.ledger.lock().violations.first().cloned() {
            return Err(violation.into());
        }
        match self.location() {
            TokenLocation::NotIssued => Ok(()),
            TokenLocation::Held { holder: p, .. } | TokenLocation::InFlight { to: p, .. }
                if is_alive(p) =>
            {
                Ok(())
            }
            _ => Err(CoordError::MissingToken),
        }
    }
}
