//! Identity types for simulated processes
//!
//! Process ids are small, unique and totally ordered. Both election
//! algorithms rely on the ordering: the highest alive id always wins.

use std::fmt;

/// Logical process identity
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ProcessId(pub u32);

impl ProcessId {
    #[inline]
    pub const fn new(id: u32) -> Self {
        ProcessId(id)
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Process({})", self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}

impl From<u32> for ProcessId {
    fn from(id: u32) -> Self {
        ProcessId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_id_ordering() {
        let mut ids = vec![ProcessId::new(3), ProcessId::new(1), ProcessId::new(5)];
        ids.sort();
        assert_eq!(ids, vec![ProcessId(1), ProcessId(3), ProcessId(5)]);
        assert_eq!(ids.iter().max(), Some(&ProcessId(5)));
    }

    #[test]
    fn test_process_id_display() {
        assert_eq!(ProcessId::new(2).to_string(), "N2");
        assert_eq!(format!("{:?}", ProcessId::new(2)), "Process(2)");
    }
}
