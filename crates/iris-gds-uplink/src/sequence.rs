//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Per packet class sequence counters."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;

use iris_gds_codec::PacketKind;

/// Width of the on-wire sequence field.
const SEQ_MODULUS: u32 = 256;

/// Next sequence number per packet class. Counters start at 0 and wrap at
/// 256.
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    next: HashMap<PacketKind, u32>,
}

impl SequenceTracker {
    /// Tracker with every counter at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number the next packet of `kind` gets.
    pub fn peek(&self, kind: PacketKind) -> u8 {
        self.next.get(&kind).map_or(0, |n| (n % SEQ_MODULUS) as u8)
    }

    /// Consume the current number of `kind`.
    pub fn advance(&mut self, kind: PacketKind) {
        let n = self.next.entry(kind).or_insert(0);
        *n = (*n + 1) % SEQ_MODULUS;
    }

    /// Current number of `kind`, then advance.
    pub fn issue(&mut self, kind: PacketKind) -> u8 {
        let seq = self.peek(kind);
        self.advance(kind);
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_wrap() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(tracker.issue(PacketKind::IrisCommon), 0);
        assert_eq!(tracker.issue(PacketKind::IrisCommon), 1);
        for _ in 2..256 {
            tracker.issue(PacketKind::IrisCommon);
        }
        assert_eq!(tracker.peek(PacketKind::IrisCommon), 0);
    }

    #[test]
    fn classes_are_independent() {
        let mut tracker = SequenceTracker::new();
        tracker.issue(PacketKind::IrisCommon);
        tracker.issue(PacketKind::IrisCommon);
        assert_eq!(tracker.peek(PacketKind::RadioGround), 0);
        assert_eq!(tracker.peek(PacketKind::IrisCommon), 2);
    }
}
