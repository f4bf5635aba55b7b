// SPDX-License-Identifier: CEPL-1.0
//! Host/GPU ownership of the frames-in-flight slots.
//!
//! A slot belongs to the host until its command buffer is submitted, then to the GPU
//! until the slot's fence has been waited on. The backend drives the transitions; this
//! type only refuses the ones that would let the host touch memory the GPU may read.
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotOwner {
    Host,
    Gpu,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameRingError {
    #[error("slot {0} is still owned by the GPU")]
    GpuOwned(usize),
    #[error("slot {0} is not in flight")]
    NotInFlight(usize),
    #[error("slot {0} out of range")]
    OutOfRange(usize),
}

#[derive(Debug, Clone)]
pub struct FrameRing {
    counter: u64,
    owners: Vec<SlotOwner>,
}

impl FrameRing {
    /// `frames` is clamped to at least one slot.
    pub fn new(frames: usize) -> Self {
        Self {
            counter: 0,
            owners: vec![SlotOwner::Host; frames.max(1)],
        }
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn frame_counter(&self) -> u64 {
        self.counter
    }

    pub fn current(&self) -> usize {
        (self.counter % self.owners.len() as u64) as usize
    }

    pub fn owner(&self, slot: usize) -> Option<SlotOwner> {
        self.owners.get(slot).copied()
    }

    /// The current slot's fence must be waited on before the host may write to it.
    pub fn must_wait(&self) -> bool {
        self.owners[self.current()] == SlotOwner::Gpu
    }

    /// Current slot is safe for host writes (uniforms, command recording).
    pub fn host_writable(&self) -> bool {
        !self.must_wait()
    }

    /// Hands the current slot to the GPU. Called right after a successful queue submit.
    pub fn mark_submitted(&mut self) -> Result<usize, FrameRingError> {
        let slot = self.current();
        if self.owners[slot] == SlotOwner::Gpu {
            return Err(FrameRingError::GpuOwned(slot));
        }
        self.owners[slot] = SlotOwner::Gpu;
        Ok(slot)
    }

    /// Returns a slot to the host once its fence has signalled. Idempotent for
    /// host-owned slots, since waiting on an already signalled fence is harmless.
    pub fn mark_retired(&mut self, slot: usize) -> Result<(), FrameRingError> {
        let owner = self
            .owners
            .get_mut(slot)
            .ok_or(FrameRingError::OutOfRange(slot))?;
        *owner = SlotOwner::Host;
        Ok(())
    }

    /// Every slot is host-owned again, e.g. after `vkDeviceWaitIdle`.
    pub fn retire_all(&mut self) {
        self.owners.fill(SlotOwner::Host);
    }

    pub fn advance(&mut self) {
        self.counter = self.counter.wrapping_add(1);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight_slots().count()
    }

    /// Slots whose fence will signal. A host-owned slot may hold a reset fence that
    /// was never submitted, so only these may be waited on.
    pub fn in_flight_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.owners
            .iter()
            .enumerate()
            .filter(|(_, o)| **o == SlotOwner::Gpu)
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_frame_does_not_wait_on_the_first() {
        let mut ring = FrameRing::new(2);

        // frame 0 -> slot 0
        assert!(!ring.must_wait());
        assert_eq!(ring.mark_submitted(), Ok(0));
        ring.advance();

        // frame 1 -> slot 1, independent of slot 0's fence
        assert_eq!(ring.current(), 1);
        assert!(!ring.must_wait());
        assert_eq!(ring.mark_submitted(), Ok(1));
        ring.advance();
        assert_eq!(ring.in_flight(), 2);

        // frame 2 -> slot 0 again, must block until frame 0 retires
        assert_eq!(ring.current(), 0);
        assert!(ring.must_wait());
        assert_eq!(ring.mark_submitted(), Err(FrameRingError::GpuOwned(0)));
        ring.mark_retired(0).unwrap();
        assert!(ring.host_writable());
        assert_eq!(ring.mark_submitted(), Ok(0));
    }

    #[test]
    fn in_flight_never_exceeds_slot_count() {
        let mut ring = FrameRing::new(3);
        for _ in 0..20 {
            if ring.must_wait() {
                ring.mark_retired(ring.current()).unwrap();
            }
            ring.mark_submitted().unwrap();
            assert!(ring.in_flight() <= ring.len());
            ring.advance();
        }
        assert_eq!(ring.frame_counter(), 20);
    }

    #[test]
    fn skipped_frame_keeps_slot_with_host() {
        let mut ring = FrameRing::new(2);
        // fence waited, then acquire reported out of date: nothing submitted
        ring.mark_retired(ring.current()).unwrap();
        assert_eq!(ring.owner(0), Some(SlotOwner::Host));
        assert_eq!(ring.in_flight(), 0);
    }

    #[test]
    fn failed_submit_leaves_nothing_to_wait_for() {
        let mut ring = FrameRing::new(2);
        ring.mark_submitted().unwrap();
        ring.advance();
        // slot 1: fence reset, then recording failed before the submit
        assert!(!ring.must_wait());
        assert_eq!(ring.in_flight_slots().collect::<Vec<_>>(), vec![0]);
        ring.mark_retired(0).unwrap();
        assert_eq!(ring.in_flight_slots().count(), 0);
    }

    #[test]
    fn retire_all_after_idle() {
        let mut ring = FrameRing::new(2);
        ring.mark_submitted().unwrap();
        ring.advance();
        ring.mark_submitted().unwrap();
        ring.retire_all();
        assert_eq!(ring.in_flight(), 0);
        assert_eq!(ring.mark_retired(5), Err(FrameRingError::OutOfRange(5)));
    }

    #[test]
    fn zero_slots_is_clamped() {
        let ring = FrameRing::new(0);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.current(), 0);
    }
}
