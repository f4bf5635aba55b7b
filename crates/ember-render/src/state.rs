// SPDX-License-Identifier: CEPL-1.0
//! Per-frame progress of the render loop.
//!
//! ```text
//! Idle -> Acquiring -> Recording -> Submitted -> Presenting -> Idle
//!   *  -> Resizing -> Idle
//! ```
use thiserror::Error;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FrameState {
    #[default]
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
    /// Swapchain-dependent objects are being torn down and rebuilt; no frame work runs.
    Resizing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameEvent {
    BeginFrame,
    ImageAcquired,
    CommandsSubmitted,
    BeginPresent,
    Presented,
    /// Acquire or present reported out-of-date or suboptimal.
    SurfaceStale,
    /// The window changed size.
    ResizeRequested,
    Rebuilt,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid frame transition: {event:?} while {from:?}")]
pub struct InvalidTransition {
    pub from: FrameState,
    pub event: FrameEvent,
}

impl FrameState {
    pub fn next(self, event: FrameEvent) -> Result<FrameState, InvalidTransition> {
        use FrameEvent as E;
        use FrameState as S;
        let to = match (self, event) {
            (_, E::SurfaceStale | E::ResizeRequested) => S::Resizing,
            (S::Idle, E::BeginFrame) => S::Acquiring,
            (S::Acquiring, E::ImageAcquired) => S::Recording,
            (S::Recording, E::CommandsSubmitted) => S::Submitted,
            (S::Submitted, E::BeginPresent) => S::Presenting,
            (S::Presenting, E::Presented) => S::Idle,
            (S::Resizing, E::Rebuilt) => S::Idle,
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATES: [FrameState; 6] = [
        FrameState::Idle,
        FrameState::Acquiring,
        FrameState::Recording,
        FrameState::Submitted,
        FrameState::Presenting,
        FrameState::Resizing,
    ];

    const EVENTS: [FrameEvent; 8] = [
        FrameEvent::BeginFrame,
        FrameEvent::ImageAcquired,
        FrameEvent::CommandsSubmitted,
        FrameEvent::BeginPresent,
        FrameEvent::Presented,
        FrameEvent::SurfaceStale,
        FrameEvent::ResizeRequested,
        FrameEvent::Rebuilt,
    ];

    #[test]
    fn happy_path_loops_back_to_idle() {
        let mut s = FrameState::Idle;
        for e in [
            FrameEvent::BeginFrame,
            FrameEvent::ImageAcquired,
            FrameEvent::CommandsSubmitted,
            FrameEvent::BeginPresent,
            FrameEvent::Presented,
        ] {
            s = s.next(e).unwrap();
        }
        assert_eq!(s, FrameState::Idle);
    }

    #[test]
    fn resizing_is_reachable_from_everywhere() {
        for s in STATES {
            assert_eq!(s.next(FrameEvent::SurfaceStale), Ok(FrameState::Resizing));
            assert_eq!(s.next(FrameEvent::ResizeRequested), Ok(FrameState::Resizing));
        }
        assert_eq!(
            FrameState::Resizing.next(FrameEvent::Rebuilt),
            Ok(FrameState::Idle)
        );
    }

    #[test]
    fn only_documented_edges_exist() {
        let mut allowed = 0;
        for s in STATES {
            for e in EVENTS {
                if s.next(e).is_ok() {
                    allowed += 1;
                }
            }
        }
        // 5 loop edges + Rebuilt + 2 resize events from each of 6 states.
        assert_eq!(allowed, 5 + 1 + 12);
    }

    #[test]
    fn resizing_blocks_frame_progress() {
        let err = FrameState::Resizing.next(FrameEvent::BeginFrame).unwrap_err();
        assert_eq!(err.from, FrameState::Resizing);
        assert!(FrameState::Recording.next(FrameEvent::Presented).is_err());
    }
}
