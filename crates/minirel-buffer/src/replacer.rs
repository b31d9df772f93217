//! Clock replacement for the buffer pool.

use crate::frame::{FrameDesc, FrameId};
use minirel_common::PagedFile;

/// Frame picked by a clock scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClockChoice {
    /// The frame holds no page and can be used directly.
    Free(FrameId),
    /// The frame holds an unpinned page that must be evicted first.
    Victim(FrameId),
}

/// Outcome of one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ClockScan {
    /// None if every frame stayed pinned for two full rotations.
    pub(crate) choice: Option<ClockChoice>,
    /// Number of frames the hand visited.
    pub(crate) steps: u64,
}

/// Clock replacement algorithm.
///
/// The hand walks the descriptor table circularly. On each step:
/// 1. An empty frame is chosen immediately
/// 2. A set reference bit is cleared and the hand moves on
/// 3. A pinned frame is skipped untouched
/// 4. Anything else is the victim
///
/// Two full rotations are enough: the first clears every reference bit, so
/// a frame that is still not chosen on the second one must be pinned.
pub(crate) struct ClockReplacer {
    num_frames: usize,
    hand: usize,
}

impl ClockReplacer {
    /// Creates a replacer with the hand on the last frame, so the first
    /// scan starts at frame 0.
    pub(crate) fn new(num_frames: usize) -> Self {
        Self {
            num_frames,
            hand: num_frames.saturating_sub(1),
        }
    }

    /// Returns the current hand position.
    pub(crate) fn hand(&self) -> usize {
        self.hand
    }

    #[inline]
    fn advance(&mut self) {
        self.hand = (self.hand + 1) % self.num_frames;
    }

    /// Runs one scan over `frames`.
    ///
    /// Only reference bits are modified. Pin counts, dirty flags and
    /// validity are left to the caller, which does the eviction itself.
    pub(crate) fn choose<F: PagedFile + ?Sized>(
        &mut self,
        frames: &mut [FrameDesc<F>],
    ) -> ClockScan {
        debug_assert_eq!(frames.len(), self.num_frames);

        let mut steps = 0u64;
        if self.num_frames == 0 {
            return ClockScan { choice: None, steps };
        }

        for _ in 0..(2 * self.num_frames) {
            self.advance();
            steps += 1;

            let frame = &mut frames[self.hand];
            if !frame.is_valid() {
                return ClockScan {
                    choice: Some(ClockChoice::Free(frame.frame_id())),
                    steps,
                };
            }
            if frame.ref_bit() {
                frame.set_ref_bit(false);
                continue;
            }
            if frame.is_pinned() {
                continue;
            }
            return ClockScan {
                choice: Some(ClockChoice::Victim(frame.frame_id())),
                steps,
            };
        }

        ClockScan { choice: None, steps }
    }
}

impl std::fmt::Debug for ClockReplacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockReplacer")
            .field("num_frames", &self.num_frames)
            .field("hand", &self.hand)
            .finish()
    }
}
