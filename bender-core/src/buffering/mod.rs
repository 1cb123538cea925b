//! Frame assembly: decimated samples in, fixed-size detector frames out.
//!
//! Uses a `ringbuf::HeapRb<i16>` sized once at startup to
//! `frame_length + max_push`. Every `push` drains all complete frames before
//! returning, so fewer than `frame_length` samples are ever left behind and
//! the next push of at most `max_push` samples always fits.

pub mod frame;

use ringbuf::{
    traits::{Consumer, Observer, Producer},
    HeapRb,
};

use crate::{
    config::{accepted_frame_lengths, PipelineConfig},
    error::{BenderError, Result},
};

pub use frame::Frame;

/// Accumulates mono samples and emits non-overlapping frames from the front.
pub struct FrameAssembler {
    buffer: HeapRb<i16>,
    /// Scratch frame refilled for every emission.
    frame: Frame,
    frame_length: usize,
    /// Largest slice a single `push` may append.
    max_push: usize,
    capacity: usize,
    next_index: u64,
}

impl FrameAssembler {
    /// Create an assembler for `frame_length`-sample frames at `sample_rate`.
    ///
    /// # Errors
    /// `BenderError::UnsupportedFrameLength` unless `frame_length` is a 10, 20
    /// or 30 ms window at `sample_rate`; `BenderError::Config` if `max_push`
    /// is zero.
    pub fn new(frame_length: usize, max_push: usize, sample_rate: u32) -> Result<Self> {
        if !accepted_frame_lengths(sample_rate).contains(&frame_length) || frame_length == 0 {
            return Err(BenderError::UnsupportedFrameLength {
                frame_length,
                sample_rate,
            });
        }
        if max_push == 0 {
            return Err(BenderError::Config("frame assembler push bound must be positive".into()));
        }
        let capacity = frame_length + max_push;
        Ok(Self {
            buffer: HeapRb::new(capacity),
            frame: Frame::zeroed(frame_length, sample_rate),
            frame_length,
            max_push,
            capacity,
            next_index: 0,
        })
    }

    /// Assembler sized for one decimated block of `config`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Self::new(
            config.frame_length,
            config.max_decimated_block(),
            config.target_sample_rate,
        )
    }

    /// Append `samples` and call `emit` for every complete frame, in order.
    /// Returns the number of frames emitted.
    ///
    /// # Errors
    /// `BenderError::FrameOverflow` if `samples` is longer than the per-push
    /// bound. Nothing is appended in that case.
    pub fn push<F>(&mut self, samples: &[i16], emit: F) -> Result<usize>
    where
        F: FnMut(&Frame),
    {
        self.check_room(samples.len())?;
        let written = self.buffer.push_slice(samples);
        debug_assert_eq!(written, samples.len());
        Ok(self.drain(emit))
    }

    /// Append `count` zero samples (stand-ins for a dropped block) and emit
    /// completed frames like `push`.
    pub fn push_silence<F>(&mut self, count: usize, emit: F) -> Result<usize>
    where
        F: FnMut(&Frame),
    {
        self.check_room(count)?;
        let written = self.buffer.push_iter(std::iter::repeat(0).take(count));
        debug_assert_eq!(written, count);
        Ok(self.drain(emit))
    }

    /// Flush the residual as a final zero-padded frame. Only for shutdown:
    /// steady-state frames are never padded.
    pub fn finish(&mut self) -> Option<&Frame> {
        let residual = self.buffer.occupied_len();
        if residual == 0 {
            return None;
        }
        let taken = self.buffer.pop_slice(&mut self.frame.samples[..residual]);
        debug_assert_eq!(taken, residual);
        self.frame.samples[residual..].fill(0);
        self.frame.index = self.next_index;
        self.frame.padded = true;
        self.next_index += 1;
        Some(&self.frame)
    }

    /// Samples waiting for the next frame.
    pub fn buffered(&self) -> usize {
        self.buffer.occupied_len()
    }

    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_push(&self) -> usize {
        self.max_push
    }

    /// Frames emitted so far (including a padded final frame).
    pub fn frames_emitted(&self) -> u64 {
        self.next_index
    }

    /// Drop buffered samples and restart frame numbering. Only valid on
    /// pipeline restart.
    pub fn reset(&mut self) {
        self.buffer = HeapRb::new(self.capacity);
        self.next_index = 0;
        self.frame.padded = false;
    }

    fn check_room(&self, count: usize) -> Result<()> {
        if count > self.max_push {
            return Err(BenderError::FrameOverflow {
                pushed: count,
                bound: self.max_push,
            });
        }
        // Holds as long as every push drains; a violation is a bug here.
        if self.buffer.occupied_len() >= self.frame_length || count > self.buffer.vacant_len() {
            return Err(BenderError::FrameOverflow {
                pushed: count,
                bound: self.buffer.vacant_len(),
            });
        }
        Ok(())
    }

    fn drain<F>(&mut self, mut emit: F) -> usize
    where
        F: FnMut(&Frame),
    {
        let mut emitted = 0;
        while self.buffer.occupied_len() >= self.frame_length {
            let taken = self.buffer.pop_slice(&mut self.frame.samples);
            debug_assert_eq!(taken, self.frame_length);
            self.frame.index = self.next_index;
            self.frame.padded = false;
            self.next_index += 1;
            emit(&self.frame);
            emitted += 1;
        }
        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler() -> FrameAssembler {
        FrameAssembler::new(320, 342, 16_000).unwrap()
    }

    fn ramp(start: i16, len: usize) -> Vec<i16> {
        (0..len).map(|i| start.wrapping_add(i as i16)).collect()
    }

    #[test]
    fn exact_multiples_leave_empty_residual() {
        let mut asm = assembler();
        let mut frames = 0;
        // 5 pushes summing to 3 * 320.
        for len in [100, 300, 200, 60, 300] {
            frames += asm
                .push(&vec![1; len], |f| assert_eq!(f.len(), 320))
                .unwrap();
        }
        assert_eq!(frames, 3);
        assert_eq!(asm.buffered(), 0);
        assert!(asm.finish().is_none());
    }

    #[test]
    fn frames_are_contiguous_and_in_order() {
        let mut asm = assembler();
        let mut seen: Vec<(u64, i16)> = Vec::new();
        let mut next = 0i16;
        for len in [341, 7, 299, 342, 13, 1] {
            let chunk = ramp(next, len);
            next = next.wrapping_add(len as i16);
            asm.push(&chunk, |f| {
                assert!(!f.padded);
                seen.push((f.index, f.samples[0]));
                // Samples within a frame are consecutive.
                assert!(f.samples.windows(2).all(|w| w[1] == w[0].wrapping_add(1)));
            })
            .unwrap();
        }
        assert_eq!(seen, vec![(0, 0), (1, 320), (2, 640)]);
        assert_eq!(asm.buffered(), 1003 - 960);
    }

    #[test]
    fn never_holds_a_full_frame_between_pushes() {
        let mut asm = assembler();
        for len in [342, 342, 1, 200, 342, 319] {
            asm.push(&vec![0; len], |_| {}).unwrap();
            assert!(asm.buffered() < asm.frame_length());
            assert!(asm.buffered() < asm.capacity());
        }
    }

    #[test]
    fn oversized_push_is_rejected_not_truncated() {
        let mut asm = assembler();
        asm.push(&vec![0; 100], |_| {}).unwrap();
        let err = asm.push(&vec![0; 343], |_| panic!("no frame expected")).unwrap_err();
        assert!(matches!(err, BenderError::FrameOverflow { pushed: 343, bound: 342 }));
        assert_eq!(asm.buffered(), 100);
    }

    #[test]
    fn finish_pads_residual_with_zeros() {
        let mut asm = assembler();
        asm.push(&vec![7; 330], |_| {}).unwrap();
        let last = asm.finish().expect("residual frame");
        assert!(last.padded);
        assert_eq!(last.index, 1);
        assert_eq!(last.len(), 320);
        assert!(last.samples[..10].iter().all(|&s| s == 7));
        assert!(last.samples[10..].iter().all(|&s| s == 0));
        assert_eq!(asm.buffered(), 0);
        assert!(asm.finish().is_none());
    }

    #[test]
    fn push_silence_advances_like_zeros() {
        let mut asm = assembler();
        asm.push(&vec![5; 300], |_| {}).unwrap();
        let mut firsts = Vec::new();
        let n = asm.push_silence(40, |f| firsts.push((f.samples[0], f.samples[319]))).unwrap();
        assert_eq!(n, 1);
        assert_eq!(firsts, vec![(5, 0)]);
        assert_eq!(asm.buffered(), 20);
    }

    #[test]
    fn rejects_unsupported_frame_lengths() {
        assert!(FrameAssembler::new(341, 342, 16_000).is_err());
        assert!(FrameAssembler::new(320, 342, 8_000).is_err());
        assert!(FrameAssembler::new(160, 171, 8_000).is_ok());
        assert!(FrameAssembler::new(480, 342, 16_000).is_ok());
        assert!(FrameAssembler::new(320, 0, 16_000).is_err());
    }

    #[test]
    fn reset_restarts_numbering() {
        let mut asm = assembler();
        asm.push(&vec![1; 330], |_| {}).unwrap();
        asm.reset();
        assert_eq!(asm.buffered(), 0);
        let mut idx = None;
        asm.push(&vec![1; 320], |f| idx = Some(f.index)).unwrap();
        assert_eq!(idx, Some(0));
    }
}
