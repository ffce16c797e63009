//! CPU-stack budget tracking and stack-or-heap containers
//!
//! Fixed-capacity arrays on hot paths live on the stack, but the total per
//! frame is budgeted: 64 KiB hard limit with warnings at 48 KiB and a
//! critical report at 56 KiB. [`StackVec`] is the container handed to nodes;
//! it is a two-case sum type so the hot inline path monomorphises away, and
//! it transparently falls back to the heap when the stack budget is spent.
//!
//! Counters are per-thread by construction: a tracker is owned by the frame
//! thread that uses it, and threshold breaches log but never panic.

use super::profiler::AllocationLocation;
use super::AllocationError;
use crate::foundation::collections::{BoundedArray, CapacityExceeded};
use crate::foundation::hash;
use std::collections::{HashMap, VecDeque};

/// Hard per-frame stack budget
pub const MAX_STACK_PER_FRAME: u64 = 64 * 1024;
/// Usage above this logs a warning (75% of the budget)
pub const WARNING_THRESHOLD: u64 = 48 * 1024;
/// Usage above this logs an error (87.5% of the budget)
pub const CRITICAL_THRESHOLD: u64 = 56 * 1024;
/// Frames of usage history retained
pub const MAX_STACK_HISTORY: usize = 300;

/// One tracked stack allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackAllocation {
    /// Persistent resource hash identifying the allocation
    pub resource_hash: u64,
    /// Size in bytes
    pub size_bytes: u64,
    /// Node that made the allocation
    pub node_id: u32,
    /// Frame when allocated
    pub frame_number: u64,
}

/// Stack usage over one frame
#[derive(Debug, Clone, Default)]
pub struct FrameStackUsage {
    /// Frame number being described
    pub frame_number: u64,
    /// Sum of live tracked allocations
    pub total_stack_used: u64,
    /// High-water mark within the frame
    pub peak_stack_used: u64,
    /// Number of allocations made this frame
    pub allocation_count: u32,
    /// The allocations themselves
    pub allocations: Vec<StackAllocation>,
}

/// Aggregate usage statistics over the tracked history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackUsageStats {
    /// Mean peak usage per frame
    pub average_stack_per_frame: u64,
    /// Highest peak across the history
    pub peak_stack_usage: u64,
    /// Frames recorded
    pub frames_tracked: u32,
    /// Frames that crossed the warning threshold
    pub warning_frames: u32,
    /// Frames that crossed the critical threshold
    pub critical_frames: u32,
}

/// Per-frame stack allocation tracker
#[derive(Default)]
pub struct StackTracker {
    current: FrameStackUsage,
    history: VecDeque<FrameStackUsage>,
    live: HashMap<u64, u64>,
}

impl StackTracker {
    /// Create an idle tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking a new frame
    pub fn begin_frame(&mut self, frame_number: u64) {
        self.current = FrameStackUsage {
            frame_number,
            ..FrameStackUsage::default()
        };
        self.live.clear();
    }

    /// Roll the current frame into the history and reset counters
    pub fn end_frame(&mut self) {
        if self.current.peak_stack_used > CRITICAL_THRESHOLD {
            log::error!(
                "frame {} peaked at {} bytes of tracked stack (critical threshold {})",
                self.current.frame_number,
                self.current.peak_stack_used,
                CRITICAL_THRESHOLD
            );
        } else if self.current.peak_stack_used > WARNING_THRESHOLD {
            log::warn!(
                "frame {} peaked at {} bytes of tracked stack (warning threshold {})",
                self.current.frame_number,
                self.current.peak_stack_used,
                WARNING_THRESHOLD
            );
        }
        let finished = std::mem::take(&mut self.current);
        self.current.frame_number = finished.frame_number + 1;
        self.history.push_back(finished);
        while self.history.len() > MAX_STACK_HISTORY {
            self.history.pop_front();
        }
        self.live.clear();
    }

    /// Whether a new allocation of `bytes` may go on the stack
    pub fn admits(&self, bytes: u64) -> bool {
        self.current.total_stack_used < WARNING_THRESHOLD
            && self.current.total_stack_used + bytes <= MAX_STACK_PER_FRAME
    }

    /// Register a stack allocation
    pub fn track(&mut self, resource_hash: u64, size_bytes: u64, node_id: u32) {
        self.live.insert(resource_hash, size_bytes);
        self.current.total_stack_used += size_bytes;
        self.current.peak_stack_used = self
            .current
            .peak_stack_used
            .max(self.current.total_stack_used);
        self.current.allocation_count += 1;
        self.current.allocations.push(StackAllocation {
            resource_hash,
            size_bytes,
            node_id,
            frame_number: self.current.frame_number,
        });
    }

    /// Release a tracked allocation before the frame ends
    pub fn release(&mut self, resource_hash: u64) {
        if let Some(bytes) = self.live.remove(&resource_hash) {
            self.current.total_stack_used = self.current.total_stack_used.saturating_sub(bytes);
        }
    }

    /// Usage of the frame in progress
    pub fn current_usage(&self) -> &FrameStackUsage {
        &self.current
    }

    /// Whether current usage crossed the warning threshold
    pub fn is_over_warning(&self) -> bool {
        self.current.total_stack_used > WARNING_THRESHOLD
    }

    /// Whether current usage crossed the critical threshold
    pub fn is_over_critical(&self) -> bool {
        self.current.total_stack_used > CRITICAL_THRESHOLD
    }

    /// Recorded frame history, oldest first
    pub fn history(&self) -> &VecDeque<FrameStackUsage> {
        &self.history
    }

    /// Aggregate statistics over the history
    pub fn stats(&self) -> StackUsageStats {
        let frames = self.history.len() as u32;
        if frames == 0 {
            return StackUsageStats::default();
        }
        let mut total = 0u64;
        let mut peak = 0u64;
        let mut warning = 0u32;
        let mut critical = 0u32;
        for frame in &self.history {
            total += frame.peak_stack_used;
            peak = peak.max(frame.peak_stack_used);
            if frame.peak_stack_used > WARNING_THRESHOLD {
                warning += 1;
            }
            if frame.peak_stack_used > CRITICAL_THRESHOLD {
                critical += 1;
            }
        }
        StackUsageStats {
            average_stack_per_frame: total / frames as u64,
            peak_stack_usage: peak,
            frames_tracked: frames,
            warning_frames: warning,
            critical_frames: critical,
        }
    }
}

/// Stack-or-heap container with a uniform interface
///
/// The inline case stores a [`BoundedArray`] directly; the spilled case is a
/// heap vector reserved to the same capacity. Callers use one API either way.
pub enum StackVec<T: Copy + Default, const N: usize> {
    /// Stack storage, tracked against the frame budget
    Inline(BoundedArray<T, N>),
    /// Heap fallback
    Spilled(Vec<T>),
}

impl<T: Copy + Default, const N: usize> StackVec<T, N> {
    /// Create on the stack, refusing when the frame budget disallows it
    pub fn create_stack(
        name: &str,
        tracker: &mut StackTracker,
        node_id: u32,
    ) -> Result<Self, AllocationError> {
        let bytes = BoundedArray::<T, N>::storage_bytes() as u64;
        if bytes == 0 {
            return Err(AllocationError::InvalidSize);
        }
        if !tracker.admits(bytes) {
            return Err(AllocationError::StackOverflow);
        }
        tracker.track(hash::resource_hash(node_id, 0, name), bytes, node_id);
        Ok(Self::Inline(BoundedArray::new()))
    }

    /// Create on the heap, reserving the full capacity upfront
    pub fn create_heap(_name: &str) -> Result<Self, AllocationError> {
        let mut storage = Vec::new();
        storage
            .try_reserve(N)
            .map_err(|_| AllocationError::HeapOverflow)?;
        Ok(Self::Spilled(storage))
    }

    /// Try the stack first, transparently falling back to the heap
    pub fn request_stack(
        name: &str,
        tracker: &mut StackTracker,
        node_id: u32,
    ) -> Result<Self, AllocationError> {
        match Self::create_stack(name, tracker, node_id) {
            Ok(inline) => Ok(inline),
            Err(AllocationError::StackOverflow) => Self::create_heap(name),
            Err(other) => Err(other),
        }
    }

    /// Return the tracked bytes to the tracker when inline
    pub fn release(self, name: &str, tracker: &mut StackTracker, node_id: u32) {
        if matches!(self, Self::Inline(_)) {
            tracker.release(hash::resource_hash(node_id, 0, name));
        }
    }

    /// Append an element
    pub fn push(&mut self, value: T) -> Result<(), CapacityExceeded> {
        match self {
            Self::Inline(array) => array.push(value),
            Self::Spilled(vec) => {
                vec.push(value);
                Ok(())
            }
        }
    }

    /// Remove all elements
    pub fn clear(&mut self) {
        match self {
            Self::Inline(array) => array.clear(),
            Self::Spilled(vec) => vec.clear(),
        }
    }

    /// Live elements as a slice
    pub fn as_slice(&self) -> &[T] {
        match self {
            Self::Inline(array) => array.as_slice(),
            Self::Spilled(vec) => vec.as_slice(),
        }
    }

    /// Number of live elements
    pub fn len(&self) -> usize {
        match self {
            Self::Inline(array) => array.len(),
            Self::Spilled(vec) => vec.len(),
        }
    }

    /// Whether no elements are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity of the backing storage
    pub fn capacity(&self) -> usize {
        match self {
            Self::Inline(array) => array.capacity(),
            Self::Spilled(vec) => vec.capacity(),
        }
    }

    /// Element at `index`
    pub fn get(&self, index: usize) -> Option<&T> {
        self.as_slice().get(index)
    }

    /// Iterator over live elements
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    /// Where the storage lives
    pub fn location(&self) -> AllocationLocation {
        match self {
            Self::Inline(_) => AllocationLocation::Stack,
            Self::Spilled(_) => AllocationLocation::Heap,
        }
    }
}

impl<T: Copy + Default, const N: usize> std::ops::Index<usize> for StackVec<T, N> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.as_slice()[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracked_usage_equals_live_allocations() {
        let mut tracker = StackTracker::new();
        tracker.begin_frame(0);

        tracker.track(1, 1000, 1);
        tracker.track(2, 2000, 1);
        assert_eq!(tracker.current_usage().total_stack_used, 3000);
        assert_eq!(tracker.current_usage().peak_stack_used, 3000);

        tracker.release(1);
        assert_eq!(tracker.current_usage().total_stack_used, 2000);
        assert!(tracker.current_usage().peak_stack_used >= tracker.current_usage().total_stack_used);
    }

    #[test]
    fn test_end_frame_rolls_history_and_resets() {
        let mut tracker = StackTracker::new();
        tracker.begin_frame(0);
        tracker.track(1, 512, 1);
        tracker.end_frame();

        assert_eq!(tracker.history().len(), 1);
        assert_eq!(tracker.history()[0].peak_stack_used, 512);
        assert_eq!(tracker.current_usage().total_stack_used, 0);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut tracker = StackTracker::new();
        for frame in 0..(MAX_STACK_HISTORY + 10) {
            tracker.begin_frame(frame as u64);
            tracker.end_frame();
        }

        assert_eq!(tracker.history().len(), MAX_STACK_HISTORY);
    }

    #[test]
    fn test_stack_vec_prefers_stack() {
        let mut tracker = StackTracker::new();
        tracker.begin_frame(0);

        let mut writes: StackVec<u64, 32> =
            StackVec::request_stack("writes", &mut tracker, 1).unwrap();
        assert_eq!(writes.location(), AllocationLocation::Stack);

        writes.push(11).unwrap();
        writes.push(22).unwrap();
        assert_eq!(writes.as_slice(), &[11, 22]);
        assert_eq!(tracker.current_usage().total_stack_used, 32 * 8);
    }

    #[test]
    fn test_stack_vec_falls_back_to_heap_over_budget() {
        let mut tracker = StackTracker::new();
        tracker.begin_frame(0);
        // Saturate the frame budget
        tracker.track(99, WARNING_THRESHOLD, 1);

        let fallback: StackVec<u64, 16> =
            StackVec::request_stack("fallback", &mut tracker, 1).unwrap();
        assert_eq!(fallback.location(), AllocationLocation::Heap);
        assert!(fallback.capacity() >= 16);
    }

    #[test]
    fn test_create_stack_over_budget_is_an_error() {
        let mut tracker = StackTracker::new();
        tracker.begin_frame(0);
        tracker.track(99, WARNING_THRESHOLD, 1);

        let refused = StackVec::<u64, 16>::create_stack("refused", &mut tracker, 1);
        assert!(matches!(refused, Err(AllocationError::StackOverflow)));
    }

    #[test]
    fn test_release_returns_bytes_to_tracker() {
        let mut tracker = StackTracker::new();
        tracker.begin_frame(0);

        let scratch: StackVec<u8, 256> =
            StackVec::create_stack("scratch", &mut tracker, 2).unwrap();
        assert_eq!(tracker.current_usage().total_stack_used, 256);

        scratch.release("scratch", &mut tracker, 2);
        assert_eq!(tracker.current_usage().total_stack_used, 0);
    }

    #[test]
    fn test_warning_frames_counted_in_stats() {
        let mut tracker = StackTracker::new();
        tracker.begin_frame(0);
        tracker.track(1, WARNING_THRESHOLD + 1, 1);
        tracker.end_frame();
        tracker.begin_frame(1);
        tracker.track(2, 64, 1);
        tracker.end_frame();

        let stats = tracker.stats();
        assert_eq!(stats.frames_tracked, 2);
        assert_eq!(stats.warning_frames, 1);
        assert_eq!(stats.peak_stack_usage, WARNING_THRESHOLD + 1);
    }
}
