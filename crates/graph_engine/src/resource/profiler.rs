//! Per-frame, per-node resource profiling
//!
//! Tracks every allocation and release a node performs during a frame,
//! aggregated over a rolling window (default 120 frames, about two seconds
//! at 60 Hz). Statistics can be exported as plain text or JSON.

use crate::foundation::time::Stopwatch;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Write as _;

/// Default rolling window length in frames
pub const DEFAULT_FRAME_HISTORY: usize = 120;

/// Where an allocation was placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AllocationLocation {
    /// CPU stack
    Stack,
    /// CPU heap
    Heap,
    /// GPU device memory
    Device,
}

/// Per-node allocation statistics for a single frame
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeStats {
    /// Node instance id
    pub node_id: u32,
    /// Node instance name
    pub node_name: String,
    /// Count of stack allocations
    pub stack_allocations: u32,
    /// Count of heap allocations
    pub heap_allocations: u32,
    /// Count of device allocations
    pub device_allocations: u32,
    /// Bytes placed on the stack
    pub stack_bytes_used: u64,
    /// Bytes placed on the heap
    pub heap_bytes_used: u64,
    /// Bytes placed in device memory
    pub device_bytes_used: u64,
    /// Allocations served from aliased memory
    pub aliased_allocations: u32,
    /// Bytes saved by aliasing
    pub bytes_saved_via_aliasing: u64,
    /// Count of releases
    pub releases: u32,
    /// Bytes released
    pub released_bytes: u64,
}

impl NodeStats {
    /// Total bytes across all locations
    pub fn total_bytes(&self) -> u64 {
        self.stack_bytes_used + self.heap_bytes_used + self.device_bytes_used
    }

    /// Total allocation count across all locations
    pub fn total_allocations(&self) -> u32 {
        self.stack_allocations + self.heap_allocations + self.device_allocations
    }

    /// Percentage of device bytes served from aliased memory
    pub fn aliasing_efficiency(&self) -> f32 {
        if self.device_bytes_used > 0 {
            100.0 * self.bytes_saved_via_aliasing as f32
                / (self.device_bytes_used + self.bytes_saved_via_aliasing) as f32
        } else {
            0.0
        }
    }

    fn absorb_allocation(&mut self, location: AllocationLocation, bytes: u64, was_aliased: bool) {
        match location {
            AllocationLocation::Stack => {
                self.stack_allocations += 1;
                self.stack_bytes_used += bytes;
            }
            AllocationLocation::Heap => {
                self.heap_allocations += 1;
                self.heap_bytes_used += bytes;
            }
            AllocationLocation::Device => {
                self.device_allocations += 1;
                self.device_bytes_used += bytes;
            }
        }
        if was_aliased {
            self.aliased_allocations += 1;
            self.bytes_saved_via_aliasing += bytes;
        }
    }
}

/// Aggregated statistics for one frame
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameStats {
    /// Frame number being described
    pub frame_number: u64,
    /// Totals across all nodes
    pub totals: NodeStats,
    /// Per-node breakdown, in first-allocation order
    pub node_stats: Vec<NodeStats>,
    /// Wall-clock frame duration in milliseconds
    pub frame_duration_ms: f64,
    /// Peak concurrent stack bytes observed during the frame
    pub peak_stack_bytes: u64,
    /// Peak concurrent heap bytes observed during the frame
    pub peak_heap_bytes: u64,
    /// Peak concurrent device bytes observed during the frame
    pub peak_device_bytes: u64,
}

impl FrameStats {
    fn empty(frame_number: u64) -> Self {
        Self {
            frame_number,
            ..Self::default()
        }
    }

    fn node_entry(&mut self, node_id: u32, node_name: &str) -> &mut NodeStats {
        if let Some(index) = self
            .node_stats
            .iter()
            .position(|stats| stats.node_id == node_id)
        {
            return &mut self.node_stats[index];
        }
        self.node_stats.push(NodeStats {
            node_id,
            node_name: node_name.to_string(),
            ..NodeStats::default()
        });
        self.node_stats.last_mut().unwrap()
    }
}

/// Rolling-window resource profiler
pub struct ResourceProfiler {
    max_frame_history: usize,
    history: VecDeque<FrameStats>,
    current: Option<FrameStats>,
    frame_watch: Stopwatch,
    // Running concurrent byte counts, for peak tracking
    live_stack: u64,
    live_heap: u64,
    live_device: u64,
}

impl Default for ResourceProfiler {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_HISTORY)
    }
}

impl ResourceProfiler {
    /// Create a profiler keeping at most `max_frame_history` frames
    pub fn new(max_frame_history: usize) -> Self {
        Self {
            max_frame_history,
            history: VecDeque::new(),
            current: None,
            frame_watch: Stopwatch::new(),
            live_stack: 0,
            live_heap: 0,
            live_device: 0,
        }
    }

    /// Begin tracking a new frame
    pub fn begin_frame(&mut self, frame_number: u64) {
        self.current = Some(FrameStats::empty(frame_number));
        self.frame_watch.restart();
    }

    /// Finish the current frame and roll it into the history
    pub fn end_frame(&mut self) {
        let Some(mut frame) = self.current.take() else {
            return;
        };
        self.frame_watch.stop();
        frame.frame_duration_ms = self.frame_watch.elapsed_millis();
        self.history.push_back(frame);
        while self.history.len() > self.max_frame_history {
            self.history.pop_front();
        }
    }

    /// Record an allocation performed by a node
    pub fn record_allocation(
        &mut self,
        node_id: u32,
        node_name: &str,
        location: AllocationLocation,
        bytes: u64,
        was_aliased: bool,
    ) {
        match location {
            AllocationLocation::Stack => self.live_stack += bytes,
            AllocationLocation::Heap => self.live_heap += bytes,
            AllocationLocation::Device => {
                if !was_aliased {
                    self.live_device += bytes;
                }
            }
        }
        let (live_stack, live_heap, live_device) =
            (self.live_stack, self.live_heap, self.live_device);
        let Some(frame) = self.current.as_mut() else {
            return;
        };
        frame
            .node_entry(node_id, node_name)
            .absorb_allocation(location, bytes, was_aliased);
        frame.totals.absorb_allocation(location, bytes, was_aliased);
        frame.peak_stack_bytes = frame.peak_stack_bytes.max(live_stack);
        frame.peak_heap_bytes = frame.peak_heap_bytes.max(live_heap);
        frame.peak_device_bytes = frame.peak_device_bytes.max(live_device);
    }

    /// Record a release performed by a node
    pub fn record_release(&mut self, node_id: u32, node_name: &str, bytes: u64) {
        self.live_stack = self.live_stack.saturating_sub(bytes);
        let Some(frame) = self.current.as_mut() else {
            return;
        };
        let entry = frame.node_entry(node_id, node_name);
        entry.releases += 1;
        entry.released_bytes += bytes;
        frame.totals.releases += 1;
        frame.totals.released_bytes += bytes;
    }

    /// Frame number currently being recorded, if a frame is open
    pub fn current_frame(&self) -> Option<u64> {
        self.current.as_ref().map(|frame| frame.frame_number)
    }

    /// Statistics for a specific frame; missing frames yield empty stats
    pub fn get_frame_stats(&self, frame_number: u64) -> FrameStats {
        if let Some(frame) = self
            .current
            .as_ref()
            .filter(|frame| frame.frame_number == frame_number)
        {
            return frame.clone();
        }
        self.history
            .iter()
            .find(|frame| frame.frame_number == frame_number)
            .cloned()
            .unwrap_or_else(|| FrameStats::empty(frame_number))
    }

    /// Number of completed frames currently held
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Rolling average frames per second over the history window
    pub fn average_fps(&self) -> f64 {
        let total_ms: f64 = self
            .history
            .iter()
            .map(|frame| frame.frame_duration_ms)
            .sum();
        if total_ms > 0.0 {
            self.history.len() as f64 / (total_ms / 1000.0)
        } else {
            0.0
        }
    }

    /// Render one frame's statistics as a text report
    pub fn export_text(&self, frame_number: u64) -> String {
        let frame = self.get_frame_stats(frame_number);
        let mut out = String::new();
        let _ = writeln!(out, "=== frame {} ===", frame.frame_number);
        let _ = writeln!(
            out,
            "duration {:.3} ms, peaks: stack {} B, heap {} B, device {} B",
            frame.frame_duration_ms,
            frame.peak_stack_bytes,
            frame.peak_heap_bytes,
            frame.peak_device_bytes
        );
        for node in &frame.node_stats {
            let _ = writeln!(
                out,
                "  {:<24} allocs {:>3} ({} stack / {} heap / {} device)  bytes {:>10}  aliased {} ({} B saved)",
                node.node_name,
                node.total_allocations(),
                node.stack_allocations,
                node.heap_allocations,
                node.device_allocations,
                node.total_bytes(),
                node.aliased_allocations,
                node.bytes_saved_via_aliasing,
            );
        }
        let _ = writeln!(
            out,
            "  totals: {} allocations, {} bytes",
            frame.totals.total_allocations(),
            frame.totals.total_bytes()
        );
        out
    }

    /// Render one frame's statistics as JSON
    pub fn export_json(&self, frame_number: u64) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.get_frame_stats(frame_number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_node_and_total_accounting() {
        let mut profiler = ResourceProfiler::default();
        profiler.begin_frame(0);
        profiler.record_allocation(1, "producer", AllocationLocation::Device, 4096, false);
        profiler.record_allocation(1, "producer", AllocationLocation::Heap, 128, false);
        profiler.record_allocation(2, "consumer", AllocationLocation::Device, 2048, true);
        profiler.end_frame();

        let stats = profiler.get_frame_stats(0);
        assert_eq!(stats.node_stats.len(), 2);
        assert_eq!(stats.totals.device_bytes_used, 6144);
        assert_eq!(stats.totals.heap_bytes_used, 128);
        assert_eq!(stats.totals.aliased_allocations, 1);
        assert_eq!(stats.totals.bytes_saved_via_aliasing, 2048);

        let producer = &stats.node_stats[0];
        assert_eq!(producer.node_name, "producer");
        assert_eq!(producer.total_allocations(), 2);
    }

    #[test]
    fn test_missing_frames_yield_empty_stats() {
        let profiler = ResourceProfiler::default();
        let stats = profiler.get_frame_stats(99);

        assert_eq!(stats.frame_number, 99);
        assert!(stats.node_stats.is_empty());
        assert_eq!(stats.totals.total_bytes(), 0);
    }

    #[test]
    fn test_rolling_window_drops_oldest() {
        let mut profiler = ResourceProfiler::new(3);
        for frame in 0..5 {
            profiler.begin_frame(frame);
            profiler.record_allocation(1, "node", AllocationLocation::Heap, 1, false);
            profiler.end_frame();
        }

        assert_eq!(profiler.history_len(), 3);
        assert!(profiler.get_frame_stats(0).node_stats.is_empty());
        assert!(profiler.get_frame_stats(1).node_stats.is_empty());
        assert_eq!(profiler.get_frame_stats(4).node_stats.len(), 1);
    }

    #[test]
    fn test_aliased_device_allocations_do_not_raise_peak() {
        let mut profiler = ResourceProfiler::default();
        profiler.begin_frame(0);
        profiler.record_allocation(1, "a", AllocationLocation::Device, 1000, false);
        profiler.record_allocation(2, "b", AllocationLocation::Device, 800, true);
        profiler.end_frame();

        let stats = profiler.get_frame_stats(0);
        assert_eq!(stats.peak_device_bytes, 1000);
        assert_eq!(stats.totals.device_bytes_used, 1800);
    }

    #[test]
    fn test_export_json_contains_node_names() {
        let mut profiler = ResourceProfiler::default();
        profiler.begin_frame(7);
        profiler.record_allocation(1, "shadow_pass", AllocationLocation::Device, 64, false);
        profiler.end_frame();

        let json = profiler.export_json(7).unwrap();
        assert!(json.contains("shadow_pass"));
        assert!(json.contains("\"frame_number\": 7"));
    }
}
