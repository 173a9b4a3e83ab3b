//! Frame timing
//!
//! Wall nodes advance in lockstep, so a node's frame time is the cluster's
//! frame time as seen from that node. The scheduler keeps a short history of
//! frame times for statistics and paces the loop to the target rate.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Frames kept for statistics
const MAX_HISTORY: usize = 120;

/// Where the node is within the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Between frames
    Idle,
    /// Receiving messages and running the sync round
    Synchronizing,
    /// Updating tiles and drawing
    Rendering,
    /// Waiting on the swap barrier
    WaitingForSwap,
    /// Frame was swapped
    Presented,
}

/// Frame scheduler - frame numbering, timing and pacing
#[derive(Debug)]
pub struct FrameScheduler {
    target_fps: u32,
    frame_budget: Duration,
    frame_number: u64,
    state: FrameState,
    frame_start: Option<Instant>,
    last_presentation: Option<Instant>,
    frame_times: VecDeque<Duration>,
}

impl FrameScheduler {
    /// Create a new frame scheduler, `0` disables pacing
    pub fn new(target_fps: u32) -> Self {
        Self {
            target_fps,
            frame_budget: Self::budget_for(target_fps),
            frame_number: 0,
            state: FrameState::Idle,
            frame_start: None,
            last_presentation: None,
            frame_times: VecDeque::with_capacity(MAX_HISTORY),
        }
    }

    fn budget_for(target_fps: u32) -> Duration {
        if target_fps > 0 {
            Duration::from_secs_f64(1.0 / target_fps as f64)
        } else {
            Duration::from_millis(16)
        }
    }

    /// Begin a new frame, returns its number
    pub fn begin_frame(&mut self) -> u64 {
        self.frame_start = Some(Instant::now());
        self.frame_number += 1;
        self.state = FrameState::Synchronizing;
        self.frame_number
    }

    pub fn set_state(&mut self, state: FrameState) {
        self.state = state;
    }

    /// The frame was swapped
    pub fn end_frame(&mut self) {
        self.record_presentation(Instant::now());
    }

    fn record_presentation(&mut self, presented_at: Instant) {
        let since = self.last_presentation.or(self.frame_start);
        if let Some(since) = since {
            self.record_frame_time(presented_at.saturating_duration_since(since));
        }
        self.last_presentation = Some(presented_at);
        self.state = FrameState::Presented;
    }

    fn record_frame_time(&mut self, frame_time: Duration) {
        if self.frame_times.len() >= MAX_HISTORY {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(frame_time);
    }

    /// Sleep out what is left of the frame budget
    pub fn pace(&mut self) {
        if self.target_fps == 0 {
            return;
        }
        let remaining = self.time_remaining();
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
        self.state = FrameState::Idle;
    }

    /// Time left in the current frame's budget
    pub fn time_remaining(&self) -> Duration {
        match self.frame_start {
            Some(start) => self.frame_budget.saturating_sub(start.elapsed()),
            None => Duration::ZERO,
        }
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    pub fn frame_budget(&self) -> Duration {
        self.frame_budget
    }

    /// Get average frame time
    pub fn average_frame_time(&self) -> Duration {
        if self.frame_times.is_empty() {
            return self.frame_budget;
        }
        let total: Duration = self.frame_times.iter().sum();
        total / self.frame_times.len() as u32
    }

    /// Get current FPS (based on recent frames)
    pub fn current_fps(&self) -> f64 {
        let avg = self.average_frame_time();
        if avg.as_secs_f64() > 0.0 {
            1.0 / avg.as_secs_f64()
        } else {
            0.0
        }
    }

    pub fn frame_time_percentile(&self, percentile: f64) -> Duration {
        if self.frame_times.is_empty() {
            return self.frame_budget;
        }

        let mut sorted: Vec<_> = self.frame_times.iter().cloned().collect();
        sorted.sort();

        let index = ((percentile / 100.0) * (sorted.len() - 1) as f64) as usize;
        sorted[index.min(sorted.len() - 1)]
    }

    pub fn frame_time_99th(&self) -> Duration {
        self.frame_time_percentile(99.0)
    }

    /// Average frame time within 10% of the budget
    pub fn hitting_target(&self) -> bool {
        if self.target_fps == 0 {
            return true;
        }
        self.average_frame_time() <= self.frame_budget * 11 / 10
    }

    /// One line summary for the statistics overlay
    pub fn statistics(&self) -> String {
        format!(
            "frame {}  {:.1} fps  p99 {:.1} ms",
            self.frame_number,
            self.current_fps(),
            self.frame_time_99th().as_secs_f64() * 1000.0
        )
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(60)
    }
}
