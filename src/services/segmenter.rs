//! Hysteresis state machine that turns evidence into raw trips
//!
//! Starting a trip needs repeated evidence and more accumulated movement
//! than stopping allows, and stopping needs a longer quiet horizon with no
//! flagged samples at all. Noisy low-speed data therefore cannot flap
//! between the two states.
//!
//! A gap longer than the silence timeout is a data outage: any open trip is
//! closed at the last sample before the gap and the evidence is discarded.

use crate::domain::trip::{OpenTrip, RawTrip, TripEndpoint};
use crate::domain::types::{seconds_between, Sample};
use crate::infra::config::SegmentationParams;
use crate::services::jitter::JitterTable;
use crate::services::kinematics::Kinematics;
use crate::services::window::{Evidence, EvidenceWindow, WindowStats};
use tracing::debug;

/// Motion state; a moving vehicle always owns exactly one open trip
#[derive(Debug, Clone, PartialEq)]
pub enum Motion {
    Stopped,
    Moving(OpenTrip),
}

/// Why a trip was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Quiet window below the stop radius
    Stopped,
    /// Gap between samples exceeded the silence timeout
    Silence,
    /// Input ended while moving
    EndOfInput,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Stopped => "stopped",
            CloseReason::Silence => "silence",
            CloseReason::EndOfInput => "end_of_input",
        }
    }
}

/// Single-vehicle trip detector; feed samples strictly in time order
pub struct TripStateMachine<'a> {
    params: &'a SegmentationParams,
    jitter: &'a JitterTable,
    window: EvidenceWindow,
    motion: Motion,
    last: Option<TripEndpoint>,
    closed: Vec<RawTrip>,
}

impl<'a> TripStateMachine<'a> {
    pub fn new(params: &'a SegmentationParams, jitter: &'a JitterTable) -> Self {
        Self {
            params,
            jitter,
            window: EvidenceWindow::new(params.start_window_s, params.stop_window_s),
            motion: Motion::Stopped,
            last: None,
            closed: Vec::new(),
        }
    }

    pub fn motion(&self) -> &Motion {
        &self.motion
    }

    pub fn is_moving(&self) -> bool {
        matches!(self.motion, Motion::Moving(_))
    }

    /// Trips closed so far
    pub fn closed(&self) -> &[RawTrip] {
        &self.closed
    }

    /// Process the sample at `index` and return the window aggregates it produced
    pub fn step(&mut self, index: usize, sample: &Sample, kin: &Kinematics) -> WindowStats {
        let here = TripEndpoint::from_sample(index, sample);

        if let Some(prev) = self.last.take() {
            let gap_s = seconds_between(prev.ts, here.ts);
            if gap_s > self.params.silence_timeout_s as f64 {
                debug!(index = %index, gap_s = %gap_s, "telemetry_silence");
                self.close(prev, CloseReason::Silence);
                self.window.clear();
            }
        }

        let stats = self.window.push(Evidence::new(sample.ts, kin));

        let j = self.jitter.radius_at(sample.ts);
        let r_start = self.params.start_radius_m(j);
        let r_stop = self.params.stop_radius_m(j);

        if self.is_moving() {
            if stats.fused_long < r_stop && stats.flags_short == 0 {
                self.close(here.clone(), CloseReason::Stopped);
            }
        } else if stats.flags_short >= self.params.start_min_flags && stats.fused_short > r_start {
            debug!(
                index = %index,
                ts = %here.ts,
                flags = %stats.flags_short,
                fused_m = format!("{:.1}", stats.fused_short),
                r_start_m = format!("{:.1}", r_start),
                "trip_opened"
            );
            self.motion = Motion::Moving(OpenTrip::new(here.clone()));
        }

        self.last = Some(here);
        stats
    }

    /// Close any open trip at the last sample and return every raw trip
    pub fn finish(mut self) -> Vec<RawTrip> {
        if let Some(last) = self.last.take() {
            self.close(last, CloseReason::EndOfInput);
        }
        self.closed
    }

    fn close(&mut self, end: TripEndpoint, reason: CloseReason) {
        if let Motion::Moving(open) = std::mem::replace(&mut self.motion, Motion::Stopped) {
            let raw = open.close(end);
            debug!(
                start_index = %raw.start.index,
                end_index = %raw.end.index,
                start_ts = %raw.start.ts,
                end_ts = %raw.end.ts,
                reason = %reason.as_str(),
                "trip_closed"
            );
            self.closed.push(raw);
        }
    }
}

/// Run the state machine over a whole batch
pub fn segment(
    samples: &[Sample],
    kinematics: &[Kinematics],
    jitter: &JitterTable,
    params: &SegmentationParams,
) -> Vec<RawTrip> {
    let mut machine = TripStateMachine::new(params, jitter);
    for (index, (sample, kin)) in samples.iter().zip(kinematics).enumerate() {
        machine.step(index, sample, kin);
    }
    machine.finish()
}
