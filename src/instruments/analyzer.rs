//! Pieces shared by the spectrum analyzers: the frequency/wavelength span with
//! its start/stop/center/span/RBW/points reconciliation, and the spectrogram
//! history.

use crate::util::units::DbLaw;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;

/// A bound that is either absolute or a fraction of the current span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Limit {
    Fixed(f64),
    /// `span / divisor`
    PerSpan(f64),
}

impl Limit {
    pub fn resolve(self, span: f64) -> f64 {
        match self {
            Limit::Fixed(value) => value,
            Limit::PerSpan(divisor) => span / divisor,
        }
    }
}

/// Axis limits of one analyzer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpanLimits {
    pub floor: f64,
    pub ceiling: f64,
    /// Separation forced between start and stop when an edit crosses them.
    pub nudge: f64,
    pub rbw_min: Limit,
    pub rbw_max: Limit,
    pub points_min: Limit,
    pub points_max: Limit,
}

/// Which control the user touched last.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpanEdit {
    Start(f64),
    Stop(f64),
    Center(f64),
    Span(f64),
    Rbw(f64),
    Points(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Span {
    pub start: f64,
    pub stop: f64,
    pub rbw: f64,
    pub points: usize,
}

impl Default for Span {
    fn default() -> Self {
        Self {
            start: 0.0,
            stop: 10.0,
            rbw: 0.01,
            points: 1000,
        }
    }
}

// `clamp` panics on inverted bounds; the lower bound wins here.
fn bounded(value: f64, min: f64, max: f64) -> f64 {
    value.min(max).max(min)
}

impl Span {
    pub fn center(&self) -> f64 {
        (self.start + self.stop) / 2.0
    }

    pub fn width(&self) -> f64 {
        self.stop - self.start
    }

    pub fn axis(&self) -> Vec<f64> {
        crate::util::signal::linspace(self.start, self.stop, self.points)
    }

    /// Applies one edit and re-derives the dependent controls.
    pub fn apply(&mut self, edit: SpanEdit, limits: &SpanLimits) {
        match edit {
            SpanEdit::Start(start) => {
                let start = bounded(start, limits.floor, limits.ceiling);
                self.start = if start >= self.stop {
                    self.stop - limits.nudge
                } else {
                    start
                };
                self.keep_inside(limits);
                self.rederive_points(self.rbw, limits);
            }
            SpanEdit::Stop(stop) => {
                let stop = bounded(stop, limits.floor, limits.ceiling);
                self.stop = if stop <= self.start {
                    self.start + limits.nudge
                } else {
                    stop
                };
                self.keep_inside(limits);
                self.rederive_points(self.rbw, limits);
            }
            SpanEdit::Center(center) => {
                self.recenter(center, self.width(), limits);
                self.rederive_points(self.rbw, limits);
            }
            SpanEdit::Span(span) => {
                self.recenter(self.center(), span, limits);
                self.rederive_points(self.rbw, limits);
            }
            SpanEdit::Rbw(rbw) => self.rederive_points(rbw, limits),
            SpanEdit::Points(points) => self.rederive_rbw(points, limits),
        }
    }

    /// Replays loaded values as edits. A saved RBW wins over saved points;
    /// points are used only when the RBW is unusable.
    pub fn normalized(mut self, limits: &SpanLimits) -> Self {
        if !(self.start.is_finite() && self.stop.is_finite()) {
            self.start = limits.floor;
            self.stop = limits.ceiling;
        }
        let (stop, rbw, points) = (self.stop, self.rbw, self.points);
        self.apply(SpanEdit::Start(self.start), limits);
        self.apply(SpanEdit::Stop(stop), limits);
        let last = if rbw.is_finite() && rbw > 0.0 {
            SpanEdit::Rbw(rbw)
        } else if points > 0 {
            SpanEdit::Points(points)
        } else {
            SpanEdit::Rbw(limits.rbw_max.resolve(self.width()))
        };
        self.apply(last, limits);
        self
    }

    fn recenter(&mut self, center: f64, span: f64, limits: &SpanLimits) {
        let center = bounded(center, limits.floor, limits.ceiling);
        let half = span.abs() / 2.0;
        self.start = (center - half).max(limits.floor);
        self.stop = (center + half).min(limits.ceiling);
        if self.stop <= self.start {
            self.stop = self.start + limits.nudge;
        }
        self.keep_inside(limits);
    }

    // A nudge at either end of the range pushes the pair back inside it.
    fn keep_inside(&mut self, limits: &SpanLimits) {
        if self.stop > limits.ceiling {
            self.stop = limits.ceiling;
            self.start = self.start.min(limits.ceiling - limits.nudge);
        }
        if self.start < limits.floor {
            self.start = limits.floor;
            self.stop = self.stop.max(limits.floor + limits.nudge);
        }
    }

    fn rederive_points(&mut self, rbw: f64, limits: &SpanLimits) {
        let span = self.width();
        self.rbw = bounded(
            rbw,
            limits.rbw_min.resolve(span),
            limits.rbw_max.resolve(span),
        );
        self.points = ((span / self.rbw).floor() as usize).max(1);
    }

    fn rederive_rbw(&mut self, points: usize, limits: &SpanLimits) {
        let span = self.width();
        let points = bounded(
            points as f64,
            limits.points_min.resolve(span),
            limits.points_max.resolve(span),
        );
        self.points = (points.floor() as usize).max(1);
        self.rbw = span / self.points as f64;
    }
}

/// Vertical display settings shared by the analyzers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub db: bool,
    pub db_per_div: f64,
    pub ref_level: f64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            db: true,
            db_per_div: 10.0,
            ref_level: 10.0,
        }
    }
}

impl DisplayConfig {
    /// Visible vertical range.
    pub fn range(&self) -> (f64, f64) {
        if self.db {
            (self.ref_level - 10.0 * self.db_per_div, self.ref_level)
        } else {
            (0.0, 1.0)
        }
    }

    pub fn render(&self, trace: &[f64], law: DbLaw) -> Vec<f64> {
        if self.db {
            trace.iter().map(|&v| law.apply(v)).collect()
        } else {
            trace.to_vec()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpectrogramRow {
    /// Seconds since the history was reset.
    pub elapsed: f64,
    pub values: Vec<f64>,
}

/// Rolling spectrogram: the newest `capacity` traces with their timestamps.
#[derive(Debug, Clone)]
pub struct SpectrogramHistory {
    rows: VecDeque<SpectrogramRow>,
    capacity: usize,
    started: Instant,
}

impl SpectrogramHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            rows: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            started: Instant::now(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &SpectrogramRow> {
        self.rows.iter()
    }

    pub fn reset(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.rows.clear();
        self.started = Instant::now();
    }

    /// Appends a row, returning the evicted oldest one when full.
    pub fn push(&mut self, values: Vec<f64>) -> Option<SpectrogramRow> {
        self.push_at(self.started.elapsed().as_secs_f64(), values)
    }

    fn push_at(&mut self, elapsed: f64, values: Vec<f64>) -> Option<SpectrogramRow> {
        let evicted = if self.rows.len() == self.capacity {
            self.rows.pop_front()
        } else {
            None
        };
        self.rows.push_back(SpectrogramRow { elapsed, values });
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ESA: SpanLimits = SpanLimits {
        floor: 0.0,
        ceiling: 20_000.0,
        nudge: 1e-3,
        rbw_min: Limit::PerSpan(1e6),
        rbw_max: Limit::PerSpan(10.0),
        points_min: Limit::PerSpan(2000.0),
        points_max: Limit::PerSpan(1e-4),
    };

    const OSA: SpanLimits = SpanLimits {
        floor: 700.0,
        ceiling: 1700.0,
        nudge: 1e-2,
        rbw_min: Limit::Fixed(0.01),
        rbw_max: Limit::Fixed(2.0),
        points_min: Limit::PerSpan(2.0),
        points_max: Limit::PerSpan(0.01),
    };

    #[test]
    fn start_past_stop_is_nudged() {
        let mut span = Span::default();
        span.apply(SpanEdit::Start(12.0), &ESA);
        assert!((span.start - (10.0 - 1e-3)).abs() < 1e-12);
        assert!(span.rbw <= span.width() / 10.0 + 1e-15);
        assert!(span.points >= 1);
    }

    #[test]
    fn center_span_round_trip() {
        let mut span = Span::default();
        span.apply(SpanEdit::Center(100.0), &ESA);
        span.apply(SpanEdit::Span(20.0), &ESA);
        assert!((span.start - 90.0).abs() < 1e-9);
        assert!((span.stop - 110.0).abs() < 1e-9);
        span.apply(SpanEdit::Start(span.start), &ESA);
        span.apply(SpanEdit::Stop(span.stop), &ESA);
        assert!((span.center() - 100.0).abs() < 1e-9);
        assert!((span.width() - 20.0).abs() < 1e-9);
        assert_eq!(span.points, 2000);
    }

    #[test]
    fn span_is_cut_at_the_floor() {
        let mut span = Span::default();
        span.apply(SpanEdit::Span(100.0), &ESA);
        assert_eq!(span.start, 0.0);
        assert!((span.stop - 55.0).abs() < 1e-9);
        assert!((span.center() - 27.5).abs() < 1e-9);
    }

    #[test]
    fn rbw_and_points_follow_each_other() {
        let mut span = Span::default();
        span.apply(SpanEdit::Rbw(0.1), &ESA);
        assert_eq!(span.points, 100);
        span.apply(SpanEdit::Points(500), &ESA);
        assert!((span.rbw - 0.02).abs() < 1e-12);
        span.apply(SpanEdit::Rbw(1e3), &ESA);
        assert!((span.rbw - 1.0).abs() < 1e-12);
        assert_eq!(span.points, 10);
    }

    #[test]
    fn osa_limits_apply() {
        let mut span = Span {
            start: 700.0,
            stop: 1700.0,
            rbw: 1.0,
            points: 1000,
        };
        span.apply(SpanEdit::Rbw(5.0), &OSA);
        assert_eq!(span.rbw, 2.0);
        assert_eq!(span.points, 500);
        span.apply(SpanEdit::Points(10), &OSA);
        assert_eq!(span.points, 500);
        span.apply(SpanEdit::Center(1690.0), &OSA);
        assert_eq!(span.stop, 1700.0);
        span.apply(SpanEdit::Stop(600.0), &OSA);
        assert!(span.stop > span.start);
    }

    #[test]
    fn edits_never_leave_the_instrument_range() {
        let mut span = Span {
            start: 700.0,
            stop: 1700.0,
            rbw: 1.0,
            points: 1000,
        };
        span.apply(SpanEdit::Span(0.0), &OSA);
        span.apply(SpanEdit::Center(2500.0), &OSA);
        // The zero-width span became one nudge wide; its center is pinned
        // so the right edge sits on the ceiling.
        assert_eq!(span.stop, 1700.0);
        assert!((span.start - (1700.0 - 0.5e-2)).abs() < 1e-9);

        span.apply(SpanEdit::Center(100.0), &OSA);
        assert_eq!(span.start, 700.0);
        assert!(span.stop > span.start && span.stop <= 700.0 + 1e-2 + 1e-9);

        let mut span = Span {
            start: 0.0,
            stop: 0.0 + 1e-3,
            rbw: 1e-4,
            points: 10,
        };
        span.apply(SpanEdit::Stop(-5.0), &ESA);
        assert!(span.start >= ESA.floor && span.stop > span.start);
        span.apply(SpanEdit::Start(30_000.0), &ESA);
        assert!(span.stop <= ESA.ceiling && span.start < span.stop);
    }

    #[test]
    fn garbage_span_normalizes() {
        let span = Span {
            start: f64::NAN,
            stop: 5.0,
            rbw: -1.0,
            points: 0,
        }
        .normalized(&OSA);
        assert_eq!((span.start, span.stop), (700.0, 1700.0));
        assert!(span.points >= 1);
        assert!(span.rbw >= 0.01 && span.rbw <= 2.0);
    }

    #[test]
    fn saved_points_stand_in_for_a_missing_rbw() {
        let span = Span {
            start: 700.0,
            stop: 1700.0,
            rbw: f64::NAN,
            points: 2000,
        }
        .normalized(&OSA);
        assert_eq!(span.points, 2000);
        assert!((span.rbw - 0.5).abs() < 1e-12);

        let span = Span {
            start: 700.0,
            stop: 1700.0,
            rbw: 0.25,
            points: 2000,
        }
        .normalized(&OSA);
        assert_eq!(span.points, 4000);
    }

    #[test]
    fn history_evicts_oldest() {
        let mut history = SpectrogramHistory::new(2);
        assert!(history.push_at(0.0, vec![1.0]).is_none());
        assert!(history.push_at(0.1, vec![2.0]).is_none());
        let evicted = history.push_at(0.2, vec![3.0]).unwrap();
        assert_eq!(evicted.values, vec![1.0]);
        assert_eq!(history.len(), 2);
        let stamps: Vec<f64> = history.rows().map(|r| r.elapsed).collect();
        assert_eq!(stamps, vec![0.1, 0.2]);
        history.reset(3);
        assert!(history.is_empty());
        assert_eq!(history.capacity(), 3);
    }

    #[test]
    fn db_display_range() {
        let display = DisplayConfig::default();
        assert_eq!(display.range(), (-90.0, 10.0));
        let rendered = display.render(&[1.0, 10.0], DbLaw::Power);
        assert!((rendered[1] - 10.0).abs() < 1e-12);
    }
}
