//! Per-trace reducers: peak hold, running average and persistence.

use std::collections::VecDeque;

/// Element-wise maximum since the last reset.
#[derive(Debug, Clone, Default)]
pub struct PeakHold {
    peak: Vec<f64>,
}

impl PeakHold {
    pub fn new(len: usize) -> Self {
        Self {
            peak: vec![0.0; len],
        }
    }

    pub fn reset(&mut self, len: usize) {
        self.peak.clear();
        self.peak.resize(len, 0.0);
    }

    pub fn push(&mut self, frame: &[f64]) -> &[f64] {
        if self.peak.len() != frame.len() {
            self.reset(frame.len());
        }
        for (held, &new) in self.peak.iter_mut().zip(frame) {
            if new > *held {
                *held = new;
            }
        }
        &self.peak
    }
}

/// Mean of the newest frames, up to `depth` of them.
#[derive(Debug, Clone)]
pub struct Averager {
    depth: usize,
    frames: VecDeque<Vec<f64>>,
    filled: usize,
}

impl Averager {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            frames: VecDeque::new(),
            filled: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Fills the ring with copies of `frame`; the mean still starts from the
    /// next pushed frame.
    pub fn prime(&mut self, frame: &[f64]) {
        self.frames = std::iter::repeat_n(frame.to_vec(), self.depth).collect();
        self.filled = 0;
    }

    pub fn push(&mut self, frame: Vec<f64>) -> Vec<f64> {
        if self.depth == 1 {
            return frame;
        }
        let len = frame.len();
        self.frames.push_front(frame);
        self.frames.truncate(self.depth);
        self.filled = (self.filled + 1).min(self.depth);

        let used: Vec<&Vec<f64>> = self
            .frames
            .iter()
            .take(self.filled)
            .filter(|f| f.len() == len)
            .collect();
        let count = used.len().max(1) as f64;
        (0..len)
            .map(|i| used.iter().map(|f| f[i]).sum::<f64>() / count)
            .collect()
    }
}

/// Keeps the newest frames and shows them end to end, newest first.
#[derive(Debug, Clone)]
pub struct Persistence {
    depth: usize,
    frames: VecDeque<Vec<f64>>,
    shown: usize,
}

impl Persistence {
    pub fn new(depth: usize, len: usize) -> Self {
        let depth = depth.max(1);
        Self {
            depth,
            frames: std::iter::repeat_n(vec![0.0; len], depth).collect(),
            shown: 0,
        }
    }

    /// Frames in the current display, i.e. how many times to tile the x axis.
    pub fn shown(&self) -> usize {
        self.shown + 1
    }

    pub fn push(&mut self, frame: Vec<f64>) -> Vec<f64> {
        self.frames.push_front(frame);
        self.frames.truncate(self.depth);
        self.frames
            .iter()
            .take(self.shown + 1)
            .flat_map(|f| f.iter().copied())
            .collect()
    }

    /// Called once per tick after every channel has been pushed.
    pub fn advance(&mut self) {
        self.shown = (self.shown + 1).min(self.depth - 1);
    }
}
