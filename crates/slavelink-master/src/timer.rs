use std::time::{Duration, Instant};

/// The three protocol timers. Only one runs at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    FrameBoundary,
    ConvertDelay,
    RespondTimeout,
}

/// Single-shot timer. Starting it again supersedes whatever was running.
#[derive(Debug, Default, Clone, Copy)]
pub struct OneShot {
    armed: Option<(TimerKind, Instant)>,
}

impl OneShot {
    pub fn start(&mut self, kind: TimerKind, now: Instant, after: Duration) {
        self.armed = Some((kind, now + after));
    }

    pub fn cancel(&mut self) {
        self.armed = None;
    }

    pub fn kind(&self) -> Option<TimerKind> {
        self.armed.map(|(kind, _)| kind)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.armed.map(|(_, at)| at)
    }

    /// Disarm and return the kind if the deadline has passed.
    pub fn fire(&mut self, now: Instant) -> Option<TimerKind> {
        match self.armed {
            Some((kind, at)) if now >= at => {
                self.armed = None;
                Some(kind)
            }
            _ => None,
        }
    }
}
