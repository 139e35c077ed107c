use log::debug;

/// Hardware or simulated watchdog that resets the device when not fed in time.
pub trait Watchdog {
    fn feed(&mut self);
}

/// Coarse progress points of a wake cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Context,
    Battery,
    Fetch,
    Render,
    Sleep,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Context => "context",
            Self::Battery => "battery",
            Self::Fetch => "fetch",
            Self::Render => "render",
            Self::Sleep => "sleep",
        }
    }
}

/// Feeds the watchdog between stages and remembers how far the cycle got.
pub struct LivenessGuard<'a> {
    watchdog: &'a mut dyn Watchdog,
    reached: Vec<Stage>,
}

impl<'a> LivenessGuard<'a> {
    /// The watchdog must already be armed; the guard only feeds it.
    pub fn new(watchdog: &'a mut dyn Watchdog) -> Self {
        Self {
            watchdog,
            reached: Vec::new(),
        }
    }

    pub fn checkpoint(&mut self, stage: Stage) {
        debug!("watchdog fed entering {} stage", stage.as_str());
        self.watchdog.feed();
        self.reached.push(stage);
    }

    pub fn reached(&self) -> &[Stage] {
        &self.reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingWatchdog {
        feeds: usize,
    }

    impl Watchdog for CountingWatchdog {
        fn feed(&mut self) {
            self.feeds += 1;
        }
    }

    #[test]
    fn every_checkpoint_feeds_once() {
        let mut watchdog = CountingWatchdog::default();
        {
            let mut guard = LivenessGuard::new(&mut watchdog);
            guard.checkpoint(Stage::Context);
            guard.checkpoint(Stage::Fetch);
            assert_eq!(guard.reached(), &[Stage::Context, Stage::Fetch]);
        }
        assert_eq!(watchdog.feeds, 2);
    }
}
