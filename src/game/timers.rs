use tokio::task::{AbortHandle, JoinHandle};

/// Every pending task of the current question
///
/// The countdown and the auto-advance are tracked separately so either can
/// be cancelled alone; `cancel_all` runs before every new question and at
/// game end. `work` is the in-flight generation or evaluation, which the
/// caller that started it awaits through its own `JoinHandle`.
#[derive(Default)]
pub struct TimerSet {
    countdown: Option<JoinHandle<()>>,
    advance: Option<JoinHandle<()>>,
    playback: Option<JoinHandle<()>>,
    work: Option<AbortHandle>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_countdown(&mut self, handle: JoinHandle<()>) {
        abort(self.countdown.replace(handle));
    }

    pub fn set_advance(&mut self, handle: JoinHandle<()>) {
        abort(self.advance.replace(handle));
    }

    pub fn set_playback(&mut self, handle: JoinHandle<()>) {
        abort(self.playback.replace(handle));
    }

    pub fn set_work(&mut self, handle: AbortHandle) {
        if let Some(previous) = self.work.replace(handle) {
            previous.abort();
        }
    }

    pub fn cancel_countdown(&mut self) {
        abort(self.countdown.take());
    }

    /// Forget the auto-advance handle without aborting it
    ///
    /// Called from inside the advance task before it starts the next
    /// question, which would otherwise cancel the task mid-way.
    pub fn release_advance(&mut self) {
        self.advance.take();
    }

    pub fn cancel_all(&mut self) {
        abort(self.countdown.take());
        abort(self.advance.take());
        abort(self.playback.take());
        if let Some(work) = self.work.take() {
            work.abort();
        }
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn abort(handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        handle.abort();
    }
}
