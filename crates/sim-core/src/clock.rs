//! Heartbeat clock pacing the run loop.
//!
//! A background heartbeat thread raises a pending tick every period while
//! the clock is running. The run loop consumes ticks through
//! [`Clock::wait_for_next_tick`]; at most one tick is ever pending, so a
//! slow consumer loses surplus ticks instead of bursting. A zero period
//! means unthrottled: waits return immediately while running.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Clock control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockState {
    /// No ticks; waiters are released with [`Interrupted`].
    Stopped,
    /// Ticks flow every period.
    Running,
    /// Ticks withheld except for explicit single steps.
    Paused,
}

/// A tick wait ended because the clock stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("clock wait interrupted")]
pub struct Interrupted;

#[derive(Debug)]
struct Inner {
    state: ClockState,
    pending: bool,
    period: Duration,
    ticks: u64,
}

#[derive(Debug)]
struct Shared {
    inner: Mutex<Inner>,
    tick: Condvar,
    control: Condvar,
}

/// Tick source shared by the run loop and control threads.
#[derive(Debug)]
pub struct Clock {
    shared: Arc<Shared>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl Clock {
    /// Stopped clock with the given tick period.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ClockState::Stopped,
                    pending: false,
                    period,
                    ticks: 0,
                }),
                tick: Condvar::new(),
                control: Condvar::new(),
            }),
            heartbeat: Mutex::new(None),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ClockState {
        self.shared.inner.lock().state
    }

    /// Current tick period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.shared.inner.lock().period
    }

    /// Ticks consumed since construction.
    #[must_use]
    pub fn ticks_consumed(&self) -> u64 {
        self.shared.inner.lock().ticks
    }

    /// Changes the period; the heartbeat restarts its wait with the new value.
    pub fn set_period(&self, period: Duration) {
        self.shared.inner.lock().period = period;
        self.shared.control.notify_all();
        debug!(?period, "clock period changed");
    }

    /// Starts ticking, spawning the heartbeat thread if needed.
    pub fn start(&self) {
        {
            let mut inner = self.shared.inner.lock();
            inner.state = ClockState::Running;
            inner.pending = false;
        }
        self.shared.control.notify_all();

        let mut heartbeat = self.heartbeat.lock();
        if heartbeat.is_none() {
            let shared = Arc::clone(&self.shared);
            match thread::Builder::new()
                .name("sim-clock".to_string())
                .spawn(move || run_heartbeat(&shared))
            {
                Ok(handle) => *heartbeat = Some(handle),
                Err(error) => warn!(%error, "clock heartbeat thread failed to start"),
            }
        }
    }

    /// Withholds ticks until [`Clock::resume`] or [`Clock::step`].
    pub fn pause(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.state == ClockState::Running {
            inner.state = ClockState::Paused;
            inner.pending = false;
        }
    }

    /// Resumes ticking after a pause.
    pub fn resume(&self) {
        {
            let mut inner = self.shared.inner.lock();
            if inner.state != ClockState::Paused {
                return;
            }
            inner.state = ClockState::Running;
        }
        self.shared.control.notify_all();
        self.shared.tick.notify_all();
    }

    /// Delivers exactly one tick while staying paused. Returns false when not paused.
    pub fn step(&self) -> bool {
        let mut inner = self.shared.inner.lock();
        if inner.state != ClockState::Paused {
            return false;
        }
        inner.pending = true;
        drop(inner);
        self.shared.tick.notify_all();
        true
    }

    /// Stops ticking, releases waiters and joins the heartbeat thread.
    pub fn stop(&self) {
        {
            let mut inner = self.shared.inner.lock();
            inner.state = ClockState::Stopped;
            inner.pending = false;
        }
        self.shared.tick.notify_all();
        self.shared.control.notify_all();

        let handle = self.heartbeat.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("clock heartbeat thread panicked");
            }
        }
    }

    /// Blocks until the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] when the clock is or becomes stopped.
    pub fn wait_for_next_tick(&self) -> Result<(), Interrupted> {
        let mut inner = self.shared.inner.lock();
        loop {
            match inner.state {
                ClockState::Stopped => return Err(Interrupted),
                ClockState::Running if inner.period.is_zero() => {
                    inner.ticks += 1;
                    return Ok(());
                }
                ClockState::Running | ClockState::Paused => {}
            }
            if inner.pending {
                inner.pending = false;
                inner.ticks += 1;
                return Ok(());
            }
            self.shared.tick.wait(&mut inner);
        }
    }

    /// Blocks while paused, without consuming a tick. A pending single step
    /// releases the wait and is consumed by it.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] when the clock is or becomes stopped.
    pub fn wait_until_released(&self) -> Result<(), Interrupted> {
        let mut inner = self.shared.inner.lock();
        loop {
            match inner.state {
                ClockState::Stopped => return Err(Interrupted),
                ClockState::Running => return Ok(()),
                ClockState::Paused if inner.pending => {
                    inner.pending = false;
                    return Ok(());
                }
                ClockState::Paused => self.shared.tick.wait(&mut inner),
            }
        }
    }
}

impl Drop for Clock {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_heartbeat(shared: &Shared) {
    let mut inner = shared.inner.lock();
    loop {
        match inner.state {
            ClockState::Stopped => break,
            ClockState::Paused => {
                shared.control.wait(&mut inner);
            }
            ClockState::Running if inner.period.is_zero() => {
                shared.control.wait(&mut inner);
            }
            ClockState::Running => {
                let period = inner.period;
                let timed_out = shared.control.wait_for(&mut inner, period).timed_out();
                if timed_out && inner.state == ClockState::Running {
                    inner.pending = true;
                    shared.tick.notify_all();
                    trace!("clock tick");
                }
            }
        }
    }
    trace!("clock heartbeat exiting");
}
