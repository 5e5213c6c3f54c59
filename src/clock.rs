use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use crate::runtime::SessionEvent;

/// Source of the periodic countdown tick. The runner acquires a guard on
/// entry to a timed phase and drops it on phase exit, pause, or teardown;
/// dropping the guard cancels the underlying tick producer.
pub trait TickerSource {
    type Guard;

    fn start(&self) -> Self::Guard;

    /// Number of currently live guards. More than one means a previous phase
    /// failed to release its ticker.
    fn live(&self) -> usize;
}

/// Production ticker: a spawned thread sends `SessionEvent::Tick` into the
/// app's event channel until the guard is dropped.
pub struct SystemTicker {
    tx: Sender<SessionEvent>,
    period: Duration,
    live: Arc<AtomicUsize>,
}

pub struct SystemTickerGuard {
    stop: Arc<AtomicBool>,
    live: Arc<AtomicUsize>,
}

impl SystemTicker {
    pub fn new(tx: Sender<SessionEvent>, period: Duration) -> Self {
        Self {
            tx,
            period,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl TickerSource for SystemTicker {
    type Guard = SystemTickerGuard;

    fn start(&self) -> SystemTickerGuard {
        let stop = Arc::new(AtomicBool::new(false));
        let live = Arc::clone(&self.live);
        live.fetch_add(1, Ordering::SeqCst);

        let tx = self.tx.clone();
        let period = self.period;
        let stop_flag = Arc::clone(&stop);
        std::thread::spawn(move || loop {
            std::thread::sleep(period);
            if stop_flag.load(Ordering::SeqCst) {
                break;
            }
            if tx.send(SessionEvent::Tick).is_err() {
                break;
            }
        });

        SystemTickerGuard { stop, live }
    }

    fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl Drop for SystemTickerGuard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Test ticker: no threads, just bookkeeping of how often a ticker was armed
/// and how many guards are live.
#[derive(Clone, Default)]
pub struct ManualTicker {
    live: Arc<AtomicUsize>,
    started: Arc<AtomicUsize>,
}

pub struct ManualTickerGuard {
    live: Arc<AtomicUsize>,
}

impl ManualTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of times a guard was handed out.
    pub fn times_started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

impl TickerSource for ManualTicker {
    type Guard = ManualTickerGuard;

    fn start(&self) -> ManualTickerGuard {
        self.live.fetch_add(1, Ordering::SeqCst);
        self.started.fetch_add(1, Ordering::SeqCst);
        ManualTickerGuard {
            live: Arc::clone(&self.live),
        }
    }

    fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl Drop for ManualTickerGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
