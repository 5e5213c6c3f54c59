use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use crossterm::event::{self, Event as CtEvent, KeyEvent};

/// Unified event type consumed by the session shell
#[derive(Clone, Debug)]
pub enum SessionEvent {
    Key(KeyEvent),
    Tick,
    /// The terminal lost focus (the closest a shell gets to backgrounding)
    FocusLost,
}

/// Source of session events (keyboard and countdown ticks)
pub trait EventSource: Send + 'static {
    /// Block for up to `timeout` waiting for an event.
    /// Returns Ok(event) if an event arrives before the timeout, or Err(Timeout) if it expires.
    fn recv_timeout(&self, timeout: Duration) -> Result<SessionEvent, RecvTimeoutError>;
}

/// Channel-backed event source. Key presses and ticker threads all feed the
/// same sender, so the shell consumes one ordered stream.
pub struct ChannelEventSource {
    rx: Receiver<SessionEvent>,
}

impl ChannelEventSource {
    pub fn new(rx: Receiver<SessionEvent>) -> Self {
        Self { rx }
    }

    /// Create a connected (sender, source) pair.
    pub fn pair() -> (Sender<SessionEvent>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }
}

impl EventSource for ChannelEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<SessionEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// Spawn the crossterm key reader feeding `tx`. The thread exits when the
/// receiving side hangs up.
pub fn spawn_key_reader(tx: Sender<SessionEvent>) {
    std::thread::spawn(move || loop {
        match event::read() {
            Ok(CtEvent::Key(key)) => {
                if tx.send(SessionEvent::Key(key)).is_err() {
                    break;
                }
            }
            Ok(CtEvent::FocusLost) => {
                if tx.send(SessionEvent::FocusLost).is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(_) => break,
        }
    });
}
