use log::{debug, warn};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

pub type TickSink = Arc<dyn Fn() + Send + Sync>;

/// A repeating timer thread. Dropping it cancels and joins the thread.
struct Ticker {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    fn spawn(interval: Duration, sink: TickSink, live: Arc<AtomicUsize>) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        live.fetch_add(1, Ordering::SeqCst);
        let thread_live = Arc::clone(&live);
        let spawned = thread::Builder::new()
            .name("position-poll".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => sink(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                thread_live.fetch_sub(1, Ordering::SeqCst);
            });

        match spawned {
            Ok(handle) => Ok(Self {
                stop_tx: Some(stop_tx),
                handle: Some(handle),
            }),
            Err(err) => {
                live.fetch_sub(1, Ordering::SeqCst);
                Err(err)
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Seek-position poll timer. At most one ticker runs at a time.
pub struct PositionPoller {
    interval: Duration,
    sink: TickSink,
    active: Option<Ticker>,
    live: Arc<AtomicUsize>,
}

impl PositionPoller {
    pub fn new(interval: Duration, sink: TickSink) -> Self {
        Self {
            interval,
            sink,
            active: None,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replaces any running ticker.
    pub fn start(&mut self) {
        self.stop();
        match Ticker::spawn(self.interval, Arc::clone(&self.sink), Arc::clone(&self.live)) {
            Ok(ticker) => {
                debug!("position poll started every {:?}", self.interval);
                self.active = Some(ticker);
            }
            Err(err) => warn!("failed to start position poll: {err}"),
        }
    }

    pub fn stop(&mut self) {
        if self.active.take().is_some() {
            debug!("position poll stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Ticker threads currently alive.
    pub fn active_timers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}
