//! Per-key trailing-edge debouncer.
//!
//! Every `push` for a key cancels that key's pending timer and schedules a
//! new one. When a timer survives the whole window, `(key, last value)` is
//! emitted on the output channel exactly once.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

struct Pending {
    generation: u64,
    timer: JoinHandle<()>,
}

struct Inner<K> {
    next_generation: u64,
    pending: HashMap<K, Pending>,
}

pub struct Debouncer<K, V> {
    window: Duration,
    inner: Arc<Mutex<Inner<K>>>,
    tx: mpsc::UnboundedSender<(K, V)>,
}

impl<K, V> Debouncer<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    V: Send + 'static,
{
    pub fn new(window: Duration) -> (Self, mpsc::UnboundedReceiver<(K, V)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Inner {
            next_generation: 0,
            pending: HashMap::new(),
        };
        (
            Self {
                window,
                inner: Arc::new(Mutex::new(inner)),
                tx,
            },
            rx,
        )
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Start or reset the timer for `key`; `value` replaces any earlier one.
    pub fn push(&self, key: K, value: V) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.next_generation += 1;
        let generation = inner.next_generation;

        let shared = Arc::clone(&self.inner);
        let tx = self.tx.clone();
        let window = self.window;
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            // A push that raced the wake-up owns the key now.
            let fire = {
                let mut state = shared.lock().unwrap_or_else(|e| e.into_inner());
                take_if_current(&mut state, &timer_key, generation)
            };
            if fire {
                let _ = tx.send((timer_key, value));
            }
        });

        if let Some(previous) = inner.pending.insert(key.clone(), Pending { generation, timer }) {
            trace!("debounce reset for {:?}", key);
            previous.timer.abort();
        }
    }

    /// Number of keys with a timer still running.
    pub fn pending(&self) -> usize {
        self.inner.lock().map(|s| s.pending.len()).unwrap_or(0)
    }
}

fn take_if_current<K: Eq + Hash>(state: &mut Inner<K>, key: &K, generation: u64) -> bool {
    match state.pending.get(key) {
        Some(p) if p.generation == generation => {
            state.pending.remove(key);
            true
        }
        _ => false,
    }
}

impl<K, V> Drop for Debouncer<K, V> {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            for (_, p) in inner.pending.drain() {
                p.timer.abort();
            }
        }
    }
}
