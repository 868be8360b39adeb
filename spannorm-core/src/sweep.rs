//! Spans waiting for a stream to drain, and the background pass that ends the
//! ones whose stream went quiet.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::debug;

use crate::clock::Clock;
use crate::config::SweepCfg;
use crate::locked_map::LockedMap;
use crate::span::{EndReason, SharedNode};

#[derive(Debug, Clone)]
struct QueueItem {
    /// Clock reading of the pass that last looked at this item.
    last_touched_at: u64,
    id: String,
}

/// Index of AWAITING_STREAM spans plus the order the sweep visits them in.
#[derive(Debug, Default)]
pub struct ExportQueue {
    spans: LockedMap<String, SharedNode>,
    queue: Mutex<VecDeque<QueueItem>>,
}

impl ExportQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, id: impl Into<String>, node: SharedNode, now_ns: u64) {
        let id = id.into();
        self.spans.insert(id.clone(), node);
        self.queue.lock().push_back(QueueItem {
            last_touched_at: now_ns,
            id,
        });
    }

    pub fn find(&self, id: &str) -> Option<SharedNode> {
        self.spans.get(&id.to_string())
    }

    pub fn remove(&self, id: &str) {
        self.spans.remove(&id.to_string());
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// One pass over the queue; returns how many spans it ended.
    ///
    /// The pass stops when it meets an item it already touched at `now_ns`,
    /// so items pushed while it runs are left for the next pass. Entries whose
    /// span already ended elsewhere are dropped.
    pub fn sweep_once(&self, now_ns: u64, timeout_ns: u64) -> usize {
        let mut ended = 0;
        loop {
            let Some(mut item) = self.queue.lock().pop_front() else {
                break;
            };
            if item.last_touched_at == now_ns {
                self.queue.lock().push_front(item);
                break;
            }
            let Some(node) = self.spans.get(&item.id) else {
                continue;
            };
            let mut node = node.lock();
            if !node.is_active() {
                self.spans.remove(&item.id);
                continue;
            }
            let idle_ns = now_ns.saturating_sub(node.last_activity_ns());
            if idle_ns > timeout_ns {
                debug!(span_id = %item.id, idle_ns, "ending abandoned stream");
                node.end(EndReason::Completed, now_ns);
                self.spans.remove(&item.id);
                ended += 1;
                continue;
            }
            item.last_touched_at = now_ns;
            self.queue.lock().push_back(item);
        }
        ended
    }
}

/// Background thread running [`ExportQueue::sweep_once`] every
/// `interval_ms`. Stops and joins on drop.
#[derive(Debug)]
pub struct Sweeper {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub fn spawn(queue: Arc<ExportQueue>, clock: Arc<dyn Clock>, cfg: &SweepCfg) -> std::io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let interval = cfg.interval();
        let timeout_ns = cfg.stream_timeout_ns();
        let thread = thread::Builder::new()
            .name("spannorm-sweep".into())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let ended = queue.sweep_once(clock.now_ns(), timeout_ns);
                            if ended > 0 {
                                debug!(ended, "sweep pass");
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;
        Ok(Self {
            stop: Some(stop),
            thread: Some(thread),
        })
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
