//! LISTEN/NOTIFY accumulation across connections.
//!
//! [`NotificationManager`] readiness-polls a set of connections and emits
//! their queued notifications as a lazy sequence. Timeout semantics:
//!
//! - `None`: block until some connection delivers a notification
//! - zero: non-blocking snapshot; the iterator ends once everything
//!   currently pending has been emitted
//! - `t > 0`: emit [`NotifyEvent::Idle`] roughly every `t` when nothing
//!   arrives; the idle event is the safe point to break the loop
//!
//! A connection that errors while being polled is dropped from the active
//! set and its key recorded in the garbage list; the manager continues with
//! the remainder.

use std::collections::VecDeque;
use std::time::Duration;

use crate::connection::{Connection, Notification};

/// One item from the manager's sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyEvent<K> {
    /// Notifications drained from one connection
    Notify {
        /// Caller-chosen key of the connection
        key: K,
        /// Notifications in arrival order
        notifications: Vec<Notification>,
    },
    /// Nothing arrived for one timeout period
    Idle,
}

/// Multiplexes notification delivery over any number of connections.
pub struct NotificationManager<'a, K> {
    conns: Vec<(K, &'a mut Connection)>,
    timeout: Option<Duration>,
    ready: VecDeque<NotifyEvent<K>>,
    garbage: Vec<K>,
    snapshot_done: bool,
}

/// Smallest slice a single connection is polled for.
const MIN_SLICE: Duration = Duration::from_millis(10);
/// Poll slice used when blocking without a timeout.
const BLOCK_SLICE: Duration = Duration::from_millis(250);

impl<'a, K: Clone> NotificationManager<'a, K> {
    /// Create a manager with the given idle timeout (see module docs).
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            conns: Vec::new(),
            timeout,
            ready: VecDeque::new(),
            garbage: Vec::new(),
            snapshot_done: false,
        }
    }

    /// Register a connection under a caller-chosen key.
    pub fn add(&mut self, key: K, conn: &'a mut Connection) {
        self.conns.push((key, conn));
    }

    /// Keys of connections dropped after a polling failure.
    pub fn garbage(&self) -> &[K] {
        &self.garbage
    }

    /// Number of connections still being polled.
    pub fn active(&self) -> usize {
        self.conns.len()
    }

    /// Poll every active connection once, each for `slice`, queueing events
    /// for connections with pending notifications.
    fn sweep(&mut self, slice: Duration) {
        let mut index = 0;
        while index < self.conns.len() {
            let (_, conn) = &mut self.conns[index];
            match conn.poll_notifies(slice) {
                Ok(notifications) => {
                    if !notifications.is_empty() {
                        let key = self.conns[index].0.clone();
                        self.ready.push_back(NotifyEvent::Notify {
                            key,
                            notifications,
                        });
                    }
                    index += 1;
                }
                Err(err) => {
                    let (key, _) = self.conns.remove(index);
                    tracing::warn!("notification poll failed, dropping connection: {}", err);
                    self.garbage.push(key);
                }
            }
        }
    }

    fn slice_for(&self, total: Duration) -> Duration {
        let parts = self.conns.len().max(1) as u32;
        (total / parts).max(MIN_SLICE)
    }
}

impl<K: Clone> Iterator for NotificationManager<'_, K> {
    type Item = NotifyEvent<K>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(event) = self.ready.pop_front() {
            return Some(event);
        }

        match self.timeout {
            Some(timeout) if timeout.is_zero() => {
                // Snapshot: one non-blocking pass, then end.
                if self.snapshot_done {
                    return None;
                }
                self.snapshot_done = true;
                self.sweep(MIN_SLICE);
                self.ready.pop_front()
            }
            Some(timeout) => {
                let slice = self.slice_for(timeout);
                self.sweep(slice);
                Some(self.ready.pop_front().unwrap_or(NotifyEvent::Idle))
            }
            None => {
                // Block until some connection delivers.
                loop {
                    if self.conns.is_empty() {
                        return None;
                    }
                    self.sweep(self.slice_for(BLOCK_SLICE));
                    if let Some(event) = self.ready.pop_front() {
                        return Some(event);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_ends() {
        let mut manager: NotificationManager<'_, u32> =
            NotificationManager::new(Some(Duration::ZERO));
        assert_eq!(manager.next(), None);
        assert_eq!(manager.next(), None);
    }

    #[test]
    fn idle_tick_without_connections() {
        let mut manager: NotificationManager<'_, u32> =
            NotificationManager::new(Some(Duration::from_millis(20)));
        assert_eq!(manager.next(), Some(NotifyEvent::Idle));
    }

    #[test]
    fn blocking_manager_with_no_connections_ends() {
        let mut manager: NotificationManager<'_, u32> = NotificationManager::new(None);
        assert_eq!(manager.next(), None);
    }
}
