//! Deadline-bounded wait for a set of server notifications.
//!
//! The waiter pulls messages from a [`Connection`] in short read attempts so
//! the overall deadline is checked between attempts. Each notification with
//! the expected method is folded into a key → value map by a caller-supplied
//! aggregation step (later values for a key overwrite earlier ones). Every
//! other message goes to the connection's dispatcher, so a server request or
//! a stray response interleaved with the notifications is still handled.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

use crate::codec::ReadOutcome;
use crate::connection::Connection;
use crate::error::Result;
use crate::message::Message;
use crate::types::WaitStatus;

/// Completion condition over the accumulated key → value map.
#[derive(Debug, Clone)]
pub enum WaitCondition<K> {
    /// Satisfied once every required key has been observed.
    AllOf(HashSet<K>),
    /// Never satisfied by input; collects until the deadline, which counts
    /// as completion.
    Drain,
}

impl<K: Eq + Hash> WaitCondition<K> {
    pub fn all_of(keys: impl IntoIterator<Item = K>) -> Self {
        Self::AllOf(keys.into_iter().collect())
    }

    #[must_use]
    pub fn is_satisfied<V>(&self, observed: &HashMap<K, V>) -> bool {
        match self {
            Self::AllOf(required) => required.iter().all(|key| observed.contains_key(key)),
            Self::Drain => false,
        }
    }
}

/// What a wait accumulated and why it stopped. Partial progress is always
/// returned, whatever the status.
#[derive(Debug)]
pub struct WaitOutcome<K, V> {
    pub status: WaitStatus,
    pub observed: HashMap<K, V>,
    /// Arrival of the first matching notification.
    pub first_match: Option<Instant>,
    pub finished_at: Instant,
}

#[derive(Debug, Clone)]
pub struct NotificationWaiter {
    method: String,
    poll_interval: Duration,
}

impl NotificationWaiter {
    pub fn new(method: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            method: method.into(),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Consume messages until `condition` holds, the stream closes, or
    /// `deadline` passes.
    ///
    /// `aggregate` maps a matching notification's params to a key and value,
    /// or `None` to skip it. Returns early, before reading any further
    /// messages, as soon as the condition is met.
    pub async fn wait_for<R, W, K, V, F>(
        &self,
        conn: &mut Connection<R, W>,
        condition: &WaitCondition<K>,
        deadline: Instant,
        mut aggregate: F,
    ) -> Result<WaitOutcome<K, V>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        K: Eq + Hash,
        F: FnMut(Option<&Value>) -> Option<(K, V)>,
    {
        let mut observed = HashMap::new();
        let mut first_match = None;

        let status = loop {
            if condition.is_satisfied(&observed) {
                break WaitStatus::Satisfied;
            }
            let now = Instant::now();
            if now >= deadline {
                break match condition {
                    WaitCondition::Drain => WaitStatus::Satisfied,
                    WaitCondition::AllOf(_) => WaitStatus::TimedOut,
                };
            }

            let attempt = (now + self.poll_interval).min(deadline);
            match conn.receive(attempt).await? {
                ReadOutcome::Message(Message::Notification { method, params })
                    if method == self.method =>
                {
                    match aggregate(params.as_ref()) {
                        Some((key, value)) => {
                            first_match.get_or_insert_with(Instant::now);
                            observed.insert(key, value);
                        }
                        None => tracing::debug!("skipping unrecognized {method} payload"),
                    }
                }
                ReadOutcome::Message(other) => conn.dispatch(other).await?,
                ReadOutcome::TimedOut => {}
                ReadOutcome::Closed => break WaitStatus::Closed,
            }
        };

        Ok(WaitOutcome {
            status,
            observed,
            first_match,
            finished_at: Instant::now(),
        })
    }
}
