//! Construction options

use serde::{Deserialize, Serialize};

/// Default capacity of the event queue and of the notification queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// How notifications reach observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationMode {
    /// Dispatch on the emitting task before the emitting call returns.
    Inline,
    /// Enqueue on a bounded queue of the given capacity, drained by a worker task.
    Queued(usize),
}

/// Options for an [`AsyncStateMachine`](crate::AsyncStateMachine).
///
/// Deserializable so it can live in an application's config file; missing fields take
/// their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Capacity of the event queue. Zero falls back to [`DEFAULT_QUEUE_CAPACITY`].
    pub event_queue_capacity: usize,
    /// Capacity of the notification queue. Zero selects inline delivery.
    pub notification_queue_capacity: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            notification_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl MachineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Config that delivers notifications inline.
    pub fn inline_notifications() -> Self {
        Self {
            notification_queue_capacity: 0,
            ..Self::default()
        }
    }

    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    pub fn with_notification_queue_capacity(mut self, capacity: usize) -> Self {
        self.notification_queue_capacity = capacity;
        self
    }

    /// Event queue capacity actually used
    pub fn effective_event_queue_capacity(&self) -> usize {
        if self.event_queue_capacity == 0 {
            DEFAULT_QUEUE_CAPACITY
        } else {
            self.event_queue_capacity
        }
    }

    pub fn notification_mode(&self) -> NotificationMode {
        match self.notification_queue_capacity {
            0 => NotificationMode::Inline,
            capacity => NotificationMode::Queued(capacity),
        }
    }
}
