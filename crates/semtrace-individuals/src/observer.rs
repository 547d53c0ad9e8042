//! Change notifications.
//!
//! The manager publishes a [`Notification`] for every observable change.
//! Consumers subscribe through
//! [`IndividualManager::subscribe`](crate::manager::IndividualManager::subscribe)
//! and drain the returned receiver at their own pace; senders whose receiver
//! was dropped are pruned on the next publish.

use std::sync::mpsc::{self, Receiver, Sender};

use serde::{Deserialize, Serialize};

use crate::handle::IndividualId;

/// What changed on an individual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    Id(String),
    Class(String),
    VisualMask(String),
    CalibratedVisualMask(String),
    Init(bool),
    Loaded(bool),
    MaskActive(bool),
    Destroyed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub individual: IndividualId,
    pub change: Change,
}

/// Fan-out list of subscriber channels.
#[derive(Debug, Default)]
pub struct ObserverList {
    senders: Vec<Sender<Notification>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<Notification> {
        let (tx, rx) = mpsc::channel();
        self.senders.push(tx);
        rx
    }

    pub fn publish(&mut self, individual: IndividualId, change: Change) {
        if self.senders.is_empty() {
            return;
        }
        let notification = Notification { individual, change };
        self.senders
            .retain(|tx| tx.send(notification.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.len()
    }

    pub fn clear(&mut self) {
        self.senders.clear();
    }
}
