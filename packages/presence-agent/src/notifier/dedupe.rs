//! Remembers which inbound request ids were already handled, and how.

use std::collections::{HashMap, VecDeque};

use relay_client::AckStatus;

/// The acknowledgment sent for a request, replayed for duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckOutcome {
    pub status: AckStatus,
    pub message: String,
}

impl AckOutcome {
    pub fn executed(message: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Executed,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Failed,
            message: message.into(),
        }
    }
}

/// Bounded set of seen request ids; the oldest id is evicted first.
#[derive(Debug)]
pub struct SeenRequests {
    capacity: usize,
    order: VecDeque<String>,
    outcomes: HashMap<String, AckOutcome>,
}

impl SeenRequests {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            outcomes: HashMap::with_capacity(capacity),
        }
    }

    pub fn get(&self, request_id: &str) -> Option<&AckOutcome> {
        self.outcomes.get(request_id)
    }

    pub fn insert(&mut self, request_id: String, outcome: AckOutcome) {
        if self.outcomes.contains_key(&request_id) {
            self.outcomes.insert(request_id, outcome);
            return;
        }

        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.outcomes.remove(&oldest);
            }
        }
        self.order.push_back(request_id.clone());
        self.outcomes.insert(request_id, outcome);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
