use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("result queue is empty")]
pub struct EmptyQueue;

/// FIFO of successful response bodies, in the order the calls were issued.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultQueue {
    bodies: VecDeque<String>,
}

impl ResultQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, body: impl Into<String>) {
        self.bodies.push_back(body.into());
    }

    pub fn pop(&mut self) -> Result<String, EmptyQueue> {
        self.bodies.pop_front().ok_or(EmptyQueue)
    }

    pub fn size(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.bodies.iter().map(String::as_str)
    }

    /// Removes every queued body, oldest first.
    pub fn drain(&mut self) -> Vec<String> {
        self.bodies.drain(..).collect()
    }
}
