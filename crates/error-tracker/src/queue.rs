// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::event::Event;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// FIFO buffer of events waiting to be flushed.
///
/// The lock is only held for the in-memory operation itself, never across I/O.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<Event>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Appends an event and returns the queue length right after the append.
    pub fn push(&self, event: Event) -> usize {
        let mut events = self.lock();
        events.push_back(event);
        events.len()
    }

    /// Removes and returns up to `max_size` of the oldest events, preserving their order.
    pub fn take_batch(&self, max_size: usize) -> Vec<Event> {
        let mut events = self.lock();
        let count = events.len().min(max_size);
        events.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Every mutation completes before the guard drops, so a poisoned queue is still consistent
    fn lock(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventBuilder, EventLevel};
    use std::sync::Arc;

    fn event(title: &str) -> Event {
        EventBuilder::new(None, None, None, Some("device".to_string())).build(
            title,
            None,
            EventLevel::Info,
            None,
        )
    }

    fn titles(events: &[Event]) -> Vec<&str> {
        events.iter().map(|e| e.title.as_str()).collect()
    }

    #[test]
    fn test_push_returns_length() {
        let queue = EventQueue::new();
        assert_eq!(queue.push(event("a")), 1);
        assert_eq!(queue.push(event("b")), 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_take_batch_fifo() {
        let queue = EventQueue::new();
        for title in ["a", "b", "c", "d", "e"] {
            queue.push(event(title));
        }

        let first = queue.take_batch(2);
        assert_eq!(titles(&first), vec!["a", "b"]);
        assert_eq!(queue.len(), 3);

        let rest = queue.take_batch(10);
        assert_eq!(titles(&rest), vec!["c", "d", "e"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_take_batch_empty() {
        let queue = EventQueue::with_capacity(4);
        assert!(queue.take_batch(3).is_empty());
        assert!(queue.take_batch(0).is_empty());
    }

    #[test]
    fn test_take_batch_zero_leaves_queue() {
        let queue = EventQueue::new();
        queue.push(event("a"));
        assert!(queue.take_batch(0).is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_concurrent_push_and_take_loses_nothing() {
        let queue = Arc::new(EventQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        queue.push(event(&format!("{p}-{i}")));
                    }
                })
            })
            .collect();

        let mut taken = Vec::new();
        while taken.len() < 1000 {
            taken.extend(queue.take_batch(7));
            std::thread::yield_now();
        }
        for producer in producers {
            producer.join().unwrap();
        }

        assert_eq!(taken.len(), 1000);
        assert!(queue.is_empty());
        let mut ids: Vec<_> = taken.iter().map(|e| e.event_id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1000);

        // per-producer order survives
        for p in 0..4 {
            let prefix = format!("{p}-");
            let seq: Vec<usize> = taken
                .iter()
                .filter_map(|e| e.title.strip_prefix(&prefix))
                .map(|n| n.parse().unwrap())
                .collect();
            assert!(seq.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
