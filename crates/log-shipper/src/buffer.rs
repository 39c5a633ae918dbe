// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Cost-bounded message buffers shared between producers and the flusher.
//!
//! Every item carries a cost assigned by an injected function (typically its
//! byte length). The buffer tracks the sum of the costs of everything it holds
//! and bounds that sum by a capacity fixed at construction.
//!
//! # Eviction
//!
//! [`EvictingBuffer`] never rejects an item. When admitting an item would push
//! the total cost over capacity, the oldest items are removed one by one until
//! it fits (or the buffer is empty), then the item is appended:
//!
//! ```text
//!   capacity = 10, add "cccc" (cost 4)
//!
//!   [aaa][bbbbb]        total 8, 8 + 4 > 10
//!   [bbbbb]             evict "aaa", total 5, 5 + 4 <= 10
//!   [bbbbb][cccc]       append, total 9
//! ```
//!
//! An item whose own cost exceeds capacity empties the buffer and is then
//! admitted alone, so it is the only case where total cost may exceed
//! capacity after an add.
//!
//! # Concurrency
//!
//! All mutation happens under one internal mutex, so concurrent adds and
//! drains see linearizable per-item accounting. The total cost and item count
//! are mirrored into atomics after every mutation so they can be read without
//! taking the lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::errors::ConfigError;
use crate::events::{EventObserver, ShipperEvent, TracingObserver};

/// Assigns a non-negative cost to an item.
pub type CostFn<T> = Box<dyn Fn(&T) -> u64 + Send + Sync>;

/// Items removed by a single evicting add.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Eviction {
    pub items: u64,
    pub cost: u64,
}

struct Entry<T> {
    item: T,
    cost: u64,
}

struct State<T> {
    entries: VecDeque<Entry<T>>,
    total_cost: u64,
}

impl<T> State<T> {
    fn pop_oldest(&mut self) -> Option<Entry<T>> {
        let entry = self.entries.pop_front()?;
        self.total_cost = self.total_cost.saturating_sub(entry.cost);
        Some(entry)
    }

    fn push(&mut self, item: T, cost: u64) {
        self.total_cost = self.total_cost.saturating_add(cost);
        self.entries.push_back(Entry { item, cost });
    }
}

/// Thread-safe FIFO container whose total item cost is bounded by a capacity.
pub struct CostBoundedBuffer<T> {
    state: Mutex<State<T>>,
    total_cost: AtomicU64,
    len: AtomicUsize,
    capacity: u64,
    cost_fn: CostFn<T>,
}

impl<T> CostBoundedBuffer<T> {
    /// Creates a buffer bounded by `capacity`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidCapacity`] if `capacity` is zero.
    pub fn new<F>(capacity: u64, cost_fn: F) -> Result<Self, ConfigError>
    where
        F: Fn(&T) -> u64 + Send + Sync + 'static,
    {
        if capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        Ok(CostBoundedBuffer {
            state: Mutex::new(State {
                entries: VecDeque::new(),
                total_cost: 0,
            }),
            total_cost: AtomicU64::new(0),
            len: AtomicUsize::new(0),
            capacity,
            cost_fn: Box::new(cost_fn),
        })
    }

    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Sum of the costs of all buffered items.
    #[must_use]
    pub fn total_cost(&self) -> u64 {
        self.total_cost.load(Ordering::Acquire)
    }

    /// Number of buffered items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Moves up to `max_items` of the oldest items into `sink`, oldest first.
    ///
    /// Returns the number of items moved.
    pub fn drain_to(&self, sink: &mut Vec<T>, max_items: usize) -> usize {
        let mut state = self.lock();
        let count = max_items.min(state.entries.len());
        sink.reserve(count);
        for _ in 0..count {
            if let Some(entry) = state.pop_oldest() {
                sink.push(entry.item);
            }
        }
        self.publish(&state);
        count
    }

    /// Evicts oldest items until `item` fits, then appends it unconditionally.
    pub(crate) fn add_evicting(&self, item: T) -> Eviction {
        let cost = (self.cost_fn)(&item);
        let mut eviction = Eviction::default();
        let mut state = self.lock();
        while state.total_cost.saturating_add(cost) > self.capacity {
            match state.pop_oldest() {
                Some(evicted) => {
                    eviction.items += 1;
                    eviction.cost += evicted.cost;
                }
                None => break,
            }
        }
        state.push(item, cost);
        self.publish(&state);
        eviction
    }

    // A panic while holding the lock cannot leave the queue half-updated, so
    // a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &State<T>) {
        self.total_cost.store(state.total_cost, Ordering::Release);
        self.len.store(state.entries.len(), Ordering::Release);
    }
}

/// A [`CostBoundedBuffer`] that makes room for new items by evicting the oldest ones.
///
/// Producers call [`EvictingBuffer::add`], which never blocks and never fails.
pub struct EvictingBuffer<T> {
    buffer: CostBoundedBuffer<T>,
    evicted_items: AtomicU64,
    evicted_cost: AtomicU64,
    observer: Arc<dyn EventObserver>,
}

impl<T> EvictingBuffer<T> {
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidCapacity`] if `capacity` is zero.
    pub fn new<F>(capacity: u64, cost_fn: F) -> Result<Self, ConfigError>
    where
        F: Fn(&T) -> u64 + Send + Sync + 'static,
    {
        Ok(EvictingBuffer {
            buffer: CostBoundedBuffer::new(capacity, cost_fn)?,
            evicted_items: AtomicU64::new(0),
            evicted_cost: AtomicU64::new(0),
            observer: Arc::new(TracingObserver),
        })
    }

    /// Replaces the observer that receives [`ShipperEvent::Evicted`].
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn EventObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn add(&self, item: T) {
        let eviction = self.buffer.add_evicting(item);
        if eviction.items > 0 {
            self.evicted_items
                .fetch_add(eviction.items, Ordering::Relaxed);
            self.evicted_cost.fetch_add(eviction.cost, Ordering::Relaxed);
            self.observer.on_event(&ShipperEvent::Evicted {
                items: eviction.items,
                cost: eviction.cost,
            });
        }
    }

    pub fn drain_to(&self, sink: &mut Vec<T>, max_items: usize) -> usize {
        self.buffer.drain_to(sink, max_items)
    }

    #[must_use]
    pub fn total_cost(&self) -> u64 {
        self.buffer.total_cost()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.buffer.capacity()
    }

    /// Total number of items evicted since construction.
    #[must_use]
    pub fn evicted_items(&self) -> u64 {
        self.evicted_items.load(Ordering::Relaxed)
    }

    /// Total cost of items evicted since construction.
    #[must_use]
    pub fn evicted_cost(&self) -> u64 {
        self.evicted_cost.load(Ordering::Relaxed)
    }
}
