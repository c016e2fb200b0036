//! Bounded retry queue for failed reconciliation work.
//!
//! An item is either a whole module (its pass could not start) or a single
//! inconsistency whose resolution failed. Items are retried once per
//! scheduler pass. Each failed retry bumps `retries`; an item that reaches
//! the maximum is dropped with a warning and only comes back if a later
//! pass detects the gap again.

use crate::module::Module;
use crate::reconcile::Inconsistency;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default maximum number of retries per item.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// One unit of work awaiting a retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryItem {
    pub module: Module,
    /// `None` means re-run the whole module
    pub inconsistency: Option<Inconsistency>,
    pub retries: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl RetryItem {
    pub fn module(module: Module) -> Self {
        Self {
            module,
            inconsistency: None,
            retries: 0,
            enqueued_at: Utc::now(),
        }
    }

    pub fn inconsistency(inconsistency: Inconsistency) -> Self {
        Self {
            module: inconsistency.module,
            inconsistency: Some(inconsistency),
            retries: 0,
            enqueued_at: Utc::now(),
        }
    }

    fn same_work(&self, other: &RetryItem) -> bool {
        if self.module != other.module {
            return false;
        }
        match (&self.inconsistency, &other.inconsistency) {
            (None, None) => true,
            (Some(a), Some(b)) => a.kind == b.kind && a.id == b.id,
            _ => false,
        }
    }
}

/// What happened to an item handed back after a failed retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Requeued { retries: u32 },
    Dropped,
}

#[derive(Debug, Clone)]
pub struct RetryQueue {
    items: VecDeque<RetryItem>,
    max_retries: u32,
}

impl Default for RetryQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl RetryQueue {
    pub fn new(max_retries: u32) -> Self {
        Self {
            items: VecDeque::new(),
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &RetryItem> {
        self.items.iter()
    }

    /// Queue an item. An equivalent item already queued keeps its retry
    /// count and the new one is discarded; returns whether it was queued.
    pub fn push(&mut self, item: RetryItem) -> bool {
        if self.items.iter().any(|queued| queued.same_work(&item)) {
            return false;
        }
        tracing::debug!(
            module = %item.module,
            id = item.inconsistency.as_ref().map(|i| i.id.as_str()),
            "Queued for retry"
        );
        self.items.push_back(item);
        true
    }

    /// Take every queued item for one drain.
    pub fn take_all(&mut self) -> Vec<RetryItem> {
        self.items.drain(..).collect()
    }

    /// Hand back an item whose retry failed.
    pub fn retry_failed(&mut self, mut item: RetryItem) -> RetryOutcome {
        item.retries += 1;
        if item.retries >= self.max_retries {
            tracing::warn!(
                module = %item.module,
                id = item.inconsistency.as_ref().map(|i| i.id.as_str()),
                retries = item.retries,
                "Retry limit reached, dropping item"
            );
            return RetryOutcome::Dropped;
        }
        let retries = item.retries;
        self.items.push_back(item);
        RetryOutcome::Requeued { retries }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_items_start_at_zero() {
        let item = RetryItem::module(Module::Diesel);
        assert_eq!(item.retries, 0);
        assert!(item.inconsistency.is_none());
    }

    #[test]
    fn item_dropped_after_fourth_failure() {
        // The failure that queued the item is the first; three failed
        // retries follow.
        let mut queue = RetryQueue::default();
        queue.push(RetryItem::module(Module::Treasury));

        let mut outcomes = Vec::new();
        while let Some(item) = queue.take_all().pop() {
            outcomes.push(queue.retry_failed(item));
        }

        assert_eq!(
            outcomes,
            vec![
                RetryOutcome::Requeued { retries: 1 },
                RetryOutcome::Requeued { retries: 2 },
                RetryOutcome::Dropped,
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn take_all_empties_queue() {
        let mut queue = RetryQueue::new(5);
        queue.push(RetryItem::module(Module::Diesel));
        queue.push(RetryItem::module(Module::Inventory));

        let items = queue.take_all();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].module, Module::Diesel);
        assert!(queue.is_empty());
    }

    #[test]
    fn duplicates_keep_first_retry_count() {
        let mut queue = RetryQueue::default();
        assert!(queue.push(RetryItem::module(Module::Diesel)));
        let item = queue.take_all().remove(0);
        queue.retry_failed(item);

        assert!(!queue.push(RetryItem::module(Module::Diesel)));
        assert!(queue.push(RetryItem::module(Module::Inventory)));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.items().next().unwrap().retries, 1);
    }

    #[test]
    fn zero_max_drops_immediately() {
        let mut queue = RetryQueue::new(0);
        assert_eq!(
            queue.retry_failed(RetryItem::module(Module::Payables)),
            RetryOutcome::Dropped
        );
    }
}
