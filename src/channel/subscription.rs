#![expect(
    clippy::module_name_repetitions,
    reason = "Subscription types deliberately include the module name for clarity"
)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::types::Subscription;
use crate::Result;
use crate::ws::SubscriptionStatus;

#[derive(Debug, Default)]
struct Book {
    /// Wanted but not yet sent on the current socket
    pending: BTreeMap<String, Subscription>,
    /// Sent on the current socket
    completed: BTreeMap<String, Subscription>,
}

/// Pending and completed subscriptions, keyed by [`Subscription::key`].
///
/// Both maps live behind one lock so a key moves between them atomically and is never
/// in both. Wire operations run while the lock is held, which keeps the maps in step
/// with what was actually sent.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionBook {
    inner: Mutex<Book>,
}

impl SubscriptionBook {
    fn lock(&self) -> MutexGuard<'_, Book> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue subscriptions that are not already completed. Returns how many were queued.
    pub(crate) fn add_pending<I>(&self, subscriptions: I) -> usize
    where
        I: IntoIterator<Item = Subscription>,
    {
        let mut book = self.lock();
        let mut added = 0;
        for subscription in subscriptions {
            let key = subscription.key();
            if book.completed.contains_key(&key) {
                continue;
            }
            if book.pending.insert(key, subscription).is_none() {
                added += 1;
            }
        }
        added
    }

    /// Send every pending subscription through `subscribe` and mark them completed.
    ///
    /// If `subscribe` fails, the subscriptions stay pending and are retried on the next
    /// flush.
    pub(crate) fn flush<F>(&self, subscribe: F) -> Result<usize>
    where
        F: FnOnce(&[Subscription]) -> Result<()>,
    {
        let mut book = self.lock();
        if book.pending.is_empty() {
            return Ok(0);
        }

        let batch: Vec<Subscription> = book.pending.values().cloned().collect();
        subscribe(&batch)?;

        let pending = std::mem::take(&mut book.pending);
        book.completed.extend(pending);
        Ok(batch.len())
    }

    /// Move every completed subscription back to pending, for replay on a new socket.
    pub(crate) fn reset_completed_to_pending(&self) -> usize {
        let mut book = self.lock();
        let completed = std::mem::take(&mut book.completed);
        let count = completed.len();
        book.pending.extend(completed);
        count
    }

    /// Forget `subscriptions`. Those that were completed are handed to `unsubscribe`.
    ///
    /// Bookkeeping is updated even when `unsubscribe` fails.
    pub(crate) fn remove<F>(&self, subscriptions: &[Subscription], unsubscribe: F) -> Result<usize>
    where
        F: FnOnce(&[Subscription]) -> Result<()>,
    {
        let mut book = self.lock();
        let mut live = Vec::new();
        for subscription in subscriptions {
            let key = subscription.key();
            book.pending.remove(&key);
            if let Some(completed) = book.completed.remove(&key) {
                live.push(completed);
            }
        }

        if live.is_empty() {
            return Ok(0);
        }
        unsubscribe(&live)?;
        Ok(live.len())
    }

    pub(crate) fn clear(&self) {
        let mut book = self.lock();
        book.pending.clear();
        book.completed.clear();
    }

    /// Channels with at least one pending or completed subscription.
    pub(crate) fn active_channels(&self) -> BTreeSet<String> {
        let book = self.lock();
        book.pending
            .values()
            .chain(book.completed.values())
            .map(|subscription| subscription.channel.clone())
            .collect()
    }

    /// Symbols subscribed on `channel`, pending or completed, sorted.
    pub(crate) fn running_symbols(&self, channel: &str) -> Vec<String> {
        let book = self.lock();
        book.pending
            .values()
            .chain(book.completed.values())
            .filter(|subscription| subscription.channel == channel)
            .filter_map(|subscription| subscription.symbol.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub(crate) fn has_running_symbol(&self, channel: &str, symbol: &str) -> bool {
        let book = self.lock();
        let key = Subscription::with_symbol(channel, symbol).key();
        book.pending.contains_key(&key) || book.completed.contains_key(&key)
    }

    /// Whether anything on `channel` has been sent on the current socket.
    pub(crate) fn has_completed_channel(&self, channel: &str) -> bool {
        self.lock()
            .completed
            .values()
            .any(|subscription| subscription.channel == channel)
    }

    pub(crate) fn status(&self) -> SubscriptionStatus {
        let book = self.lock();
        SubscriptionStatus {
            pending: book.pending.keys().cloned().collect(),
            completed: book.completed.keys().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn trade(symbol: &str) -> Subscription {
        Subscription::with_symbol("trade", symbol)
    }

    fn assert_disjoint(book: &SubscriptionBook) {
        let status = book.status();
        for key in &status.pending {
            assert!(
                !status.completed.contains(key),
                "{key} is both pending and completed"
            );
        }
    }

    #[test]
    fn completed_keys_are_not_queued_again() {
        let book = SubscriptionBook::default();
        book.add_pending([trade("BTC/USDT")]);
        book.flush(|_| Ok(())).unwrap();

        let added = book.add_pending([trade("BTC/USDT"), trade("ETH/USDT")]);

        assert_eq!(added, 1);
        let status = book.status();
        assert_eq!(status.pending, vec!["trade:ETH/USDT".to_owned()]);
        assert_eq!(status.completed, vec!["trade:BTC/USDT".to_owned()]);
        assert_disjoint(&book);
    }

    #[test]
    fn flush_moves_pending_to_completed() {
        let book = SubscriptionBook::default();
        book.add_pending([trade("BTC/USDT"), Subscription::new("ticker")]);

        let mut sent = Vec::new();
        let flushed = book
            .flush(|batch| {
                sent.extend(batch.iter().map(Subscription::key));
                Ok(())
            })
            .unwrap();

        assert_eq!(flushed, 2);
        assert_eq!(sent, vec!["ticker".to_owned(), "trade:BTC/USDT".to_owned()]);
        assert!(book.status().pending.is_empty());
        assert_eq!(book.flush(|_| unreachable!()).unwrap(), 0);
    }

    #[test]
    fn failed_flush_keeps_subscriptions_pending() {
        let book = SubscriptionBook::default();
        book.add_pending([trade("BTC/USDT")]);

        let result = book.flush(|_| Err(Error::validation("encoder rejected")));

        result.unwrap_err();
        let status = book.status();
        assert_eq!(status.pending, vec!["trade:BTC/USDT".to_owned()]);
        assert!(status.completed.is_empty());
    }

    #[test]
    fn reset_replays_only_completed() {
        let book = SubscriptionBook::default();
        book.add_pending([trade("BTC/USDT")]);
        book.flush(|_| Ok(())).unwrap();
        book.add_pending([trade("ETH/USDT")]);

        assert_eq!(book.reset_completed_to_pending(), 1);
        let status = book.status();
        assert_eq!(status.pending.len(), 2);
        assert!(status.completed.is_empty());
        assert_disjoint(&book);
    }

    #[test]
    fn remove_unsubscribes_only_completed_and_always_forgets() {
        let book = SubscriptionBook::default();
        book.add_pending([trade("BTC/USDT")]);
        book.flush(|_| Ok(())).unwrap();
        book.add_pending([trade("ETH/USDT")]);

        let mut unsubscribed = Vec::new();
        let removed = book
            .remove(&[trade("BTC/USDT"), trade("ETH/USDT")], |batch| {
                unsubscribed.extend(batch.iter().map(Subscription::key));
                Err(Error::validation("socket gone"))
            })
            .unwrap_err();

        assert_eq!(unsubscribed, vec!["trade:BTC/USDT".to_owned()]);
        assert_eq!(removed.kind(), crate::error::Kind::Validation);
        let status = book.status();
        assert!(status.pending.is_empty());
        assert!(status.completed.is_empty());
    }

    #[test]
    fn running_symbols_are_sorted_and_merged() {
        let book = SubscriptionBook::default();
        book.add_pending([trade("SOL/USDT"), trade("BTC/USDT")]);
        book.flush(|_| Ok(())).unwrap();
        book.add_pending([
            trade("ETH/USDT"),
            Subscription::with_symbol("kline", "XRP/USDT"),
        ]);

        assert_eq!(
            book.running_symbols("trade"),
            vec!["BTC/USDT", "ETH/USDT", "SOL/USDT"]
        );
        assert!(book.has_running_symbol("trade", "ETH/USDT"));
        assert!(!book.has_running_symbol("trade", "XRP/USDT"));
        assert_eq!(
            book.active_channels().into_iter().collect::<Vec<_>>(),
            vec!["kline", "trade"]
        );
        assert!(book.has_completed_channel("trade"));
        assert!(!book.has_completed_channel("kline"));
    }
}
