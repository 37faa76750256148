//! Publish-on-write value cells.
//!
//! An [`Observable`] wraps a `tokio::sync::watch` channel. Writers call
//! [`Observable::set`], which only notifies watchers (and reports a change to
//! the caller, so it can fire side effects) when the value actually differs.
//! Every waiter owns its own receiver, so dropping a waiting future never
//! disturbs other waiters.

use std::fmt;
use tokio::sync::watch;

/// A value that notifies subscribers when it changes.
pub struct Observable<T> {
    sender: watch::Sender<T>,
}

impl<T> Observable<T>
where
    T: Clone + PartialEq,
{
    /// Create a cell holding `initial`.
    #[must_use]
    pub fn new(initial: T) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Current value (cloned so the watch lock is not held by the caller).
    #[must_use]
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Replace the value.
    ///
    /// Returns the previous value when the write changed anything, `None`
    /// for a redundant same-value write (no notification is sent).
    pub fn set(&self, value: T) -> Option<T> {
        let mut previous = None;
        self.sender.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                previous = Some(std::mem::replace(current, value));
                true
            }
        });
        previous
    }

    /// Subscribe to future changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }

    /// Wait until the value satisfies `predicate` and return it.
    pub async fn wait_for(&self, predicate: impl FnMut(&T) -> bool) -> T {
        let mut receiver = self.sender.subscribe();
        let result = receiver.wait_for(predicate).await.map(|value| value.clone());
        // The sender lives as long as `self`, so the channel cannot close here.
        result.unwrap_or_else(|_| self.get())
    }
}

impl<U> Observable<Option<U>>
where
    U: Clone + PartialEq,
{
    /// Wait for the first non-empty value.
    ///
    /// Resolves immediately when a value is already present.
    pub async fn first_value(&self) -> U {
        let mut receiver = self.sender.subscribe();
        loop {
            let current = receiver.borrow_and_update().clone();
            if let Some(value) = current {
                return value;
            }
            if receiver.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

impl<T> fmt::Debug for Observable<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Observable").field(&*self.sender.borrow()).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_set_reports_previous_only_on_change() {
        let cell = Observable::new(1u32);
        assert_eq!(cell.set(1), None);
        assert_eq!(cell.set(2), Some(1));
        assert_eq!(cell.get(), 2);
    }

    #[tokio::test]
    async fn test_redundant_write_does_not_notify() {
        let cell = Observable::new("a".to_string());
        let mut rx = cell.subscribe();
        cell.set("a".to_string());
        assert!(!rx.has_changed().unwrap());
        cell.set("b".to_string());
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_first_value_waits_for_some() {
        let cell = Arc::new(Observable::new(None::<String>));
        let waiter = {
            let cell = Arc::clone(&cell);
            tokio::spawn(async move { cell.first_value().await })
        };

        tokio::task::yield_now().await;
        cell.set(Some("RM_1".to_string()));

        let value = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, "RM_1");
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_affect_others() {
        let cell = Arc::new(Observable::new(None::<u32>));

        // Start a waiter and abandon it.
        let abandoned = tokio::time::timeout(Duration::from_millis(10), cell.first_value()).await;
        assert!(abandoned.is_err());

        let waiter = {
            let cell = Arc::clone(&cell);
            tokio::spawn(async move { cell.first_value().await })
        };
        tokio::task::yield_now().await;
        cell.set(Some(7));
        assert_eq!(waiter.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_wait_for_predicate() {
        let cell = Arc::new(Observable::new(0u32));
        let waiter = {
            let cell = Arc::clone(&cell);
            tokio::spawn(async move { cell.wait_for(|v| *v >= 3).await })
        };
        for i in 1..=3 {
            cell.set(i);
            tokio::task::yield_now().await;
        }
        assert_eq!(waiter.await.unwrap(), 3);
    }
}
