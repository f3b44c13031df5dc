// AsyncQueue: single-producer single-consumer FIFO hand-off, used inside the
// Environment to decouple SDK stream callbacks from the async iteration loop
// that drives them onto the bus. Backed by `tokio::sync::mpsc`, whose internal
// wake mechanism already gives us "direct hand-off when a consumer is
// waiting, buffered otherwise" for free.

use tokio::sync::mpsc;

pub struct AsyncQueueSender<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for AsyncQueueSender<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T> AsyncQueueSender<T> {
    /// Push an item. Silently dropped if the queue has been closed.
    pub fn push(&self, item: T) {
        let _ = self.tx.send(item);
    }
}

pub struct AsyncQueueReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> AsyncQueueReceiver<T> {
    /// Await the next item, or `None` once the queue is closed and drained.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

/// Creates a fresh queue. Dropping the sender is equivalent to `close()`:
/// the receiver drains whatever was buffered, then observes `None`.
pub fn async_queue<T>() -> (AsyncQueueSender<T>, AsyncQueueReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (AsyncQueueSender { tx }, AsyncQueueReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn preserves_order() {
        let (tx, mut rx) = async_queue::<i32>();
        tx.push(1);
        tx.push(2);
        tx.push(3);
        assert_eq!(rx.next().await, Some(1));
        assert_eq!(rx.next().await, Some(2));
        assert_eq!(rx.next().await, Some(3));
    }

    #[tokio::test]
    async fn closing_drains_then_ends() {
        let (tx, mut rx) = async_queue::<i32>();
        tx.push(1);
        drop(tx);
        assert_eq!(rx.next().await, Some(1));
        assert_eq!(rx.next().await, None);
    }

    #[tokio::test]
    async fn direct_handoff_to_waiting_consumer() {
        let (tx, mut rx) = async_queue::<i32>();
        let consumer = tokio::spawn(async move { rx.next().await });
        tokio::task::yield_now().await;
        tx.push(42);
        assert_eq!(consumer.await.unwrap(), Some(42));
    }
}
