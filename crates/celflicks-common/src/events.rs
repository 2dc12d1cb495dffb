use tokio::sync::broadcast;

/// Fan-out notification bus. Slow subscribers lag rather than block publishers.
pub struct EventBus<E: Clone> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: E) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}
