use marquee_shared::SeatEvent;
use tokio::sync::broadcast;
use tracing::debug;

/// Fan-out of seat state changes to live seat-map consumers.
/// Publishing never fails: with no subscribers the event is dropped.
#[derive(Clone)]
pub struct SeatEventBus {
    tx: broadcast::Sender<SeatEvent>,
}

impl SeatEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SeatEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: SeatEvent) {
        let seat_label = event.seat_label().to_string();
        let showtime_id = event.showtime_id();
        match self.tx.send(event) {
            Ok(receivers) => debug!("Seat event {}/{} sent to {} subscribers", showtime_id, seat_label, receivers),
            Err(_) => debug!("Seat event {}/{} dropped, no subscribers", showtime_id, seat_label),
        }
    }
}

impl Default for SeatEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
