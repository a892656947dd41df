//! デモ用のハンドラとイベント生成

use async_trait::async_trait;
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::info;

use tether_core::domain::{Event, HandlerError};
use tether_core::typed::{Handler, Message};

const ADJECTIVES: &[&str] = &["quiet", "brave", "amber", "swift", "lucky", "misty", "bold"];
const NOUNS: &[&str] = &["river", "falcon", "cedar", "harbor", "comet", "meadow", "lantern"];

/// Rejects a fixed share of messages at random, so the checker has something to reclaim.
pub struct RandomReject {
    rate: f64,
}

impl RandomReject {
    pub fn new(rate: f64) -> Self {
        // clamp は NaN をそのまま返す
        let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        Self { rate }
    }
}

#[async_trait]
impl Handler<Event> for RandomReject {
    async fn handle(&self, message: &Message<Event>) -> Result<(), HandlerError> {
        if rand::thread_rng().gen_bool(self.rate) {
            return Err(HandlerError::new(format!(
                "randomly rejected {}",
                message.data.name
            )));
        }
        info!(
            id = %message.id,
            name = %message.data.name,
            priority = message.data.priority,
            time = %message.data.time,
            "processed event"
        );
        Ok(())
    }
}

pub fn random_event() -> Event {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("quiet");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("river");
    Event::now(format!("{adjective}-{noun}"), rng.gen_range(1..=10))
}

pub fn random_events() -> impl Iterator<Item = Event> + Send {
    std::iter::repeat_with(random_event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::domain::EntryId;

    fn message() -> Message<Event> {
        Message {
            id: EntryId::new(1, 0),
            stream: "main-stream".to_string(),
            data: random_event(),
        }
    }

    #[tokio::test]
    async fn rate_zero_accepts_and_rate_one_rejects() {
        assert!(RandomReject::new(0.0).handle(&message()).await.is_ok());
        assert!(RandomReject::new(1.0).handle(&message()).await.is_err());
        // 範囲外は丸める
        assert!(RandomReject::new(7.0).handle(&message()).await.is_err());
        assert!(RandomReject::new(f64::NAN).handle(&message()).await.is_ok());
    }

    #[test]
    fn random_events_look_like_demo_events() {
        for event in random_events().take(20) {
            assert!((1..=10).contains(&event.priority));
            assert!(event.name.contains('-'));
            assert!(event.time.ends_with('Z'));
        }
    }
}
