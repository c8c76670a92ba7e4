//! NPS survey callbacks (`nps:<score>`).

use std::sync::Arc;

use growth_core::event_bus::{EmitReport, EventBus};
use growth_core::types::{AutomationEvent, GrowthEvent, GrowthEventKind, UserId};
use growth_core::GrowthResult;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::repository::GrowthEventRepository;
use crate::runner::MessageSender;

/// Event emitted after a user answers the survey.
pub const NPS_ANSWERED: &str = "nps_answered";

const NPS_PREFIX: &str = "nps:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NpsCategory {
    Promoter,
    Neutral,
    Detractor,
}

impl NpsCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Promoter => "promoter",
            Self::Neutral => "neutral",
            Self::Detractor => "detractor",
        }
    }
}

/// Score and category for a rating callback, `None` for anything that is
/// not `nps:1` to `nps:5`.
pub fn parse_nps(data: &str) -> Option<(u8, NpsCategory)> {
    match data.strip_prefix(NPS_PREFIX)? {
        "5" => Some((5, NpsCategory::Promoter)),
        "4" => Some((4, NpsCategory::Promoter)),
        "3" => Some((3, NpsCategory::Neutral)),
        "2" => Some((2, NpsCategory::Detractor)),
        "1" => Some((1, NpsCategory::Detractor)),
        _ => None,
    }
}

/// Result of a handled rating.
#[derive(Debug, Clone)]
pub struct FeedbackReceipt {
    pub score: u8,
    pub category: NpsCategory,
    pub emit: EmitReport,
}

/// Records ratings and republishes them on the bus. Detractor scores are
/// forwarded to the moderator chat when one is configured.
pub struct FeedbackHandler {
    events: Arc<dyn GrowthEventRepository>,
    bus: EventBus,
    sender: Arc<dyn MessageSender>,
    moderator_chat_id: Option<i64>,
}

impl FeedbackHandler {
    pub fn new(
        events: Arc<dyn GrowthEventRepository>,
        bus: EventBus,
        sender: Arc<dyn MessageSender>,
        moderator_chat_id: Option<i64>,
    ) -> Self {
        Self {
            events,
            bus,
            sender,
            moderator_chat_id,
        }
    }

    /// Handles a callback payload. Returns `Ok(None)` for payloads that are
    /// not a valid rating.
    ///
    /// # Errors
    ///
    /// Propagates the repository error when the rating cannot be recorded.
    pub async fn handle_callback(&self, user_id: UserId, data: &str) -> GrowthResult<Option<FeedbackReceipt>> {
        let Some((score, category)) = parse_nps(data) else {
            return Ok(None);
        };

        self.events
            .append(GrowthEvent::new(user_id, GrowthEventKind::Feedback, score as f64))
            .await?;
        info!(user_id, score, category = category.as_str(), "NPS answer recorded");

        if category == NpsCategory::Detractor {
            self.notify_moderator(user_id, score).await;
        }

        let event = AutomationEvent::new(NPS_ANSWERED, user_id)
            .with_field("score", score)
            .with_field("category", category.as_str());
        let emit = self.bus.emit(&event).await;

        Ok(Some(FeedbackReceipt { score, category, emit }))
    }

    async fn notify_moderator(&self, user_id: UserId, score: u8) {
        let Some(chat_id) = self.moderator_chat_id else {
            return;
        };
        let text = format!("User {} rated the service {}/5", user_id, score);
        if let Err(e) = self.sender.send_message(chat_id, &text, &[]).await {
            warn!(user_id, chat_id, error = %e, "Failed to notify moderator");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use async_trait::async_trait;
    use growth_core::event_bus::FnListener;
    use growth_core::types::ButtonAction;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Outbox(Mutex<Vec<(i64, String)>>);

    #[async_trait]
    impl MessageSender for Outbox {
        async fn send_message(&self, chat_id: i64, text: &str, _buttons: &[ButtonAction]) -> anyhow::Result<()> {
            self.0.lock().push((chat_id, text.to_string()));
            Ok(())
        }
    }

    #[test]
    fn test_parse_nps() {
        assert_eq!(parse_nps("nps:5"), Some((5, NpsCategory::Promoter)));
        assert_eq!(parse_nps("nps:4"), Some((4, NpsCategory::Promoter)));
        assert_eq!(parse_nps("nps:3"), Some((3, NpsCategory::Neutral)));
        assert_eq!(parse_nps("nps:2"), Some((2, NpsCategory::Detractor)));
        assert_eq!(parse_nps("nps:1"), Some((1, NpsCategory::Detractor)));
        assert_eq!(parse_nps("nps:0"), None);
        assert_eq!(parse_nps("nps:6"), None);
        assert_eq!(parse_nps("other:1"), None);
        assert_eq!(parse_nps("nps:"), None);
        assert_eq!(parse_nps("nps:+5"), None);
        assert_eq!(parse_nps("nps:05"), None);
        assert_eq!(parse_nps("nps: 4"), None);
    }

    #[tokio::test]
    async fn test_callback_records_and_emits() {
        let store = Arc::new(InMemoryStore::new());
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.on_event(Arc::new(FnListener::new("capture", move |e: &AutomationEvent| {
            sink.lock().push(e.clone());
            Ok(())
        })));
        let outbox = Arc::new(Outbox::default());
        let handler = FeedbackHandler::new(store.clone(), bus, outbox.clone(), Some(-100));

        let receipt = handler.handle_callback(9, "nps:2").await.unwrap().unwrap();
        assert_eq!(receipt.category, NpsCategory::Detractor);
        assert!(receipt.emit.is_clean());

        let events = store.list_for_user(9).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, GrowthEventKind::Feedback);
        assert!((events[0].amount - 2.0).abs() < f64::EPSILON);

        let seen = seen.lock();
        assert_eq!(seen[0].event_type, NPS_ANSWERED);
        assert_eq!(seen[0].fields["category"], "detractor");
        assert_eq!(outbox.0.lock()[0].0, -100);
    }

    #[tokio::test]
    async fn test_invalid_callback_ignored() {
        let store = Arc::new(InMemoryStore::new());
        let outbox = Arc::new(Outbox::default());
        let handler = FeedbackHandler::new(store.clone(), EventBus::new(), outbox.clone(), None);

        assert!(handler.handle_callback(9, "other:1").await.unwrap().is_none());
        assert!(handler.handle_callback(9, "nps:1").await.unwrap().is_some());
        assert_eq!(store.growth_events().len(), 1);
        assert!(outbox.0.lock().is_empty());
    }
}
