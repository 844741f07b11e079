//! Persistence seam. The core only ever touches this narrow contract; the
//! actual store (relational or document) lives with the collaborator and is
//! selected at boot.

use async_trait::async_trait;

use crate::types::{Card, LlmUsageLog, PersistedReading};

#[async_trait]
pub trait DatabaseProvider: Send + Sync {
    async fn get_card_by_id(&self, card_id: u32) -> anyhow::Result<Option<Card>>;

    async fn get_cards(&self, page: usize, page_size: usize) -> anyhow::Result<Vec<Card>>;

    /// `count` distinct random cards for a draw.
    async fn get_random_cards(&self, count: usize) -> anyhow::Result<Vec<Card>>;

    async fn create_reading(&self, reading: &PersistedReading) -> anyhow::Result<PersistedReading>;

    /// Document backends may embed usage logs in the reading record, in
    /// which case this is a no-op.
    async fn create_llm_usage_log(
        &self,
        reading_id: &str,
        log: &LlmUsageLog,
    ) -> anyhow::Result<()>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory provider used by the shuffle and streaming tests.
    pub(crate) struct MemoryDb {
        pub cards: Vec<Card>,
        pub readings: Mutex<Vec<PersistedReading>>,
        pub fail_writes: AtomicBool,
    }

    impl MemoryDb {
        pub fn with_cards(cards: Vec<Card>) -> Self {
            Self {
                cards,
                readings: Mutex::new(Vec::new()),
                fail_writes: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl DatabaseProvider for MemoryDb {
        async fn get_card_by_id(&self, card_id: u32) -> anyhow::Result<Option<Card>> {
            Ok(self.cards.iter().find(|c| c.id == card_id).cloned())
        }

        async fn get_cards(&self, page: usize, page_size: usize) -> anyhow::Result<Vec<Card>> {
            Ok(self
                .cards
                .iter()
                .skip(page * page_size)
                .take(page_size)
                .cloned()
                .collect())
        }

        async fn get_random_cards(&self, count: usize) -> anyhow::Result<Vec<Card>> {
            Ok(self.cards.iter().take(count).cloned().collect())
        }

        async fn create_reading(
            &self,
            reading: &PersistedReading,
        ) -> anyhow::Result<PersistedReading> {
            if self.fail_writes.load(Ordering::SeqCst) {
                anyhow::bail!("write failed");
            }
            self.readings.lock().push(reading.clone());
            Ok(reading.clone())
        }

        async fn create_llm_usage_log(
            &self,
            _reading_id: &str,
            _log: &LlmUsageLog,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }
}
