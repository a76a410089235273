use crate::error::Result;
use crate::storage::{text_column, timestamp_column, Storage};
use crate::types::{LotteryId, Winner};
use rusqlite::params;

pub struct WinnerStore<'a> {
    storage: &'a Storage,
}

impl<'a> WinnerStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Winners of a lottery ordered by position.
    pub async fn list(&self, lottery_id: LotteryId) -> Result<Vec<Winner>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(
            "SELECT lottery_id, user_id, position, drawn_at, verification_hash
             FROM lottery_winners WHERE lottery_id = ?1 ORDER BY position ASC",
        )?;

        let winners = stmt
            .query_map(params![lottery_id.to_string()], |row| {
                let lottery_id: String = row.get(0)?;
                Ok(Winner {
                    lottery_id: text_column(&lottery_id, 0, "lottery_id")?,
                    user_id: row.get(1)?,
                    position: row.get(2)?,
                    drawn_at: timestamp_column(row.get(3)?, 3, "drawn_at")?,
                    verification_hash: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(winners)
    }

    pub async fn count(&self, lottery_id: LotteryId) -> Result<u32> {
        let conn = self.storage.get_connection().await;

        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM lottery_winners WHERE lottery_id = ?1",
            params![lottery_id.to_string()],
            |row| row.get(0),
        )?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::lottery_store::tests::sample_lottery;
    use crate::storage::LotteryStore;
    use crate::types::{DrawAlgorithm, DrawRng, VerificationRecord};
    use chrono::Utc;

    #[tokio::test]
    async fn test_duplicate_positions_roll_back_whole_draw() {
        let storage = Storage::in_memory().await.unwrap();
        let store = LotteryStore::new(&storage);
        let now = Utc::now();
        let lottery = sample_lottery(now);
        store.insert(&lottery).await.unwrap();
        store.begin_draw(lottery.id, now).await.unwrap();

        let winner = |user_id, position| Winner {
            lottery_id: lottery.id,
            user_id,
            position,
            drawn_at: now,
            verification_hash: "00".to_string(),
        };
        let record = VerificationRecord {
            seed: 1,
            timestamp: now.to_rfc3339(),
            lottery_id: lottery.id,
            winner_ids: vec![2, 3],
            candidate_ids: vec![2, 3],
            designated_ids: Vec::new(),
            candidate_count: 2,
            winner_count: 2,
            algorithm: DrawAlgorithm::FisherYates,
            rng: DrawRng::ChaCha20,
        };

        let result = store
            .complete_draw(lottery.id, &[winner(2, 1), winner(3, 1)], &record, now)
            .await;
        assert!(result.is_err());

        let winners = WinnerStore::new(&storage);
        assert_eq!(winners.count(lottery.id).await.unwrap(), 0);
        assert!(store.load(lottery.id).await.unwrap().draw_seed.is_none());

        store
            .complete_draw(lottery.id, &[winner(2, 1), winner(3, 2)], &record, now)
            .await
            .unwrap();
        let listed = winners.list(lottery.id).await.unwrap();
        assert_eq!(
            listed.iter().map(|w| w.position).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }
}
