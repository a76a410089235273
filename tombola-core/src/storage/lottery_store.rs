use crate::error::{Result, TombolaError};
use crate::storage::{text_column, timestamp_column, Storage};
use crate::types::{
    CancelReason, Lottery, LotteryId, LotteryStatus, UserId, VerificationRecord, Winner,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

const LOTTERY_COLUMNS: &str = "id, owner_id, topic_id, title, description, prize, winner_count,
    min_participants, draw_strategy, insufficient_strategy, specific_post_numbers, end_time,
    status, participant_count, drawn_at, draw_seed, verification_record, cancel_reason,
    created_at, updated_at";

/// Participants frozen by the `Active -> Drawing` transition.
#[derive(Debug, Clone)]
pub struct DrawSnapshot {
    pub lottery: Lottery,
    /// Registered participants ordered by ascending user id.
    pub participants: Vec<UserId>,
}

pub struct LotteryStore<'a> {
    storage: &'a Storage,
}

impl<'a> LotteryStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    pub async fn insert(&self, lottery: &Lottery) -> Result<()> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "INSERT INTO lotteries
             (id, owner_id, topic_id, title, description, prize, winner_count, min_participants,
              draw_strategy, insufficient_strategy, specific_post_numbers, end_time, status,
              participant_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 0, ?14, ?15)",
            params![
                lottery.id.to_string(),
                lottery.owner_id,
                lottery.topic_id,
                lottery.title,
                lottery.description,
                lottery.prize,
                lottery.winner_count,
                lottery.min_participants,
                lottery.draw_strategy.as_str(),
                lottery.insufficient_strategy.as_str(),
                serde_json::to_string(&lottery.specific_post_numbers)?,
                lottery.end_time.timestamp(),
                lottery.status.as_str(),
                lottery.created_at.timestamp(),
                lottery.updated_at.timestamp(),
            ],
        )?;

        tracing::debug!("Inserted lottery {}", lottery.id);
        Ok(())
    }

    pub async fn find(&self, id: LotteryId) -> Result<Option<Lottery>> {
        let conn = self.storage.get_connection().await;

        let result = conn.query_row(
            &format!("SELECT {} FROM lotteries WHERE id = ?1", LOTTERY_COLUMNS),
            params![id.to_string()],
            lottery_from_row,
        );

        match result {
            Ok(lottery) => Ok(Some(lottery)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(TombolaError::Storage(e)),
        }
    }

    pub async fn load(&self, id: LotteryId) -> Result<Lottery> {
        self.find(id)
            .await?
            .ok_or(TombolaError::LotteryNotFound(id))
    }

    /// Active lotteries whose deadline is at or before `now`.
    pub async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<LotteryId>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(
            "SELECT id FROM lotteries WHERE status = 'active' AND end_time <= ?1
             ORDER BY end_time ASC",
        )?;

        let ids = stmt
            .query_map(params![now.timestamp()], |row| {
                let id: String = row.get(0)?;
                text_column(&id, 0, "id")
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ids)
    }

    /// Active lotteries still accepting participants, soonest deadline first.
    pub async fn list_open(&self, now: DateTime<Utc>) -> Result<Vec<Lottery>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM lotteries WHERE status = 'active' AND end_time > ?1
             ORDER BY end_time ASC",
            LOTTERY_COLUMNS
        ))?;

        let lotteries = stmt
            .query_map(params![now.timestamp()], lottery_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(lotteries)
    }

    pub async fn list_by_status(&self, status: LotteryStatus) -> Result<Vec<Lottery>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM lotteries WHERE status = ?1 ORDER BY created_at ASC",
            LOTTERY_COLUMNS
        ))?;

        let lotteries = stmt
            .query_map(params![status.as_str()], lottery_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(lotteries)
    }

    /// Completed lotteries drawn at or before `drawn_before` whose winners
    /// have not been announced yet.
    pub async fn list_notification_due(
        &self,
        drawn_before: DateTime<Utc>,
    ) -> Result<Vec<LotteryId>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(
            "SELECT id FROM lotteries
             WHERE status = 'completed' AND winners_notified_at IS NULL AND drawn_at <= ?1
             ORDER BY drawn_at ASC",
        )?;

        let ids = stmt
            .query_map(params![drawn_before.timestamp()], |row| {
                let id: String = row.get(0)?;
                text_column(&id, 0, "id")
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ids)
    }

    /// Claims the winner announcement of a completed lottery. Only the first
    /// caller gets true.
    pub async fn mark_winners_notified(&self, id: LotteryId, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.storage.get_connection().await;

        let updated = conn.execute(
            "UPDATE lotteries SET winners_notified_at = ?1
             WHERE id = ?2 AND status = 'completed' AND winners_notified_at IS NULL",
            params![now.timestamp(), id.to_string()],
        )?;

        Ok(updated == 1)
    }

    /// Persist edited configuration. Returns false if the lottery is no longer
    /// active.
    pub async fn update_settings(&self, lottery: &Lottery) -> Result<bool> {
        let conn = self.storage.get_connection().await;

        let updated = conn.execute(
            "UPDATE lotteries SET topic_id = ?1, title = ?2, description = ?3, prize = ?4,
                winner_count = ?5, min_participants = ?6, draw_strategy = ?7,
                insufficient_strategy = ?8, specific_post_numbers = ?9, end_time = ?10,
                updated_at = ?11
             WHERE id = ?12 AND status = 'active'",
            params![
                lottery.topic_id,
                lottery.title,
                lottery.description,
                lottery.prize,
                lottery.winner_count,
                lottery.min_participants,
                lottery.draw_strategy.as_str(),
                lottery.insufficient_strategy.as_str(),
                serde_json::to_string(&lottery.specific_post_numbers)?,
                lottery.end_time.timestamp(),
                lottery.updated_at.timestamp(),
                lottery.id.to_string(),
            ],
        )?;

        Ok(updated == 1)
    }

    /// Compare-and-swap `Active -> Drawing` and read the participant list in
    /// the same transaction. `None` means another caller won the transition.
    pub async fn begin_draw(&self, id: LotteryId, now: DateTime<Utc>) -> Result<Option<DrawSnapshot>> {
        self.start_draw(id, now, false).await
    }

    /// Like [`begin_draw`](Self::begin_draw), but the stored deadline must
    /// also have passed. `None` when the lottery is no longer Active or its
    /// deadline was moved past `now`.
    pub async fn begin_due_draw(
        &self,
        id: LotteryId,
        now: DateTime<Utc>,
    ) -> Result<Option<DrawSnapshot>> {
        self.start_draw(id, now, true).await
    }

    async fn start_draw(
        &self,
        id: LotteryId,
        now: DateTime<Utc>,
        due_only: bool,
    ) -> Result<Option<DrawSnapshot>> {
        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction()?;

        let swapped = tx.execute(
            "UPDATE lotteries SET status = 'drawing', updated_at = ?1
             WHERE id = ?2 AND status = 'active' AND (?3 = 0 OR end_time <= ?1)",
            params![now.timestamp(), id.to_string(), due_only],
        )?;

        if swapped == 0 {
            return Ok(None);
        }

        let lottery = tx.query_row(
            &format!("SELECT {} FROM lotteries WHERE id = ?1", LOTTERY_COLUMNS),
            params![id.to_string()],
            lottery_from_row,
        )?;

        let participants = {
            let mut stmt = tx.prepare(
                "SELECT user_id FROM lottery_participants WHERE lottery_id = ?1
                 ORDER BY user_id ASC",
            )?;
            let rows = stmt
                .query_map(params![id.to_string()], |row| row.get::<_, UserId>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        tx.commit()?;

        tracing::info!(
            "Lottery {} entered drawing with {} registered participants",
            id,
            participants.len()
        );

        Ok(Some(DrawSnapshot {
            lottery,
            participants,
        }))
    }

    /// `Drawing -> Completed`, writing seed, verification record and winner
    /// rows atomically.
    pub async fn complete_draw(
        &self,
        id: LotteryId,
        winners: &[Winner],
        verification: &VerificationRecord,
        drawn_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE lotteries SET status = 'completed', drawn_at = ?1, draw_seed = ?2,
                verification_record = ?3, updated_at = ?1
             WHERE id = ?4 AND status = 'drawing' AND draw_seed IS NULL",
            params![
                drawn_at.timestamp(),
                verification.seed,
                serde_json::to_string(verification)?,
                id.to_string(),
            ],
        )?;

        if updated == 0 {
            return Err(TombolaError::internal(format!(
                "Lottery {} is not drawing, refusing to record winners",
                id
            )));
        }

        for winner in winners {
            tx.execute(
                "INSERT INTO lottery_winners
                 (lottery_id, user_id, position, drawn_at, verification_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    winner.lottery_id.to_string(),
                    winner.user_id,
                    winner.position,
                    winner.drawn_at.timestamp(),
                    winner.verification_hash,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Move to Cancelled if the lottery is currently in `from`. Returns false
    /// when the status had already changed.
    pub async fn cancel(
        &self,
        id: LotteryId,
        from: LotteryStatus,
        reason: &CancelReason,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.storage.get_connection().await;

        let updated = conn.execute(
            "UPDATE lotteries SET status = 'cancelled', cancel_reason = ?1, updated_at = ?2
             WHERE id = ?3 AND status = ?4",
            params![
                reason.to_string(),
                now.timestamp(),
                id.to_string(),
                from.as_str()
            ],
        )?;

        Ok(updated == 1)
    }

    /// Delete finished lotteries created before `cutoff`; participants and
    /// winners go with them.
    pub async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.storage.get_connection().await;

        let deleted = conn.execute(
            "DELETE FROM lotteries
             WHERE status IN ('completed', 'cancelled') AND created_at < ?1",
            params![cutoff.timestamp()],
        )?;

        if deleted > 0 {
            tracing::info!("Cleaned up {} finished lotteries", deleted);
        }
        Ok(deleted)
    }
}

fn lottery_from_row(row: &Row<'_>) -> rusqlite::Result<Lottery> {
    let id: String = row.get(0)?;
    let draw_strategy: String = row.get(8)?;
    let insufficient_strategy: String = row.get(9)?;
    let post_numbers: String = row.get(10)?;
    let status: String = row.get(12)?;
    let drawn_at: Option<i64> = row.get(14)?;
    let verification: Option<String> = row.get(16)?;
    let cancel_reason: Option<String> = row.get(17)?;

    let specific_post_numbers: Vec<u32> = serde_json::from_str(&post_numbers).map_err(|_| {
        rusqlite::Error::InvalidColumnType(
            10,
            "specific_post_numbers".to_string(),
            rusqlite::types::Type::Text,
        )
    })?;

    let verification: Option<VerificationRecord> = verification
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|_| {
            rusqlite::Error::InvalidColumnType(
                16,
                "verification_record".to_string(),
                rusqlite::types::Type::Text,
            )
        })?;

    Ok(Lottery {
        id: text_column(&id, 0, "id")?,
        owner_id: row.get(1)?,
        topic_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        prize: row.get(5)?,
        winner_count: row.get(6)?,
        min_participants: row.get(7)?,
        draw_strategy: text_column(&draw_strategy, 8, "draw_strategy")?,
        insufficient_strategy: text_column(&insufficient_strategy, 9, "insufficient_strategy")?,
        specific_post_numbers,
        end_time: timestamp_column(row.get(11)?, 11, "end_time")?,
        status: text_column(&status, 12, "status")?,
        participant_count: row.get(13)?,
        drawn_at: drawn_at
            .map(|secs| timestamp_column(secs, 14, "drawn_at"))
            .transpose()?,
        draw_seed: row.get(15)?,
        verification,
        cancel_reason: cancel_reason
            .map(|reason| text_column(&reason, 17, "cancel_reason"))
            .transpose()?,
        created_at: timestamp_column(row.get(18)?, 18, "created_at")?,
        updated_at: timestamp_column(row.get(19)?, 19, "updated_at")?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{DrawAlgorithm, DrawRng, DrawStrategy, InsufficientStrategy};
    use chrono::Duration;
    use uuid::Uuid;

    pub(crate) fn sample_lottery(now: DateTime<Utc>) -> Lottery {
        Lottery {
            id: Uuid::new_v4(),
            owner_id: 1,
            topic_id: Some(10),
            title: "Sticker giveaway".to_string(),
            description: String::new(),
            prize: "Stickers".to_string(),
            winner_count: 2,
            min_participants: 2,
            draw_strategy: DrawStrategy::Random,
            insufficient_strategy: InsufficientStrategy::Cancel,
            specific_post_numbers: Vec::new(),
            end_time: now + Duration::hours(1),
            status: LotteryStatus::Active,
            participant_count: 0,
            drawn_at: None,
            draw_seed: None,
            verification: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_record(id: LotteryId) -> VerificationRecord {
        VerificationRecord {
            seed: 42,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            lottery_id: id,
            winner_ids: vec![7],
            candidate_ids: vec![7],
            designated_ids: Vec::new(),
            candidate_count: 1,
            winner_count: 1,
            algorithm: DrawAlgorithm::FisherYates,
            rng: DrawRng::ChaCha20,
        }
    }

    #[tokio::test]
    async fn test_insert_and_load_round_trip() {
        let storage = Storage::in_memory().await.unwrap();
        let store = LotteryStore::new(&storage);
        let now = Utc::now();
        let lottery = sample_lottery(now);

        store.insert(&lottery).await.unwrap();
        let loaded = store.load(lottery.id).await.unwrap();

        assert_eq!(loaded.title, lottery.title);
        assert_eq!(loaded.status, LotteryStatus::Active);
        assert_eq!(loaded.end_time.timestamp(), lottery.end_time.timestamp());
        assert!(loaded.verification.is_none());

        let missing = store.load(Uuid::new_v4()).await;
        assert!(matches!(missing, Err(TombolaError::LotteryNotFound(_))));
    }

    #[tokio::test]
    async fn test_begin_draw_is_single_flight() {
        let storage = Storage::in_memory().await.unwrap();
        let store = LotteryStore::new(&storage);
        let now = Utc::now();
        let lottery = sample_lottery(now);
        store.insert(&lottery).await.unwrap();

        let first = store.begin_draw(lottery.id, now).await.unwrap();
        let second = store.begin_draw(lottery.id, now).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(
            store.load(lottery.id).await.unwrap().status,
            LotteryStatus::Drawing
        );
    }

    #[tokio::test]
    async fn test_due_draw_waits_for_stored_deadline() {
        let storage = Storage::in_memory().await.unwrap();
        let store = LotteryStore::new(&storage);
        let now = Utc::now();
        let mut lottery = sample_lottery(now);
        store.insert(&lottery).await.unwrap();

        let early = store.begin_due_draw(lottery.id, now).await.unwrap();
        assert!(early.is_none());
        assert_eq!(
            store.load(lottery.id).await.unwrap().status,
            LotteryStatus::Active
        );

        // deadline extended after a caller saw the old one
        let old_end = lottery.end_time;
        lottery.end_time = old_end + chrono::Duration::hours(1);
        store.update_settings(&lottery).await.unwrap();
        let stale = store.begin_due_draw(lottery.id, old_end).await.unwrap();
        assert!(stale.is_none());

        let due = store
            .begin_due_draw(lottery.id, lottery.end_time)
            .await
            .unwrap();
        assert!(due.is_some());
    }

    #[tokio::test]
    async fn test_winner_announcement_claimed_once() {
        let storage = Storage::in_memory().await.unwrap();
        let store = LotteryStore::new(&storage);
        let now = Utc::now();
        let lottery = sample_lottery(now);
        store.insert(&lottery).await.unwrap();

        assert!(!store.mark_winners_notified(lottery.id, now).await.unwrap());

        store.begin_draw(lottery.id, now).await.unwrap();
        store
            .complete_draw(lottery.id, &[], &sample_record(lottery.id), now)
            .await
            .unwrap();

        let before = now - chrono::Duration::seconds(1);
        assert!(store.list_notification_due(before).await.unwrap().is_empty());
        assert_eq!(
            store.list_notification_due(now).await.unwrap(),
            vec![lottery.id]
        );

        assert!(store.mark_winners_notified(lottery.id, now).await.unwrap());
        assert!(!store.mark_winners_notified(lottery.id, now).await.unwrap());
        assert!(store.list_notification_due(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_complete_draw_requires_drawing_status() {
        let storage = Storage::in_memory().await.unwrap();
        let store = LotteryStore::new(&storage);
        let now = Utc::now();
        let lottery = sample_lottery(now);
        store.insert(&lottery).await.unwrap();

        let record = sample_record(lottery.id);
        let result = store.complete_draw(lottery.id, &[], &record, now).await;
        assert!(result.is_err());

        store.begin_draw(lottery.id, now).await.unwrap();
        store
            .complete_draw(lottery.id, &[], &record, now)
            .await
            .unwrap();

        let loaded = store.load(lottery.id).await.unwrap();
        assert_eq!(loaded.status, LotteryStatus::Completed);
        assert_eq!(loaded.draw_seed, Some(42));
        assert_eq!(loaded.verification, Some(record.clone()));

        // Seed and record are written exactly once
        let again = store.complete_draw(lottery.id, &[], &record, now).await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_cancel_only_from_expected_status() {
        let storage = Storage::in_memory().await.unwrap();
        let store = LotteryStore::new(&storage);
        let now = Utc::now();
        let lottery = sample_lottery(now);
        store.insert(&lottery).await.unwrap();

        let wrong = store
            .cancel(lottery.id, LotteryStatus::Drawing, &CancelReason::Manual, now)
            .await
            .unwrap();
        assert!(!wrong);

        let cancelled = store
            .cancel(lottery.id, LotteryStatus::Active, &CancelReason::Manual, now)
            .await
            .unwrap();
        assert!(cancelled);

        let loaded = store.load(lottery.id).await.unwrap();
        assert_eq!(loaded.status, LotteryStatus::Cancelled);
        assert_eq!(loaded.cancel_reason, Some(CancelReason::Manual));
    }

    #[tokio::test]
    async fn test_list_due_and_open() {
        let storage = Storage::in_memory().await.unwrap();
        let store = LotteryStore::new(&storage);
        let now = Utc::now();

        let mut early = sample_lottery(now);
        early.end_time = now + Duration::minutes(5);
        let late = sample_lottery(now);
        store.insert(&early).await.unwrap();
        store.insert(&late).await.unwrap();

        let later = now + Duration::minutes(10);
        assert_eq!(store.list_due(later).await.unwrap(), vec![early.id]);

        let open = store.list_open(later).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, late.id);
    }

    #[tokio::test]
    async fn test_delete_finished_before_keeps_active() {
        let storage = Storage::in_memory().await.unwrap();
        let store = LotteryStore::new(&storage);
        let now = Utc::now();

        let finished = sample_lottery(now);
        let active = sample_lottery(now);
        store.insert(&finished).await.unwrap();
        store.insert(&active).await.unwrap();
        store
            .cancel(finished.id, LotteryStatus::Active, &CancelReason::Manual, now)
            .await
            .unwrap();

        let deleted = store
            .delete_finished_before(now + Duration::days(1))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(store.find(finished.id).await.unwrap().is_none());
        assert!(store.find(active.id).await.unwrap().is_some());
    }
}
