use crate::error::{Result, TombolaError};
use crate::storage::{is_constraint_violation, text_column, timestamp_column, Storage};
use crate::types::{
    JoinOutcome, LeaveOutcome, LotteryId, LotteryStatus, NotOpenReason, Participant, UserId,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Transaction};

/// Join/leave facts for lotteries. Every mutation runs in one transaction
/// together with the denormalized `participant_count` update.
pub struct ParticipationRegistry<'a> {
    storage: &'a Storage,
}

impl<'a> ParticipationRegistry<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    pub async fn join(
        &self,
        lottery_id: LotteryId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<JoinOutcome> {
        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction()?;

        let (status, end_time, owner_id) = open_state(&tx, lottery_id)?;
        if let Some(reason) = not_open_reason(status, end_time, now) {
            return Ok(JoinOutcome::NotOpen(reason));
        }
        if owner_id == user_id {
            return Ok(JoinOutcome::NotOpen(NotOpenReason::IsOwner));
        }

        // The primary key decides duplicates, not a prior lookup.
        let inserted = tx.execute(
            "INSERT INTO lottery_participants (lottery_id, user_id, joined_at)
             VALUES (?1, ?2, ?3)",
            params![lottery_id.to_string(), user_id, now.timestamp()],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => return Ok(JoinOutcome::AlreadyJoined),
            Err(e) => return Err(TombolaError::Storage(e)),
        }

        let count = adjust_count(&tx, lottery_id, 1)?;
        tx.commit()?;

        tracing::info!(
            "User {} joined lottery {} ({} participants)",
            user_id,
            lottery_id,
            count
        );
        Ok(JoinOutcome::Joined { count })
    }

    pub async fn leave(
        &self,
        lottery_id: LotteryId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<LeaveOutcome> {
        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction()?;

        let (status, end_time, _) = open_state(&tx, lottery_id)?;
        if let Some(reason) = not_open_reason(status, end_time, now) {
            return Ok(LeaveOutcome::NotOpen(reason));
        }

        let removed = tx.execute(
            "DELETE FROM lottery_participants WHERE lottery_id = ?1 AND user_id = ?2",
            params![lottery_id.to_string(), user_id],
        )?;
        if removed == 0 {
            return Ok(LeaveOutcome::NotParticipating);
        }

        let count = adjust_count(&tx, lottery_id, -1)?;
        tx.commit()?;

        tracing::info!(
            "User {} left lottery {} ({} participants)",
            user_id,
            lottery_id,
            count
        );
        Ok(LeaveOutcome::Left { count })
    }

    pub async fn count(&self, lottery_id: LotteryId) -> Result<u32> {
        let conn = self.storage.get_connection().await;

        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM lottery_participants WHERE lottery_id = ?1",
            params![lottery_id.to_string()],
            |row| row.get(0),
        )?;

        Ok(count)
    }

    /// Participants ordered by ascending user id.
    pub async fn list_participants(&self, lottery_id: LotteryId) -> Result<Vec<Participant>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(
            "SELECT lottery_id, user_id, joined_at FROM lottery_participants
             WHERE lottery_id = ?1 ORDER BY user_id ASC",
        )?;

        let participants = stmt
            .query_map(params![lottery_id.to_string()], |row| {
                let lottery_id: String = row.get(0)?;
                Ok(Participant {
                    lottery_id: text_column(&lottery_id, 0, "lottery_id")?,
                    user_id: row.get(1)?,
                    joined_at: timestamp_column(row.get(2)?, 2, "joined_at")?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(participants)
    }
}

fn open_state(
    tx: &Transaction<'_>,
    lottery_id: LotteryId,
) -> Result<(LotteryStatus, DateTime<Utc>, UserId)> {
    let result = tx.query_row(
        "SELECT status, end_time, owner_id FROM lotteries WHERE id = ?1",
        params![lottery_id.to_string()],
        |row| {
            let status: String = row.get(0)?;
            Ok((
                text_column::<LotteryStatus>(&status, 0, "status")?,
                timestamp_column(row.get(1)?, 1, "end_time")?,
                row.get::<_, UserId>(2)?,
            ))
        },
    );

    match result {
        Ok(state) => Ok(state),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(TombolaError::LotteryNotFound(lottery_id)),
        Err(e) => Err(TombolaError::Storage(e)),
    }
}

fn not_open_reason(
    status: LotteryStatus,
    end_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<NotOpenReason> {
    if status != LotteryStatus::Active {
        Some(NotOpenReason::NotActive(status))
    } else if now >= end_time {
        Some(NotOpenReason::Expired)
    } else {
        None
    }
}

fn adjust_count(tx: &Transaction<'_>, lottery_id: LotteryId, delta: i64) -> Result<u32> {
    tx.execute(
        "UPDATE lotteries SET participant_count = participant_count + ?1 WHERE id = ?2",
        params![delta, lottery_id.to_string()],
    )?;

    let count: u32 = tx.query_row(
        "SELECT participant_count FROM lotteries WHERE id = ?1",
        params![lottery_id.to_string()],
        |row| row.get(0),
    )?;

    Ok(count)
}
