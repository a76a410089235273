use crate::collaborators::{AccessPolicy, LotteryEvent, Notifier, PostDirectory};
use crate::engine::{derive_seed, verification_hash, DrawEngine};
use crate::error::Ineligible;
use crate::lifecycle::{Actor, DrawOutcome, LotteryLifecycle};
use crate::scheduler::{DrawScheduler, TickReport};
use crate::validation::{LotteryUpdate, NewLottery};
use crate::{EligibilityFilter, LotteryError, Result};
use std::path::Path;
use std::sync::Arc;
use tombola_core::{
    Clock, EngineConfig, JoinOutcome, LeaveOutcome, Lottery, LotteryId, LotteryStatus,
    LotteryStore, Participant, ParticipationRegistry, Storage, SystemClock, UserId, Winner,
    WinnerStore,
};
use uuid::Uuid;

/// Entry point for everything a host application does with lotteries.
pub struct LotteryService {
    storage: Arc<Storage>,
    policy: Arc<dyn AccessPolicy>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    lifecycle: Arc<LotteryLifecycle>,
    scheduler: Arc<DrawScheduler>,
}

impl LotteryService {
    pub fn new(
        storage: Arc<Storage>,
        policy: Arc<dyn AccessPolicy>,
        posts: Arc<dyn PostDirectory>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let filter = EligibilityFilter::new(policy.clone(), posts);
        let lifecycle = Arc::new(LotteryLifecycle::new(
            storage.clone(),
            policy.clone(),
            filter,
            notifier.clone(),
            clock.clone(),
        ));
        let scheduler = Arc::new(DrawScheduler::new(
            storage.clone(),
            lifecycle.clone(),
            notifier.clone(),
            clock.clone(),
            config.clone(),
        ));

        Ok(Self {
            storage,
            policy,
            notifier,
            clock,
            config,
            lifecycle,
            scheduler,
        })
    }

    /// Opens (or creates) `tombola.db` under `data_dir`.
    pub async fn open(
        data_dir: &Path,
        policy: Arc<dyn AccessPolicy>,
        posts: Arc<dyn PostDirectory>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Result<Self> {
        let db_path = data_dir.join("tombola.db");
        let storage = Arc::new(Storage::new(&db_path).await?);

        Self::new(
            storage,
            policy,
            posts,
            notifier,
            config,
            Arc::new(SystemClock),
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scheduler(&self) -> Arc<DrawScheduler> {
        self.scheduler.clone()
    }

    /// Startup recovery for the long-running scheduler process. Cancels
    /// draws a crash left unfinished, so never call it next to a live
    /// scheduler.
    pub async fn restore(&self) -> Result<usize> {
        self.scheduler.restore().await
    }

    /// Loads scheduled work from storage without touching any lottery.
    pub async fn reschedule(&self) -> Result<usize> {
        self.scheduler.reschedule().await
    }

    pub async fn tick(&self) -> TickReport {
        self.scheduler.tick().await
    }

    pub async fn create_lottery(&self, owner: UserId, config: NewLottery) -> Result<Lottery> {
        let now = self.clock.now();
        let config = config.validate(self.config.min_participants_floor, now, true)?;

        let lottery = Lottery {
            id: Uuid::new_v4(),
            owner_id: owner,
            topic_id: config.topic_id,
            title: config.title,
            description: config.description,
            prize: config.prize,
            winner_count: config.winner_count,
            min_participants: config.min_participants,
            draw_strategy: config.draw_strategy,
            insufficient_strategy: config.insufficient_strategy,
            specific_post_numbers: config.specific_post_numbers,
            end_time: config.end_time,
            status: LotteryStatus::Active,
            participant_count: 0,
            drawn_at: None,
            draw_seed: None,
            verification: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        };

        // Save, then schedule from the stored row so both agree on precision
        let store = LotteryStore::new(&self.storage);
        store.insert(&lottery).await?;
        let stored = store.load(lottery.id).await?;
        self.scheduler.on_created(&stored);

        tracing::info!(
            "Created lottery '{}' ({}) ending at {}",
            stored.title,
            stored.id,
            stored.end_time
        );
        Ok(stored)
    }

    /// Owner edit while Active and inside the edit window.
    pub async fn update_lottery(
        &self,
        id: LotteryId,
        actor: UserId,
        update: LotteryUpdate,
    ) -> Result<Lottery> {
        let store = LotteryStore::new(&self.storage);
        let lottery = store.load(id).await?;

        if !self.policy.is_owner(actor, &lottery).await? {
            return Err(LotteryError::Unauthorized {
                user: actor,
                action: "edit this lottery",
            });
        }

        if lottery.status != LotteryStatus::Active {
            return Err(LotteryError::invalid_state(format!(
                "lottery {} is {} and can no longer be edited",
                id, lottery.status
            )));
        }

        let now = self.clock.now();
        let window_closes = lottery.edit_window_closes(self.config.post_lock_delay);
        if now >= window_closes {
            return Err(LotteryError::invalid_state(format!(
                "edit window for lottery {} closed at {}",
                id, window_closes
            )));
        }

        if update.is_empty() {
            return Ok(lottery);
        }

        let deadline_changed = update.changes_end_time(lottery.end_time);
        let merged = update.merge(NewLottery::from(&lottery)).validate(
            self.config.min_participants_floor,
            now,
            deadline_changed,
        )?;

        let updated = Lottery {
            title: merged.title,
            description: merged.description,
            prize: merged.prize,
            winner_count: merged.winner_count,
            min_participants: merged.min_participants,
            draw_strategy: merged.draw_strategy,
            insufficient_strategy: merged.insufficient_strategy,
            specific_post_numbers: merged.specific_post_numbers,
            end_time: merged.end_time,
            updated_at: now,
            ..lottery
        };

        if !store.update_settings(&updated).await? {
            return Err(LotteryError::invalid_state(format!(
                "lottery {} left active during the edit",
                id
            )));
        }

        let stored = store.load(id).await?;
        if deadline_changed {
            self.scheduler.on_deadline_changed(&stored);
        }

        tracing::info!("Updated lottery {}", id);
        Ok(stored)
    }

    /// Returns the new participant count.
    pub async fn join(&self, id: LotteryId, user: UserId) -> Result<u32> {
        if self.policy.is_excluded(user).await? {
            return Err(LotteryError::NotEligible(Ineligible::Excluded));
        }

        let registry = ParticipationRegistry::new(&self.storage);
        match registry.join(id, user, self.clock.now()).await? {
            JoinOutcome::Joined { count } => {
                self.notifier.notify(LotteryEvent::ParticipantJoined {
                    lottery_id: id,
                    count,
                });
                Ok(count)
            }
            JoinOutcome::AlreadyJoined => Err(LotteryError::NotEligible(Ineligible::AlreadyJoined)),
            JoinOutcome::NotOpen(reason) => Err(LotteryError::NotEligible(reason.into())),
        }
    }

    /// Returns the new participant count.
    pub async fn leave(&self, id: LotteryId, user: UserId) -> Result<u32> {
        let registry = ParticipationRegistry::new(&self.storage);
        match registry.leave(id, user, self.clock.now()).await? {
            LeaveOutcome::Left { count } => {
                self.notifier.notify(LotteryEvent::ParticipantLeft {
                    lottery_id: id,
                    count,
                });
                Ok(count)
            }
            LeaveOutcome::NotParticipating => Err(LotteryError::NotParticipating(user)),
            LeaveOutcome::NotOpen(reason) => Err(LotteryError::NotEligible(reason.into())),
        }
    }

    pub async fn request_draw(&self, id: LotteryId, actor: Actor) -> Result<DrawOutcome> {
        let result = self.lifecycle.request_draw(id, actor).await;

        match &result {
            Ok(DrawOutcome::Completed { .. }) => self.scheduler.on_completed(id),
            Ok(DrawOutcome::Cancelled { .. }) | Err(LotteryError::DrawFailed { .. }) => {
                self.scheduler.on_cancelled(id)
            }
            Ok(DrawOutcome::AlreadyInProgress { .. }) | Err(_) => {}
        }

        result
    }

    pub async fn cancel(&self, id: LotteryId, actor: Actor) -> Result<Lottery> {
        let lottery = self.lifecycle.cancel(id, actor).await?;
        self.scheduler.on_cancelled(id);
        Ok(lottery)
    }

    pub async fn lottery(&self, id: LotteryId) -> Result<Lottery> {
        Ok(LotteryStore::new(&self.storage).load(id).await?)
    }

    pub async fn winners(&self, id: LotteryId) -> Result<Vec<Winner>> {
        Ok(WinnerStore::new(&self.storage).list(id).await?)
    }

    pub async fn participants(&self, id: LotteryId) -> Result<Vec<Participant>> {
        Ok(ParticipationRegistry::new(&self.storage)
            .list_participants(id)
            .await?)
    }

    /// Active lotteries still accepting participants, soonest deadline first.
    pub async fn list_open(&self) -> Result<Vec<Lottery>> {
        Ok(LotteryStore::new(&self.storage)
            .list_open(self.clock.now())
            .await?)
    }

    /// Checks a completed draw end to end: seed derivation, the replayed
    /// selection, and the stored winner rows with their hashes.
    pub async fn verify(&self, id: LotteryId) -> Result<bool> {
        let lottery = self.lottery(id).await?;
        if lottery.status != LotteryStatus::Completed {
            return Err(LotteryError::invalid_state(format!(
                "lottery {} is {}, only completed draws can be verified",
                id, lottery.status
            )));
        }

        let Some(record) = lottery.verification.as_ref() else {
            return Ok(false);
        };

        let expected_seed = derive_seed(
            &record.timestamp,
            lottery.id,
            lottery.end_time,
            record.candidate_count,
        );
        if record.lottery_id != lottery.id
            || lottery.draw_seed != Some(record.seed)
            || expected_seed != record.seed
            || !DrawEngine::verify(record)
        {
            return Ok(false);
        }

        let winners = self.winners(id).await?;
        if winners.len() != record.winner_ids.len() {
            return Ok(false);
        }

        for (winner, expected_user) in winners.iter().zip(&record.winner_ids) {
            if winner.user_id != *expected_user
                || winner.verification_hash
                    != verification_hash(record, winner.position, winner.user_id)?
            {
                return Ok(false);
            }
        }

        Ok(true)
    }
}
