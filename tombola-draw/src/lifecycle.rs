use crate::collaborators::{AccessPolicy, LotteryEvent, Notifier, WinnerSummary};
use crate::engine::{verification_hash, DrawEngine};
use crate::{EligibilityFilter, LotteryError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tombola_core::{
    CancelReason, Clock, DrawSnapshot, InsufficientStrategy, Lottery, LotteryId, LotteryStatus,
    LotteryStore, Storage, UserId, Winner,
};

/// Who asked for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Scheduler,
    User(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawOutcome {
    Completed {
        lottery_id: LotteryId,
        winners: Vec<WinnerSummary>,
        seed: u32,
    },
    Cancelled {
        lottery_id: LotteryId,
        reason: CancelReason,
    },
    /// Another caller already moved the lottery out of Active. Nothing was
    /// changed.
    AlreadyInProgress {
        lottery_id: LotteryId,
        observed: LotteryStatus,
    },
}

impl DrawOutcome {
    pub fn lottery_id(&self) -> LotteryId {
        match self {
            DrawOutcome::Completed { lottery_id, .. }
            | DrawOutcome::Cancelled { lottery_id, .. }
            | DrawOutcome::AlreadyInProgress { lottery_id, .. } => *lottery_id,
        }
    }
}

/// Owns every status transition of a lottery:
/// Active -> Drawing -> Completed, Active -> Cancelled, Drawing -> Cancelled.
pub struct LotteryLifecycle {
    storage: Arc<Storage>,
    policy: Arc<dyn AccessPolicy>,
    filter: EligibilityFilter,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl LotteryLifecycle {
    pub fn new(
        storage: Arc<Storage>,
        policy: Arc<dyn AccessPolicy>,
        filter: EligibilityFilter,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            policy,
            filter,
            notifier,
            clock,
        }
    }

    pub async fn request_draw(&self, id: LotteryId, actor: Actor) -> Result<DrawOutcome> {
        let store = LotteryStore::new(&self.storage);
        let lottery = store.load(id).await?;

        if lottery.status != LotteryStatus::Active {
            return Ok(DrawOutcome::AlreadyInProgress {
                lottery_id: id,
                observed: lottery.status,
            });
        }

        let now = self.clock.now();
        let can_draw_early = self.has_override(actor).await?;
        if !can_draw_early && !lottery.is_expired(now) {
            return Err(LotteryError::DrawNotDue {
                id,
                end_time: lottery.end_time,
            });
        }

        // Without override the stored deadline is checked again by the swap,
        // so an extension committed after the load above still holds.
        let snapshot = if can_draw_early {
            store.begin_draw(id, now).await?
        } else {
            store.begin_due_draw(id, now).await?
        };
        let Some(snapshot) = snapshot else {
            let current = store.load(id).await?;
            if current.status == LotteryStatus::Active {
                return Err(LotteryError::DrawNotDue {
                    id,
                    end_time: current.end_time,
                });
            }
            tracing::debug!("Lottery {} draw lost the race, now {}", id, current.status);
            return Ok(DrawOutcome::AlreadyInProgress {
                lottery_id: id,
                observed: current.status,
            });
        };

        tracing::info!("Drawing lottery {} requested by {:?}", id, actor);

        match self.run_draw(snapshot, now).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let reason = e.to_string();
                self.abort_draw(id, &reason).await;
                Err(LotteryError::DrawFailed { id, reason })
            }
        }
    }

    /// Manual `Active -> Cancelled`. Users need ownership or override
    /// authority.
    pub async fn cancel(&self, id: LotteryId, actor: Actor) -> Result<Lottery> {
        let store = LotteryStore::new(&self.storage);
        let lottery = store.load(id).await?;

        if let Actor::User(user) = actor {
            let allowed = self.policy.is_owner(user, &lottery).await?
                || self.policy.has_override_authority(user).await?;
            if !allowed {
                return Err(LotteryError::Unauthorized {
                    user,
                    action: "cancel this lottery",
                });
            }
        }

        if lottery.status != LotteryStatus::Active {
            return Err(LotteryError::invalid_state(format!(
                "lottery {} is {} and cannot be cancelled",
                id, lottery.status
            )));
        }

        let reason = CancelReason::Manual;
        if !store
            .cancel(id, LotteryStatus::Active, &reason, self.clock.now())
            .await?
        {
            let observed = store.load(id).await?.status;
            return Err(LotteryError::invalid_state(format!(
                "lottery {} moved to {} before it could be cancelled",
                id, observed
            )));
        }

        tracing::info!("Lottery {} cancelled by {:?}", id, actor);
        self.notifier.notify(LotteryEvent::LotteryCancelled {
            lottery_id: id,
            reason: reason.to_string(),
        });

        Ok(store.load(id).await?)
    }

    async fn has_override(&self, actor: Actor) -> Result<bool> {
        match actor {
            Actor::Scheduler => Ok(false),
            Actor::User(user) => self.policy.has_override_authority(user).await,
        }
    }

    async fn run_draw(&self, snapshot: DrawSnapshot, now: DateTime<Utc>) -> Result<DrawOutcome> {
        let DrawSnapshot {
            lottery,
            participants,
        } = snapshot;

        let pool = self.filter.candidate_pool(&lottery, &participants).await?;

        if pool.len() < lottery.min_participants as usize {
            match lottery.insufficient_strategy {
                InsufficientStrategy::Cancel => {
                    tracing::info!(
                        "Lottery {} has {} eligible of {} required, cancelling",
                        lottery.id,
                        pool.len(),
                        lottery.min_participants
                    );
                    return self
                        .finish_cancelled(lottery.id, CancelReason::InsufficientParticipants, now)
                        .await;
                }
                InsufficientStrategy::Proceed => {
                    tracing::info!(
                        "Lottery {} proceeds with {} eligible of {} required",
                        lottery.id,
                        pool.len(),
                        lottery.min_participants
                    );
                }
            }
        }

        let result = DrawEngine::draw(&lottery, &pool, now);
        if result.winners.is_empty() {
            return self
                .finish_cancelled(lottery.id, CancelReason::NoWinners, now)
                .await;
        }

        let winners = result
            .positions()
            .map(|(user_id, position)| -> Result<Winner> {
                Ok(Winner {
                    lottery_id: lottery.id,
                    user_id,
                    position,
                    drawn_at: now,
                    verification_hash: verification_hash(&result.record, position, user_id)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        LotteryStore::new(&self.storage)
            .complete_draw(lottery.id, &winners, &result.record, now)
            .await?;

        let summaries: Vec<WinnerSummary> = winners.iter().map(WinnerSummary::from).collect();
        tracing::info!(
            "Lottery {} completed with {} winners (seed {})",
            lottery.id,
            summaries.len(),
            result.seed()
        );
        self.notifier.notify(LotteryEvent::DrawCompleted {
            lottery_id: lottery.id,
            winners: summaries.clone(),
        });

        Ok(DrawOutcome::Completed {
            lottery_id: lottery.id,
            winners: summaries,
            seed: result.seed(),
        })
    }

    async fn finish_cancelled(
        &self,
        id: LotteryId,
        reason: CancelReason,
        now: DateTime<Utc>,
    ) -> Result<DrawOutcome> {
        let store = LotteryStore::new(&self.storage);
        if !store.cancel(id, LotteryStatus::Drawing, &reason, now).await? {
            return Err(LotteryError::invalid_state(format!(
                "lottery {} left drawing unexpectedly",
                id
            )));
        }

        self.notifier.notify(LotteryEvent::LotteryCancelled {
            lottery_id: id,
            reason: reason.to_string(),
        });

        Ok(DrawOutcome::Cancelled {
            lottery_id: id,
            reason,
        })
    }

    /// Never leave a lottery in Drawing: cancel it and raise an operator
    /// alert.
    async fn abort_draw(&self, id: LotteryId, error: &str) {
        tracing::error!("Draw for lottery {} failed: {}", id, error);

        let reason = CancelReason::DrawFailed(error.to_string());
        let store = LotteryStore::new(&self.storage);
        match store
            .cancel(id, LotteryStatus::Drawing, &reason, self.clock.now())
            .await
        {
            Ok(true) => {
                self.notifier.notify(LotteryEvent::LotteryCancelled {
                    lottery_id: id,
                    reason: reason.to_string(),
                });
            }
            Ok(false) => {
                tracing::warn!("Lottery {} was no longer drawing when aborting", id);
            }
            Err(e) => {
                tracing::error!("Failed to cancel lottery {} after draw failure: {}", id, e);
            }
        }

        self.notifier.notify(LotteryEvent::DrawFailed {
            lottery_id: id,
            error: error.to_string(),
        });
    }
}
