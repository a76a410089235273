use crate::collaborators::{LotteryEvent, Notifier, WinnerSummary};
use crate::lifecycle::{Actor, DrawOutcome, LotteryLifecycle};
use crate::{LotteryError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tombola_core::{
    CancelReason, Clock, EngineConfig, Lottery, LotteryId, LotteryStatus, LotteryStore, Storage,
    WinnerStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskKind {
    Draw,
    LockPost,
    NotifyWinners,
}

/// Field order gives the time ordering of the task set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScheduledTask {
    pub fire_at: DateTime<Utc>,
    pub lottery_id: LotteryId,
    pub kind: TaskKind,
}

/// At most one pending task per `(lottery, kind)`.
#[derive(Debug, Default)]
struct TaskQueue {
    by_time: BTreeSet<ScheduledTask>,
    index: HashMap<(LotteryId, TaskKind), DateTime<Utc>>,
}

impl TaskQueue {
    fn schedule(&mut self, lottery_id: LotteryId, kind: TaskKind, fire_at: DateTime<Utc>) {
        self.remove(lottery_id, kind);
        self.by_time.insert(ScheduledTask {
            fire_at,
            lottery_id,
            kind,
        });
        self.index.insert((lottery_id, kind), fire_at);
    }

    fn remove(&mut self, lottery_id: LotteryId, kind: TaskKind) -> bool {
        match self.index.remove(&(lottery_id, kind)) {
            Some(fire_at) => self.by_time.remove(&ScheduledTask {
                fire_at,
                lottery_id,
                kind,
            }),
            None => false,
        }
    }

    fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<ScheduledTask> {
        let mut due = Vec::new();
        while let Some(task) = self.by_time.first().copied() {
            if task.fire_at > now {
                break;
            }
            self.by_time.remove(&task);
            self.index.remove(&(task.lottery_id, task.kind));
            due.push(task);
        }
        due
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub completed: usize,
    pub cancelled: usize,
    pub skipped: usize,
    pub failed: usize,
    pub notifications: usize,
    pub cleaned_up: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        *self == TickReport::default()
    }
}

/// Fires draws at their deadlines, plus the post-lock and winner
/// notification events around them.
pub struct DrawScheduler {
    storage: Arc<Storage>,
    lifecycle: Arc<LotteryLifecycle>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    tasks: Mutex<TaskQueue>,
}

impl DrawScheduler {
    pub fn new(
        storage: Arc<Storage>,
        lifecycle: Arc<LotteryLifecycle>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            storage,
            lifecycle,
            notifier,
            clock,
            config,
            tasks: Mutex::new(TaskQueue::default()),
        }
    }

    pub fn on_created(&self, lottery: &Lottery) {
        let lock_at = lottery.edit_window_closes(self.config.post_lock_delay);
        let mut tasks = self.tasks.lock();
        tasks.schedule(lottery.id, TaskKind::Draw, lottery.end_time);
        tasks.schedule(lottery.id, TaskKind::LockPost, lock_at);
    }

    /// Replaces the pending draw trigger.
    pub fn on_deadline_changed(&self, lottery: &Lottery) {
        tracing::debug!(
            "Rescheduling draw for lottery {} at {}",
            lottery.id,
            lottery.end_time
        );
        self.tasks
            .lock()
            .schedule(lottery.id, TaskKind::Draw, lottery.end_time);
    }

    pub fn on_completed(&self, lottery_id: LotteryId) {
        let notify_at = self.clock.now() + self.notification_delay();
        let mut tasks = self.tasks.lock();
        tasks.remove(lottery_id, TaskKind::Draw);
        tasks.schedule(lottery_id, TaskKind::NotifyWinners, notify_at);
    }

    pub fn on_cancelled(&self, lottery_id: LotteryId) {
        let mut tasks = self.tasks.lock();
        tasks.remove(lottery_id, TaskKind::Draw);
        tasks.remove(lottery_id, TaskKind::NotifyWinners);
    }

    /// Startup recovery for the process that owns the schedule: cancels
    /// lotteries a crash left in Drawing, then rebuilds the task set.
    pub async fn restore(&self) -> Result<usize> {
        self.cancel_interrupted().await?;
        self.reschedule().await
    }

    async fn cancel_interrupted(&self) -> Result<()> {
        let store = LotteryStore::new(&self.storage);
        let now = self.clock.now();

        for stuck in store.list_by_status(LotteryStatus::Drawing).await? {
            let reason = CancelReason::DrawFailed("interrupted by restart".to_string());
            if store
                .cancel(stuck.id, LotteryStatus::Drawing, &reason, now)
                .await?
            {
                tracing::warn!("Cancelled lottery {} left in drawing", stuck.id);
                self.notifier.notify(LotteryEvent::DrawFailed {
                    lottery_id: stuck.id,
                    error: "interrupted by restart".to_string(),
                });
                self.notifier.notify(LotteryEvent::LotteryCancelled {
                    lottery_id: stuck.id,
                    reason: reason.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Rebuilds the in-memory task set from storage without changing any
    /// lottery. Safe while another process is drawing.
    pub async fn reschedule(&self) -> Result<usize> {
        let store = LotteryStore::new(&self.storage);
        let now = self.clock.now();

        let active = store.list_by_status(LotteryStatus::Active).await?;
        let unannounced = store
            .list_notification_due(now - self.notification_delay())
            .await?;
        let mut tasks = self.tasks.lock();
        for lottery in &active {
            tasks.schedule(lottery.id, TaskKind::Draw, lottery.end_time);
            let lock_at = lottery.edit_window_closes(self.config.post_lock_delay);
            if lock_at > now {
                tasks.schedule(lottery.id, TaskKind::LockPost, lock_at);
            }
        }
        for lottery_id in unannounced {
            tasks.schedule(lottery_id, TaskKind::NotifyWinners, now);
        }

        tracing::info!("Restored schedule for {} active lotteries", active.len());
        Ok(active.len())
    }

    pub fn pending(&self) -> Vec<ScheduledTask> {
        self.tasks.lock().by_time.iter().copied().collect()
    }

    pub fn next_fire_at(&self, lottery_id: LotteryId, kind: TaskKind) -> Option<DateTime<Utc>> {
        self.tasks.lock().index.get(&(lottery_id, kind)).copied()
    }

    /// One pass: due draws (queued or found by the recovery sweep), then
    /// notification events, then cleanup. A failing lottery never stops the
    /// pass.
    pub async fn tick(&self) -> TickReport {
        let now = self.clock.now();
        let mut report = TickReport::default();

        let mut due = self.take_due(now);
        let mut draws: BTreeSet<LotteryId> = due
            .iter()
            .filter(|task| task.kind == TaskKind::Draw)
            .map(|task| task.lottery_id)
            .collect();

        match LotteryStore::new(&self.storage).list_due(now).await {
            Ok(ids) => draws.extend(ids),
            Err(e) => tracing::warn!("Recovery sweep failed: {}", e),
        }

        for lottery_id in draws {
            self.draw(lottery_id, &mut report).await;
        }

        // draws above may have queued notifications that are already due
        due.extend(self.take_due(now));
        let mut announcements = BTreeSet::new();
        for task in due {
            match task.kind {
                TaskKind::Draw => {}
                TaskKind::LockPost => {
                    self.notifier.notify(LotteryEvent::PostLockDue {
                        lottery_id: task.lottery_id,
                    });
                    report.notifications += 1;
                }
                TaskKind::NotifyWinners => {
                    announcements.insert(task.lottery_id);
                }
            }
        }

        // draws completed elsewhere, or before a restart
        match LotteryStore::new(&self.storage)
            .list_notification_due(now - self.notification_delay())
            .await
        {
            Ok(ids) => announcements.extend(ids),
            Err(e) => tracing::warn!("Winner announcement sweep failed: {}", e),
        }

        for lottery_id in announcements {
            if self.notify_winners(lottery_id, now).await {
                report.notifications += 1;
            }
        }

        if self.config.cleanup.enabled {
            report.cleaned_up = self.cleanup(now).await;
        }

        report
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            "Draw scheduler started, ticking every {:?}",
            self.config.tick_interval
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick().await;
                    if !report.is_idle() {
                        tracing::info!("Scheduler tick: {:?}", report);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Draw scheduler stopped");
    }

    fn notification_delay(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.winner_notification_delay)
            .unwrap_or_else(|_| chrono::Duration::zero())
    }

    fn take_due(&self, now: DateTime<Utc>) -> Vec<ScheduledTask> {
        self.tasks.lock().pop_due(now)
    }

    async fn draw(&self, lottery_id: LotteryId, report: &mut TickReport) {
        match self.lifecycle.request_draw(lottery_id, Actor::Scheduler).await {
            Ok(DrawOutcome::Completed { .. }) => {
                self.on_completed(lottery_id);
                report.completed += 1;
            }
            Ok(DrawOutcome::Cancelled { .. }) => {
                self.on_cancelled(lottery_id);
                report.cancelled += 1;
            }
            Ok(DrawOutcome::AlreadyInProgress { observed, .. }) => {
                tracing::debug!("Lottery {} already {}, skipping", lottery_id, observed);
                self.tasks.lock().remove(lottery_id, TaskKind::Draw);
                report.skipped += 1;
            }
            Err(LotteryError::DrawNotDue { end_time, .. }) => {
                // deadline moved without going through on_deadline_changed
                self.tasks
                    .lock()
                    .schedule(lottery_id, TaskKind::Draw, end_time);
                report.skipped += 1;
            }
            Err(e @ LotteryError::DrawFailed { .. }) => {
                tracing::error!("{}", e);
                self.on_cancelled(lottery_id);
                report.failed += 1;
            }
            Err(e) => {
                // left Active, so the next recovery sweep retries it
                tracing::warn!("Could not draw lottery {}: {}", lottery_id, e);
                report.failed += 1;
            }
        }
    }

    /// Announces winners at most once per lottery across processes.
    async fn notify_winners(&self, lottery_id: LotteryId, now: DateTime<Utc>) -> bool {
        let winners = match WinnerStore::new(&self.storage).list(lottery_id).await {
            Ok(winners) => winners,
            Err(e) => {
                tracing::warn!("Could not load winners of lottery {}: {}", lottery_id, e);
                return false;
            }
        };

        if winners.is_empty() {
            return false;
        }

        match LotteryStore::new(&self.storage)
            .mark_winners_notified(lottery_id, now)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("Winners of lottery {} already announced", lottery_id);
                return false;
            }
            Err(e) => {
                tracing::warn!("Could not claim announcement for {}: {}", lottery_id, e);
                return false;
            }
        }

        self.notifier.notify(LotteryEvent::WinnersNotificationDue {
            lottery_id,
            winners: winners.iter().map(WinnerSummary::from).collect(),
        });
        true
    }

    async fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let retention = match chrono::Duration::from_std(self.config.cleanup.retention) {
            Ok(retention) => retention,
            Err(e) => {
                tracing::warn!("Cleanup retention out of range: {}", e);
                return 0;
            }
        };

        match LotteryStore::new(&self.storage)
            .delete_finished_before(now - retention)
            .await
        {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::warn!("Cleanup failed: {}", e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{MemoryNotifier, StaticDirectory};
    use crate::EligibilityFilter;
    use chrono::Duration;
    use tombola_core::{
        CleanupPolicy, DrawStrategy, InsufficientStrategy, ManualClock, ParticipationRegistry,
        UserId,
    };
    use uuid::Uuid;

    struct Fixture {
        storage: Arc<Storage>,
        notifier: Arc<MemoryNotifier>,
        clock: Arc<ManualClock>,
        scheduler: DrawScheduler,
    }

    async fn fixture(config: EngineConfig) -> Fixture {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let directory = Arc::new(StaticDirectory::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let lifecycle = Arc::new(LotteryLifecycle::new(
            storage.clone(),
            directory.clone(),
            EligibilityFilter::new(directory.clone(), directory),
            notifier.clone(),
            clock.clone(),
        ));
        let scheduler = DrawScheduler::new(
            storage.clone(),
            lifecycle,
            notifier.clone(),
            clock.clone(),
            config,
        );

        Fixture {
            storage,
            notifier,
            clock,
            scheduler,
        }
    }

    impl Fixture {
        async fn lottery(
            &self,
            winners: u32,
            min: u32,
            insufficient: InsufficientStrategy,
            users: &[UserId],
        ) -> Lottery {
            let now = self.clock.now();
            let lottery = Lottery {
                id: Uuid::new_v4(),
                owner_id: 1,
                topic_id: Some(10),
                title: "Spring giveaway".to_string(),
                description: String::new(),
                prize: String::new(),
                winner_count: winners,
                min_participants: min,
                draw_strategy: DrawStrategy::Random,
                insufficient_strategy: insufficient,
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
            };
            LotteryStore::new(&self.storage).insert(&lottery).await.unwrap();

            let registry = ParticipationRegistry::new(&self.storage);
            for user in users {
                registry.join(lottery.id, *user, now).await.unwrap();
            }

            self.scheduler.on_created(&lottery);
            lottery
        }

        async fn load(&self, id: LotteryId) -> Lottery {
            LotteryStore::new(&self.storage).load(id).await.unwrap()
        }
    }

    #[test]
    fn test_queue_keeps_one_task_per_kind() {
        let mut queue = TaskQueue::default();
        let id = Uuid::new_v4();
        let now = Utc::now();

        queue.schedule(id, TaskKind::Draw, now + Duration::minutes(5));
        queue.schedule(id, TaskKind::Draw, now + Duration::minutes(10));
        queue.schedule(id, TaskKind::LockPost, now);

        assert_eq!(queue.by_time.len(), 2);
        let due = queue.pop_due(now + Duration::minutes(6));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].kind, TaskKind::LockPost);

        let due = queue.pop_due(now + Duration::minutes(10));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].kind, TaskKind::Draw);
        assert!(queue.index.is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_participants_cancel() {
        let f = fixture(EngineConfig::default()).await;
        let lottery = f
            .lottery(3, 5, InsufficientStrategy::Cancel, &[2, 3, 4])
            .await;

        assert!(f.scheduler.tick().await.is_idle());

        f.clock.advance(Duration::hours(2));
        let report = f.scheduler.tick().await;
        assert_eq!(report.cancelled, 1);

        let stored = f.load(lottery.id).await;
        assert_eq!(stored.status, LotteryStatus::Cancelled);
        assert_eq!(
            stored.cancel_reason,
            Some(CancelReason::InsufficientParticipants)
        );
        assert_eq!(
            WinnerStore::new(&f.storage).count(lottery.id).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_insufficient_participants_proceed() {
        let f = fixture(EngineConfig::default()).await;
        let lottery = f
            .lottery(3, 5, InsufficientStrategy::Proceed, &[2, 3, 4])
            .await;

        f.clock.advance(Duration::hours(2));
        let report = f.scheduler.tick().await;
        assert_eq!(report.completed, 1);

        let winners = WinnerStore::new(&f.storage).list(lottery.id).await.unwrap();
        let mut users: Vec<UserId> = winners.iter().map(|w| w.user_id).collect();
        users.sort();
        assert_eq!(users, vec![2, 3, 4]);
        assert_eq!(
            winners.iter().map(|w| w.position).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        // default notification delay is zero, so the event fires in the same tick
        assert!(f
            .notifier
            .events_for(lottery.id)
            .iter()
            .any(|event| matches!(event, LotteryEvent::WinnersNotificationDue { winners, .. } if winners.len() == 3)));
        assert_eq!(f.scheduler.next_fire_at(lottery.id, TaskKind::Draw), None);
    }

    #[tokio::test]
    async fn test_reschedule_replaces_draw_trigger() {
        let f = fixture(EngineConfig::default()).await;
        let mut lottery = f
            .lottery(1, 1, InsufficientStrategy::Cancel, &[2])
            .await;

        lottery.end_time = lottery.end_time + Duration::hours(3);
        LotteryStore::new(&f.storage)
            .update_settings(&lottery)
            .await
            .unwrap();
        f.scheduler.on_deadline_changed(&lottery);

        let draws: Vec<_> = f
            .scheduler
            .pending()
            .into_iter()
            .filter(|task| task.kind == TaskKind::Draw)
            .collect();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].fire_at, lottery.end_time);

        f.clock.advance(Duration::hours(2));
        f.scheduler.tick().await;
        assert_eq!(f.load(lottery.id).await.status, LotteryStatus::Active);

        f.clock.advance(Duration::hours(2));
        let report = f.scheduler.tick().await;
        assert_eq!(report.completed, 1);
    }

    #[tokio::test]
    async fn test_recovery_sweep_draws_unscheduled_lottery() {
        let f = fixture(EngineConfig::default()).await;
        let lottery = f
            .lottery(1, 1, InsufficientStrategy::Cancel, &[2])
            .await;
        f.scheduler.on_cancelled(lottery.id);
        assert_eq!(f.scheduler.next_fire_at(lottery.id, TaskKind::Draw), None);

        f.clock.advance(Duration::hours(2));
        let report = f.scheduler.tick().await;
        assert_eq!(report.completed, 1);
        assert_eq!(f.load(lottery.id).await.status, LotteryStatus::Completed);
    }

    #[tokio::test]
    async fn test_post_lock_fires_once() {
        let f = fixture(EngineConfig::default()).await;
        let lottery = f
            .lottery(1, 1, InsufficientStrategy::Cancel, &[2])
            .await;

        f.clock.advance(Duration::minutes(31));
        f.scheduler.tick().await;
        f.scheduler.tick().await;

        let locks = f
            .notifier
            .events_for(lottery.id)
            .into_iter()
            .filter(|event| matches!(event, LotteryEvent::PostLockDue { .. }))
            .count();
        assert_eq!(locks, 1);
    }

    #[tokio::test]
    async fn test_restore_schedules_active_and_cancels_stuck_draws() {
        let f = fixture(EngineConfig::default()).await;
        let active = f
            .lottery(1, 1, InsufficientStrategy::Cancel, &[2])
            .await;
        let stuck = f
            .lottery(1, 1, InsufficientStrategy::Cancel, &[2])
            .await;
        LotteryStore::new(&f.storage)
            .begin_draw(stuck.id, f.clock.now())
            .await
            .unwrap();

        let scheduler = DrawScheduler::new(
            f.storage.clone(),
            f.scheduler.lifecycle.clone(),
            f.notifier.clone(),
            f.clock.clone(),
            EngineConfig::default(),
        );

        assert_eq!(scheduler.restore().await.unwrap(), 1);
        assert_eq!(
            scheduler.next_fire_at(active.id, TaskKind::Draw),
            Some(f.load(active.id).await.end_time)
        );
        assert_eq!(f.load(stuck.id).await.status, LotteryStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_winners_announced_after_drawing_process_exits() {
        let f = fixture(EngineConfig::default()).await;
        let lottery = f
            .lottery(1, 1, InsufficientStrategy::Cancel, &[2, 3])
            .await;
        f.clock.advance(Duration::hours(2));

        // drawn by a process that exits before its notification task fires
        let outcome = f
            .scheduler
            .lifecycle
            .request_draw(lottery.id, Actor::Scheduler)
            .await
            .unwrap();
        assert!(matches!(outcome, DrawOutcome::Completed { .. }));

        let restarted = DrawScheduler::new(
            f.storage.clone(),
            f.scheduler.lifecycle.clone(),
            f.notifier.clone(),
            f.clock.clone(),
            EngineConfig::default(),
        );
        restarted.restore().await.unwrap();
        restarted.tick().await;
        restarted.tick().await;
        f.scheduler.tick().await;

        let announcements = f
            .notifier
            .events_for(lottery.id)
            .into_iter()
            .filter(|event| matches!(event, LotteryEvent::WinnersNotificationDue { .. }))
            .count();
        assert_eq!(announcements, 1);
    }

    #[tokio::test]
    async fn test_reschedule_leaves_in_flight_draw_alone() {
        let f = fixture(EngineConfig::default()).await;
        let active = f
            .lottery(1, 1, InsufficientStrategy::Cancel, &[2])
            .await;
        let drawing = f
            .lottery(1, 1, InsufficientStrategy::Cancel, &[2])
            .await;
        LotteryStore::new(&f.storage)
            .begin_draw(drawing.id, f.clock.now())
            .await
            .unwrap();

        let observer = DrawScheduler::new(
            f.storage.clone(),
            f.scheduler.lifecycle.clone(),
            f.notifier.clone(),
            f.clock.clone(),
            EngineConfig::default(),
        );
        assert_eq!(observer.reschedule().await.unwrap(), 1);

        assert_eq!(f.load(drawing.id).await.status, LotteryStatus::Drawing);
        assert!(observer.next_fire_at(active.id, TaskKind::Draw).is_some());
        assert_eq!(observer.next_fire_at(drawing.id, TaskKind::Draw), None);
        assert!(f.notifier.events_for(drawing.id).is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_old_finished_lotteries() {
        let config = EngineConfig {
            cleanup: CleanupPolicy {
                enabled: true,
                retention: std::time::Duration::from_secs(24 * 3600),
            },
            ..Default::default()
        };
        let f = fixture(config).await;

        let finished = f
            .lottery(1, 1, InsufficientStrategy::Cancel, &[2])
            .await;
        f.clock.advance(Duration::hours(2));
        f.scheduler.tick().await;
        assert_eq!(f.load(finished.id).await.status, LotteryStatus::Completed);

        f.clock.advance(Duration::days(2));
        let open = f
            .lottery(1, 1, InsufficientStrategy::Cancel, &[2])
            .await;
        let report = f.scheduler.tick().await;

        assert_eq!(report.cleaned_up, 1);
        let store = LotteryStore::new(&f.storage);
        assert!(store.find(finished.id).await.unwrap().is_none());
        assert!(store.find(open.id).await.unwrap().is_some());
    }
}
