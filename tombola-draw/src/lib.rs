//! Draw lifecycle for time-boxed lotteries
//!
//! Participants join before a deadline. At the deadline (or earlier, on a
//! moderator's request) the lottery is drawn exactly once: eligible users are
//! collected, winners are picked by a seeded Fisher-Yates shuffle or by
//! designated posts, and a verification record is stored so anyone can replay
//! the draw.

pub mod collaborators;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod scheduler;
pub mod service;
pub mod validation;

pub use collaborators::{
    AccessPolicy, LogNotifier, LotteryEvent, MemoryNotifier, Notifier, PostDirectory,
    StaticDirectory, WinnerSummary,
};
pub use eligibility::EligibilityFilter;
pub use engine::{CandidatePool, DrawEngine, DrawResult};
pub use error::{Ineligible, LotteryError, Result};
pub use lifecycle::{Actor, DrawOutcome, LotteryLifecycle};
pub use scheduler::{DrawScheduler, ScheduledTask, TaskKind, TickReport};
pub use service::LotteryService;
pub use validation::{parse_post_numbers, LotteryUpdate, NewLottery};
