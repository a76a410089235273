pub mod directory;
pub mod lottery;
pub mod scheduler;

pub use directory::{handle_directory_command, DirectoryCommands, DirectoryFile};
pub use lottery::{handle_lottery_command, LotteryCommands};
pub use scheduler::{handle_scheduler_command, SchedulerCommands};
