use anyhow::{anyhow, bail};
use chrono::{DateTime, Duration, Utc};
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Table};
use dialoguer::Confirm;
use tombola_core::{DrawStrategy, InsufficientStrategy, Lottery, LotteryId, TopicId, UserId};
use tombola_draw::{
    parse_post_numbers, Actor, DrawOutcome, LotteryService, LotteryUpdate, NewLottery,
};

#[derive(Subcommand)]
pub enum LotteryCommands {
    /// Create a new lottery
    Create {
        /// Owner user ID
        #[arg(long)]
        owner: UserId,
        /// Lottery title
        title: String,
        /// Deadline: RFC 3339 timestamp or offset such as 90m, 2h, 3d
        #[arg(short, long)]
        end: String,
        /// Number of winners
        #[arg(short, long, default_value_t = 1)]
        winners: u32,
        /// Minimum participants
        #[arg(short, long, default_value_t = 1)]
        min: u32,
        /// Topic the lottery is announced in
        #[arg(short, long)]
        topic: Option<TopicId>,
        /// Prize description
        #[arg(short, long, default_value = "")]
        prize: String,
        /// Longer description
        #[arg(long, default_value = "")]
        description: String,
        /// Designated post numbers, e.g. "2,5,9" (switches to the specific posts strategy)
        #[arg(long)]
        posts: Option<String>,
        /// Draw anyway when too few users joined
        #[arg(long)]
        proceed: bool,
    },
    /// Edit a lottery before its announcement post is locked
    Update {
        /// Lottery ID
        id: LotteryId,
        /// Acting user ID (must be the owner)
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        prize: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// New deadline: RFC 3339 timestamp or offset such as 90m, 2h, 3d
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        winners: Option<u32>,
        #[arg(long)]
        min: Option<u32>,
        /// New designated post numbers
        #[arg(long)]
        posts: Option<String>,
    },
    /// Join a lottery
    Join {
        /// Lottery ID
        id: LotteryId,
        /// User ID
        user: UserId,
    },
    /// Leave a lottery
    Leave {
        /// Lottery ID
        id: LotteryId,
        /// User ID
        user: UserId,
    },
    /// Draw a lottery now
    Draw {
        /// Lottery ID
        id: LotteryId,
        /// Acting user ID; omit to draw as the scheduler
        #[arg(long)]
        user: Option<UserId>,
    },
    /// Cancel an active lottery
    Cancel {
        /// Lottery ID
        id: LotteryId,
        /// Acting user ID (owner or moderator)
        #[arg(long)]
        user: UserId,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Show a lottery with its participants and winners
    Show {
        /// Lottery ID
        id: LotteryId,
    },
    /// List lotteries open for joining
    List,
    /// Replay a completed draw and check the published winners
    Verify {
        /// Lottery ID
        id: LotteryId,
    },
}

pub async fn handle_lottery_command(
    cmd: LotteryCommands,
    service: &LotteryService,
) -> anyhow::Result<()> {
    match cmd {
        LotteryCommands::Create {
            owner,
            title,
            end,
            winners,
            min,
            topic,
            prize,
            description,
            posts,
            proceed,
        } => {
            let specific_post_numbers = match posts {
                Some(posts) => parse_post_numbers(&posts)?,
                None => Vec::new(),
            };
            let draw_strategy = if specific_post_numbers.is_empty() {
                DrawStrategy::Random
            } else {
                DrawStrategy::SpecificPosts
            };

            let lottery = service
                .create_lottery(
                    owner,
                    NewLottery {
                        topic_id: topic,
                        title,
                        description,
                        prize,
                        winner_count: winners,
                        min_participants: min,
                        draw_strategy,
                        insufficient_strategy: insufficient_strategy(proceed),
                        specific_post_numbers,
                        end_time: parse_end_time(&end, Utc::now())?,
                    },
                )
                .await?;

            println!("Lottery created successfully!");
            print_summary(&lottery);
        }

        LotteryCommands::Update {
            id,
            user,
            title,
            prize,
            description,
            end,
            winners,
            min,
            posts,
        } => {
            let specific_post_numbers = posts.as_deref().map(parse_post_numbers).transpose()?;
            let draw_strategy = specific_post_numbers.as_ref().map(|posts| {
                if posts.is_empty() {
                    DrawStrategy::Random
                } else {
                    DrawStrategy::SpecificPosts
                }
            });

            let update = LotteryUpdate {
                title,
                description,
                prize,
                winner_count: winners,
                min_participants: min,
                draw_strategy,
                specific_post_numbers,
                end_time: end
                    .as_deref()
                    .map(|end| parse_end_time(end, Utc::now()))
                    .transpose()?,
                insufficient_strategy: None,
            };

            let lottery = service.update_lottery(id, user, update).await?;
            println!("Lottery updated.");
            print_summary(&lottery);
        }

        LotteryCommands::Join { id, user } => {
            let count = service.join(id, user).await?;
            println!("User {} joined ({} participants)", user, count);
        }

        LotteryCommands::Leave { id, user } => {
            let count = service.leave(id, user).await?;
            println!("User {} left ({} participants)", user, count);
        }

        LotteryCommands::Draw { id, user } => {
            let actor = user.map(Actor::User).unwrap_or(Actor::Scheduler);
            match service.request_draw(id, actor).await? {
                DrawOutcome::Completed { winners, seed, .. } => {
                    println!("Draw completed (seed {})", seed);
                    for winner in winners {
                        println!("  {}. user {}", winner.position, winner.user_id);
                    }
                }
                DrawOutcome::Cancelled { reason, .. } => {
                    println!("Lottery cancelled: {}", reason);
                }
                DrawOutcome::AlreadyInProgress { observed, .. } => {
                    println!("Nothing to do, lottery is already {}", observed);
                }
            }
        }

        LotteryCommands::Cancel { id, user, force } => {
            if !force {
                let lottery = service.lottery(id).await?;
                let confirmed = Confirm::new()
                    .with_prompt(format!("Cancel lottery '{}'?", lottery.title))
                    .default(false)
                    .interact()
                    .map_err(|e| anyhow!("Prompt failed: {}", e))?;
                if !confirmed {
                    println!("Cancellation aborted.");
                    return Ok(());
                }
            }

            service.cancel(id, Actor::User(user)).await?;
            println!("Lottery {} cancelled.", id);
        }

        LotteryCommands::Show { id } => {
            let lottery = service.lottery(id).await?;
            print_summary(&lottery);

            let participants = service.participants(id).await?;
            if !participants.is_empty() {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["Participant", "Joined"]);
                for participant in participants {
                    table.add_row(vec![
                        participant.user_id.to_string(),
                        participant.joined_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    ]);
                }
                println!("{}", table);
            }

            let winners = service.winners(id).await?;
            if !winners.is_empty() {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["Position", "Winner", "Verification Hash"]);
                for winner in winners {
                    table.add_row(vec![
                        winner.position.to_string(),
                        winner.user_id.to_string(),
                        winner.verification_hash,
                    ]);
                }
                println!("{}", table);
            }
        }

        LotteryCommands::List => {
            let lotteries = service.list_open().await?;
            if lotteries.is_empty() {
                println!("No open lotteries.");
                println!("Create one with: tombola lottery create --owner <id> --end 1d <title>");
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec![
                "ID",
                "Title",
                "Strategy",
                "Winners",
                "Participants",
                "Ends",
            ]);
            for lottery in lotteries {
                table.add_row(vec![
                    lottery.id.to_string(),
                    lottery.title,
                    lottery.draw_strategy.to_string(),
                    lottery.winner_count.to_string(),
                    format!("{}/{}", lottery.participant_count, lottery.min_participants),
                    lottery.end_time.format("%Y-%m-%d %H:%M").to_string(),
                ]);
            }
            println!("{}", table);
        }

        LotteryCommands::Verify { id } => {
            if service.verify(id).await? {
                println!("Draw for lottery {} verified.", id);
            } else {
                bail!("draw for lottery {} does not match its verification record", id);
            }
        }
    }

    Ok(())
}

fn insufficient_strategy(proceed: bool) -> InsufficientStrategy {
    if proceed {
        InsufficientStrategy::Proceed
    } else {
        InsufficientStrategy::Cancel
    }
}

/// Accepts an RFC 3339 timestamp or an offset from `now` (`45m`, `2h`, `3d`).
fn parse_end_time(input: &str, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(input) {
        return Ok(at.with_timezone(&Utc));
    }

    let Some((split, _)) = input.char_indices().last() else {
        bail!("deadline is empty");
    };
    let (amount, unit) = input.split_at(split);
    let amount: i64 = amount
        .parse()
        .map_err(|_| anyhow!("invalid deadline '{}'", input))?;
    let offset = match unit {
        "m" => Duration::minutes(amount),
        "h" => Duration::hours(amount),
        "d" => Duration::days(amount),
        _ => bail!("invalid deadline '{}', use e.g. 90m, 2h or 3d", input),
    };

    Ok(now + offset)
}

fn print_summary(lottery: &Lottery) {
    println!("  ID: {}", lottery.id);
    println!("  Title: {}", lottery.title);
    if !lottery.prize.is_empty() {
        println!("  Prize: {}", lottery.prize);
    }
    println!("  Status: {}", lottery.status);
    println!("  Strategy: {}", lottery.draw_strategy);
    if !lottery.specific_post_numbers.is_empty() {
        println!("  Posts: {:?}", lottery.specific_post_numbers);
    }
    println!(
        "  Winners: {} (min {} participants, {} joined)",
        lottery.winner_count, lottery.min_participants, lottery.participant_count
    );
    println!("  Ends: {}", lottery.end_time);
    if let Some(reason) = &lottery.cancel_reason {
        println!("  Cancel reason: {}", reason);
    }
    if let Some(seed) = lottery.draw_seed {
        println!("  Seed: {}", seed);
    }
}
