use crate::{LotteryError, Result};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tombola_core::{DrawStrategy, InsufficientStrategy, Lottery, TopicId};

pub const TITLE_MIN_CHARS: usize = 3;
pub const TITLE_MAX_CHARS: usize = 255;
pub const DESCRIPTION_MAX_CHARS: usize = 2000;

/// Configuration supplied when a lottery is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLottery {
    pub topic_id: Option<TopicId>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prize: String,
    pub winner_count: u32,
    pub min_participants: u32,
    pub draw_strategy: DrawStrategy,
    pub insufficient_strategy: InsufficientStrategy,
    #[serde(default)]
    pub specific_post_numbers: Vec<u32>,
    pub end_time: DateTime<Utc>,
}

impl From<&Lottery> for NewLottery {
    fn from(lottery: &Lottery) -> Self {
        Self {
            topic_id: lottery.topic_id,
            title: lottery.title.clone(),
            description: lottery.description.clone(),
            prize: lottery.prize.clone(),
            winner_count: lottery.winner_count,
            min_participants: lottery.min_participants,
            draw_strategy: lottery.draw_strategy,
            insufficient_strategy: lottery.insufficient_strategy,
            specific_post_numbers: lottery.specific_post_numbers.clone(),
            end_time: lottery.end_time,
        }
    }
}

impl NewLottery {
    /// Checks and normalizes the configuration: trims text, drops sub-second
    /// precision from `end_time` (deadlines are stored in whole seconds) and
    /// raises `min_participants` to `floor`. `end_time` must be after `now` only when
    /// `check_end_time` is set, so untouched deadlines survive an edit.
    pub fn validate(mut self, floor: u32, now: DateTime<Utc>, check_end_time: bool) -> Result<Self> {
        self.title = self.title.trim().to_string();
        self.description = self.description.trim().to_string();
        self.prize = self.prize.trim().to_string();
        self.end_time = self.end_time.trunc_subsecs(0);

        let title_len = self.title.chars().count();
        if !(TITLE_MIN_CHARS..=TITLE_MAX_CHARS).contains(&title_len) {
            return Err(LotteryError::validation(format!(
                "title must be between {} and {} characters",
                TITLE_MIN_CHARS, TITLE_MAX_CHARS
            )));
        }

        if self.description.chars().count() > DESCRIPTION_MAX_CHARS {
            return Err(LotteryError::validation(format!(
                "description must be at most {} characters",
                DESCRIPTION_MAX_CHARS
            )));
        }

        if self.winner_count == 0 {
            return Err(LotteryError::validation("winner_count must be greater than 0"));
        }

        self.min_participants = self.min_participants.max(floor).max(1);
        if self.winner_count > self.min_participants {
            return Err(LotteryError::validation(format!(
                "winner_count ({}) cannot exceed min_participants ({})",
                self.winner_count, self.min_participants
            )));
        }

        if check_end_time && self.end_time <= now {
            return Err(LotteryError::validation("end_time must be in the future"));
        }

        match self.draw_strategy {
            DrawStrategy::Random => {
                if !self.specific_post_numbers.is_empty() {
                    return Err(LotteryError::validation(
                        "specific post numbers require the specific_posts strategy",
                    ));
                }
            }
            DrawStrategy::SpecificPosts => check_post_numbers(&self.specific_post_numbers)?,
        }

        Ok(self)
    }
}

/// Edit of an existing lottery. Unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotteryUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub prize: Option<String>,
    pub winner_count: Option<u32>,
    pub min_participants: Option<u32>,
    pub draw_strategy: Option<DrawStrategy>,
    pub insufficient_strategy: Option<InsufficientStrategy>,
    pub specific_post_numbers: Option<Vec<u32>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl LotteryUpdate {
    pub fn is_empty(&self) -> bool {
        *self == LotteryUpdate::default()
    }

    pub fn changes_end_time(&self, current: DateTime<Utc>) -> bool {
        self.end_time
            .is_some_and(|end| end.trunc_subsecs(0) != current.trunc_subsecs(0))
    }

    /// Overlays this edit on `current`.
    pub fn merge(self, current: NewLottery) -> NewLottery {
        NewLottery {
            topic_id: current.topic_id,
            title: self.title.unwrap_or(current.title),
            description: self.description.unwrap_or(current.description),
            prize: self.prize.unwrap_or(current.prize),
            winner_count: self.winner_count.unwrap_or(current.winner_count),
            min_participants: self.min_participants.unwrap_or(current.min_participants),
            draw_strategy: self.draw_strategy.unwrap_or(current.draw_strategy),
            insufficient_strategy: self
                .insufficient_strategy
                .unwrap_or(current.insufficient_strategy),
            specific_post_numbers: self
                .specific_post_numbers
                .unwrap_or(current.specific_post_numbers),
            end_time: self.end_time.unwrap_or(current.end_time),
        }
    }
}

/// Parses a comma separated post list such as `"2, 5,9"`. Blank input gives
/// an empty list.
pub fn parse_post_numbers(input: &str) -> Result<Vec<u32>> {
    if input.trim().is_empty() {
        return Ok(Vec::new());
    }

    input
        .split(',')
        .map(str::trim)
        .map(|part| {
            part.parse::<u32>()
                .map_err(|_| LotteryError::validation(format!("invalid post number '{}'", part)))
        })
        .collect()
}

fn check_post_numbers(numbers: &[u32]) -> Result<()> {
    if numbers.is_empty() {
        return Err(LotteryError::validation(
            "specific_posts strategy needs at least one post number",
        ));
    }

    let mut seen = HashSet::new();
    for &number in numbers {
        if number == 0 {
            return Err(LotteryError::validation("post numbers start at 1"));
        }
        if !seen.insert(number) {
            return Err(LotteryError::validation(format!(
                "post number {} is listed twice",
                number
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn new_lottery(now: DateTime<Utc>) -> NewLottery {
        NewLottery {
            topic_id: Some(10),
            title: "  Spring giveaway ".to_string(),
            description: String::new(),
            prize: "A mug".to_string(),
            winner_count: 2,
            min_participants: 2,
            draw_strategy: DrawStrategy::Random,
            insufficient_strategy: InsufficientStrategy::Cancel,
            specific_post_numbers: Vec::new(),
            end_time: now + Duration::hours(1),
        }
    }

    #[test]
    fn test_valid_config_is_normalized() {
        let now = Utc::now();
        let validated = new_lottery(now).validate(5, now, true).unwrap();
        assert_eq!(validated.title, "Spring giveaway");
        assert_eq!(validated.min_participants, 5);
    }

    #[test]
    fn test_rejects_bad_counts_and_deadline() {
        let now = Utc::now();

        let mut config = new_lottery(now);
        config.winner_count = 0;
        assert!(matches!(
            config.validate(1, now, true),
            Err(LotteryError::Validation(_))
        ));

        let mut config = new_lottery(now);
        config.winner_count = 3;
        assert!(config.validate(1, now, true).is_err());

        let mut config = new_lottery(now);
        config.end_time = now;
        assert!(config.clone().validate(1, now, true).is_err());
        assert!(config.validate(1, now, false).is_ok());
    }

    #[test]
    fn test_deadline_is_checked_at_stored_precision() {
        let now =
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + Duration::milliseconds(300);

        // 12:00:00.800 would be stored as 12:00:00, already past
        let mut config = new_lottery(now);
        config.end_time = now + Duration::milliseconds(500);
        assert!(config.validate(1, now, true).is_err());

        let mut config = new_lottery(now);
        config.end_time = now + Duration::milliseconds(800);
        let validated = config.validate(1, now, true).unwrap();
        assert_eq!(
            validated.end_time,
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 1).unwrap()
        );
    }

    #[test]
    fn test_title_length_counts_characters() {
        let now = Utc::now();

        let mut config = new_lottery(now);
        config.title = " ab ".to_string();
        assert!(config.validate(1, now, true).is_err());

        let mut config = new_lottery(now);
        config.title = "ééé".to_string();
        assert!(config.validate(1, now, true).is_ok());
    }

    #[test]
    fn test_post_list_must_match_strategy() {
        let now = Utc::now();

        let mut config = new_lottery(now);
        config.specific_post_numbers = vec![2];
        assert!(config.validate(1, now, true).is_err());

        let mut config = new_lottery(now);
        config.draw_strategy = DrawStrategy::SpecificPosts;
        assert!(config.clone().validate(1, now, true).is_err());

        config.specific_post_numbers = vec![2, 5, 2];
        assert!(config.clone().validate(1, now, true).is_err());

        config.specific_post_numbers = vec![2, 0];
        assert!(config.clone().validate(1, now, true).is_err());

        config.specific_post_numbers = vec![9, 2, 5];
        assert!(config.validate(1, now, true).is_ok());
    }

    #[test]
    fn test_parse_post_numbers() {
        assert_eq!(parse_post_numbers("2, 5,9").unwrap(), vec![2, 5, 9]);
        assert!(parse_post_numbers("  ").unwrap().is_empty());
        assert!(parse_post_numbers("2,x").is_err());
        assert!(parse_post_numbers("2,,3").is_err());
    }

    #[test]
    fn test_update_merges_over_current() {
        let now = Utc::now();
        let current = new_lottery(now);
        let update = LotteryUpdate {
            prize: Some("Two mugs".to_string()),
            ..Default::default()
        };

        assert!(!update.is_empty());
        assert!(!update.changes_end_time(current.end_time));

        let merged = update.merge(current.clone());
        assert_eq!(merged.prize, "Two mugs");
        assert_eq!(merged.winner_count, current.winner_count);
    }
}
