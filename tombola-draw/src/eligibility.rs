use crate::collaborators::{AccessPolicy, PostDirectory};
use crate::engine::CandidatePool;
use crate::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tombola_core::{DrawStrategy, Lottery, UserId};

/// Turns a participant snapshot into the pool a draw selects from.
#[derive(Clone)]
pub struct EligibilityFilter {
    policy: Arc<dyn AccessPolicy>,
    posts: Arc<dyn PostDirectory>,
}

impl EligibilityFilter {
    pub fn new(policy: Arc<dyn AccessPolicy>, posts: Arc<dyn PostDirectory>) -> Self {
        Self { policy, posts }
    }

    pub async fn candidate_pool(
        &self,
        lottery: &Lottery,
        participants: &[UserId],
    ) -> Result<CandidatePool> {
        let eligible = self.eligible_participants(lottery, participants).await?;

        let pool = match lottery.draw_strategy {
            DrawStrategy::Random => CandidatePool::Random {
                candidates: eligible,
            },
            DrawStrategy::SpecificPosts => {
                let designated = self.designated_authors(lottery, &eligible).await?;
                CandidatePool::SpecificPosts {
                    designated,
                    eligible,
                }
            }
        };

        tracing::debug!(
            "Lottery {}: {} of {} participants eligible",
            lottery.id,
            pool.len(),
            participants.len()
        );
        Ok(pool)
    }

    /// Participants minus the owner and excluded users, sorted by user id.
    async fn eligible_participants(
        &self,
        lottery: &Lottery,
        participants: &[UserId],
    ) -> Result<Vec<UserId>> {
        let mut seen = HashSet::new();
        let mut eligible = Vec::with_capacity(participants.len());

        for &user in participants {
            if !seen.insert(user) {
                continue;
            }
            if self.policy.is_owner(user, lottery).await? {
                continue;
            }
            if self.policy.is_excluded(user).await? {
                tracing::debug!("Skipping excluded user {} in lottery {}", user, lottery.id);
                continue;
            }
            eligible.push(user);
        }

        eligible.sort_unstable();
        Ok(eligible)
    }

    /// Authors of the configured posts, ascending post number, first
    /// occurrence only.
    async fn designated_authors(
        &self,
        lottery: &Lottery,
        eligible: &[UserId],
    ) -> Result<Vec<UserId>> {
        let Some(topic) = lottery.topic_id else {
            return Ok(Vec::new());
        };

        let mut post_numbers = lottery.specific_post_numbers.clone();
        post_numbers.sort_unstable();
        post_numbers.dedup();

        let eligible: HashSet<UserId> = eligible.iter().copied().collect();
        let mut designated = Vec::new();

        for post_number in post_numbers {
            match self.posts.author_of_post(topic, post_number).await? {
                Some(author) if eligible.contains(&author) && !designated.contains(&author) => {
                    designated.push(author)
                }
                Some(_) => {}
                None => {
                    tracing::debug!(
                        "Post #{} not found in topic {} for lottery {}",
                        post_number,
                        topic,
                        lottery.id
                    );
                }
            }
        }

        Ok(designated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StaticDirectory;
    use chrono::Utc;
    use tombola_core::{InsufficientStrategy, LotteryStatus};
    use uuid::Uuid;

    fn lottery(strategy: DrawStrategy, posts: Vec<u32>) -> Lottery {
        let now = Utc::now();
        Lottery {
            id: Uuid::new_v4(),
            owner_id: 1,
            topic_id: Some(10),
            title: "Spring giveaway".to_string(),
            description: String::new(),
            prize: String::new(),
            winner_count: 3,
            min_participants: 3,
            draw_strategy: strategy,
            insufficient_strategy: InsufficientStrategy::Proceed,
            specific_post_numbers: posts,
            end_time: now,
            status: LotteryStatus::Drawing,
            participant_count: 0,
            drawn_at: None,
            draw_seed: None,
            verification: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn filter(directory: StaticDirectory) -> EligibilityFilter {
        let directory = Arc::new(directory);
        EligibilityFilter::new(directory.clone(), directory)
    }

    #[tokio::test]
    async fn test_random_pool_drops_owner_and_excluded() {
        let directory = StaticDirectory::new();
        directory.exclude(40);
        let filter = filter(directory);

        let pool = filter
            .candidate_pool(&lottery(DrawStrategy::Random, vec![]), &[40, 1, 30, 20])
            .await
            .unwrap();

        assert_eq!(
            pool,
            CandidatePool::Random {
                candidates: vec![20, 30]
            }
        );
    }

    #[tokio::test]
    async fn test_designated_follows_post_order() {
        // post 5 was written by someone who never joined
        let directory = StaticDirectory::new()
            .with_post(10, 9, 90)
            .with_post(10, 2, 20)
            .with_post(10, 5, 55)
            .with_post(10, 12, 20);
        let filter = filter(directory);

        let pool = filter
            .candidate_pool(
                &lottery(DrawStrategy::SpecificPosts, vec![9, 5, 2, 12]),
                &[20, 30, 90],
            )
            .await
            .unwrap();

        assert_eq!(
            pool,
            CandidatePool::SpecificPosts {
                designated: vec![20, 90],
                eligible: vec![20, 30, 90],
            }
        );
        assert_eq!(pool.len(), 3);
    }

    #[tokio::test]
    async fn test_excluded_author_is_not_designated() {
        let directory = StaticDirectory::new().with_post(10, 2, 20);
        directory.exclude(20);
        let filter = filter(directory);

        let pool = filter
            .candidate_pool(&lottery(DrawStrategy::SpecificPosts, vec![2]), &[20, 30])
            .await
            .unwrap();

        assert_eq!(
            pool,
            CandidatePool::SpecificPosts {
                designated: vec![],
                eligible: vec![30],
            }
        );
    }

    #[tokio::test]
    async fn test_missing_topic_has_no_designated_users() {
        let filter = filter(StaticDirectory::new().with_post(10, 2, 20));
        let mut lottery = lottery(DrawStrategy::SpecificPosts, vec![2]);
        lottery.topic_id = None;

        let pool = filter.candidate_pool(&lottery, &[20]).await.unwrap();
        assert_eq!(
            pool,
            CandidatePool::SpecificPosts {
                designated: vec![],
                eligible: vec![20],
            }
        );
    }
}
