//! Contracts with the host forum: who owns or moderates what, who wrote which
//! post, and where lifecycle events go.

pub mod events;

pub use events::{LogNotifier, LotteryEvent, MemoryNotifier, Notifier, WinnerSummary};

use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tombola_core::{Lottery, TopicId, UserId};

#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn is_owner(&self, user: UserId, lottery: &Lottery) -> Result<bool> {
        Ok(lottery.owner_id == user)
    }

    /// Member of a group excluded from all lotteries.
    async fn is_excluded(&self, user: UserId) -> Result<bool>;

    /// May draw before the deadline and cancel lotteries they do not own.
    async fn has_override_authority(&self, user: UserId) -> Result<bool>;
}

#[async_trait]
pub trait PostDirectory: Send + Sync {
    async fn author_of_post(&self, topic: TopicId, post_number: u32) -> Result<Option<UserId>>;
}

/// In-memory directory backing both collaborator traits.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    posts: RwLock<HashMap<(TopicId, u32), UserId>>,
    excluded: RwLock<HashSet<UserId>>,
    moderators: RwLock<HashSet<UserId>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_post(self, topic: TopicId, post_number: u32, author: UserId) -> Self {
        self.record_post(topic, post_number, author);
        self
    }

    pub fn record_post(&self, topic: TopicId, post_number: u32, author: UserId) {
        self.posts.write().insert((topic, post_number), author);
    }

    pub fn exclude(&self, user: UserId) {
        self.excluded.write().insert(user);
    }

    pub fn grant_override(&self, user: UserId) {
        self.moderators.write().insert(user);
    }
}

#[async_trait]
impl AccessPolicy for StaticDirectory {
    async fn is_excluded(&self, user: UserId) -> Result<bool> {
        Ok(self.excluded.read().contains(&user))
    }

    async fn has_override_authority(&self, user: UserId) -> Result<bool> {
        Ok(self.moderators.read().contains(&user))
    }
}

#[async_trait]
impl PostDirectory for StaticDirectory {
    async fn author_of_post(&self, topic: TopicId, post_number: u32) -> Result<Option<UserId>> {
        Ok(self.posts.read().get(&(topic, post_number)).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_directory_lookups() {
        let directory = StaticDirectory::new().with_post(1, 2, 20);
        directory.exclude(30);
        directory.grant_override(99);

        assert_eq!(directory.author_of_post(1, 2).await.unwrap(), Some(20));
        assert_eq!(directory.author_of_post(1, 3).await.unwrap(), None);
        assert!(directory.is_excluded(30).await.unwrap());
        assert!(!directory.is_excluded(20).await.unwrap());
        assert!(directory.has_override_authority(99).await.unwrap());
    }
}
