use anyhow::Context;
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Table};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tombola_core::{TopicId, UserId};
use tombola_draw::StaticDirectory;

/// Forum facts the engine consults: post authors, excluded users and
/// moderators. Kept in `<data_dir>/directory.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryFile {
    pub posts: Vec<PostEntry>,
    pub excluded_users: Vec<UserId>,
    pub moderators: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostEntry {
    pub topic: TopicId,
    pub post_number: u32,
    pub author: UserId,
}

impl DirectoryFile {
    fn path(data_dir: &Path) -> PathBuf {
        data_dir.join("directory.json")
    }

    pub fn load(data_dir: &Path) -> anyhow::Result<Self> {
        let path = Self::path(data_dir);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid directory file {}", path.display()))
    }

    pub fn save(&self, data_dir: &Path) -> anyhow::Result<()> {
        let path = Self::path(data_dir);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn set_post(&mut self, topic: TopicId, post_number: u32, author: UserId) {
        self.posts
            .retain(|entry| !(entry.topic == topic && entry.post_number == post_number));
        self.posts.push(PostEntry {
            topic,
            post_number,
            author,
        });
    }

    pub fn to_directory(&self) -> StaticDirectory {
        let directory = StaticDirectory::new();
        for entry in &self.posts {
            directory.record_post(entry.topic, entry.post_number, entry.author);
        }
        for user in &self.excluded_users {
            directory.exclude(*user);
        }
        for user in &self.moderators {
            directory.grant_override(*user);
        }
        directory
    }
}

#[derive(Subcommand)]
pub enum DirectoryCommands {
    /// Record who wrote a post in a topic
    Post {
        /// Topic ID
        topic: TopicId,
        /// Post number within the topic
        post_number: u32,
        /// Author user ID
        author: UserId,
    },
    /// Exclude a user from every lottery
    Exclude {
        /// User ID
        user: UserId,
    },
    /// Let a user draw early and cancel any lottery
    Moderator {
        /// User ID
        user: UserId,
    },
    /// Show the directory contents
    Show,
}

pub fn handle_directory_command(cmd: DirectoryCommands, data_dir: &Path) -> anyhow::Result<()> {
    let mut file = DirectoryFile::load(data_dir)?;

    match cmd {
        DirectoryCommands::Post {
            topic,
            post_number,
            author,
        } => {
            file.set_post(topic, post_number, author);
            file.save(data_dir)?;
            println!(
                "Recorded post #{} in topic {} by user {}",
                post_number, topic, author
            );
        }

        DirectoryCommands::Exclude { user } => {
            if !file.excluded_users.contains(&user) {
                file.excluded_users.push(user);
                file.save(data_dir)?;
            }
            println!("User {} is excluded from lotteries", user);
        }

        DirectoryCommands::Moderator { user } => {
            if !file.moderators.contains(&user) {
                file.moderators.push(user);
                file.save(data_dir)?;
            }
            println!("User {} now has override authority", user);
        }

        DirectoryCommands::Show => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["Topic", "Post", "Author"]);
            for entry in &file.posts {
                table.add_row(vec![
                    entry.topic.to_string(),
                    format!("#{}", entry.post_number),
                    entry.author.to_string(),
                ]);
            }
            println!("{}", table);

            println!("Excluded users: {:?}", file.excluded_users);
            println!("Moderators: {:?}", file.moderators);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tombola_draw::{AccessPolicy, PostDirectory};

    #[tokio::test]
    async fn test_directory_file_round_trip_into_collaborators() {
        let dir = tempfile::tempdir().unwrap();

        let mut file = DirectoryFile::default();
        file.set_post(10, 2, 20);
        file.set_post(10, 2, 21);
        file.excluded_users.push(30);
        file.save(dir.path()).unwrap();

        let directory = DirectoryFile::load(dir.path()).unwrap().to_directory();
        assert_eq!(directory.author_of_post(10, 2).await.unwrap(), Some(21));
        assert!(directory.is_excluded(30).await.unwrap());
        assert!(!directory.has_override_authority(30).await.unwrap());
    }
}
