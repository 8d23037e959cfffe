//! History source backed by `<fixtures_dir>/<channel>.json` files.
//!
//! Each file holds a JSON array of messages ordered newest first.

use std::path::PathBuf;
use std::time::Duration;

use archivist_history::{
    catalog_path_for_channel, HistoryMessage, HistoryPage, HistoryPageSource, HistorySourceError,
};
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct FixtureHistorySource {
    fixtures_dir: PathBuf,
    page_delay: Duration,
}

impl FixtureHistorySource {
    pub fn new(fixtures_dir: PathBuf, page_delay: Duration) -> Self {
        Self {
            fixtures_dir,
            page_delay,
        }
    }

    fn fixture_path(&self, channel_id: &str) -> PathBuf {
        catalog_path_for_channel(&self.fixtures_dir, channel_id).with_extension("json")
    }

    async fn load_channel(&self, channel_id: &str) -> Result<Vec<HistoryMessage>, HistorySourceError> {
        let path = self.fixture_path(channel_id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(HistorySourceError::ChannelUnavailable(channel_id.to_string()));
            }
            Err(error) => {
                return Err(HistorySourceError::Fetch(format!(
                    "failed to read {}: {error}",
                    path.display()
                )));
            }
        };
        serde_json::from_str::<Vec<HistoryMessage>>(&raw).map_err(|error| {
            HistorySourceError::Fetch(format!("failed to parse {}: {error}", path.display()))
        })
    }
}

#[async_trait]
impl HistoryPageSource for FixtureHistorySource {
    async fn fetch_page(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<HistoryPage, HistorySourceError> {
        if !self.page_delay.is_zero() {
            tokio::time::sleep(self.page_delay).await;
        }
        let messages = self.load_channel(channel_id).await?;
        let start = match before {
            Some(cursor) => messages
                .iter()
                .position(|message| message.id == cursor)
                .map(|index| index + 1)
                .ok_or_else(|| {
                    HistorySourceError::Fetch(format!("unknown page cursor `{cursor}`"))
                })?,
            None => 0,
        };
        let page = messages
            .into_iter()
            .skip(start)
            .take(limit.max(1))
            .collect::<Vec<_>>();
        let next_before = page.last().map(|message| message.id.clone());
        Ok(HistoryPage {
            messages: page,
            next_before,
        })
    }
}
