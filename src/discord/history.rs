// discord/history.rs — Channel history as a lazy stream
//
// Pages through GET /channels/{id}/messages with `after=<last id>` starting
// from snowflake 0, so the oldest messages come first. Each page is sorted
// by snowflake before it is yielded; pages are fetched only when the
// consumer has drained the previous one.

use std::collections::VecDeque;

use consentkeeper_core::{ChannelMessage, EngineResult};
use futures::{stream, Stream};
use log::debug;
use serde::Deserialize;
use serde_json::Value;

use super::{channel_err, DiscordRest};

/// Discord's maximum page size for message history.
const PAGE_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
struct HistoryAuthor {
    id: String,
}

#[derive(Debug, Deserialize)]
struct HistoryMessage {
    id: String,
    author: HistoryAuthor,
    #[serde(default)]
    content: Option<String>,
}

struct Cursor {
    rest: DiscordRest,
    channel_id: String,
    after: String,
    buffer: VecDeque<HistoryMessage>,
    exhausted: bool,
    pages: usize,
}

impl Cursor {
    async fn fetch_page(&mut self) -> EngineResult<()> {
        let path = format!(
            "/channels/{}/messages?limit={}&after={}",
            self.channel_id, PAGE_LIMIT, self.after
        );
        let page = parse_page(self.rest.get(&path).await?)?;
        self.pages += 1;
        debug!("[discord] History page {} for channel {}: {} messages", self.pages, self.channel_id, page.len());

        if page.len() < PAGE_LIMIT {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.after = last.id.clone();
        }
        self.buffer.extend(page);
        Ok(())
    }
}

/// Parse one page and put it in chronological (ascending snowflake) order.
fn parse_page(value: Value) -> EngineResult<Vec<HistoryMessage>> {
    let mut page: Vec<HistoryMessage> =
        serde_json::from_value(value).map_err(|e| channel_err(format!("bad history page: {}", e)))?;
    page.sort_by_key(|m| m.id.parse::<u64>().unwrap_or(0));
    Ok(page)
}

/// Every message of `channel_id`, oldest first. A failed page fetch yields
/// one error and ends the stream.
pub fn channel_history(rest: DiscordRest, channel_id: String) -> impl Stream<Item = EngineResult<ChannelMessage>> {
    let cursor = Cursor {
        rest,
        channel_id,
        after: "0".into(),
        buffer: VecDeque::new(),
        exhausted: false,
        pages: 0,
    };

    stream::unfold(Some(cursor), |state| async move {
        let mut cursor = state?;
        loop {
            if let Some(m) = cursor.buffer.pop_front() {
                let msg = ChannelMessage { author_id: m.author.id, content: m.content };
                return Some((Ok(msg), Some(cursor)));
            }
            if cursor.exhausted {
                return None;
            }
            if let Err(e) = cursor.fetch_page().await {
                return Some((Err(e), None));
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_is_sorted_oldest_first() {
        let page = parse_page(json!([
            { "id": "300", "author": { "id": "u1" }, "content": "third" },
            { "id": "100", "author": { "id": "u2" }, "content": "first" },
            { "id": "200", "author": { "id": "u1" }, "content": "second" },
        ]))
        .unwrap();
        let ids: Vec<_> = page.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["100", "200", "300"]);
    }

    #[test]
    fn snowflakes_sort_numerically() {
        let page = parse_page(json!([
            { "id": "1000", "author": { "id": "a" }, "content": "later" },
            { "id": "999", "author": { "id": "a" }, "content": "earlier" },
        ]))
        .unwrap();
        assert_eq!(page[0].content.as_deref(), Some("earlier"));
    }

    #[test]
    fn missing_content_is_preserved_as_none() {
        let page = parse_page(json!([{ "id": "1", "author": { "id": "a" } }])).unwrap();
        assert!(page[0].content.is_none());
    }

    #[test]
    fn malformed_page_is_channel_error() {
        assert!(parse_page(json!({ "message": "Missing Access" })).is_err());
    }
}
