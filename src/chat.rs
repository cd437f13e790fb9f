use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;

use crate::query::QueryEngine;
use crate::remote::Row;
use crate::snapshot::Freshness;

lazy_static! {
    static ref WORD_REGEX: Regex = Regex::new(r"[a-z']+").unwrap();
    static ref GREETINGS: HashSet<&'static str> =
        ["hi", "hello", "hey", "yo", "hola"].into_iter().collect();
}

/// Reply sent back to the chat widget.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatReply {
    Text { text: String },
    Table {
        headers: Row,
        rows: Vec<Row>,
        /// Set when the rows come from the last good snapshot because the
        /// refresh failed.
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        stale: bool,
    },
}

impl ChatReply {
    fn text(text: impl Into<String>) -> Self {
        ChatReply::Text { text: text.into() }
    }
}

/// Answers small talk from a fixed keyword table and treats anything else as a
/// search over freshly read rows.
pub struct ChatRouter {
    max_results: usize,
}

impl ChatRouter {
    pub fn new(max_results: usize) -> Self {
        ChatRouter { max_results }
    }

    /// Canned reply for greetings and help-style questions, if the message is one.
    pub fn basic_reply(&self, message: &str) -> Option<String> {
        let q = message.trim().to_lowercase();
        if q.is_empty() {
            return None;
        }
        let words: HashSet<&str> = WORD_REGEX.find_iter(&q).map(|m| m.as_str()).collect();
        let has = |w: &str| words.contains(w);

        if words.iter().any(|w| GREETINGS.contains(w)) {
            return Some(
                "Hello! I can search your Google Sheet. Ask things like: \
                 'Find rows with john', 'emails with @gmail.com', or 'age 30'."
                    .to_string(),
            );
        }

        if has("help") || (has("how") && has("use")) {
            let limit = if self.max_results > 0 {
                format!("up to {}", self.max_results)
            } else {
                "all matching".to_string()
            };
            return Some(format!(
                "Try: 'search alice', 'email contains @company.com', or 'age 25'. \
                 I'll return {} results.",
                limit
            ));
        }

        if q.contains("who are you") || (has("what") && has("you") && has("do")) {
            return Some(
                "I'm your sheet bot. I read your configured Google Sheet and return matching rows."
                    .to_string(),
            );
        }

        if q.contains("show table") || q.contains("display table") {
            return Some(
                "For privacy, the table is hidden by default. \
                 Set SHOW_TABLE=true and refresh to enable it."
                    .to_string(),
            );
        }

        if has("clear") {
            return Some(
                "I don't store chat history. Refresh the page to clear the conversation view."
                    .to_string(),
            );
        }

        None
    }

    /// Reply to `message`, falling back to a fresh search of the sheet.
    pub async fn respond(&self, queries: &QueryEngine, message: &str) -> ChatReply {
        if let Some(text) = self.basic_reply(message) {
            return ChatReply::text(text);
        }
        if message.trim().is_empty() {
            return ChatReply::text("Please enter something to search.");
        }

        let result = queries.search_fresh(message, self.max_results).await;
        if result.freshness == Freshness::Unavailable {
            return ChatReply::text(
                "Sheets access is not configured (credentials.json missing or invalid).",
            );
        }
        if result.headers.is_empty() && result.rows.is_empty() {
            return ChatReply::text("The sheet appears to be empty.");
        }

        ChatReply::Table {
            stale: result.freshness == Freshness::Stale,
            headers: result.headers,
            rows: result.rows,
        }
    }
}
