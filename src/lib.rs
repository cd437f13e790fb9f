/*!
# Sheet Bot

A small web front-end over a Google Sheet: append rows, search them, fetch the
newest one, and chat with a keyword bot that falls back to search.

## Overview

The remote sheet is slow and rate limited, so every read goes through two
caches owned by a [`SheetService`](service::SheetService):

- **Connection cache** - keeps the authenticated session for
  `SHEET_REAUTH_SECONDS` so credential loading and token exchange are paid
  once per window.
- **Snapshot cache** - keeps the last full read (headers plus rows) for
  `CACHE_TTL_SECONDS` so bursts of queries cost a single remote read.

Both caches refresh single-flight: callers that find a stale entry while a
refresh is running wait for it and share its result. Remote calls are bounded
by `REMOTE_TIMEOUT_SECONDS`.

## Architecture

- **remote**: `TableConnector` / `TableSession` traits, the seam to the sheet
- **google**: Sheets v4 REST implementation with service-account auth
- **memory**: in-process implementation for tests and offline runs
- **credentials**: service-account key loading (inline JSON or file)
- **connection**: connection cache
- **snapshot**: snapshot cache and the immutable `TableSnapshot`
- **query**: latest row, substring search, visible rows, append
- **chat**: keyword small talk with search fallback
- **service**: wires the above from a `Config`
- **app**: axum routes and the index page

## Failure handling

Read failures never reach handlers as errors. The snapshot cache answers with
a [`SnapshotRead`](snapshot::SnapshotRead) flagged `Fresh`, `Stale` (last good
snapshot, refresh failed) or `Unavailable` (empty table), and logs every
fallback. Appends return their error so the page can show it.

## REST API Endpoints

- `GET /` - index page, table shown when `SHOW_TABLE=true`
- `POST /add` - append `name`, `email`, `age`
- `GET /get_latest` - newest row
- `GET /search?q=` - case-insensitive substring search
- `GET /chat?q=` - chat reply, text or table
*/

pub mod chat;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod memory;
pub mod query;
pub mod remote;
pub mod service;
pub mod snapshot;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod google;

pub use config::Config;
pub use error::{ConfigError, SheetError, SheetResult};
pub use service::SheetService;
