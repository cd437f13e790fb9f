#![allow(dead_code)]

use sheetbot::memory::MemoryTable;
use sheetbot::{Config, SheetService};
use std::sync::Arc;
use std::time::Duration;

pub fn people() -> MemoryTable {
    MemoryTable::from_rows(&[
        &["Name", "Email", "Age"],
        &["John", "j@x.com", "30"],
        &["Alice", "a@y.com", "25"],
    ])
}

pub fn test_config() -> Config {
    Config {
        cache_ttl: Duration::from_secs(15),
        reauth_after: Duration::from_secs(3600),
        remote_timeout: Duration::from_secs(10),
        ..Config::default()
    }
}

pub fn service_with(table: &MemoryTable, config: Config) -> SheetService {
    SheetService::new(config, Arc::new(table.clone()))
}

pub fn service(table: &MemoryTable) -> SheetService {
    service_with(table, test_config())
}

pub fn row(cells: &[&str]) -> Vec<String> {
    cells.iter().map(|c| c.to_string()).collect()
}
