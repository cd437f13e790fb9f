use std::sync::Arc;

use crate::chat::ChatRouter;
use crate::config::Config;
use crate::connection::ConnectionCache;
use crate::query::QueryEngine;
use crate::remote::TableConnector;
use crate::snapshot::SnapshotCache;

/// Everything a request handler needs, built once at startup.
///
/// Both caches live here rather than in statics, so each service (and each
/// test) owns its own cache state.
pub struct SheetService {
    pub config: Config,
    pub connections: Arc<ConnectionCache>,
    pub snapshots: Arc<SnapshotCache>,
    pub queries: QueryEngine,
    pub chat: ChatRouter,
}

impl SheetService {
    pub fn new(config: Config, connector: Arc<dyn TableConnector>) -> Self {
        let connections = Arc::new(ConnectionCache::new(
            connector,
            config.reauth_after,
            config.remote_timeout,
            config.serve_stale_on_error,
        ));
        let snapshots = Arc::new(SnapshotCache::new(
            Arc::clone(&connections),
            config.cache_ttl,
            config.remote_timeout,
            config.serve_stale_on_error,
        ));
        let queries = QueryEngine::new(
            Arc::clone(&snapshots),
            Arc::clone(&connections),
            config.remote_timeout,
            config.refresh_after_append,
        );
        let chat = ChatRouter::new(config.max_search_results);

        SheetService {
            config,
            connections,
            snapshots,
            queries,
            chat,
        }
    }
}
