// limitwatch/src/fetch/mod.rs
//
// Paginated fetcher over the remote log store.
//
// One logical query = filter expression + half-open time range. Pages arrive
// newest-first; we follow `pagination.next` until either
//   - a page is empty (store exhausted), or
//   - a page contains a record older than range.from (lower boundary crossed).
// Records older than range.from are dropped; everything else is kept.
//
// Every network call is submitted to the shared RateScheduler. A body that
// does not parse is fatal for the whole fetch: no retry, no partial result.

pub mod cache;
pub mod http;

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::FetchError;
use crate::events::{LogEvent, RawPage, TimeRange};
use crate::scheduler::RateScheduler;

pub use cache::ResponseCache;
pub use http::HttpLogSource;

/// Default page size requested from the store.
pub const DEFAULT_BATCH: usize = 1000;

// ── Remote seam ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    /// First page of a query.
    Query { filter: String, batch: usize, range: TimeRange },
    /// Follow-up page; the cursor is the opaque URL the store handed back.
    Cursor(String),
}

impl PageRequest {
    /// Stable textual identity, used as the cache key input.
    pub fn signature(&self) -> String {
        match self {
            Self::Query { filter, batch, range } => format!(
                "q|{}|{}|{}|{}",
                filter,
                batch,
                range.from.timestamp_millis(),
                range.to.timestamp_millis()
            ),
            Self::Cursor(url) => format!("c|{}", url),
        }
    }
}

/// Anything that can answer a page request with a raw JSON body.
pub trait LogSource: Send + Sync + 'static {
    fn send(&self, request: &PageRequest) -> impl Future<Output = Result<String, FetchError>> + Send;
}

// ── Fetcher ───────────────────────────────────────────────────────────────────

pub struct Fetcher<S> {
    source:    Arc<S>,
    scheduler: RateScheduler,
    batch:     usize,
    cache:     Option<Arc<ResponseCache>>,
}

impl<S> Clone for Fetcher<S> {
    fn clone(&self) -> Self {
        Self {
            source:    Arc::clone(&self.source),
            scheduler: self.scheduler.clone(),
            batch:     self.batch,
            cache:     self.cache.clone(),
        }
    }
}

impl<S: LogSource> Fetcher<S> {
    pub fn new(source: Arc<S>, scheduler: RateScheduler, batch: usize) -> Self {
        Self { source, scheduler, batch: batch.max(1), cache: None }
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// All records matching `filter` with timestamp >= `range.from`, following cursors.
    pub async fn fetch(&self, filter: &str, range: TimeRange) -> Result<Vec<LogEvent>, FetchError> {
        let mut events  = Vec::new();
        let mut request = self.first_page(filter, range);
        let mut pages   = 0usize;

        loop {
            let page = self.request(request).await?;
            pages += 1;
            if page.data.is_empty() { break; }

            let next    = page.next_cursor().map(str::to_owned);
            let crossed = collect_page(page, range, &mut events);
            if crossed { break; }

            match next {
                Some(url) => request = PageRequest::Cursor(url),
                None      => break,
            }
        }

        debug!(filter, pages, events = events.len(), "fetch complete");
        Ok(events)
    }

    fn first_page(&self, filter: &str, range: TimeRange) -> PageRequest {
        PageRequest::Query { filter: filter.to_string(), batch: self.batch, range }
    }

    async fn request(&self, request: PageRequest) -> Result<RawPage, FetchError> {
        if let Some(cache) = &self.cache {
            if let Some(body) = cache.get(&request).await? {
                match serde_json::from_str(&body) {
                    Ok(page) => return Ok(page),
                    Err(e) => {
                        warn!("Discarding corrupt cache entry {}: {}", ResponseCache::key(&request), e);
                        cache.evict(&request).await;
                    }
                }
            }
        }

        let source = Arc::clone(&self.source);
        let req    = request.clone();
        let body   = self.scheduler.submit(async move { source.send(&req).await }).await?;
        let page: RawPage = serde_json::from_str(&body)?;

        if let Some(cache) = &self.cache {
            cache.put(&request, &body).await;
        }
        Ok(page)
    }
}

/// Normalize a page into `out`. Returns true if any record predates `range.from`.
fn collect_page(page: RawPage, range: TimeRange, out: &mut Vec<LogEvent>) -> bool {
    let mut crossed = false;
    for raw in page.data {
        let dt = raw.dt.clone();
        match LogEvent::from_raw(raw) {
            Some(ev) if ev.timestamp < range.from => crossed = true,
            Some(ev)                              => out.push(ev),
            None => warn!("Skipping record with unparseable timestamp {:?}", dt),
        }
    }
    crossed
}

// ── Test support ──────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    pub enum Reply {
        Body(String),
        Status(u16),
    }

    type Route = Box<dyn Fn(&PageRequest) -> Reply + Send + Sync>;

    /// In-memory LogSource: a routing closure plus a log of every request seen.
    pub struct ScriptedSource {
        route: Route,
        pub seen: Mutex<Vec<PageRequest>>,
    }

    impl ScriptedSource {
        pub fn new(route: impl Fn(&PageRequest) -> Reply + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self { route: Box::new(route), seen: Mutex::new(Vec::new()) })
        }

        pub fn requests(&self) -> Vec<PageRequest> {
            self.seen.lock().clone()
        }
    }

    impl LogSource for ScriptedSource {
        fn send(&self, request: &PageRequest) -> impl Future<Output = Result<String, FetchError>> + Send {
            self.seen.lock().push(request.clone());
            let reply = (self.route)(request);
            async move {
                match reply {
                    Reply::Body(b)   => Ok(b),
                    Reply::Status(s) => Err(FetchError::Status { status: s, body: String::new() }),
                }
            }
        }
    }

    pub fn record(dt: &str, message: &str, creator: &str) -> serde_json::Value {
        json!({
            "dt": dt,
            "message": message,
            "extensionVersion": "2.3.14",
            "json": json!({ "creatorId": creator, "email": format!("{}@example.com", creator) }).to_string(),
        })
    }

    pub fn page(records: Vec<serde_json::Value>, next: Option<&str>) -> Reply {
        Reply::Body(json!({ "data": records, "pagination": { "next": next } }).to_string())
    }
}
