//! Paginated queries: one cached value holding every loaded page.
//!
//! A single query stores an [`InfiniteData`]. Fetching in a direction loads
//! one page at that end; any other fetch reloads from the first page up to
//! the number of pages held before, so every page stays consistent.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};

use crate::client::QueryClient;
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::observer::{QueryObserver, QueryObserverResult};
use crate::options::{
    FetchDirection, FetchOptions, QueryConfig, QueryFnContext, QueryFunction, QueryOptions,
};
use crate::retryer::{NetworkMode, RetryPolicy};
use crate::subscription::Subscription;
use crate::time::{GcTime, StaleTime};

/// Loaded pages and the params that produced them, oldest first.
pub struct InfiniteData<T, P> {
    pub pages: Vec<Arc<T>>,
    pub page_params: Vec<P>,
}

impl<T, P: Clone> Clone for InfiniteData<T, P> {
    fn clone(&self) -> Self {
        Self {
            pages: self.pages.clone(),
            page_params: self.page_params.clone(),
        }
    }
}

impl<T, P: fmt::Debug> fmt::Debug for InfiniteData<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfiniteData")
            .field("pages", &self.pages.len())
            .field("page_params", &self.page_params)
            .finish()
    }
}

impl<T, P> Default for InfiniteData<T, P> {
    fn default() -> Self {
        Self {
            pages: Vec::new(),
            page_params: Vec::new(),
        }
    }
}

impl<T, P> InfiniteData<T, P> {
    pub fn first_page(&self) -> Option<&Arc<T>> {
        self.pages.first()
    }

    pub fn last_page(&self) -> Option<&Arc<T>> {
        self.pages.last()
    }

    pub fn first_page_param(&self) -> Option<&P> {
        self.page_params.first()
    }

    pub fn last_page_param(&self) -> Option<&P> {
        self.page_params.last()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Append a page, dropping the first one beyond `max_pages`.
    fn push_back(&mut self, page: Arc<T>, param: P, max_pages: Option<usize>) {
        self.pages.push(page);
        self.page_params.push(param);
        if max_pages.is_some_and(|max| max > 0 && self.pages.len() > max) {
            self.pages.remove(0);
            self.page_params.remove(0);
        }
    }

    /// Prepend a page, dropping the last one beyond `max_pages`.
    fn push_front(&mut self, page: Arc<T>, param: P, max_pages: Option<usize>) {
        self.pages.insert(0, page);
        self.page_params.insert(0, param);
        if max_pages.is_some_and(|max| max > 0 && self.pages.len() > max) {
            self.pages.pop();
            self.page_params.pop();
        }
    }
}

type PageFn<T, P> =
    Arc<dyn Fn(P, QueryFnContext) -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync>;
type PageParamFn<T, P> = Arc<dyn Fn(&InfiniteData<T, P>) -> Option<P> + Send + Sync>;

struct InfiniteQueryFn<T, P> {
    initial_page_param: P,
    page_fn: PageFn<T, P>,
    get_next_page_param: PageParamFn<T, P>,
    get_previous_page_param: Option<PageParamFn<T, P>>,
    max_pages: Option<usize>,
}

impl<T, P> InfiniteQueryFn<T, P>
where
    T: Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    async fn fetch_page(&self, param: P, ctx: &QueryFnContext) -> Result<Arc<T>, QueryError> {
        (self.page_fn)(param, ctx.clone()).await.map(Arc::new)
    }

    /// Reload from the first page up to `count` pages, stopping early when
    /// there is no next page.
    async fn refetch_all(
        &self,
        ctx: &QueryFnContext,
        current: Option<&InfiniteData<T, P>>,
    ) -> Result<InfiniteData<T, P>, QueryError> {
        let count = current.map_or(1, |data| data.len().max(1));
        let mut param = current
            .and_then(|data| data.first_page_param().cloned())
            .unwrap_or_else(|| self.initial_page_param.clone());
        let mut data = InfiniteData::default();
        for index in 0..count {
            if index > 0 {
                match (self.get_next_page_param)(&data) {
                    Some(next) => param = next,
                    None => break,
                }
            }
            let page = self.fetch_page(param.clone(), ctx).await?;
            data.push_back(page, param.clone(), self.max_pages);
        }
        Ok(data)
    }
}

#[async_trait]
impl<T, P> QueryFunction<InfiniteData<T, P>> for InfiniteQueryFn<T, P>
where
    T: Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    async fn call(
        &self,
        ctx: QueryFnContext,
        current: Option<Arc<InfiniteData<T, P>>>,
    ) -> Result<InfiniteData<T, P>, QueryError> {
        let current = current.filter(|data| !data.is_empty());
        let (Some(direction), Some(current)) = (ctx.direction(), current.as_deref()) else {
            return self.refetch_all(&ctx, current.as_deref()).await;
        };

        let mut data = current.clone();
        match direction {
            FetchDirection::Forward => {
                let Some(param) = (self.get_next_page_param)(current) else {
                    return Ok(data);
                };
                let page = self.fetch_page(param.clone(), &ctx).await?;
                data.push_back(page, param, self.max_pages);
            }
            FetchDirection::Backward => {
                let Some(param) = self
                    .get_previous_page_param
                    .as_ref()
                    .and_then(|previous| previous(current))
                else {
                    return Ok(data);
                };
                let page = self.fetch_page(param.clone(), &ctx).await?;
                data.push_front(page, param, self.max_pages);
            }
        }
        Ok(data)
    }
}

/// Options for a paginated query.
///
/// `get_next_page_param` (and `get_previous_page_param`) look at the pages
/// loaded so far and return the param of the adjacent page, or `None` when
/// there is none in that direction.
///
/// # Example
///
/// ```ignore
/// let options = InfiniteQueryOptions::new(query_key!["feed"], 0u32)
///     .page_fn(|cursor, _ctx| async move { api::feed(cursor).await.map_err(Into::into) })
///     .get_next_page_param(|data| data.last_page().and_then(|page| page.next_cursor))
///     .max_pages(5);
/// ```
pub struct InfiniteQueryOptions<T, P> {
    base: QueryOptions<InfiniteData<T, P>>,
    initial_page_param: P,
    page_fn: Option<PageFn<T, P>>,
    get_next_page_param: Option<PageParamFn<T, P>>,
    get_previous_page_param: Option<PageParamFn<T, P>>,
    max_pages: Option<usize>,
}

impl<T, P: Clone> Clone for InfiniteQueryOptions<T, P> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            initial_page_param: self.initial_page_param.clone(),
            page_fn: self.page_fn.clone(),
            get_next_page_param: self.get_next_page_param.clone(),
            get_previous_page_param: self.get_previous_page_param.clone(),
            max_pages: self.max_pages,
        }
    }
}

impl<T, P: fmt::Debug> fmt::Debug for InfiniteQueryOptions<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfiniteQueryOptions")
            .field("base", &self.base)
            .field("initial_page_param", &self.initial_page_param)
            .field("max_pages", &self.max_pages)
            .finish_non_exhaustive()
    }
}

impl<T, P> InfiniteQueryOptions<T, P>
where
    T: Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    pub fn new(key: impl Into<QueryKey>, initial_page_param: P) -> Self {
        Self {
            base: QueryOptions::new(key),
            initial_page_param,
            page_fn: None,
            get_next_page_param: None,
            get_previous_page_param: None,
            max_pages: None,
        }
    }

    /// Load the page for one param.
    pub fn page_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(P, QueryFnContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        self.page_fn = Some(Arc::new(move |param: P, ctx: QueryFnContext| {
            f(param, ctx).boxed()
        }));
        self
    }

    pub fn get_next_page_param<F>(mut self, f: F) -> Self
    where
        F: Fn(&InfiniteData<T, P>) -> Option<P> + Send + Sync + 'static,
    {
        self.get_next_page_param = Some(Arc::new(f));
        self
    }

    pub fn get_previous_page_param<F>(mut self, f: F) -> Self
    where
        F: Fn(&InfiniteData<T, P>) -> Option<P> + Send + Sync + 'static,
    {
        self.get_previous_page_param = Some(Arc::new(f));
        self
    }

    /// Keep at most `max_pages` pages; `0` means unbounded.
    pub fn max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    pub fn stale_time(mut self, stale_time: impl Into<StaleTime>) -> Self {
        self.base = self.base.stale_time(stale_time);
        self
    }

    pub fn gc_time(mut self, gc_time: impl Into<GcTime>) -> Self {
        self.base = self.base.gc_time(gc_time);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.base = self.base.retry(retry);
        self
    }

    pub fn network_mode(mut self, mode: NetworkMode) -> Self {
        self.base = self.base.network_mode(mode);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.base = self.base.enabled(enabled);
        self
    }

    pub fn with_config(mut self, config: &QueryConfig) -> Self {
        self.base = self.base.with_config(config);
        self
    }

    pub fn key(&self) -> &QueryKey {
        self.base.key()
    }

    /// Whether `data` has a page after its last one.
    pub fn has_next_page(&self, data: &InfiniteData<T, P>) -> bool {
        self.get_next_page_param
            .as_ref()
            .is_some_and(|next| next(data).is_some())
    }

    /// Whether `data` has a page before its first one.
    pub fn has_previous_page(&self, data: &InfiniteData<T, P>) -> bool {
        self.get_previous_page_param
            .as_ref()
            .is_some_and(|previous| previous(data).is_some())
    }

    /// The options of the underlying query.
    ///
    /// Without a page function the query has no fetch function; without
    /// `get_next_page_param` only the first page is ever loaded.
    pub fn to_query_options(&self) -> QueryOptions<InfiniteData<T, P>> {
        let Some(page_fn) = self.page_fn.clone() else {
            return self.base.clone();
        };
        let get_next_page_param: PageParamFn<T, P> = match self.get_next_page_param.clone() {
            Some(next) => next,
            None => Arc::new(|_: &InfiniteData<T, P>| -> Option<P> { None }),
        };
        self.base.clone().query_function(InfiniteQueryFn {
            initial_page_param: self.initial_page_param.clone(),
            page_fn,
            get_next_page_param,
            get_previous_page_param: self.get_previous_page_param.clone(),
            max_pages: self.max_pages,
        })
    }
}

/// An observer result plus pagination flags.
pub struct InfiniteQueryObserverResult<T, P> {
    pub result: QueryObserverResult<InfiniteData<T, P>>,
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub is_fetching_next_page: bool,
    pub is_fetching_previous_page: bool,
}

impl<T, P> Clone for InfiniteQueryObserverResult<T, P> {
    fn clone(&self) -> Self {
        Self {
            result: self.result.clone(),
            has_next_page: self.has_next_page,
            has_previous_page: self.has_previous_page,
            is_fetching_next_page: self.is_fetching_next_page,
            is_fetching_previous_page: self.is_fetching_previous_page,
        }
    }
}

impl<T, P> fmt::Debug for InfiniteQueryObserverResult<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfiniteQueryObserverResult")
            .field("result", &self.result)
            .field("has_next_page", &self.has_next_page)
            .field("has_previous_page", &self.has_previous_page)
            .field("is_fetching_next_page", &self.is_fetching_next_page)
            .field("is_fetching_previous_page", &self.is_fetching_previous_page)
            .finish()
    }
}

impl<T, P> InfiniteQueryObserverResult<T, P> {
    pub fn data(&self) -> Option<&Arc<InfiniteData<T, P>>> {
        self.result.data.as_ref()
    }
}

fn paginate<T, P>(
    options: &InfiniteQueryOptions<T, P>,
    result: QueryObserverResult<InfiniteData<T, P>>,
) -> InfiniteQueryObserverResult<T, P>
where
    T: Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    let (has_next_page, has_previous_page) = match &result.data {
        Some(data) => (options.has_next_page(data), options.has_previous_page(data)),
        None => (false, false),
    };
    let fetching = result.is_fetching();
    InfiniteQueryObserverResult {
        is_fetching_next_page: fetching
            && result.fetch_direction == Some(FetchDirection::Forward),
        is_fetching_previous_page: fetching
            && result.fetch_direction == Some(FetchDirection::Backward),
        has_next_page,
        has_previous_page,
        result,
    }
}

/// A [`QueryObserver`] over an [`InfiniteData`] query that can load more pages.
pub struct InfiniteQueryObserver<T, P>
where
    T: Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    observer: QueryObserver<InfiniteData<T, P>>,
    options: Arc<parking_lot::RwLock<InfiniteQueryOptions<T, P>>>,
}

impl<T, P> InfiniteQueryObserver<T, P>
where
    T: Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    pub fn new(client: &QueryClient, options: InfiniteQueryOptions<T, P>) -> Result<Self, QueryError> {
        let observer = QueryObserver::new(client, options.to_query_options())?;
        Ok(Self {
            observer,
            options: Arc::new(parking_lot::RwLock::new(options)),
        })
    }

    pub fn set_options(&self, options: InfiniteQueryOptions<T, P>) -> Result<(), QueryError> {
        let query_options = options.to_query_options();
        *self.options.write() = options;
        self.observer.set_options(query_options)
    }

    pub fn current_result(&self) -> InfiniteQueryObserverResult<T, P> {
        paginate(&self.options.read(), self.observer.current_result())
    }

    /// Fetch one more page in `direction`, replacing a fetch in flight once
    /// there is data. Nothing is fetched when the held pages say there is no
    /// such page.
    fn fetch_page(
        &self,
        direction: FetchDirection,
    ) -> impl Future<Output = InfiniteQueryObserverResult<T, P>> + Send + 'static {
        let current = self.current_result();
        let available = match direction {
            FetchDirection::Forward => current.has_next_page,
            FetchDirection::Backward => current.has_previous_page,
        };
        let fetch = (available || current.data().is_none()).then(|| {
            self.observer.fetch_with(FetchOptions {
                direction: Some(direction),
                ..FetchOptions::cancel_refetch()
            })
        });
        let options = self.options.clone();
        async move {
            let Some(fetch) = fetch else {
                return current;
            };
            let result = fetch.await;
            let options = options.read();
            paginate(&options, result)
        }
    }

    /// Load the page after the last one. A no-op when there is none.
    pub fn fetch_next_page(
        &self,
    ) -> impl Future<Output = InfiniteQueryObserverResult<T, P>> + Send + 'static {
        self.fetch_page(FetchDirection::Forward)
    }

    /// Load the page before the first one. A no-op when there is none.
    pub fn fetch_previous_page(
        &self,
    ) -> impl Future<Output = InfiniteQueryObserverResult<T, P>> + Send + 'static {
        self.fetch_page(FetchDirection::Backward)
    }

    /// Reload every held page from the first one.
    pub fn refetch(&self) -> impl Future<Output = InfiniteQueryObserverResult<T, P>> + Send + 'static {
        let refetch = self.observer.refetch();
        let options = self.options.clone();
        async move {
            let result = refetch.await;
            let options = options.read();
            paginate(&options, result)
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&InfiniteQueryObserverResult<T, P>) + Send + Sync + 'static,
    {
        let options = self.options.clone();
        self.observer.subscribe(move |result| {
            let paginated = paginate(&options.read(), result.clone());
            listener(&paginated);
        })
    }

    pub fn destroy(&self) {
        self.observer.destroy();
    }
}

impl<T, P> fmt::Debug for InfiniteQueryObserver<T, P>
where
    T: Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfiniteQueryObserver")
            .field("observer", &self.observer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_cache::QueryCache;

    fn numbered_pages() -> InfiniteQueryOptions<String, u32> {
        InfiniteQueryOptions::new("pages", 1u32)
            .retry(RetryPolicy::Never)
            .page_fn(|n, _| async move { Ok(format!("page {}", n)) })
            .get_next_page_param(|data| data.last_page_param().map(|n| n + 1))
            .get_previous_page_param(|data| {
                data.first_page_param().copied().filter(|n| *n > 1).map(|n| n - 1)
            })
    }

    fn params(data: &InfiniteData<String, u32>) -> Vec<u32> {
        data.page_params.clone()
    }

    #[test]
    fn test_bounded_push() {
        let mut data = InfiniteData::<u32, u32>::default();
        for n in 1..=3 {
            data.push_back(Arc::new(n), n, Some(2));
        }
        assert_eq!(data.page_params, vec![2, 3]);

        data.push_front(Arc::new(1), 1, Some(2));
        assert_eq!(data.page_params, vec![1, 2]);

        data.push_back(Arc::new(3), 3, Some(0));
        assert_eq!(data.page_params, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forward_and_backward_respect_max_pages() {
        let cache = QueryCache::new();
        let query = cache
            .build(numbered_pages().max_pages(2).to_query_options())
            .unwrap();
        let forward = || FetchOptions {
            direction: Some(FetchDirection::Forward),
            ..FetchOptions::default()
        };
        let backward = || FetchOptions {
            direction: Some(FetchDirection::Backward),
            ..FetchOptions::default()
        };

        query.fetch(FetchOptions::default()).await.unwrap();
        query.fetch(forward()).await.unwrap();
        let data = query.fetch(forward()).await.unwrap();
        assert_eq!(params(&data), vec![2, 3]);
        assert_eq!(data.last_page().map(|p| p.as_str()), Some("page 3"));

        let data = query.fetch(backward()).await.unwrap();
        assert_eq!(params(&data), vec![1, 2]);

        // No page before the first one.
        let data = query.fetch(backward()).await.unwrap();
        assert_eq!(params(&data), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_reloads_held_pages() {
        let cache = QueryCache::new();
        let query = cache.build(numbered_pages().to_query_options()).unwrap();
        let forward = || FetchOptions {
            direction: Some(FetchDirection::Forward),
            ..FetchOptions::default()
        };

        query.fetch(FetchOptions::default()).await.unwrap();
        query.fetch(forward()).await.unwrap();
        query.fetch(forward()).await.unwrap();
        let data = query.fetch(FetchOptions::default()).await.unwrap();
        assert_eq!(params(&data), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_stops_without_next_page() {
        let cache = QueryCache::new();
        let options = numbered_pages()
            .get_next_page_param(|data| data.last_page_param().filter(|n| **n < 2).map(|n| n + 1));
        let query = cache.build(options.to_query_options()).unwrap();
        query.set_data(
            InfiniteData {
                pages: (1..=4).map(|n| Arc::new(format!("old {}", n))).collect(),
                page_params: vec![1, 2, 3, 4],
            },
            None,
        );

        let data = query.fetch(FetchOptions::default()).await.unwrap();
        assert_eq!(params(&data), vec![1, 2]);
        assert!(!options.has_next_page(&data));
        assert!(!options.has_previous_page(&data));
    }
}
