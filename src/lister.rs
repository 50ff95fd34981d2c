use std::collections::VecDeque;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::types::{ListingPage, ObjectMeta, ObjectStorageResult};

/// Backend primitive behind [`ObjectListIterator`]: fetch one page of a
/// prefix listing, resuming after `continuation_token` when it is given.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, continuation_token: Option<String>)
    -> ObjectStorageResult<ListingPage>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListingState {
    NotStarted,
    HasMore,
    Exhausted,
}

/// Lazy, pull-based enumeration of the objects under a prefix.
///
/// Pages are fetched one at a time, only when the buffered objects run out.
/// A failed page fetch is yielded once as `Err` and the iterator is
/// exhausted afterwards; restart by calling `list_objects` again.
///
/// Within a page, backend order is preserved. Whether concatenated pages are
/// gap-free and duplicate-free depends on the backend's consistency model.
pub struct ObjectListIterator {
    fetcher: Box<dyn PageFetcher>,
    buffer: VecDeque<ObjectMeta>,
    continuation_token: Option<String>,
    state: ListingState,
    pages_fetched: usize,
}

impl ObjectListIterator {
    pub fn new(fetcher: Box<dyn PageFetcher>) -> Self {
        Self {
            fetcher,
            buffer: VecDeque::new(),
            continuation_token: None,
            state: ListingState::NotStarted,
            pages_fetched: 0,
        }
    }

    /// False once every object has been yielded or an error has been surfaced.
    pub fn is_valid(&self) -> bool {
        !self.buffer.is_empty() || self.state != ListingState::Exhausted
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Next object, or `None` when the listing is complete.
    pub async fn next(&mut self) -> Option<ObjectStorageResult<ObjectMeta>> {
        loop {
            if let Some(object) = self.buffer.pop_front() {
                return Some(Ok(object));
            }
            if self.state == ListingState::Exhausted {
                return None;
            }
            match self.fetch_next_page().await {
                Ok(objects) => self.buffer.extend(objects),
                Err(e) => return Some(Err(e)),
            }
        }
    }

    /// Remaining objects of the current page, or the next page when nothing
    /// is buffered. A page may be empty while more pages follow.
    pub async fn next_page(&mut self) -> Option<ObjectStorageResult<Vec<ObjectMeta>>> {
        if !self.buffer.is_empty() {
            return Some(Ok(self.buffer.drain(..).collect()));
        }
        if self.state == ListingState::Exhausted {
            return None;
        }
        Some(self.fetch_next_page().await)
    }

    /// Drain the iterator into a vector, stopping at the first error.
    pub async fn collect_all(mut self) -> ObjectStorageResult<Vec<ObjectMeta>> {
        let mut objects = Vec::new();
        while let Some(page) = self.next_page().await {
            objects.extend(page?);
        }
        Ok(objects)
    }

    async fn fetch_next_page(&mut self) -> ObjectStorageResult<Vec<ObjectMeta>> {
        let result = self
            .fetcher
            .fetch_page(self.continuation_token.take())
            .await;

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                self.state = ListingState::Exhausted;
                return Err(e);
            }
        };
        self.pages_fetched += 1;

        debug!(
            page = self.pages_fetched,
            object_count = page.objects.len(),
            has_more = page.has_more,
            "listing page fetched."
        );

        match (page.has_more, page.continuation_token) {
            (true, Some(token)) => {
                self.continuation_token = Some(token);
                self.state = ListingState::HasMore;
            }
            (true, None) => {
                warn!("listing page reported more results without a continuation token.");
                self.state = ListingState::Exhausted;
            }
            (false, _) => self.state = ListingState::Exhausted,
        }

        Ok(page.objects)
    }
}
