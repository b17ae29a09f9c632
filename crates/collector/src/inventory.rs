//! Storage inventory: lazy, paginated listing of one location

use futures::stream::{self, BoxStream, StreamExt};
use ls_core::{ListPage, ObjectStore, Result, RetryPolicy};
use std::sync::Arc;

pub struct InventoryScanner {
    store: Arc<dyn ObjectStore>,
    page_size: usize,
    retry: RetryPolicy,
}

enum Cursor {
    Start(Option<String>),
    After(String),
    Exhausted,
}

impl InventoryScanner {
    pub fn new(store: Arc<dyn ObjectStore>, page_size: usize, retry: RetryPolicy) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
            retry,
        }
    }

    /// Pages of `location`, starting after `start_after`
    ///
    /// Only one page is held at a time; each request is retried on its own.
    pub fn pages<'a>(
        &'a self,
        location: &'a str,
        start_after: Option<String>,
    ) -> BoxStream<'a, Result<ListPage>> {
        stream::try_unfold(Cursor::Start(start_after), move |cursor| async move {
            let start_after = match cursor {
                Cursor::Exhausted => return Ok(None),
                Cursor::Start(start) => start,
                Cursor::After(path) => Some(path),
            };

            let page = self
                .retry
                .run("list", || {
                    self.store
                        .list_page(location, start_after.as_deref(), self.page_size)
                })
                .await?;
            let next = match &page.next {
                Some(path) => Cursor::After(path.clone()),
                None => Cursor::Exhausted,
            };
            Ok(Some((page, next)))
        })
        .boxed()
    }
}
