//! Paginated state: an ordered aggregate of fetched pages plus per-
//! direction fetch cursors, and the composable operation wrapper that
//! drives it one page at a time.
//!
//! A paginated operation's `Value` is the running [`PaginatedState`]
//! rather than a single page — each run only fetches and merges in one
//! more page, in whichever direction the caller asked for via the
//! `PagingDirectionKey` context entry.

use crate::context::{Context, ContextKey};
use crate::operation::{Continuation, Operation};
use crate::path::Path;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::marker::PhantomData;

/// One fetched page: an ordered list of `(id, value)` entries.
#[derive(Debug, Clone)]
pub struct Page<Id, V> {
    entries: Vec<(Id, V)>,
}

impl<Id, V> Page<Id, V> {
    pub fn new(entries: Vec<(Id, V)>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[(Id, V)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Which end of the aggregate a fetch extends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingDirection {
    After,
    Before,
}

/// The concrete cursor handed to [`PageSource::fetch_page`]: direction
/// plus the id to resume from, if any (`None` means there is no prior
/// page in that direction yet — fetch the first one).
#[derive(Debug, Clone)]
pub enum PagingRequest<Id> {
    After(Option<Id>),
    Before(Option<Id>),
}

impl<Id> PagingRequest<Id> {
    pub fn direction(&self) -> PagingDirection {
        match self {
            PagingRequest::After(_) => PagingDirection::After,
            PagingRequest::Before(_) => PagingDirection::Before,
        }
    }
}

/// Context key selecting which direction a run fetches in. Defaults to
/// `After` — a freshly subscribed store's first run fetches the first
/// page.
pub struct PagingDirectionKey<Id>(PhantomData<fn() -> Id>);

impl<Id: Send + Sync + 'static> ContextKey for PagingDirectionKey<Id> {
    type Value = PagingDirection;

    fn default_value() -> Self::Value {
        PagingDirection::After
    }
}

/// The ordered aggregate of every page fetched so far, with per-
/// direction cursors and exhaustion flags.
#[derive(Debug, Clone)]
pub struct PaginatedState<Id, V> {
    entries: Vec<(Id, V)>,
    after_cursor: Option<Id>,
    before_cursor: Option<Id>,
    exhausted_after: bool,
    exhausted_before: bool,
}

impl<Id, V> Default for PaginatedState<Id, V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            after_cursor: None,
            before_cursor: None,
            exhausted_after: false,
            exhausted_before: false,
        }
    }
}

impl<Id: Clone, V: Clone> PaginatedState<Id, V> {
    pub fn entries(&self) -> &[(Id, V)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_more(&self, direction: PagingDirection) -> bool {
        match direction {
            PagingDirection::After => !self.exhausted_after,
            PagingDirection::Before => !self.exhausted_before,
        }
    }

    /// The request that extends the aggregate in `direction`, given the
    /// cursor tracked so far.
    fn next_request(&self, direction: PagingDirection) -> PagingRequest<Id> {
        match direction {
            PagingDirection::After => PagingRequest::After(self.after_cursor.clone()),
            PagingDirection::Before => PagingRequest::Before(self.before_cursor.clone()),
        }
    }

    /// Merges a freshly fetched page into the aggregate: appended at the
    /// tail for `After`, prepended at the head for `Before`. An empty
    /// page marks that direction exhausted regardless of `next_cursor`.
    fn merge(&mut self, direction: PagingDirection, page: Page<Id, V>, next_cursor: Option<Id>) {
        match direction {
            PagingDirection::After => {
                if page.entries.is_empty() {
                    self.exhausted_after = true;
                } else {
                    self.entries.extend(page.entries);
                }
                self.after_cursor = next_cursor;
            }
            PagingDirection::Before => {
                if page.entries.is_empty() {
                    self.exhausted_before = true;
                } else {
                    let mut merged = page.entries;
                    merged.extend(std::mem::take(&mut self.entries));
                    self.entries = merged;
                }
                self.before_cursor = next_cursor;
            }
        }
    }
}

/// What a paginated operation fetches with — supplied by the caller,
/// one page at a time, analogous to a plain [`Operation`] body.
#[async_trait]
pub trait PageSource: Send + Sync + 'static {
    type Id: Clone + Send + Sync + 'static;
    type Item: Clone + Send + Sync + 'static;
    type Failure: Clone + Send + Sync + 'static;

    fn path(&self) -> Path;

    fn setup(&self, _ctx: &mut Context) {}

    /// Fetches one page for `request`, returning its entries and the
    /// cursor to continue from next time in the same direction (`None`
    /// once that direction is exhausted).
    async fn fetch_page(
        &self,
        request: PagingRequest<Self::Id>,
        continuation: Continuation<PaginatedState<Self::Id, Self::Item>, Self::Failure>,
    ) -> Result<(Page<Self::Id, Self::Item>, Option<Self::Id>), Self::Failure>;
}

/// Wraps a [`PageSource`] into an [`Operation`] whose value is the
/// accumulated [`PaginatedState`]. Each run fetches exactly one page, in
/// the direction named by the `PagingDirectionKey` context entry, and
/// merges it into the aggregate tracked internally — the aggregate
/// persists across runs since it lives on `Paginated` itself, not in the
/// store's replaceable current value.
pub struct Paginated<S: PageSource> {
    source: S,
    state: Mutex<PaginatedState<S::Id, S::Item>>,
}

impl<S: PageSource> Paginated<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            state: Mutex::new(PaginatedState::default()),
        }
    }
}

#[async_trait]
impl<S: PageSource> Operation for Paginated<S> {
    type Value = PaginatedState<S::Id, S::Item>;
    type Failure = S::Failure;

    fn path(&self) -> Path {
        self.source.path()
    }

    fn setup(&self, ctx: &mut Context) {
        self.source.setup(ctx);
    }

    async fn run(
        &self,
        ctx: Context,
        continuation: Continuation<Self::Value, Self::Failure>,
    ) -> Result<Self::Value, Self::Failure> {
        let direction = ctx.get::<PagingDirectionKey<S::Id>>();
        let request = self.state.lock().next_request(direction);

        let (page, next_cursor) = self.source.fetch_page(request, continuation).await?;

        let mut state = self.state.lock();
        state.merge(direction, page, next_cursor);
        Ok(state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::test_support::noop_continuation;

    struct Letters;

    #[async_trait]
    impl PageSource for Letters {
        type Id = u32;
        type Item = char;
        type Failure = String;

        fn path(&self) -> Path {
            Path::single("letters")
        }

        async fn fetch_page(
            &self,
            request: PagingRequest<u32>,
            _continuation: Continuation<PaginatedState<u32, char>, String>,
        ) -> Result<(Page<u32, char>, Option<u32>), String> {
            match request {
                PagingRequest::After(None) => Ok((Page::new(vec![(0, 'a'), (1, 'b')]), Some(2))),
                PagingRequest::After(Some(2)) => Ok((Page::new(vec![(2, 'c')]), None)),
                PagingRequest::Before(None) => Ok((Page::new(vec![]), None)),
                other => panic!("unexpected request: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn successive_after_runs_accumulate_and_then_exhaust() {
        let op = Paginated::new(Letters);
        let ctx = Context::new();

        let (continuation, _finished) = noop_continuation();
        let first = op.run(ctx.clone(), continuation).await.unwrap();
        assert_eq!(first.entries(), &[(0, 'a'), (1, 'b')]);
        assert!(first.has_more(PagingDirection::After));

        let (continuation, _finished) = noop_continuation();
        let second = op.run(ctx, continuation).await.unwrap();
        assert_eq!(second.entries(), &[(0, 'a'), (1, 'b'), (2, 'c')]);
        assert!(!second.has_more(PagingDirection::After));
    }

    #[tokio::test]
    async fn empty_before_page_marks_that_direction_exhausted() {
        let op = Paginated::new(Letters);
        let mut ctx = Context::new();
        ctx.set::<PagingDirectionKey<u32>>(PagingDirection::Before);

        let (continuation, _finished) = noop_continuation();
        let result = op.run(ctx, continuation).await.unwrap();
        assert!(result.is_empty());
        assert!(!result.has_more(PagingDirection::Before));
    }
}
