use super::*;

use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Mutex as StdMutex;
use tokio::task::JoinHandle;

pub(crate) const REFILL_LOW_WATER: usize = 5;
pub(crate) const FETCH_FAILED_MESSAGE: &str = "Failed to fetch posts after multiple attempts. Please check your network connection or try again later.";

#[derive(Debug, thiserror::Error)]
pub(crate) enum ReviewError {
    #[error("{0}")]
    Fetch(String),
    #[error("delete failed: {0}")]
    Delete(#[source] FeedError),
    #[error("no post to review")]
    NoCurrentPost,
    #[error("review session was reset")]
    Superseded,
}

/// Identifies one fetch. Results carrying an older generation are dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct FetchTicket {
    generation: u64,
    cursor: Option<String>,
}

impl FetchTicket {
    pub(crate) fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FetchOutcome {
    Applied { received: usize, added: usize },
    AlreadyFetching,
    Stale,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ReviewSnapshot {
    pub(crate) current: Option<Post>,
    pub(crate) is_fetching: bool,
    pub(crate) fetch_error: Option<String>,
    pub(crate) kept_count: usize,
    pub(crate) deleted_count: usize,
    pub(crate) queue_exhausted: bool,
    pub(crate) post_loading: bool,
    pub(crate) filters: FilterConfig,
    pub(crate) remaining: usize,
}

/// `position` is either a filter-visible index into `items` or `>= items.len()`.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    items: Vec<Post>,
    position: usize,
    cursor: Option<String>,
    is_fetching: bool,
    fetch_error: Option<String>,
    kept_count: usize,
    deleted_count: usize,
    post_loading: bool,
    force_fresh: bool,
    generation: u64,
    ledger: SeenLedger,
    filters: FilterConfig,
}

impl QueueState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn items(&self) -> &[Post] {
        &self.items
    }

    pub(crate) fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub(crate) fn is_fetching(&self) -> bool {
        self.is_fetching
    }

    pub(crate) fn fetch_error(&self) -> Option<&str> {
        self.fetch_error.as_deref()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn current(&self) -> Option<&Post> {
        self.items.get(self.position)
    }

    pub(crate) fn queue_exhausted(&self) -> bool {
        self.position >= self.items.len() && self.cursor.is_none() && !self.force_fresh
    }

    pub(crate) fn advance(&self, from: usize) -> usize {
        next_visible(&self.items, from, &self.filters)
    }

    pub(crate) fn is_current(&self, ticket: &FetchTicket) -> bool {
        ticket.generation == self.generation
    }

    pub(crate) fn begin_fetch(&mut self, cursor: Option<String>) -> Option<FetchTicket> {
        if self.is_fetching {
            return None;
        }
        self.is_fetching = true;
        Some(FetchTicket {
            generation: self.generation,
            cursor,
        })
    }

    pub(crate) fn complete_fetch<R: Rng + ?Sized>(
        &mut self,
        ticket: &FetchTicket,
        posts: Vec<Post>,
        next_cursor: Option<String>,
        rng: &mut R,
    ) -> FetchOutcome {
        if !self.is_current(ticket) {
            debug!(
                "dropping page from generation {} (now {})",
                ticket.generation, self.generation
            );
            return FetchOutcome::Stale;
        }

        let previous = self.current_id();
        let fresh = self.force_fresh || (ticket.cursor.is_none() && self.items.is_empty());
        let received = posts.len();
        let admitted = self.ledger.admit(posts);
        let added = admitted.len();

        if fresh {
            self.items = admitted;
            self.position = 0;
        } else {
            self.items.extend(admitted);
        }
        if self.filters.randomize {
            self.items.shuffle(rng);
        }

        self.cursor = next_cursor;
        self.is_fetching = false;
        self.force_fresh = false;
        self.fetch_error = None;
        self.land(self.position, previous);

        debug!(
            "page applied: {} received, {} new, {} queued, {} seen, position {}, cursor {:?}",
            received,
            added,
            self.items.len(),
            self.ledger.len(),
            self.position,
            self.cursor
        );
        FetchOutcome::Applied { received, added }
    }

    pub(crate) fn fail_fetch(&mut self, ticket: &FetchTicket, message: &str) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.is_fetching = false;
        self.force_fresh = false;
        self.post_loading = false;
        self.fetch_error = Some(message.to_string());
        true
    }

    pub(crate) fn keep(&mut self) -> Option<Post> {
        let kept = self.current().cloned()?;
        self.kept_count += 1;
        self.land(self.position + 1, Some(kept.id.clone()));
        Some(kept)
    }

    pub(crate) fn begin_delete(&mut self) -> Option<Post> {
        let post = self.current().cloned()?;
        self.post_loading = true;
        Some(post)
    }

    pub(crate) fn remove_deleted(&mut self, id: &str) -> bool {
        let Some(index) = self.items.iter().position(|post| post.id == id) else {
            self.post_loading = false;
            return false;
        };
        self.items.remove(index);
        self.deleted_count += 1;

        if self.items.is_empty() {
            self.position = 0;
            self.post_loading = false;
            return true;
        }

        let previous = Some(id.to_string());
        if index < self.position {
            self.land(self.position - 1, previous);
        } else {
            // The array shrank under the cursor, so rescan from the same index.
            self.land(self.position, previous);
        }
        true
    }

    pub(crate) fn delete_failed(&mut self) {
        self.post_loading = false;
    }

    pub(crate) fn set_filter<R: Rng + ?Sized>(
        &mut self,
        patch: FilterPatch,
        rng: &mut R,
    ) -> RandomizeTransition {
        let previous = self.current_id();
        let transition = self.filters.apply(patch);
        match transition {
            RandomizeTransition::Reshuffle => {
                self.items.shuffle(rng);
                self.land(0, previous);
            }
            RandomizeTransition::ForceReset => self.force_reset(),
            RandomizeTransition::Unchanged => {
                let hidden = self
                    .current()
                    .map(|post| is_excluded(post, &self.filters))
                    .unwrap_or(false);
                if hidden {
                    self.land(self.position + 1, previous);
                }
            }
        }
        debug!(
            "filters now {:?} ({:?}), position {}",
            self.filters, transition, self.position
        );
        transition
    }

    fn force_reset(&mut self) {
        self.generation += 1;
        self.items.clear();
        self.position = 0;
        self.cursor = None;
        self.ledger.clear();
        self.is_fetching = false;
        self.fetch_error = None;
        self.post_loading = false;
        self.force_fresh = true;
    }

    pub(crate) fn reset(&mut self) {
        *self = QueueState {
            generation: self.generation + 1,
            ..QueueState::default()
        };
    }

    pub(crate) fn content_rendered(&mut self, id: &str) {
        if self.current_id().as_deref() == Some(id) {
            self.post_loading = false;
        }
    }

    pub(crate) fn refill_cursor(&self) -> Option<String> {
        if self.is_fetching || self.force_fresh || self.fetch_error.is_some() {
            return None;
        }
        let cursor = self.cursor.clone()?;
        let ahead = count_visible(&self.items, self.position.saturating_add(1), &self.filters);
        if ahead < REFILL_LOW_WATER {
            Some(cursor)
        } else {
            None
        }
    }

    pub(crate) fn snapshot(&self) -> ReviewSnapshot {
        ReviewSnapshot {
            current: self.current().cloned(),
            is_fetching: self.is_fetching,
            fetch_error: self.fetch_error.clone(),
            kept_count: self.kept_count,
            deleted_count: self.deleted_count,
            queue_exhausted: self.queue_exhausted(),
            post_loading: self.post_loading,
            filters: self.filters,
            remaining: count_visible(&self.items, self.position, &self.filters),
        }
    }

    fn current_id(&self) -> Option<String> {
        self.current().map(|post| post.id.clone())
    }

    fn land(&mut self, from: usize, previous: Option<String>) {
        self.position = self.advance(from);
        match self.current_id() {
            None => self.post_loading = false,
            Some(id) if Some(&id) != previous.as_ref() => self.post_loading = true,
            Some(_) => {}
        }
    }
}

#[cfg(test)]
impl QueueState {
    pub(crate) fn position(&self) -> usize {
        self.position
    }

    pub(crate) fn kept_count(&self) -> usize {
        self.kept_count
    }

    pub(crate) fn deleted_count(&self) -> usize {
        self.deleted_count
    }

    pub(crate) fn post_loading(&self) -> bool {
        self.post_loading
    }

    pub(crate) fn filters(&self) -> FilterConfig {
        self.filters
    }

    pub(crate) fn ledger(&self) -> &SeenLedger {
        &self.ledger
    }
}

pub(crate) struct ReviewContext<S> {
    pub(crate) actor: String,
    pub(crate) source: Arc<S>,
}

pub(crate) struct QueueEngine<S> {
    actor: String,
    source: Arc<S>,
    retry: RetryPolicy,
    state: Mutex<QueueState>,
    background: StdMutex<Option<JoinHandle<()>>>,
}

impl<S: FeedSource + 'static> QueueEngine<S> {
    pub(crate) fn new(context: ReviewContext<S>, retry: RetryPolicy) -> Arc<Self> {
        Arc::new(Self {
            actor: context.actor,
            source: context.source,
            retry,
            state: Mutex::new(QueueState::new()),
            background: StdMutex::new(None),
        })
    }

    pub(crate) fn actor(&self) -> &str {
        &self.actor
    }

    pub(crate) async fn snapshot(&self) -> ReviewSnapshot {
        self.state.lock().await.snapshot()
    }

    #[cfg(test)]
    pub(crate) async fn inspect<T>(&self, f: impl FnOnce(&QueueState) -> T) -> T {
        f(&*self.state.lock().await)
    }

    pub(crate) async fn start(self: &Arc<Self>) -> Result<FetchOutcome, ReviewError> {
        let idle = {
            let state = self.state.lock().await;
            state.items().is_empty() && !state.is_fetching() && state.fetch_error().is_none()
        };
        if !idle {
            return Ok(FetchOutcome::AlreadyFetching);
        }
        self.fetch_more(None).await
    }

    pub(crate) async fn fetch_more(
        self: &Arc<Self>,
        cursor: Option<String>,
    ) -> Result<FetchOutcome, ReviewError> {
        let ticket = self.state.lock().await.begin_fetch(cursor);
        let Some(ticket) = ticket else {
            debug!("fetch already in flight, skipping");
            return Ok(FetchOutcome::AlreadyFetching);
        };
        debug!("fetching page for {} (cursor {:?})", self.actor, ticket.cursor());

        let result = with_retries(&self.retry, FeedError::is_transient, |_| {
            self.fetch_page(&ticket)
        })
        .await;

        match result {
            Ok(page) => {
                let posts = normalize_page(&page.posts);
                let mut state = self.state.lock().await;
                let outcome = state.complete_fetch(&ticket, posts, page.cursor, &mut rand::thread_rng());
                let refill = state.refill_cursor();
                drop(state);
                self.refill(refill);
                Ok(outcome)
            }
            Err(FeedError::Superseded) => {
                warn!("fetch for {} superseded by a reset", self.actor);
                Ok(FetchOutcome::Stale)
            }
            Err(err) => {
                if !self.state.lock().await.fail_fetch(&ticket, FETCH_FAILED_MESSAGE) {
                    return Ok(FetchOutcome::Stale);
                }
                error!("fetching posts for {} failed: {}", self.actor, err);
                Err(ReviewError::Fetch(FETCH_FAILED_MESSAGE.to_string()))
            }
        }
    }

    async fn fetch_page(&self, ticket: &FetchTicket) -> Result<FeedPage, FeedError> {
        let current = self.state.lock().await.is_current(ticket);
        if !current {
            return Err(FeedError::Superseded);
        }
        self.source.get_page(&self.actor, ticket.cursor()).await
    }

    pub(crate) async fn keep(self: &Arc<Self>) -> Result<Post, ReviewError> {
        let mut state = self.state.lock().await;
        let kept = state.keep().ok_or(ReviewError::NoCurrentPost)?;
        let refill = state.refill_cursor();
        drop(state);
        debug!("kept {}", kept.id);
        self.refill(refill);
        Ok(kept)
    }

    pub(crate) async fn delete(self: &Arc<Self>) -> Result<Post, ReviewError> {
        let (post, generation) = {
            let mut state = self.state.lock().await;
            let post = state.begin_delete().ok_or(ReviewError::NoCurrentPost)?;
            (post, state.generation())
        };

        let result = self.source.delete_post(&post.record_uri).await;
        let mut state = self.state.lock().await;
        if state.generation() != generation {
            return Err(ReviewError::Superseded);
        }
        match result {
            Ok(()) => {
                state.remove_deleted(&post.id);
                let refill = state.refill_cursor();
                drop(state);
                info!("deleted {}", post.record_uri);
                self.refill(refill);
                Ok(post)
            }
            Err(err) => {
                state.delete_failed();
                error!("deleting {} failed: {}", post.record_uri, err);
                Err(ReviewError::Delete(err))
            }
        }
    }

    pub(crate) async fn set_filter(
        self: &Arc<Self>,
        patch: FilterPatch,
    ) -> Result<RandomizeTransition, ReviewError> {
        let mut state = self.state.lock().await;
        let transition = state.set_filter(patch, &mut rand::thread_rng());
        let refill = state.refill_cursor();
        drop(state);

        if transition == RandomizeTransition::ForceReset {
            self.abort_background();
            info!("randomize off for {}, refetching in feed order", self.actor);
            self.fetch_more(None).await?;
        } else {
            self.refill(refill);
        }
        Ok(transition)
    }

    pub(crate) async fn content_rendered(&self, id: &str) {
        self.state.lock().await.content_rendered(id);
    }

    pub(crate) async fn reset(&self) {
        self.state.lock().await.reset();
        self.abort_background();
        info!("review queue reset for {}", self.actor);
    }

    pub(crate) async fn pump(self: &Arc<Self>) {
        let refill = self.state.lock().await.refill_cursor();
        self.refill(refill);
    }

    pub(crate) async fn settle(&self) {
        while let Some(handle) = self.take_background() {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    warn!("background refill task failed: {}", err);
                }
            }
        }
    }

    fn refill(self: &Arc<Self>, cursor: Option<String>) {
        let Some(cursor) = cursor else {
            return;
        };
        debug!("low-water mark reached, refilling from {}", cursor);
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if let Err(err) = engine.fetch_more(Some(cursor)).await {
                warn!("background refill failed: {}", err);
            }
        });
        let previous = self
            .background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(handle);
        drop(previous);
    }

    fn take_background(&self) -> Option<JoinHandle<()>> {
        self.background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    fn abort_background(&self) {
        if let Some(handle) = self.take_background() {
            handle.abort();
        }
    }
}
