use super::photos::{LocalAssetStore, StoredPhoto};
use crate::error::{EventBusError, SinkError};
use crate::events::{EventBus, EventFilter, EventReceiver};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a gallery view currently shows
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedSnapshot {
    pub photos: Vec<StoredPhoto>,
    pub has_more: bool,
    pub loading: bool,
    pub refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct FeedState {
    photos: Vec<StoredPhoto>,
    has_more: bool,
    refreshed_at: Option<DateTime<Utc>>,
}

/// Cached newest-first photo list that grows page by page.
///
/// Change notifications and the poll timer reset it to the first page.
pub struct GalleryFeed {
    store: Arc<LocalAssetStore>,
    page_size: usize,
    state: RwLock<FeedState>,
    loading: AtomicBool,
}

impl GalleryFeed {
    pub fn new(store: Arc<LocalAssetStore>) -> Self {
        let page_size = store.page_size();
        Self {
            store,
            page_size,
            state: RwLock::new(FeedState::default()),
            loading: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        let state = self.state.read();
        FeedSnapshot {
            photos: state.photos.clone(),
            has_more: state.has_more,
            loading: self.is_loading(),
            refreshed_at: state.refreshed_at,
        }
    }

    pub fn has_more(&self) -> bool {
        self.state.read().has_more
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.state.read().photos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reload the first page, dropping anything loaded beyond it
    pub async fn refresh(&self) -> Result<(), SinkError> {
        // a refresh always wins over an in-flight load_more
        self.loading.store(true, Ordering::Release);
        let result = self.store.list_page(0, self.page_size).await;
        self.loading.store(false, Ordering::Release);

        let page = result?;
        let mut state = self.state.write();
        state.photos = page.items;
        state.has_more = page.has_more;
        state.refreshed_at = Some(Utc::now());
        debug!("Gallery feed refreshed ({} photos)", state.photos.len());
        Ok(())
    }

    /// Append the next page. Returns the number of photos added; a no-op
    /// while another load is running or when everything is loaded.
    pub async fn load_more(&self) -> Result<usize, SinkError> {
        if !self.has_more() {
            return Ok(0);
        }
        if self
            .loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Gallery feed already loading, ignoring load_more");
            return Ok(0);
        }

        let offset = self.len();
        let result = self.store.list_page(offset, self.page_size).await;
        self.loading.store(false, Ordering::Release);

        let page = result?;
        let mut state = self.state.write();
        // skip anything a concurrent refresh already brought in
        let known: Vec<u64> = state.photos.iter().map(|photo| photo.id).collect();
        let fresh: Vec<StoredPhoto> = page
            .items
            .into_iter()
            .filter(|photo| !known.contains(&photo.id))
            .collect();
        let added = fresh.len();
        state.photos.extend(fresh);
        state.has_more = page.has_more;
        Ok(added)
    }

    /// Keep the feed current until cancelled
    pub async fn run(
        self: Arc<Self>,
        event_bus: Arc<EventBus>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut changes = EventReceiver::new(
            event_bus.subscribe(),
            EventFilter::EventTypes(vec!["photos_changed"]),
            "gallery_feed",
        );
        let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Gallery feed started (poll every {}s)",
            poll_interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                event = changes.recv() => match event {
                    Ok(event) => debug!("Gallery feed invalidated: {}", event.description()),
                    Err(EventBusError::ChannelClosed) => break,
                    Err(e) => warn!("Gallery feed event error: {}", e),
                },
            }

            if let Err(e) = self.refresh().await {
                warn!("Gallery feed refresh failed: {}", e);
            }
        }

        info!("Gallery feed stopped");
    }
}
