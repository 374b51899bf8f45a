//! Page navigation for the reader.
//!
//! The navigator owns the current page and is the only caller of
//! [`NarrationController::on_page_changed`]. It always stops narration
//! before exposing the next page's text.

use crate::controller::NarrationController;
use crate::error::{NarrationError, NavigatorError};
use crate::storage::{get_parsed, KeyValueStore};
use crate::tracking::{InteractionAction, InteractionTracker};
use std::path::Path;
use std::sync::Arc;

pub const CURRENT_PAGE_KEY: &str = "current_page";

/// Extracted text of a paginated document.
pub trait PageSource: Send + Sync {
    fn page_count(&self) -> usize;

    /// Text of the 1-based `page`.
    fn page_text(&self, page: usize) -> Option<String>;
}

/// Plain-text pages separated by form feeds, the layout `pdftotext` emits.
#[derive(Debug, Clone)]
pub struct TextPages {
    pages: Vec<String>,
}

impl TextPages {
    pub fn from_text(text: &str) -> Self {
        let mut pages: Vec<String> = text.split('\u{c}').map(str::to_string).collect();
        if pages.last().is_some_and(|p| p.trim().is_empty()) {
            pages.pop();
        }
        Self { pages }
    }

    pub fn from_file(path: &Path) -> Result<Self, NavigatorError> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_text(&text))
    }
}

impl PageSource for TextPages {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_text(&self, page: usize) -> Option<String> {
        page.checked_sub(1)
            .and_then(|i| self.pages.get(i))
            .cloned()
    }
}

pub struct PageNavigator {
    source: Box<dyn PageSource>,
    controller: NarrationController,
    store: Arc<dyn KeyValueStore>,
    tracker: Arc<InteractionTracker>,
    current: usize,
}

impl PageNavigator {
    /// Opens the document at `start`, or at the persisted page when `start`
    /// is `None`. Either is clamped into the document.
    pub fn new(
        source: Box<dyn PageSource>,
        controller: NarrationController,
        store: Arc<dyn KeyValueStore>,
        tracker: Arc<InteractionTracker>,
        start: Option<usize>,
    ) -> Result<Self, NavigatorError> {
        let count = source.page_count();
        if count == 0 {
            return Err(NavigatorError::EmptyDocument);
        }

        let requested = match start {
            Some(page) => page,
            None => get_parsed::<usize>(store.as_ref(), CURRENT_PAGE_KEY)
                .unwrap_or_else(|e| {
                    tracing::warn!("Ignoring stored page: {}", e);
                    None
                })
                .unwrap_or(1),
        };
        let current = requested.clamp(1, count);
        if current != requested {
            tracing::info!("Page {} out of range, opening page {}", requested, current);
        }

        let navigator = Self {
            source,
            controller,
            store,
            tracker,
            current,
        };
        navigator.persist();
        navigator
            .tracker
            .record(InteractionAction::StartReading, Some(current));
        Ok(navigator)
    }

    fn persist(&self) {
        if let Err(e) = self.store.set(CURRENT_PAGE_KEY, &self.current.to_string()) {
            tracing::warn!("Failed to persist reading position: {}", e);
        }
    }

    pub fn current_page(&self) -> usize {
        self.current
    }

    pub fn page_count(&self) -> usize {
        self.source.page_count()
    }

    pub fn current_text(&self) -> String {
        self.source.page_text(self.current).unwrap_or_default()
    }

    pub fn controller(&self) -> &NarrationController {
        &self.controller
    }

    pub fn go_to(&mut self, page: usize) -> Result<usize, NavigatorError> {
        let count = self.page_count();
        if page == 0 || page > count {
            return Err(NavigatorError::OutOfRange { page, count });
        }
        if page == self.current {
            return Ok(page);
        }

        self.controller.on_page_changed();
        self.current = page;
        self.persist();
        self.tracker.record(InteractionAction::PageChange, Some(page));
        tracing::debug!("Moved to page {}/{}", page, count);
        Ok(page)
    }

    pub fn next(&mut self) -> Result<usize, NavigatorError> {
        self.go_to(self.current + 1)
    }

    pub fn previous(&mut self) -> Result<usize, NavigatorError> {
        self.go_to(self.current.saturating_sub(1))
    }

    /// Narrates the current page.
    pub async fn play(&self) -> Result<(), NarrationError> {
        let text = self.current_text();
        self.controller.play(&text).await
    }

    /// Called when the reader is hidden or shown again. Narration keeps its
    /// state; only the reading clock and trigger points are affected.
    pub fn set_visible(&self, visible: bool) {
        let page = Some(self.current);
        if visible {
            self.tracker.restart_reading_clock();
            self.tracker.record(InteractionAction::ResumeReading, page);
        } else {
            self.tracker.record_reading_time(page);
            self.tracker.record(InteractionAction::PauseReading, page);
        }
    }

    pub fn close(&self) {
        let page = Some(self.current);
        self.tracker.record_reading_time(page);
        self.tracker.record(InteractionAction::EndReading, page);
        self.controller.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBus, NarrationEvent};
    use crate::state::PlaybackState;
    use crate::storage::MemoryStore;

    const DOC: &str = "First page.\u{c}Second page.\u{c}Third page.\u{c}";

    fn navigator(store: Arc<dyn KeyValueStore>, start: Option<usize>) -> PageNavigator {
        let bus = EventBus::default();
        let tracker = Arc::new(InteractionTracker::new(store.clone(), bus.clone()));
        let controller = NarrationController::disabled("offline", tracker.clone(), bus);
        PageNavigator::new(
            Box::new(TextPages::from_text(DOC)),
            controller,
            store,
            tracker,
            start,
        )
        .unwrap()
    }

    #[test]
    fn test_text_pages() {
        let pages = TextPages::from_text(DOC);
        assert_eq!(pages.page_count(), 3);
        assert_eq!(pages.page_text(2).as_deref(), Some("Second page."));
        assert_eq!(pages.page_text(0), None);
        assert_eq!(pages.page_text(4), None);
    }

    #[test]
    fn test_restores_and_clamps_position() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        store.set(CURRENT_PAGE_KEY, "2").unwrap();
        assert_eq!(navigator(store.clone(), None).current_page(), 2);

        store.set(CURRENT_PAGE_KEY, "99").unwrap();
        assert_eq!(navigator(store.clone(), None).current_page(), 3);
        assert_eq!(store.get(CURRENT_PAGE_KEY).unwrap().as_deref(), Some("3"));

        store.set(CURRENT_PAGE_KEY, "garbage").unwrap();
        assert_eq!(navigator(store.clone(), None).current_page(), 1);

        assert_eq!(navigator(store, Some(0)).current_page(), 1);
    }

    #[test]
    fn test_navigation_persists() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut nav = navigator(store.clone(), None);

        assert_eq!(nav.next().unwrap(), 2);
        assert_eq!(nav.current_text(), "Second page.");
        assert_eq!(store.get(CURRENT_PAGE_KEY).unwrap().as_deref(), Some("2"));

        assert_eq!(nav.previous().unwrap(), 1);
        assert!(matches!(nav.previous(), Err(NavigatorError::OutOfRange { page: 0, .. })));
        assert!(matches!(nav.go_to(4), Err(NavigatorError::OutOfRange { page: 4, count: 3 })));
        assert_eq!(nav.current_page(), 1);
        assert_eq!(nav.controller().state(), PlaybackState::Idle);
    }

    #[test]
    fn test_visibility_and_close_trigger_points() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let nav = navigator(store, None);
        let mut rx = nav.controller().subscribe();

        nav.set_visible(false);
        nav.set_visible(true);
        nav.close();

        let actions: Vec<InteractionAction> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                NarrationEvent::Interaction(i) => Some(i.action),
                _ => None,
            })
            .collect();
        assert_eq!(
            actions,
            vec![
                InteractionAction::ReadingTime,
                InteractionAction::PauseReading,
                InteractionAction::ResumeReading,
                InteractionAction::ReadingTime,
                InteractionAction::EndReading,
                InteractionAction::Cleanup,
            ]
        );
    }

    #[test]
    fn test_empty_document() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let bus = EventBus::default();
        let tracker = Arc::new(InteractionTracker::new(store.clone(), bus.clone()));
        let controller = NarrationController::disabled("offline", tracker.clone(), bus);
        let result = PageNavigator::new(
            Box::new(TextPages::from_text("")),
            controller,
            store,
            tracker,
            None,
        );
        assert!(matches!(result, Err(NavigatorError::EmptyDocument)));
    }
}
