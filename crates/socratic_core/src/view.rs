//! crates/socratic_core/src/view.rs
//!
//! The vocabulary the core uses to talk to whatever renders it: transient
//! notices, navigation targets, session phases and the sink they flow into.

use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::{Message, Topic};
use crate::ports::PortError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeVariant {
    Default,
    Destructive,
}

/// A transient, user-visible notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub variant: NoticeVariant,
}

impl Notice {
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            variant: NoticeVariant::Default,
        }
    }

    /// An error notice carrying the raw error message.
    pub fn error(title: impl Into<String>, error: &PortError) -> Self {
        Self {
            title: title.into(),
            description: error.to_string(),
            variant: NoticeVariant::Destructive,
        }
    }

    pub fn is_error(&self) -> bool {
        self.variant == NoticeVariant::Destructive
    }
}

/// Client-visible routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Landing,
    Topics,
    Dialogue(Uuid),
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Landing => f.write_str("/"),
            Route::Topics => f.write_str("/topics"),
            Route::Dialogue(id) => write!(f, "/dialogue/{}", id),
        }
    }
}

/// Where a dialogue view is in its lifecycle, as the client observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Loading,
    AwaitingInput,
    AwaitingReply,
    Completed,
    /// Loading failed; the view navigated away without becoming active.
    Failed,
}

impl SessionPhase {
    pub fn accepts_input(&self) -> bool {
        *self == SessionPhase::AwaitingInput
    }
}

/// Everything a view reports to its renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    /// The dialogue and its history finished loading.
    Loaded { topic: Topic, messages: Vec<Message> },
    Notice(Notice),
    MessageAppended(Message),
    PhaseChanged(SessionPhase),
    Navigate(Route),
}

/// Receives view events. Implementations must not block.
pub trait ViewSink: Send + Sync {
    fn emit(&self, event: ViewEvent);
}

impl ViewSink for mpsc::UnboundedSender<ViewEvent> {
    fn emit(&self, event: ViewEvent) {
        // A closed receiver means the renderer is gone; nothing to tell.
        let _ = self.send(event);
    }
}

/// A sink that keeps every event, for request/response surfaces and tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ViewEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ViewEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ViewEvent::Notice(notice) => Some(notice),
                _ => None,
            })
            .collect()
    }

    pub fn last_navigation(&self) -> Option<Route> {
        self.events().into_iter().rev().find_map(|event| match event {
            ViewEvent::Navigate(route) => Some(route),
            _ => None,
        })
    }
}

impl ViewSink for RecordingSink {
    fn emit(&self, event: ViewEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_render_as_paths() {
        let id = Uuid::nil();
        assert_eq!(Route::Landing.to_string(), "/");
        assert_eq!(Route::Topics.to_string(), "/topics");
        assert_eq!(
            Route::Dialogue(id).to_string(),
            "/dialogue/00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn error_notice_carries_raw_message() {
        let notice = Notice::error("Error", &PortError::Unexpected("boom".to_string()));
        assert!(notice.is_error());
        assert_eq!(notice.description, "An unexpected error occurred: boom");
    }

    #[test]
    fn recording_sink_tracks_last_navigation() {
        let sink = RecordingSink::new();
        sink.emit(ViewEvent::Navigate(Route::Landing));
        sink.emit(ViewEvent::Notice(Notice::info("a", "b")));
        sink.emit(ViewEvent::Navigate(Route::Topics));
        assert_eq!(sink.last_navigation(), Some(Route::Topics));
        assert_eq!(sink.notices().len(), 1);
    }
}
