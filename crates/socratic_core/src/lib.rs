pub mod auth;
pub mod backend;
pub mod catalog;
pub mod dialogue;
pub mod domain;
pub mod memory;
pub mod ports;
pub mod realtime;
pub mod session;
pub mod view;

pub use backend::Backend;
pub use dialogue::{opening_message, DialogueView, TurnOutcome};
pub use domain::{
    ChatTurn, CompletionRequest, Dialogue, DialogueStatus, DialogueWithTopic, Message,
    MessageRole, Topic, User, UserCredentials,
};
pub use memory::MemoryBackend;
pub use ports::{
    CompletionService, DatabaseService, MessageStream, PortError, PortResult, RealtimeService,
};
pub use realtime::Subscription;
pub use view::{Notice, NoticeVariant, RecordingSink, Route, SessionPhase, ViewEvent, ViewSink};
