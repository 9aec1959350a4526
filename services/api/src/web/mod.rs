pub mod auth;
pub mod middleware;
pub mod pages;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

// Re-export the handlers the binary wires into the router.
pub use middleware::require_auth;
pub use pages::{dialogue_page, landing_page, topics_page};
pub use rest::{
    end_dialogue_handler, get_dialogue_handler, list_topics_handler, start_dialogue_handler,
};
pub use ws_handler::ws_handler;
