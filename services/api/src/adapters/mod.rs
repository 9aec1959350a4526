pub mod completion_fn;
pub mod db;
pub mod feed;
pub mod socratic_llm;

pub use completion_fn::FunctionCompletionAdapter;
pub use db::DbAdapter;
pub use feed::PgMessageFeed;
pub use socratic_llm::OpenAiSocraticAdapter;
