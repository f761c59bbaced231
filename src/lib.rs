pub mod cache;
pub mod config;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod formats;
pub mod rate_limit;
pub mod routes;
pub mod state;
pub mod video_id;

pub use config::Config;
pub use routes::build_router;
pub use state::AppState;
