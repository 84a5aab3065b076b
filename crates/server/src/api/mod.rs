pub mod downloads;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod progress;
pub mod routes;

pub use routes::create_router;
