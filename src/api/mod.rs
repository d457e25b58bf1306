//! API Module
//!
//! HTTP handlers and routing for the dashboard cache REST API.
//!
//! # Endpoints
//! - `GET /neurons/:governance` - Caller's neurons (`x-principal` required)
//! - `GET /snses` - SNS directory
//! - `DELETE /cache` - Drop the caller's cached entries (logout)
//! - `DELETE /cache/neurons/:governance` - Drop one cached neuron list
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
