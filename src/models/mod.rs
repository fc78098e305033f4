//! Data models for Eventify entities

mod api_key;
mod event;
mod metrics;
mod user;

pub use api_key::*;
pub use event::*;
pub use metrics::*;
pub use user::*;
