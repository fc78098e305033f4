//! Client-side session management for the Eventify API
//!
//! A short-lived access credential is held in memory and sent as a bearer
//! header. It is renewed from a refresh cookie set by the backend, either
//! proactively before it expires or when a call comes back 401. Only one
//! renewal is ever in flight; concurrent callers share its outcome.

mod commands;
mod credential;
mod executor;
mod flag;
mod renewal;
mod session;
mod store;

pub use commands::{login, logout, resend_otp, signup, status, verify};
pub use flag::FileFlag;
pub use session::{Session, SessionEvent, SessionSettings};

#[cfg(test)]
pub use credential::AccessCredential;
#[cfg(test)]
pub use flag::SessionFlagStore;
