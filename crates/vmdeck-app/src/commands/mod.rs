//! Commands invoked by the UI layer.
//!
//! Every command takes the shared [`AppState`](crate::state::AppState) and
//! returns `Result<_, String>` so errors can be shown to the user as-is.

pub mod instance;
pub mod layout;
pub mod session;
