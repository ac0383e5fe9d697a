//! IMAP command handlers for the fake server.
//!
//! One module per command family: `session` (LOGIN, LOGOUT),
//! `examine` (EXAMINE) and `fetch` (FETCH by sequence number).


pub use examine::handle_examine;
pub use fetch::handle_fetch;
pub use session::{handle_login, handle_logout};
