//! Login session management.
//!
//! The session holds the current user name and gates whether chat is
//! active. An empty name is the "logged out" sentinel.
//!
//! # Example
//!
//! ```rust
//! use chat_sync::session::SessionController;
//!
//! let sessions = SessionController::new();
//! let mut changes = sessions.subscribe();
//!
//! sessions.set_user_name("alice");
//! assert!(changes.has_changed().unwrap());
//! assert_eq!(changes.borrow_and_update().user_name, "alice");
//!
//! sessions.clear();
//! assert!(!sessions.current().is_active());
//! ```

mod controller;

pub use controller::{Session, SessionController};
