//! Synchronous change notification for the document object graph.
//!
//! # Responsibility
//! - Route named notifications from observables to registered observers.
//! - Provide reference-counted hold (buffer) and disable (drop) scopes.
//!
//! # Invariants
//! - Observers and observables are referenced weakly; the center never keeps
//!   either alive.
//! - Delivery iterates a snapshot, so observers may subscribe, unsubscribe or
//!   post while a notification is being delivered.
//! - Held notifications are released in posting order with consecutive
//!   duplicates collapsed.

mod center;
mod notification;

pub use center::{NotificationCenter, NotificationScope, ObserverId};
pub use notification::{Notification, NotificationData, ObjectId, Observable, ObservableRef};
