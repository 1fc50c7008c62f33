// src/watch/mod.rs

//! Filesystem watching: the platform backend, the subscription registry
//! and the invalidator loop.
//!
//! Event flow: OS → [`backend::WatchBackend`] → raw event channel →
//! [`invalidator`] → hash index (mark dirty / recompute) → subscription
//! delivery channels.

pub mod backend;
pub mod invalidator;
pub mod registry;

pub use backend::{NotifyBackend, RawEvent, WatchBackend, WatchHandle};
pub use registry::{ChangeNotification, SubscriptionId, WatchRegistry};
