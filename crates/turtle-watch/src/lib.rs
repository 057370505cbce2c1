//! Filesystem change watching for the deploy-on-change loop.
//!
//! [`TreeWatcher`] turns raw `notify` events under one root into keyed
//! [`FsEvent`]s; [`Debouncer`] coalesces bursts per key.

pub mod debounce;
pub mod watcher;

pub use debounce::Debouncer;
pub use watcher::{classify, watch_key, ChangeKind, FsEvent, TreeWatcher, WatchError};
