//! Lumen Reactive
//!
//! Path-tracking reactivity. Data lives in shared [`ObjRef`] objects and
//! arrays; a watcher subscribes to a path from a root object and is told
//! about every change at, above or below that path, however the mutated
//! object was reached.
//!
//! The registry is thread-local. Everything here is single-threaded and
//! synchronous: a mutator returns only after every callback has run.

mod error;
mod value;
mod object;
mod registry;

pub use error::{NotifyError, Result};
pub use value::{number_to_string, Callable, HostValue, NativeFunction, Value};
pub use object::{Object, ObjectId, ObjRef};
pub use registry::{
    registry_stats, unwatch, watch, watch_path, Action, Change, RegistryStats, WatchCallback, WatchId,
};
