//! Heap object model, reference counting, and the built-in type library.
//!
//! Every heap value here shares the same `ObjectHeader` prefix; layouts
//! beyond that are a stable ABI (see the spec's external-interfaces table)
//! so `ember-compiler`'s generated code can read and write fields directly
//! at fixed offsets.

pub mod bytes;
pub mod common_objects;
pub mod del_guard;
pub mod dict;
pub mod error;
pub mod exception;
pub mod header;
pub mod instance;
pub mod list;
pub mod tuple;
pub mod unicode;

pub use common_objects::{common_objects, CommonObjects};
pub use error::{FatalError, RuntimeError};
pub use header::{add_reference, delete_reference, Destructor, ObjectHeader};
