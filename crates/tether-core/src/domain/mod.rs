//! Domain model (IDs, entries, pending list, cursors, retention, errors).

pub mod cursor;
pub mod entry;
pub mod errors;
pub mod event;
pub mod ids;
pub mod pending;
pub mod retention;

pub use self::cursor::{GroupStart, ReadCursor, StartCursor, UnknownVariant};
pub use self::entry::{FieldMap, GroupRef, StreamEntry};
pub use self::errors::{HandlerError, LogError};
pub use self::event::Event;
pub use self::ids::{EntryId, InvalidEntryId, MemberName};
pub use self::pending::{IdRange, PendingEntry};
pub use self::retention::Retention;
