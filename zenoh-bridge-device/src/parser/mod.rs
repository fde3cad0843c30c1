//! Parsers turning device terminal text into structured data.
//!
//! All parsers are pure: they take text and return values. Streaming
//! parsers keep the trailing partial line between chunks.

pub mod devices;
pub mod dialect;
pub mod lines;
pub mod listing;
pub mod memory;
pub mod table;

pub use devices::parse_device_list;
pub use dialect::{ClassicTop, LineClass, TableDialect, TableKind, ToyboxTop, detect_dialect};
pub use lines::{LineSplitter, Utf8Decoder};
pub use listing::parse_ls_long;
pub use memory::{MemoryParser, parse_memory_line};
pub use table::TableParser;
