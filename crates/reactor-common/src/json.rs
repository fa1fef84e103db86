//! The JSON value type the core assumes (spec §1): dump/parse only, no
//! schema validation. `serde_json::Value` already provides exactly this
//! surface, so it is re-exported rather than wrapped.

pub use serde_json::Value as JsonValue;
pub use serde_json::{Error as JsonError, from_str as parse_json, to_string as dump_json};
