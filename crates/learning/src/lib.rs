//! Fact learning for redline.
//!
//! Two consumers of command output live here:
//!
//! - [`PatternLearner`] scans free-form output with the regex patterns from
//!   `[learning]` config and yields facts not already known.
//! - [`ParserRegistry`] runs the parser modules an executor declares
//!   (`line`, `key_value`, `json` are built in) against its output.
//!
//! ```toml
//! [[learning.patterns]]
//! trait = "host.ip.address"
//! regex = '\b(?:\d{1,3}\.){3}\d{1,3}\b'
//! ```

mod learner;
mod parsers;

pub use learner::PatternLearner;
pub use parsers::{JsonParser, KeyValueParser, LineParser, OutputParser, ParserRegistry};
