//! Streaming HTML minifier.
//!
//! Collapses whitespace outside verbatim regions, drops comments unless asked
//! to keep them, and reproduces the author's tag casing on closing tags.
//! Markup the tokenizer cannot parse yields [`MinifyError`]; callers are
//! expected to fall back to the unminified markup.

mod error;
mod minifier;
mod tokenizer;

pub use error::MinifyError;
pub use minifier::{Minifier, MinifyOptions, minify};
pub use tokenizer::{RawText, Token, Tokenizer};
