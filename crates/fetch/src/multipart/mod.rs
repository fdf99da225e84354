//! `multipart/form-data` wire codec.
//!
//! Wire format: each section is prefixed by `--<boundary>\r\n`, followed by a
//! `Content-Disposition: form-data; name="…"` line (plus `filename="…"` and a
//! `Content-Type` line for file sections), a blank line, the section payload,
//! and `\r\n`. The payload concludes with `--<boundary>--\r\n`.
//!
//! Encoding is lazy: sections are emitted chunk by chunk as the output stream
//! is pulled, so a large upload never sits in memory wholesale. Decoding is
//! strict: malformed boundaries or truncated sections fail with a
//! [`MultipartError`](crate::error::MultipartError) instead of silently
//! dropping data.

mod decoder;
mod encoder;

pub use decoder::{decode, parse_boundary};
pub use encoder::Encoder;
