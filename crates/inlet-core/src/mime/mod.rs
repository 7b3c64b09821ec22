//! MIME decoding and body conversion

mod decoder;
mod html;

pub use decoder::{
    decode_rfc822, sanitize_filename, DecodeError, DEFAULT_MAX_ATTACHMENT_BYTES, MAX_PART_DEPTH,
};
pub use html::{html_to_text, unescape_entities};
