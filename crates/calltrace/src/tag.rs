//! Low-level element writer.
//!
//! Nothing here escapes its input: attribute values must already be
//! escaped, and element names are trusted constants.

use crate::config::LineEnding;
use crate::sink::ByteSink;

/// An empty attribute list.
pub const NO_ATTRS: &[(&str, &str)] = &[];

#[inline]
pub fn indent<S: ByteSink + ?Sized>(out: &mut S, depth: usize) {
    for _ in 0..depth {
        out.write_bytes(b"\t");
    }
}

#[inline]
pub fn newline<S: ByteSink + ?Sized>(out: &mut S, ending: LineEnding) {
    out.write_str(ending.as_str());
}

/// Writes a self-closing element, `<name/>`.
pub fn tag<S: ByteSink + ?Sized>(out: &mut S, name: &str) {
    out.write_bytes(b"<");
    out.write_str(name);
    out.write_bytes(b"/>");
}

/// Writes an opening element with the given attributes, in order.
pub fn begin_tag<S, V>(out: &mut S, name: &str, attrs: &[(&str, V)])
where
    S: ByteSink + ?Sized,
    V: AsRef<str>,
{
    out.write_bytes(b"<");
    out.write_str(name);
    for (key, value) in attrs {
        out.write_bytes(b" ");
        out.write_str(key);
        out.write_bytes(b"=\"");
        out.write_str(value.as_ref());
        out.write_bytes(b"\"");
    }
    out.write_bytes(b">");
}

pub fn end_tag<S: ByteSink + ?Sized>(out: &mut S, name: &str) {
    out.write_bytes(b"</");
    out.write_str(name);
    out.write_bytes(b">");
}
