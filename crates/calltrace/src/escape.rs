//! Text-safe encodings for values embedded in the trace document.
//!
//! String payloads use C-like escapes: `\"`, `\\`, `\t`, `\r`, and octal
//! escapes for everything that is not printable ASCII. Line feeds become
//! the `&#10;` character reference so that a value never spans lines in
//! the document, and the XML markup characters `&`, `<` and `>` become
//! entity references so the document stays well-formed.

use std::borrow::Cow;

/// Escapes a byte string.
pub fn narrow(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    for (i, &b) in bytes.iter().enumerate() {
        let next = bytes.get(i + 1).map(|&n| n as u32);
        push_escaped(&mut out, b as u32, next);
    }
    out
}

/// A wide-string code unit: UTF-16 (`u16`), UTF-32 (`u32`, `char`), or a
/// platform `wchar_t` (`i32` on most Unix targets).
pub trait WideChar: Copy {
    fn code(self) -> u32;
}

impl WideChar for u16 {
    #[inline]
    fn code(self) -> u32 {
        self as u32
    }
}

impl WideChar for u32 {
    #[inline]
    fn code(self) -> u32 {
        self
    }
}

impl WideChar for i32 {
    #[inline]
    fn code(self) -> u32 {
        self as u32
    }
}

impl WideChar for char {
    #[inline]
    fn code(self) -> u32 {
        self as u32
    }
}

/// Escapes a wide-character string.
pub fn wide<C: WideChar>(chars: &[C]) -> String {
    let mut out = String::with_capacity(chars.len() + 2);
    for (i, &c) in chars.iter().enumerate() {
        let next = chars.get(i + 1).map(|&n| n.code());
        push_escaped(&mut out, c.code(), next);
    }
    out
}

fn push_escaped(out: &mut String, c: u32, next: Option<u32>) {
    match c {
        0x22 => out.push_str("\\\""),
        0x5C => out.push_str("\\\\"),
        0x26 => out.push_str("&amp;"),
        0x3C => out.push_str("&lt;"),
        0x3E => out.push_str("&gt;"),
        0x20..=0x7E => out.push(c as u8 as char),
        0x09 => out.push_str("\\t"),
        0x0D => out.push_str("\\r"),
        0x0A => out.push_str("&#10;"),
        0..=0xFF => {
            // A following literal octal digit would be read as part of this escape.
            let pad = matches!(next, Some(n) if (0x30..=0x37).contains(&n));
            push_octal(out, c as u8, pad);
        }
        0x100..=0xFFFF => {
            out.push_str("\\u");
            out.push_str(&::hex::encode((c as u16).to_be_bytes()));
        }
        _ => {
            out.push_str("\\U");
            out.push_str(&::hex::encode(c.to_be_bytes()));
        }
    }
}

/// Writes `\` followed by the octal value of `b`, leading zero digits
/// dropped unless `pad` asks for all three.
fn push_octal(out: &mut String, b: u8, pad: bool) {
    let d0 = b & 0x7;
    let d1 = (b >> 3) & 0x7;
    let d2 = (b >> 6) & 0x3;

    out.push('\\');
    if pad || d2 != 0 {
        out.push((b'0' + d2) as char);
        out.push((b'0' + d1) as char);
    } else if d1 != 0 {
        out.push((b'0' + d1) as char);
    }
    out.push((b'0' + d0) as char);
}

/// Unsigned integers that can be rendered at their full width in hex.
pub trait HexInt: Copy {
    type Bytes: AsRef<[u8]>;

    /// The value's memory representation, most significant byte first.
    fn to_be_bytes(self) -> Self::Bytes;
}

macro_rules! impl_hex_int {
    ($($t:ty),*) => {
        $(
            impl HexInt for $t {
                type Bytes = [u8; std::mem::size_of::<$t>()];

                #[inline]
                fn to_be_bytes(self) -> Self::Bytes {
                    <$t>::to_be_bytes(self)
                }
            }
        )*
    };
}

impl_hex_int!(u8, u16, u32, u64, u128, usize);

/// Renders `value` as exactly `2 * size_of::<T>()` lowercase hex digits,
/// most significant first.
pub fn hex<T: HexInt>(value: T) -> String {
    ::hex::encode(value.to_be_bytes())
}

/// Escapes a value for use inside a quoted XML attribute.
/// Borrows the input when nothing needs escaping.
pub fn attr(s: &str) -> Cow<'_, str> {
    let needs_escape = |c: char| matches!(c, '&' | '<' | '>' | '"' | '\'' | '\0'..='\x1f' | '\x7f');
    if !s.contains(needs_escape) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\0'..='\x1f' | '\x7f' => {
                out.push_str(&format!("&#{};", c as u32));
            }
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}
