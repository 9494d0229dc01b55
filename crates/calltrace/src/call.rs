//! Call events.
//!
//! A call is written as one `call` element:
//!
//! ```text
//! <call name="glBindTexture">
//!     <starttsc>0000a1b2c3d4e5f6</starttsc>
//!     <arg type="GLenum" name="target">GL_TEXTURE_2D</arg>
//!     <arg type="GLuint" name="texture">1</arg>
//!     <endtsc>0000a1b2c3d4f0a0</endtsc>
//! </call>
//! ```
//!
//! Every `begin_*` operation hands out a guard that writes the matching
//! end tag when dropped, so nesting is always balanced. Argument bodies are
//! written through the guard with [`Scope::dump_string`], [`Scope::hex`],
//! nested [`Scope::element`]s and so on.

use std::fmt;
use std::sync::MutexGuard;

use crate::config::Config;
use crate::escape::{self, HexInt, WideChar};
use crate::session::{Holding, State};
use crate::sink::ByteSink;
use crate::tag;
use crate::tsc::Clock;

/// Indentation of `call` elements.
const CALL_DEPTH: usize = 1;

/// Indentation of the children of a `call` element.
const CHILD_DEPTH: usize = 2;

/// An in-progress call event.
///
/// Holds the session lock until dropped, so calls made from different
/// threads are written one after another.
#[must_use = "the call ends when this is dropped"]
pub struct Call<'s> {
    slot: Slot<'s>,
    clock: Clock,
}

/// The state a call writes to.
enum Slot<'s> {
    /// The session's own state, locked by this thread.
    Locked(MutexGuard<'s, State>, Holding),
    /// A private closed state that swallows every write.
    Inert(State),
}

impl<'s> Call<'s> {
    pub(crate) fn begin(
        state: MutexGuard<'s, State>,
        holding: Holding,
        clock: Clock,
        name: &str,
    ) -> Self {
        let mut call = Self {
            slot: Slot::Locked(state, holding),
            clock,
        };
        let out = call.state();
        if out.is_open() {
            tag::indent(out, CALL_DEPTH);
            tag::begin_tag(out, "call", &[("name", escape::attr(name))]);
            out.newline();
            timestamp(out, "starttsc", clock());
        }
        call
    }

    /// A call that records nothing and holds no lock.
    pub(crate) fn inert(config: &Config, clock: Clock) -> Self {
        Self {
            slot: Slot::Inert(State::closed(config.line_ending, config.flush_each_call)),
            clock,
        }
    }

    fn state(&mut self) -> &mut State {
        match &mut self.slot {
            Slot::Locked(state, _) => &mut **state,
            Slot::Inert(state) => state,
        }
    }

    /// Starts an argument named `name` of type `ty`.
    pub fn arg(&mut self, ty: &str, name: &str) -> Scope<'_> {
        Scope::begin(self.state(), Layout::Line, "arg", [("type", ty), ("name", name)])
    }

    /// Starts the return value, of type `ty`.
    pub fn ret(&mut self, ty: &str) -> Scope<'_> {
        Scope::begin(self.state(), Layout::Line, "ret", [("type", ty)])
    }

    /// Starts a composite value directly inside the call.
    pub fn element(&mut self, ty: &str, name: Option<&str>) -> Scope<'_> {
        element(self.state(), Layout::Line, ty, name)
    }

    /// Starts a reference to an object logged earlier, identified by its address.
    pub fn reference<T: ?Sized>(&mut self, ty: &str, addr: *const T) -> Scope<'_> {
        reference(self.state(), Layout::Line, ty, addr)
    }

    /// Ends the call. Equivalent to dropping it.
    pub fn end(self) {}
}

impl Drop for Call<'_> {
    fn drop(&mut self) {
        let clock = self.clock;
        let out = self.state();
        if !out.is_open() {
            return;
        }
        timestamp(out, "endtsc", clock());
        tag::indent(out, CALL_DEPTH);
        tag::end_tag(out, "call");
        out.newline();
        out.end_of_call();
    }
}

fn timestamp(out: &mut State, name: &str, tsc: u64) {
    tag::indent(out, CHILD_DEPTH);
    tag::begin_tag(out, name, tag::NO_ATTRS);
    out.write_str(&escape::hex(tsc));
    tag::end_tag(out, name);
    out.newline();
}

/// Where an element sits in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// On its own line, directly inside a call.
    Line,
    /// Inside the body of another element.
    Inline,
}

/// An open `arg`, `ret`, `elem` or `ref` element.
///
/// The element is closed when the scope is dropped. Text written through
/// [`fmt::Write`] (for example with `write!`) lands in the document as-is;
/// use it for numbers and other values that need no escaping.
#[must_use = "the element ends when this is dropped"]
pub struct Scope<'c> {
    out: &'c mut State,
    tag: &'static str,
    layout: Layout,
}

impl<'c> Scope<'c> {
    fn begin<const N: usize>(
        out: &'c mut State,
        layout: Layout,
        name: &'static str,
        attrs: [(&str, &str); N],
    ) -> Self {
        if out.is_open() {
            let attrs = attrs.map(|(key, value)| (key, escape::attr(value)));
            if layout == Layout::Line {
                tag::indent(out, CHILD_DEPTH);
            }
            tag::begin_tag(out, name, &attrs);
        }
        Self {
            out,
            tag: name,
            layout,
        }
    }

    /// Starts a nested composite value, such as an array item or struct member.
    pub fn element(&mut self, ty: &str, name: Option<&str>) -> Scope<'_> {
        element(self.out, Layout::Inline, ty, name)
    }

    /// Starts a nested reference to an object logged earlier.
    pub fn reference<T: ?Sized>(&mut self, ty: &str, addr: *const T) -> Scope<'_> {
        reference(self.out, Layout::Inline, ty, addr)
    }

    /// Writes a quoted, escaped byte string.
    ///
    /// The string ends at the first NUL byte, if any.
    pub fn dump_string(&mut self, s: &[u8]) {
        if !self.out.is_open() {
            return;
        }
        let end = s.iter().position(|&b| b == 0).unwrap_or(s.len());
        self.out.write_bytes(b"\"");
        self.out.write_str(&escape::narrow(&s[..end]));
        self.out.write_bytes(b"\"");
    }

    /// Writes a quoted, escaped wide string as `L"..."`.
    ///
    /// The string ends at the first NUL character, if any.
    pub fn dump_wstring<C: WideChar>(&mut self, s: &[C]) {
        if !self.out.is_open() {
            return;
        }
        let end = s.iter().position(|&c| c.code() == 0).unwrap_or(s.len());
        self.out.write_bytes(b"L\"");
        self.out.write_str(&escape::wide(&s[..end]));
        self.out.write_bytes(b"\"");
    }

    /// Writes `value` as fixed-width hex.
    pub fn hex<T: HexInt>(&mut self, value: T) {
        if self.out.is_open() {
            self.out.write_str(&escape::hex(value));
        }
    }

    /// Writes a null pointer as `<null/>`.
    pub fn null(&mut self) {
        tag::tag(self.out, "null");
    }

    /// Writes text that is already escaped.
    pub fn raw(&mut self, text: &str) {
        self.out.write_str(text);
    }

    /// Ends the element. Equivalent to dropping it.
    pub fn end(self) {}
}

impl fmt::Write for Scope<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.out.write_str(s);
        Ok(())
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if !self.out.is_open() {
            return;
        }
        tag::end_tag(self.out, self.tag);
        if self.layout == Layout::Line {
            self.out.newline();
        }
    }
}

fn element<'c>(out: &'c mut State, layout: Layout, ty: &str, name: Option<&str>) -> Scope<'c> {
    match name {
        Some(name) => Scope::begin(out, layout, "elem", [("type", ty), ("name", name)]),
        None => Scope::begin(out, layout, "elem", [("type", ty)]),
    }
}

fn reference<'c, T: ?Sized>(
    out: &'c mut State,
    layout: Layout,
    ty: &str,
    addr: *const T,
) -> Scope<'c> {
    let addr = format!("{addr:p}");
    Scope::begin(out, layout, "ref", [("type", ty), ("addr", addr.as_str())])
}

#[cfg(test)]
mod tests {
    use crate::config::{Config, LineEnding};
    use crate::session::Session;
    use std::fmt::Write;
    use std::io::Read;
    use tempdir::TempDir;

    fn clock() -> u64 {
        0x1f4
    }

    /// Runs `f` against a fresh session and returns the body of the
    /// `trace` element, with tabs shown as four spaces.
    fn trace(f: impl FnOnce(&Session)) -> String {
        let dir = TempDir::new("call").unwrap();
        let config = Config {
            output_dir: Some(dir.path().to_path_buf()),
            program: Some("app".to_string()),
            line_ending: LineEnding::Lf,
            ..Config::default()
        };
        let session = Session::with_clock(config, clock);
        let path = session.open("test").unwrap();
        f(&session);
        session.close();

        let data = std::fs::read(path).unwrap();
        let mut doc = String::new();
        flate2::read::GzDecoder::new(&data[..])
            .read_to_string(&mut doc)
            .unwrap();
        let start = doc.find("<trace>\n").unwrap() + "<trace>\n".len();
        let end = doc.rfind("</trace>").unwrap();
        doc[start..end].replace('\t', "    ")
    }

    #[test]
    fn empty_call() {
        let out = trace(|s| s.begin_call("X").end());
        assert_eq!(
            out,
            concat!(
                "    <call name=\"X\">\n",
                "        <starttsc>00000000000001f4</starttsc>\n",
                "        <endtsc>00000000000001f4</endtsc>\n",
                "    </call>\n",
            )
        );
    }

    #[test]
    fn call_with_arguments() {
        let out = trace(|s| {
            let mut call = s.begin_call("glShaderSource");
            write!(call.arg("GLuint", "shader"), "{}", 3).unwrap();
            call.arg("const GLchar *", "string")
                .dump_string(b"void main() {\n}\0ignored");
            {
                let mut arg = call.arg("const GLint *", "length");
                arg.null();
            }
            call.ret("void").end();
        });
        assert_eq!(
            out,
            concat!(
                "    <call name=\"glShaderSource\">\n",
                "        <starttsc>00000000000001f4</starttsc>\n",
                "        <arg type=\"GLuint\" name=\"shader\">3</arg>\n",
                "        <arg type=\"const GLchar *\" name=\"string\">\"void main() {&#10;}\"</arg>\n",
                "        <arg type=\"const GLint *\" name=\"length\"><null/></arg>\n",
                "        <ret type=\"void\"></ret>\n",
                "        <endtsc>00000000000001f4</endtsc>\n",
                "    </call>\n",
            )
        );
    }

    #[test]
    fn nested_elements_are_inline() {
        let out = trace(|s| {
            let mut call = s.begin_call("glGetIntegerv");
            let mut arg = call.arg("GLint[2]", "params");
            for (i, v) in [7u32, 9].into_iter().enumerate() {
                let mut elem = arg.element("GLint", Some(&i.to_string()));
                elem.hex(v);
            }
        });
        assert!(out.contains(concat!(
            "<arg type=\"GLint[2]\" name=\"params\">",
            "<elem type=\"GLint\" name=\"0\">00000007</elem>",
            "<elem type=\"GLint\" name=\"1\">00000009</elem>",
            "</arg>\n"
        )));
    }

    #[test]
    fn call_level_element() {
        let out = trace(|s| {
            let mut call = s.begin_call("f");
            call.element("S", None).hex(1u8);
        });
        assert!(out.contains("        <elem type=\"S\">01</elem>\n"));
    }

    #[test]
    fn references_record_type_and_address() {
        let object = 42u64;
        let addr: *const u64 = &object;
        let out = trace(|s| {
            let mut call = s.begin_call("Release");
            call.arg("Foo*", "this").reference("Foo*", addr).end();
        });
        let expected = format!("<ref type=\"Foo*\" addr=\"{addr:p}\"></ref>");
        assert!(out.contains(&expected), "{out}");
    }

    #[test]
    fn quotes_and_backslashes_are_escaped_once() {
        let out = trace(|s| {
            let mut call = s.begin_call("puts");
            call.arg("const char *", "s").dump_string(b"a\"b\\c");
        });
        assert!(out.contains(r#"<arg type="const char *" name="s">"a\"b\\c"</arg>"#));
    }

    #[test]
    fn wide_strings() {
        let out = trace(|s| {
            let mut call = s.begin_call("MessageBoxW");
            let text: Vec<u16> = "h\u{e9}!\0junk".encode_utf16().collect();
            call.arg("LPCWSTR", "lpText").dump_wstring(&text);
        });
        assert!(out.contains(r#"name="lpText">L"h\351!"</arg>"#), "{out}");
    }

    #[test]
    fn wchar_t_buffers() {
        let text: [i32; 5] = [b'o' as i32, b'k' as i32, 0x4e16, 0, b'x' as i32];
        let out = trace(|s| {
            let mut call = s.begin_call("wprintf");
            call.arg("const wchar_t *", "format").dump_wstring(&text);
        });
        assert!(out.contains(r#"name="format">L"ok\u4e16"</arg>"#), "{out}");
    }

    #[test]
    fn attribute_values_are_escaped() {
        let out = trace(|s| {
            let mut call = s.begin_call("operator<");
            call.arg("std::map<K, V>", "m").raw("{}");
        });
        assert!(out.contains("<call name=\"operator&lt;\">"));
        assert!(out.contains("<arg type=\"std::map&lt;K, V&gt;\" name=\"m\">{}</arg>"));
    }

    #[test]
    fn calls_on_a_closed_session_are_no_ops() {
        let session = Session::new(Config::default());
        let mut call = session.begin_call("glClear");
        {
            let mut arg = call.arg("GLbitfield", "mask");
            arg.hex(0x4000u32);
            arg.dump_string(b"x");
            arg.element("int", None).null();
            write!(arg, "{}", 1).unwrap();
        }
        call.ret("void").end();
        call.end();
        assert!(!session.is_open());
        assert_eq!(session.file_name(), None);
    }

    #[test]
    fn flush_each_call_keeps_earlier_calls_readable() {
        let dir = TempDir::new("call").unwrap();
        let config = Config {
            output_dir: Some(dir.path().to_path_buf()),
            program: Some("app".to_string()),
            flush_each_call: true,
            ..Config::default()
        };
        let session = Session::with_clock(config, clock);
        let path = session.open("test").unwrap();
        session.begin_call("glFlush").end();

        // The document is still open, so the gzip stream has no trailer yet.
        let data = std::fs::read(&path).unwrap();
        let mut doc = Vec::new();
        let _ = flate2::read::GzDecoder::new(&data[..]).read_to_end(&mut doc);
        let doc = String::from_utf8_lossy(&doc);
        assert!(doc.contains("</call>"), "{doc}");
    }
}
