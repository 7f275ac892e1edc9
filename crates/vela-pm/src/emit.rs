//! Dependency-source generation for the build runner
//!
//! The resolver streams a declarative source fragment that the build runner
//! imports to discover package roots. One `packages` entry per distinct
//! content hash, written in depth-first traversal order, followed by the
//! root package's dependency list. Hashes double as identifiers, so they are
//! emitted with identifier quoting; embedded paths use string-literal
//! escaping.

use std::fmt::Write as _;
use std::path::Path;

/// File name the generated fragment is stored under.
pub const DEPS_SOURCE_BASENAME: &str = "deps.vela";

/// Streaming writer for the dependency-source fragment.
#[derive(Debug)]
pub struct SourceEmitter {
    buf: String,
}

impl Default for SourceEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceEmitter {
    pub fn new() -> Self {
        SourceEmitter {
            buf: String::from("pub const packages = struct {\n"),
        }
    }

    /// Emit the entry for one resolved package.
    ///
    /// `deps` are `(local_name, dep_hash)` pairs in manifest order. Packages
    /// without a build script get no import line; the build runner only
    /// needs their root.
    pub fn emit_package(
        &mut self,
        hex_digest: &str,
        build_root: &Path,
        has_build_script: bool,
        deps: &[(String, String)],
    ) {
        write!(self.buf, "    pub const ").unwrap();
        write_ident(&mut self.buf, hex_digest);
        self.buf.push_str(" = struct {\n");

        write!(self.buf, "        pub const build_root = ").unwrap();
        write_string_literal(&mut self.buf, &build_root.to_string_lossy());
        self.buf.push_str(";\n");

        if has_build_script {
            write!(self.buf, "        pub const build_vela = @import(").unwrap();
            write_string_literal(&mut self.buf, hex_digest);
            self.buf.push_str(");\n");
        }

        self.buf
            .push_str("        pub const deps: []const struct { []const u8, []const u8 } = ");
        write_dep_pairs(&mut self.buf, deps, "        ");
        self.buf.push_str(";\n    };\n");
    }

    /// Close the `packages` block and append the root dependency list.
    pub fn finish(mut self, root_deps: &[(String, String)]) -> String {
        self.buf.push_str("};\n\n");
        self.buf
            .push_str("pub const root_deps: []const struct { []const u8, []const u8 } = ");
        write_dep_pairs(&mut self.buf, root_deps, "");
        self.buf.push_str(";\n");
        self.buf
    }
}

fn write_dep_pairs(out: &mut String, deps: &[(String, String)], indent: &str) {
    if deps.is_empty() {
        out.push_str("&.{}");
        return;
    }
    out.push_str("&.{\n");
    for (name, hash) in deps {
        write!(out, "{indent}    .{{ ").unwrap();
        write_string_literal(out, name);
        out.push_str(", ");
        write_string_literal(out, hash);
        out.push_str(" },\n");
    }
    write!(out, "{indent}}}").unwrap();
}

/// Write `s` as a double-quoted string literal.
fn write_string_literal(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => write!(out, "\\x{:02x}", c as u32).unwrap(),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Write `s` as an identifier, quoting with `@"…"` when it is not a valid
/// bare identifier (hash identifiers start with a digit, so they always
/// quote).
fn write_ident(out: &mut String, s: &str) {
    let bare = !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if bare {
        out.push_str(s);
    } else {
        out.push('@');
        write_string_literal(out, s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_empty_graph() {
        let emitter = SourceEmitter::new();
        let source = emitter.finish(&[]);
        assert_eq!(
            source,
            "pub const packages = struct {\n};\n\n\
             pub const root_deps: []const struct { []const u8, []const u8 } = &.{};\n"
        );
    }

    #[test]
    fn test_package_entry_shape() {
        let mut emitter = SourceEmitter::new();
        emitter.emit_package(
            "1220aabb",
            &PathBuf::from("/cache/p/1220aabb"),
            true,
            &[("logging".to_string(), "1220ccdd".to_string())],
        );
        let source = emitter.finish(&[("webkit".to_string(), "1220aabb".to_string())]);

        assert!(source.contains("pub const @\"1220aabb\" = struct {"));
        assert!(source.contains("pub const build_root = \"/cache/p/1220aabb\";"));
        assert!(source.contains("pub const build_vela = @import(\"1220aabb\");"));
        assert!(source.contains(".{ \"logging\", \"1220ccdd\" },"));
        assert!(source.contains(".{ \"webkit\", \"1220aabb\" },"));
    }

    #[test]
    fn test_no_build_script_omits_import() {
        let mut emitter = SourceEmitter::new();
        emitter.emit_package("1220ee", &PathBuf::from("/cache/p/1220ee"), false, &[]);
        let source = emitter.finish(&[]);

        assert!(source.contains("pub const build_root"));
        assert!(!source.contains("@import"));
        assert!(source.contains("pub const deps: []const struct { []const u8, []const u8 } = &.{};"));
    }

    #[test]
    fn test_string_escaping() {
        let mut out = String::new();
        write_string_literal(&mut out, "a\"b\\c\nd");
        assert_eq!(out, "\"a\\\"b\\\\c\\nd\"");
    }

    #[test]
    fn test_ident_quoting() {
        let mut bare = String::new();
        write_ident(&mut bare, "build_root");
        assert_eq!(bare, "build_root");

        let mut quoted = String::new();
        write_ident(&mut quoted, "1220ff");
        assert_eq!(quoted, "@\"1220ff\"");
    }
}
