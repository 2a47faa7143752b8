//! Native tree-sitter parser wrapper.
//!
//! Grammars are statically linked; there is no runtime setup. `CodeParser`
//! carries no state because tree-sitter's `Parser` is `!Send`, so a fresh
//! parser is created per call and the wrapper can be shared across rayon
//! workers freely.
//!
//! Besides producing a tree, this module owns the two file-level gates that
//! decide whether a file is extracted at all: UTF-8 decoding and the ERROR
//! node ratio.

use tree_sitter::{Node, Tree};

use crate::error::{CodeTraceError, Result};
use crate::types::Language;

/// Thin wrapper around native tree-sitter parsing.
pub struct CodeParser;

impl CodeParser {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Parse `content` with the grammar for `language`.
    ///
    /// `file_path` is only used to label errors.
    pub fn parse(&self, file_path: &str, content: &str, language: Language) -> Result<Tree> {
        let ts_lang = Self::get_ts_language(language);

        let mut parser = tree_sitter::Parser::new();
        parser.set_language(&ts_lang).map_err(|e| {
            CodeTraceError::parse(file_path, format!("language version mismatch: {e}"))
        })?;

        parser.parse(content, None).ok_or_else(|| {
            CodeTraceError::parse(file_path, "tree-sitter returned no tree (timeout or cancellation)")
        })
    }

    /// Return the native `tree_sitter::Language` for a [`Language`] variant.
    #[must_use]
    pub fn get_ts_language(language: Language) -> tree_sitter::Language {
        match language {
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Language::JavaScript | Language::Jsx => tree_sitter_javascript::LANGUAGE.into(),
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::Go => tree_sitter_go::LANGUAGE.into(),
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
            Language::Java => tree_sitter_java::LANGUAGE.into(),
            Language::C => tree_sitter_c::LANGUAGE.into(),
            Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            Language::CSharp => tree_sitter_c_sharp::LANGUAGE.into(),
        }
    }

    /// Detect the [`Language`] for a file path based on its extension.
    #[must_use]
    pub fn detect_language(file_path: &str) -> Option<Language> {
        std::path::Path::new(file_path)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|e| Language::from_extension(&format!(".{}", e.to_ascii_lowercase())))
    }

    #[must_use]
    pub fn is_supported(file_path: &str) -> bool {
        Self::detect_language(file_path).is_some()
    }
}

impl Default for CodeParser {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// File-level gates
// ---------------------------------------------------------------------------

/// Decode raw file bytes, rejecting anything that is not valid UTF-8.
pub fn decode_source<'a>(file_path: &str, bytes: &'a [u8]) -> Result<&'a str> {
    std::str::from_utf8(bytes).map_err(|e| {
        CodeTraceError::parse(
            file_path,
            format!("file is not valid UTF-8 (first bad byte at offset {})", e.valid_up_to()),
        )
    })
}

/// Fraction of the file's bytes covered by ERROR or MISSING nodes.
///
/// Only the outermost error node of a subtree is counted, so nested errors
/// do not inflate the ratio. An empty file has ratio 0.
#[must_use]
pub fn error_ratio(tree: &Tree, source_len: usize) -> f64 {
    if source_len == 0 {
        return 0.0;
    }
    let root = tree.root_node();
    if !root.has_error() {
        return 0.0;
    }
    let covered = error_bytes(root);
    (covered as f64 / source_len as f64).min(1.0)
}

fn error_bytes(node: Node<'_>) -> usize {
    if node.is_error() {
        return node.end_byte().saturating_sub(node.start_byte()).max(1);
    }
    if node.is_missing() {
        return 1;
    }
    if !node.has_error() {
        return 0;
    }
    let mut cursor = node.walk();
    node.children(&mut cursor).map(error_bytes).sum()
}

/// Parse and apply the error-ratio gate in one step.
pub fn parse_checked(
    parser: &CodeParser,
    file_path: &str,
    content: &str,
    language: Language,
    max_error_ratio: f64,
) -> Result<Tree> {
    let tree = parser.parse(file_path, content, language)?;
    let ratio = error_ratio(&tree, content.len());
    if ratio > max_error_ratio {
        return Err(CodeTraceError::parse(
            file_path,
            format!(
                "syntax errors cover {:.0}% of the file (limit {:.0}%)",
                ratio * 100.0,
                max_error_ratio * 100.0
            ),
        ));
    }
    Ok(tree)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Language::TypeScript, "const x: number = 42;", "program" ; "parse_trivial_ts")]
    #[test_case(Language::Tsx, "const a = <div />;", "program" ; "parse_trivial_tsx")]
    #[test_case(Language::JavaScript, "function f() { return 1; }", "program" ; "parse_trivial_js")]
    #[test_case(Language::Python, "def f():\n    pass\n", "module" ; "parse_trivial_py")]
    #[test_case(Language::Go, "package main\nfunc main() {}\n", "source_file" ; "parse_trivial_go")]
    #[test_case(Language::Rust, "fn main() {}\n", "source_file" ; "parse_trivial_rust")]
    #[test_case(Language::Java, "class Foo {}\n", "program" ; "parse_trivial_java")]
    #[test_case(Language::C, "int main() { return 0; }\n", "translation_unit" ; "parse_trivial_c")]
    #[test_case(Language::Cpp, "int main() { return 0; }\n", "translation_unit" ; "parse_trivial_cpp")]
    #[test_case(Language::CSharp, "class Foo {}\n", "compilation_unit" ; "parse_trivial_csharp")]
    fn parse_trivial_source(lang: Language, source: &str, expected_root: &str) {
        let parser = CodeParser::new();
        let tree = parser
            .parse("t", source, lang)
            .unwrap_or_else(|e| panic!("failed to parse {lang:?}: {e}"));
        let root = tree.root_node();
        assert_eq!(root.kind(), expected_root, "root node kind for {lang:?}");
        assert!(!root.has_error(), "{lang:?} sample should parse cleanly");
    }

    #[test_case("src/app.ts", Some(Language::TypeScript) ; "detect_ts")]
    #[test_case("src/App.TSX", Some(Language::Tsx) ; "detect_uppercase_ext")]
    #[test_case("lib/util.cjs", Some(Language::JavaScript) ; "detect_cjs")]
    #[test_case("components/Button.jsx", Some(Language::Jsx) ; "detect_jsx")]
    #[test_case("scripts/run.py", Some(Language::Python) ; "detect_py")]
    #[test_case("main.go", Some(Language::Go) ; "detect_go")]
    #[test_case("lib.rs", Some(Language::Rust) ; "detect_rs")]
    #[test_case("Main.java", Some(Language::Java) ; "detect_java")]
    #[test_case("util.h", Some(Language::C) ; "detect_h")]
    #[test_case("main.cc", Some(Language::Cpp) ; "detect_cc")]
    #[test_case("Program.cs", Some(Language::CSharp) ; "detect_cs")]
    #[test_case("schema.sql", None ; "detect_sql_none")]
    #[test_case("README.md", None ; "detect_md_none")]
    #[test_case("Makefile", None ; "detect_makefile_none")]
    fn detect_language_parameterized(path: &str, expected: Option<Language>) {
        assert_eq!(CodeParser::detect_language(path), expected, "detect_language({path:?})");
        assert_eq!(CodeParser::is_supported(path), expected.is_some());
    }

    #[test]
    fn clean_source_has_zero_error_ratio() {
        let src = "export function f(a: number) { return a + 1; }\n";
        let tree = CodeParser::new().parse("a.ts", src, Language::TypeScript).unwrap();
        assert_eq!(error_ratio(&tree, src.len()), 0.0);
    }

    #[test]
    fn garbage_source_exceeds_error_limit() {
        let src = "}}}} ((( ::: ;;; @@@ function ((((( class {{{{ \n";
        let err = parse_checked(&CodeParser::new(), "bad.ts", src, Language::TypeScript, 0.2)
            .unwrap_err();
        match err {
            CodeTraceError::Parse { file, message } => {
                assert_eq!(file, "bad.ts");
                assert!(message.contains("syntax errors"), "{message}");
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn broken_source_has_positive_bounded_ratio() {
        let src = "function ok(a) { return a; }\nfunction broken( {\n";
        let tree = CodeParser::new().parse("a.js", src, Language::JavaScript).unwrap();
        let ratio = error_ratio(&tree, src.len());
        assert!(ratio > 0.0 && ratio <= 1.0, "ratio was {ratio}");
    }

    #[test]
    fn invalid_utf8_is_a_parse_error() {
        let bytes = [b'a', b'b', 0xff, 0xfe];
        let err = decode_source("x.py", &bytes).unwrap_err();
        assert!(err.to_string().contains("UTF-8"), "{err}");
        assert_eq!(decode_source("y.py", b"ok").unwrap(), "ok");
    }
}
