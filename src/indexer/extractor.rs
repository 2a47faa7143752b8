//! Symbol extraction: one syntax-tree walk per file.
//!
//! The walk yields a `module` symbol for the file, every named definition
//! with its qualified name, an `import` symbol plus [`ImportRef`] per import
//! statement, and the raw call sites of the file. Each call site is owned by
//! the innermost enclosing callable, or by the module symbol for top-level
//! code.
//!
//! Node kinds are mapped per language in small match tables rather than
//! query files, so every grammar is handled by the same collector.

use std::collections::HashMap;

use tree_sitter::{Node, Tree};

use crate::error::{CodeTraceError, Result};
use crate::types::{
    make_symbol_id, module_symbol_id, CallSite, ImportRef, Language, Symbol, SymbolKind,
};

/// Lines above and below a name's line searched when validating it.
const NAME_WINDOW: usize = 2;

const MAX_SIGNATURE_CHARS: usize = 200;
const MAX_RECEIVER_CHARS: usize = 80;

/// Per-file extraction output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub symbols: Vec<Symbol>,
    pub call_sites: Vec<CallSite>,
    pub imports: Vec<ImportRef>,
}

impl Extraction {
    pub fn module_id(&self) -> Option<&str> {
        self.symbols
            .iter()
            .find(|s| s.kind == SymbolKind::Module)
            .map(|s| s.id.as_str())
    }

    /// Innermost non-module, non-import symbol whose span covers `line`.
    pub fn enclosing_symbol(&self, line: u32) -> Option<&Symbol> {
        self.symbols
            .iter()
            .filter(|s| !matches!(s.kind, SymbolKind::Module | SymbolKind::Import))
            .filter(|s| s.start_line <= line && line <= s.end_line)
            .min_by_key(|s| (s.end_line - s.start_line, std::cmp::Reverse(s.start_line)))
    }

    /// Innermost callable covering `line`, falling back to the module.
    pub fn enclosing_callable(&self, line: u32) -> Option<&Symbol> {
        self.symbols
            .iter()
            .filter(|s| s.kind.is_callable())
            .filter(|s| s.start_line <= line && line <= s.end_line)
            .min_by_key(|s| (s.end_line - s.start_line, std::cmp::Reverse(s.start_line)))
            .or_else(|| self.symbols.iter().find(|s| s.kind == SymbolKind::Module))
    }
}

/// Walk `tree` and collect symbols, imports, and call sites.
pub fn extract(file_path: &str, source: &str, language: Language, tree: &Tree) -> Result<Extraction> {
    let mut collector = Collector::new(file_path, source, language);
    let root = tree.root_node();
    let scope = Scope::module(collector.module_id.clone());
    collector.visit(root, &scope);
    let (extraction, anchors) = collector.finish();
    validate_names(file_path, source, &anchors)?;
    Ok(extraction)
}

/// A definition's name and the line its name node sits on. Annotations,
/// decorators and attributes put a definition's start line above its name,
/// so validation looks at the name node instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAnchor {
    pub name: String,
    pub line: u32,
}

/// Every definition's name must appear within a couple of lines of its
/// anchor. A miss means the tree and the text disagree, and the whole file
/// is rejected rather than storing misplaced symbols.
pub fn validate_names(file_path: &str, source: &str, anchors: &[NameAnchor]) -> Result<()> {
    let lines: Vec<&str> = source.lines().collect();
    for anchor in anchors.iter().filter(|a| !a.name.is_empty()) {
        let idx = anchor.line.saturating_sub(1) as usize;
        if idx >= lines.len() {
            return Err(CodeTraceError::parse(
                file_path,
                format!("line {} out of range for symbol `{}`", anchor.line, anchor.name),
            ));
        }
        let lo = idx.saturating_sub(NAME_WINDOW);
        let hi = (idx + NAME_WINDOW).min(lines.len() - 1);
        if !lines[lo..=hi].iter().any(|l| l.contains(anchor.name.as_str())) {
            return Err(CodeTraceError::parse(
                file_path,
                format!(
                    "symbol `{}` not found near line {}: `{}`",
                    anchor.name,
                    anchor.line,
                    truncate(lines[idx].trim(), 80)
                ),
            ));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Walk state inherited by child nodes.
#[derive(Debug, Clone)]
struct Scope {
    /// Container names for qualification.
    path: Vec<String>,
    /// Symbol id that owns call sites at this point.
    owner: String,
    /// Inside a class-like body: functions become methods.
    in_type: bool,
    /// Inside any callable body: locals are not symbols.
    in_callable: bool,
    /// Export flag inherited by members.
    exported: bool,
}

impl Scope {
    fn module(owner: String) -> Self {
        Self {
            path: Vec::new(),
            owner,
            in_type: false,
            in_callable: false,
            exported: false,
        }
    }

    fn qualify(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.path.join("."), name)
        }
    }

    fn enter_container(&self, name: &str, exported: bool) -> Self {
        let mut next = self.clone();
        next.path.push(name.to_string());
        next.in_type = true;
        next.exported = exported;
        next
    }

    fn enter_definition(&self, sym: &Symbol) -> Self {
        let mut next = self.clone();
        next.path.push(sym.name.clone());
        next.exported = sym.exported;
        if sym.kind.is_callable() {
            next.owner = sym.id.clone();
            next.in_callable = true;
            next.in_type = false;
        } else {
            next.in_type = matches!(
                sym.kind,
                SymbolKind::Class
                    | SymbolKind::Struct
                    | SymbolKind::Interface
                    | SymbolKind::Trait
                    | SymbolKind::Enum
            );
        }
        next
    }
}

/// A definition recognised at one node.
struct Def {
    kind: SymbolKind,
    name: String,
    /// Overrides scope qualification (Go receivers, C++ `A::b`).
    container: Option<String>,
    exported: bool,
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

struct Collector<'a> {
    file_path: &'a str,
    source: &'a str,
    language: Language,
    module_id: String,
    symbols: Vec<Symbol>,
    call_sites: Vec<CallSite>,
    imports: Vec<ImportRef>,
    anchors: Vec<NameAnchor>,
    seen: HashMap<(SymbolKind, String), u32>,
}

impl<'a> Collector<'a> {
    fn new(file_path: &'a str, source: &'a str, language: Language) -> Self {
        let line_count = source.lines().count().max(1) as u32;
        let module_id = module_symbol_id(file_path);
        let module = Symbol {
            id: module_id.clone(),
            kind: SymbolKind::Module,
            name: "<module>".to_string(),
            qualified_name: "<module>".to_string(),
            file_path: file_path.to_string(),
            start_line: 1,
            end_line: line_count,
            language,
            signature: None,
            exported: true,
        };
        Self {
            file_path,
            source,
            language,
            module_id,
            symbols: vec![module],
            call_sites: Vec::new(),
            imports: Vec::new(),
            anchors: Vec::new(),
            seen: HashMap::new(),
        }
    }

    fn finish(self) -> (Extraction, Vec<NameAnchor>) {
        let extraction = Extraction {
            symbols: self.symbols,
            call_sites: self.call_sites,
            imports: self.imports,
        };
        (extraction, self.anchors)
    }

    fn text(&self, node: Node<'_>) -> &'a str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }

    fn field(&self, node: Node<'_>, name: &str) -> Option<&'a str> {
        node.child_by_field_name(name).map(|n| self.text(n))
    }

    fn visit(&mut self, node: Node<'_>, scope: &Scope) {
        if let Some(imports) = self.import_of(node) {
            let line = line_of(node);
            for (specifier, names) in imports {
                self.push_import(specifier, names, line);
            }
            return;
        }

        if let Some((callee, receiver)) = self.call_of(node) {
            if is_identifier(&callee) {
                self.call_sites.push(CallSite {
                    owner: scope.owner.clone(),
                    callee,
                    receiver: receiver.map(|r| truncate(r.trim(), MAX_RECEIVER_CHARS).to_string()),
                    file_path: self.file_path.to_string(),
                    line: line_of(node),
                });
            }
        }

        if let Some(def) = self.definition_of(node, scope) {
            let sym = self.push_symbol(def, node, scope);
            let child_scope = scope.enter_definition(&sym);
            self.visit_children(node, &child_scope);
            return;
        }

        if let Some((name, exported)) = self.container_of(node) {
            let child_scope = scope.enter_container(&name, exported);
            self.visit_children(node, &child_scope);
            return;
        }

        self.visit_children(node, scope);
    }

    fn visit_children(&mut self, node: Node<'_>, scope: &Scope) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit(child, scope);
        }
    }

    fn push_symbol(&mut self, def: Def, node: Node<'_>, scope: &Scope) -> Symbol {
        let base = match &def.container {
            Some(c) => format!("{c}.{}", def.name),
            None => scope.qualify(&def.name),
        };
        let qualified_name = self.dedup(def.kind, base);
        let signature = self
            .text(node)
            .lines()
            .next()
            .map(|l| truncate(l.trim(), MAX_SIGNATURE_CHARS).to_string())
            .filter(|l| !l.is_empty());
        let sym = Symbol {
            id: make_symbol_id(def.kind, self.file_path, &qualified_name),
            kind: def.kind,
            name: def.name,
            qualified_name,
            file_path: self.file_path.to_string(),
            start_line: line_of(node),
            end_line: node.end_position().row as u32 + 1,
            language: self.language,
            signature,
            exported: def.exported,
        };
        self.anchors.push(NameAnchor {
            name: sym.name.clone(),
            line: name_line(node),
        });
        self.symbols.push(sym.clone());
        sym
    }

    fn push_import(&mut self, specifier: String, names: Vec<String>, line: u32) {
        if specifier.is_empty() {
            return;
        }
        let qualified_name = self.dedup(SymbolKind::Import, specifier.clone());
        let id = make_symbol_id(SymbolKind::Import, self.file_path, &qualified_name);
        self.symbols.push(Symbol {
            id: id.clone(),
            kind: SymbolKind::Import,
            name: specifier.clone(),
            qualified_name,
            file_path: self.file_path.to_string(),
            start_line: line,
            end_line: line,
            language: self.language,
            signature: None,
            exported: false,
        });
        self.imports.push(ImportRef {
            symbol_id: id,
            file_path: self.file_path.to_string(),
            specifier,
            names,
            line,
        });
    }

    /// Same-named duplicates in one file get `#2`, `#3`, ... suffixes.
    fn dedup(&mut self, kind: SymbolKind, qualified: String) -> String {
        let n = self.seen.entry((kind, qualified.clone())).or_insert(0);
        *n += 1;
        if *n == 1 {
            qualified
        } else {
            format!("{qualified}#{n}")
        }
    }

    // -------------------------------------------------------------------
    // Definitions
    // -------------------------------------------------------------------

    fn definition_of(&self, node: Node<'_>, scope: &Scope) -> Option<Def> {
        match self.language {
            l if l.is_ecmascript() => self.ecmascript_def(node, scope),
            Language::Python => self.python_def(node, scope),
            Language::Go => self.go_def(node, scope),
            Language::Rust => self.rust_def(node, scope),
            Language::Java => self.java_def(node, scope),
            Language::C | Language::Cpp => self.c_family_def(node, scope),
            Language::CSharp => self.csharp_def(node, scope),
            _ => None,
        }
    }

    fn def(&self, kind: SymbolKind, name: Option<&str>, exported: bool) -> Option<Def> {
        let name = name?.trim();
        if name.is_empty() {
            return None;
        }
        Some(Def {
            kind,
            name: name.to_string(),
            container: None,
            exported,
        })
    }

    fn ecmascript_def(&self, node: Node<'_>, scope: &Scope) -> Option<Def> {
        let exported = scope.exported || has_export_ancestor(node);
        let name = self.field(node, "name");
        match node.kind() {
            "function_declaration" | "generator_function_declaration" => {
                self.def(SymbolKind::Function, name, exported)
            }
            "class_declaration" | "abstract_class_declaration" => {
                self.def(SymbolKind::Class, name, exported)
            }
            "method_definition" | "abstract_method_signature" => {
                self.def(SymbolKind::Method, name, exported)
            }
            "interface_declaration" => self.def(SymbolKind::Interface, name, exported),
            "enum_declaration" => self.def(SymbolKind::Enum, name, exported),
            "type_alias_declaration" => self.def(SymbolKind::TypeAlias, name, exported),
            "public_field_definition" | "field_definition" => {
                let value = node.child_by_field_name("value")?;
                if !is_function_value(value.kind()) {
                    return None;
                }
                let name = name.or_else(|| self.field(node, "property"));
                self.def(SymbolKind::Method, name, exported)
            }
            "variable_declarator" => {
                let name_node = node.child_by_field_name("name")?;
                if name_node.kind() != "identifier" {
                    return None;
                }
                let name = Some(self.text(name_node));
                match node.child_by_field_name("value").map(|v| v.kind()) {
                    Some(k) if is_function_value(k) => self.def(SymbolKind::Function, name, exported),
                    Some("class") => self.def(SymbolKind::Class, name, exported),
                    _ if !scope.in_callable && !scope.in_type => {
                        let is_const = node
                            .parent()
                            .map(|p| self.text(p).trim_start().starts_with("const"))
                            .unwrap_or(false);
                        let kind = if is_const {
                            SymbolKind::Constant
                        } else {
                            SymbolKind::Variable
                        };
                        self.def(kind, name, exported)
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn python_def(&self, node: Node<'_>, scope: &Scope) -> Option<Def> {
        let name = self.field(node, "name");
        let public = |n: Option<&str>| n.map(|n| !n.starts_with('_')).unwrap_or(false);
        match node.kind() {
            "function_definition" => {
                let kind = if scope.in_type {
                    SymbolKind::Method
                } else {
                    SymbolKind::Function
                };
                self.def(kind, name, public(name))
            }
            "class_definition" => self.def(SymbolKind::Class, name, public(name)),
            "assignment" if !scope.in_callable && !scope.in_type => {
                let parent = node.parent()?;
                if parent.kind() != "expression_statement"
                    || parent.parent().map(|g| g.kind()) != Some("module")
                {
                    return None;
                }
                let left = node.child_by_field_name("left")?;
                if left.kind() != "identifier" {
                    return None;
                }
                let name = self.text(left);
                let kind = if name.chars().all(|c| c.is_ascii_uppercase() || c == '_' || c.is_ascii_digit()) {
                    SymbolKind::Constant
                } else {
                    SymbolKind::Variable
                };
                self.def(kind, Some(name), public(Some(name)))
            }
            _ => None,
        }
    }

    fn go_def(&self, node: Node<'_>, scope: &Scope) -> Option<Def> {
        let name = self.field(node, "name");
        let exported = name.map(starts_uppercase).unwrap_or(false);
        match node.kind() {
            "function_declaration" => self.def(SymbolKind::Function, name, exported),
            "method_declaration" => {
                let mut def = self.def(SymbolKind::Method, name, exported)?;
                def.container = node
                    .child_by_field_name("receiver")
                    .and_then(|r| self.go_receiver_type(r));
                Some(def)
            }
            "type_spec" => {
                let kind = match node.child_by_field_name("type").map(|t| t.kind()) {
                    Some("struct_type") => SymbolKind::Struct,
                    Some("interface_type") => SymbolKind::Interface,
                    _ => SymbolKind::TypeAlias,
                };
                self.def(kind, name, exported)
            }
            "type_alias" => self.def(SymbolKind::TypeAlias, name, exported),
            "const_spec" if !scope.in_callable => self.def(SymbolKind::Constant, name, exported),
            "var_spec" if !scope.in_callable => self.def(SymbolKind::Variable, name, exported),
            _ => None,
        }
    }

    /// `func (s *Server) Handle()` yields `Server`.
    fn go_receiver_type(&self, receiver: Node<'_>) -> Option<String> {
        let mut cursor = receiver.walk();
        let param = receiver
            .named_children(&mut cursor)
            .find(|c| c.kind() == "parameter_declaration")?;
        let ty = self.field(param, "type")?;
        let ty = ty.trim_start_matches('*');
        let ty = ty.split('[').next().unwrap_or(ty).trim();
        (!ty.is_empty()).then(|| ty.to_string())
    }

    fn rust_def(&self, node: Node<'_>, scope: &Scope) -> Option<Def> {
        let name = self.field(node, "name");
        let exported = has_child_kind(node, "visibility_modifier");
        match node.kind() {
            "function_item" | "function_signature_item" => {
                let kind = if scope.in_type {
                    SymbolKind::Method
                } else {
                    SymbolKind::Function
                };
                self.def(kind, name, exported || (scope.exported && scope.in_type))
            }
            "struct_item" | "union_item" => self.def(SymbolKind::Struct, name, exported),
            "enum_item" => self.def(SymbolKind::Enum, name, exported),
            "trait_item" => self.def(SymbolKind::Trait, name, exported),
            "type_item" => self.def(SymbolKind::TypeAlias, name, exported),
            "const_item" | "static_item" if !scope.in_callable => {
                self.def(SymbolKind::Constant, name, exported)
            }
            _ => None,
        }
    }

    fn java_def(&self, node: Node<'_>, scope: &Scope) -> Option<Def> {
        let name = self.field(node, "name");
        let exported = self.has_modifier(node, "modifiers", "public");
        match node.kind() {
            "class_declaration" | "record_declaration" => self.def(SymbolKind::Class, name, exported),
            "interface_declaration" | "annotation_type_declaration" => {
                self.def(SymbolKind::Interface, name, exported)
            }
            "enum_declaration" => self.def(SymbolKind::Enum, name, exported),
            "method_declaration" | "constructor_declaration" if scope.in_type => {
                self.def(SymbolKind::Method, name, exported)
            }
            _ => None,
        }
    }

    fn c_family_def(&self, node: Node<'_>, scope: &Scope) -> Option<Def> {
        let exported = !self.has_modifier(node, "storage_class_specifier", "static");
        match node.kind() {
            "function_definition" => {
                let declarator = node.child_by_field_name("declarator")?;
                let (qualifier, name) = self.c_declarator_name(declarator)?;
                let kind = if scope.in_type || qualifier.is_some() {
                    SymbolKind::Method
                } else {
                    SymbolKind::Function
                };
                let mut def = self.def(kind, Some(name.as_str()), exported)?;
                def.container = qualifier.map(|q| scope.qualify(&q.replace("::", ".")));
                Some(def)
            }
            "struct_specifier" | "union_specifier" if node.child_by_field_name("body").is_some() => {
                self.def(SymbolKind::Struct, self.field(node, "name"), exported)
            }
            "class_specifier" if node.child_by_field_name("body").is_some() => {
                self.def(SymbolKind::Class, self.field(node, "name"), exported)
            }
            "enum_specifier" if node.child_by_field_name("body").is_some() => {
                self.def(SymbolKind::Enum, self.field(node, "name"), exported)
            }
            "type_definition" => {
                let declarator = node.child_by_field_name("declarator")?;
                let (_, name) = self.c_declarator_name(declarator)?;
                self.def(SymbolKind::TypeAlias, Some(name.as_str()), exported)
            }
            "preproc_def" | "preproc_function_def" => {
                self.def(SymbolKind::Constant, self.field(node, "name"), exported)
            }
            _ => None,
        }
    }

    /// Follow nested declarators down to the declared name. Returns the
    /// `A::B` qualifier for out-of-class C++ definitions.
    fn c_declarator_name(&self, node: Node<'_>) -> Option<(Option<String>, String)> {
        match node.kind() {
            "identifier" | "field_identifier" | "type_identifier" | "destructor_name"
            | "operator_name" => Some((None, self.text(node).to_string())),
            "qualified_identifier" => {
                let scope = self.field(node, "scope").map(str::to_string);
                let (_, name) = self.c_declarator_name(node.child_by_field_name("name")?)?;
                Some((scope, name))
            }
            _ => self.c_declarator_name(node.child_by_field_name("declarator")?),
        }
    }

    fn csharp_def(&self, node: Node<'_>, scope: &Scope) -> Option<Def> {
        let name = self.field(node, "name");
        let exported = self.has_modifier(node, "modifier", "public");
        match node.kind() {
            "class_declaration" | "record_declaration" => self.def(SymbolKind::Class, name, exported),
            "struct_declaration" | "record_struct_declaration" => {
                self.def(SymbolKind::Struct, name, exported)
            }
            "interface_declaration" => self.def(SymbolKind::Interface, name, exported),
            "enum_declaration" => self.def(SymbolKind::Enum, name, exported),
            "method_declaration" | "constructor_declaration" if scope.in_type => {
                self.def(SymbolKind::Method, name, exported)
            }
            "local_function_statement" => self.def(SymbolKind::Function, name, false),
            _ => None,
        }
    }

    /// True when a direct child of kind `child_kind` contains `word`.
    fn has_modifier(&self, node: Node<'_>, child_kind: &str, word: &str) -> bool {
        let mut cursor = node.walk();
        let found = node
            .children(&mut cursor)
            .filter(|c| c.kind() == child_kind)
            .any(|c| self.text(c).split_whitespace().any(|w| w == word));
        found
    }

    // -------------------------------------------------------------------
    // Containers that qualify names without being symbols
    // -------------------------------------------------------------------

    fn container_of(&self, node: Node<'_>) -> Option<(String, bool)> {
        match (self.language, node.kind()) {
            (Language::Rust, "impl_item") => {
                let ty = self.field(node, "type")?;
                let ty = ty.split('<').next().unwrap_or(ty).trim();
                Some((ty.to_string(), false))
            }
            (Language::Rust, "mod_item") => {
                node.child_by_field_name("body")?;
                let exported = has_child_kind(node, "visibility_modifier");
                Some((self.field(node, "name")?.to_string(), exported))
            }
            (Language::Cpp, "namespace_definition") => {
                Some((self.field(node, "name")?.to_string(), true))
            }
            _ => None,
        }
        .filter(|(name, _)| !name.is_empty())
    }

    // -------------------------------------------------------------------
    // Call sites
    // -------------------------------------------------------------------

    /// `(callee, receiver)` for a call expression node.
    fn call_of(&self, node: Node<'_>) -> Option<(String, Option<&'a str>)> {
        match (self.language, node.kind()) {
            (l, "call_expression") if l.is_ecmascript() => {
                let func = node.child_by_field_name("function")?;
                match func.kind() {
                    "identifier" => Some((self.text(func).to_string(), None)),
                    "member_expression" => Some((
                        self.field(func, "property")?.to_string(),
                        self.field(func, "object"),
                    )),
                    _ => None,
                }
            }
            (l, "new_expression") if l.is_ecmascript() => {
                let ctor = node.child_by_field_name("constructor")?;
                (ctor.kind() == "identifier").then(|| (self.text(ctor).to_string(), None))
            }
            (Language::Python, "call") => {
                let func = node.child_by_field_name("function")?;
                match func.kind() {
                    "identifier" => Some((self.text(func).to_string(), None)),
                    "attribute" => Some((
                        self.field(func, "attribute")?.to_string(),
                        self.field(func, "object"),
                    )),
                    _ => None,
                }
            }
            (Language::Go, "call_expression") => {
                let func = node.child_by_field_name("function")?;
                match func.kind() {
                    "identifier" => Some((self.text(func).to_string(), None)),
                    "selector_expression" => Some((
                        self.field(func, "field")?.to_string(),
                        self.field(func, "operand"),
                    )),
                    _ => None,
                }
            }
            (Language::Rust, "call_expression") => {
                let mut func = node.child_by_field_name("function")?;
                if func.kind() == "generic_function" {
                    func = func.child_by_field_name("function")?;
                }
                match func.kind() {
                    "identifier" => Some((self.text(func).to_string(), None)),
                    "scoped_identifier" => Some((
                        self.field(func, "name")?.to_string(),
                        self.field(func, "path"),
                    )),
                    "field_expression" => Some((
                        self.field(func, "field")?.to_string(),
                        self.field(func, "value"),
                    )),
                    _ => None,
                }
            }
            (Language::Java, "method_invocation") => Some((
                self.field(node, "name")?.to_string(),
                self.field(node, "object"),
            )),
            (Language::Java | Language::CSharp, "object_creation_expression") => {
                let ty = self.field(node, "type")?;
                let ty = ty.split('<').next().unwrap_or(ty);
                let ty = ty.rsplit('.').next().unwrap_or(ty).trim();
                Some((ty.to_string(), None))
            }
            (Language::C | Language::Cpp, "call_expression") => {
                let mut func = node.child_by_field_name("function")?;
                if func.kind() == "template_function" {
                    func = func.child_by_field_name("name")?;
                }
                match func.kind() {
                    "identifier" => Some((self.text(func).to_string(), None)),
                    "field_expression" => Some((
                        self.field(func, "field")?.to_string(),
                        self.field(func, "argument"),
                    )),
                    "qualified_identifier" => Some((
                        self.field(func, "name")?.to_string(),
                        self.field(func, "scope"),
                    )),
                    _ => None,
                }
            }
            (Language::CSharp, "invocation_expression") => {
                let func = node.child_by_field_name("function")?;
                match func.kind() {
                    "identifier" => Some((self.text(func).to_string(), None)),
                    "generic_name" => {
                        let mut cursor = func.walk();
                        let ident = func
                            .named_children(&mut cursor)
                            .find(|c| c.kind() == "identifier")?;
                        Some((self.text(ident).to_string(), None))
                    }
                    "member_access_expression" => {
                        let name = self.field(func, "name")?;
                        let name = name.split('<').next().unwrap_or(name);
                        Some((name.to_string(), self.field(func, "expression")))
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    // -------------------------------------------------------------------
    // Imports
    // -------------------------------------------------------------------

    /// `(specifier, names)` pairs for an import node.
    fn import_of(&self, node: Node<'_>) -> Option<Vec<(String, Vec<String>)>> {
        match (self.language, node.kind()) {
            (l, "import_statement") if l.is_ecmascript() => {
                let specifier = unquote(self.field(node, "source")?);
                let mut names = Vec::new();
                let mut cursor = node.walk();
                for clause in node.children(&mut cursor).filter(|c| c.kind() == "import_clause") {
                    let mut c2 = clause.walk();
                    for part in clause.children(&mut c2).filter(|p| p.kind() == "named_imports") {
                        let mut c3 = part.walk();
                        for spec in part.children(&mut c3).filter(|s| s.kind() == "import_specifier") {
                            if let Some(n) = self.field(spec, "name") {
                                names.push(n.to_string());
                            }
                        }
                    }
                }
                Some(vec![(specifier, names)])
            }
            (Language::Python, "import_statement") => {
                let mut out = Vec::new();
                let mut cursor = node.walk();
                for child in node.children_by_field_name("name", &mut cursor) {
                    let module = match child.kind() {
                        "aliased_import" => self.field(child, "name").unwrap_or(""),
                        _ => self.text(child),
                    };
                    out.push((module.to_string(), Vec::new()));
                }
                Some(out)
            }
            (Language::Python, "import_from_statement") => {
                let module = self.field(node, "module_name")?.to_string();
                let mut names = Vec::new();
                let mut cursor = node.walk();
                for child in node.children_by_field_name("name", &mut cursor) {
                    let n = match child.kind() {
                        "aliased_import" => self.field(child, "name").unwrap_or(""),
                        _ => self.text(child),
                    };
                    if !n.is_empty() {
                        names.push(n.to_string());
                    }
                }
                Some(vec![(module, names)])
            }
            (Language::Go, "import_spec") => {
                Some(vec![(unquote(self.field(node, "path")?), Vec::new())])
            }
            (Language::Rust, "use_declaration") => {
                let arg = self.field(node, "argument")?;
                Some(vec![split_rust_use(arg)])
            }
            (Language::Java, "import_declaration") => {
                let body = self
                    .text(node)
                    .trim()
                    .trim_start_matches("import")
                    .trim()
                    .trim_start_matches("static")
                    .trim_end_matches(';')
                    .trim();
                Some(vec![split_dotted_import(body, '.')])
            }
            (Language::C | Language::Cpp, "preproc_include") => {
                let path = self.field(node, "path")?;
                let path = path.trim().trim_matches(|c| c == '"' || c == '<' || c == '>');
                Some(vec![(path.to_string(), Vec::new())])
            }
            (Language::CSharp, "using_directive") => {
                let body = self
                    .text(node)
                    .trim()
                    .trim_start_matches("global")
                    .trim()
                    .trim_start_matches("using")
                    .trim()
                    .trim_start_matches("static")
                    .trim_end_matches(';')
                    .trim();
                let target = body.rsplit('=').next().unwrap_or(body).trim();
                Some(vec![(target.to_string(), Vec::new())])
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn line_of(node: Node<'_>) -> u32 {
    node.start_position().row as u32 + 1
}

/// Line of a definition's name: its `name` field, or the innermost
/// `declarator` for C-family definitions.
fn name_line(node: Node<'_>) -> u32 {
    let mut cur = node;
    loop {
        if let Some(name) = cur.child_by_field_name("name") {
            return line_of(name);
        }
        match cur.child_by_field_name("declarator") {
            Some(next) => cur = next,
            None => return line_of(cur),
        }
    }
}

fn has_child_kind(node: Node<'_>, kind: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| c.kind() == kind);
    found
}

/// `export function f`, `export const f = ...`, `export default class`.
fn has_export_ancestor(node: Node<'_>) -> bool {
    let mut current = node.parent();
    for _ in 0..2 {
        match current {
            Some(p) if p.kind() == "export_statement" => return true,
            Some(p) if matches!(p.kind(), "lexical_declaration" | "variable_declaration") => {
                current = p.parent();
            }
            _ => return false,
        }
    }
    false
}

fn is_function_value(kind: &str) -> bool {
    matches!(
        kind,
        "arrow_function" | "function_expression" | "function" | "generator_function"
    )
}

fn starts_uppercase(name: &str) -> bool {
    name.chars().next().map(char::is_uppercase).unwrap_or(false)
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        && !s.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true)
}

fn unquote(s: &str) -> String {
    s.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`').to_string()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// `a.b.C` becomes (`a.b`, [`C`]); `a.b.*` becomes (`a.b`, []).
fn split_dotted_import(path: &str, sep: char) -> (String, Vec<String>) {
    if let Some(prefix) = path.strip_suffix(&format!("{sep}*")) {
        return (prefix.to_string(), Vec::new());
    }
    match path.rsplit_once(sep) {
        Some((prefix, last)) => (prefix.to_string(), vec![last.to_string()]),
        None => (path.to_string(), Vec::new()),
    }
}

/// `crate::a::{b, c as d}` becomes (`crate::a`, [`b`, `c`]).
fn split_rust_use(arg: &str) -> (String, Vec<String>) {
    let arg: String = arg.split_whitespace().collect::<Vec<_>>().join(" ");
    if let Some((prefix, rest)) = arg.split_once("::{") {
        let names = rest
            .trim_end_matches('}')
            .split(',')
            .map(|n| n.split(" as ").next().unwrap_or(n).trim())
            .filter(|n| !n.is_empty() && *n != "self" && !n.contains('{') && !n.contains("::"))
            .map(str::to_string)
            .collect();
        return (prefix.to_string(), names);
    }
    let arg = arg.split(" as ").next().unwrap_or(&arg).to_string();
    if let Some(prefix) = arg.strip_suffix("::*") {
        return (prefix.to_string(), Vec::new());
    }
    match arg.rsplit_once("::") {
        Some((prefix, last)) => (prefix.to_string(), vec![last.to_string()]),
        None => (arg, Vec::new()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::parser::CodeParser;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn run(path: &str, src: &str, lang: Language) -> Extraction {
        let tree = CodeParser::new().parse(path, src, lang).unwrap();
        extract(path, src, lang, &tree).unwrap()
    }

    fn qualified(ex: &Extraction, kind: SymbolKind) -> Vec<String> {
        ex.symbols
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.qualified_name.clone())
            .collect()
    }

    #[test]
    fn typescript_definitions_and_calls() {
        let src = r#"import { save, load } from "./repo";
import * as util from "../util";

export class OrderService {
  create(order: Order) {
    validate(order);
    this.repo.save(order);
  }
}

export const handler = async (req) => {
  return new OrderService().create(req.body);
};

function validate(o) { return o; }
const LIMIT = 10;
"#;
        let ex = run("src/orders.ts", src, Language::TypeScript);

        assert_eq!(qualified(&ex, SymbolKind::Class), vec!["OrderService"]);
        assert_eq!(qualified(&ex, SymbolKind::Method), vec!["OrderService.create"]);
        assert_eq!(qualified(&ex, SymbolKind::Function), vec!["handler", "validate"]);
        assert_eq!(qualified(&ex, SymbolKind::Constant), vec!["LIMIT"]);

        let class = ex.symbols.iter().find(|s| s.name == "OrderService").unwrap();
        assert!(class.exported);
        let validate = ex.symbols.iter().find(|s| s.name == "validate").unwrap();
        assert!(!validate.exported);

        assert_eq!(ex.imports.len(), 2);
        assert_eq!(ex.imports[0].specifier, "./repo");
        assert_eq!(ex.imports[0].names, vec!["save".to_string(), "load".to_string()]);
        assert!(ex.imports[1].names.is_empty());

        let create_id = "method:src/orders.ts:OrderService.create";
        let owned: Vec<&str> = ex
            .call_sites
            .iter()
            .filter(|c| c.owner == create_id)
            .map(|c| c.callee.as_str())
            .collect();
        assert_eq!(owned, vec!["validate", "save"]);
        let save = ex.call_sites.iter().find(|c| c.callee == "save").unwrap();
        assert_eq!(save.receiver.as_deref(), Some("this.repo"));

        let handler_calls: Vec<&str> = ex
            .call_sites
            .iter()
            .filter(|c| c.owner == "function:src/orders.ts:handler")
            .map(|c| c.callee.as_str())
            .collect();
        assert!(handler_calls.contains(&"OrderService"));
        assert!(handler_calls.contains(&"create"));
    }

    #[test]
    fn top_level_calls_belong_to_the_module() {
        let src = "setup();\nfunction setup() {}\n";
        let ex = run("main.js", src, Language::JavaScript);
        assert_eq!(ex.call_sites.len(), 1);
        assert_eq!(ex.call_sites[0].owner, module_symbol_id("main.js"));
        assert_eq!(ex.module_id(), Some("module:main.js:<module>"));
    }

    #[test]
    fn duplicate_names_get_numbered_suffixes() {
        let src = "def f():\n    pass\n\ndef f():\n    pass\n";
        let ex = run("dup.py", src, Language::Python);
        assert_eq!(qualified(&ex, SymbolKind::Function), vec!["f", "f#2"]);
        let ids: Vec<&str> = ex
            .symbols
            .iter()
            .filter(|s| s.kind == SymbolKind::Function)
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ids, vec!["function:dup.py:f", "function:dup.py:f#2"]);
    }

    #[test]
    fn python_methods_imports_and_constants() {
        let src = r#"import os, json
from .models import Order, Item
from events import *

MAX_RETRIES = 3

class Worker:
    def run(self):
        self.process(Order())

    def _process(self, o):
        os.path.join("a", "b")
"#;
        let ex = run("app/worker.py", src, Language::Python);
        assert_eq!(qualified(&ex, SymbolKind::Method), vec!["Worker.run", "Worker._process"]);
        assert_eq!(qualified(&ex, SymbolKind::Constant), vec!["MAX_RETRIES"]);
        let private = ex.symbols.iter().find(|s| s.name == "_process").unwrap();
        assert!(!private.exported);

        let specs: Vec<(&str, usize)> = ex
            .imports
            .iter()
            .map(|i| (i.specifier.as_str(), i.names.len()))
            .collect();
        assert_eq!(specs, vec![("os", 0), ("json", 0), (".models", 2), ("events", 0)]);

        let process = ex.call_sites.iter().find(|c| c.callee == "process").unwrap();
        assert_eq!(process.owner, "method:app/worker.py:Worker.run");
        assert_eq!(process.receiver.as_deref(), Some("self"));
    }

    #[test]
    fn go_methods_are_qualified_by_receiver() {
        let src = r#"package main

import "net/http"

type Server struct{}

func (s *Server) Handle(w http.ResponseWriter) {
	s.write(w)
}

func helper() {}
"#;
        let ex = run("server.go", src, Language::Go);
        assert_eq!(qualified(&ex, SymbolKind::Method), vec!["Server.Handle"]);
        assert_eq!(qualified(&ex, SymbolKind::Struct), vec!["Server"]);
        assert!(ex.symbols.iter().find(|s| s.name == "Handle").unwrap().exported);
        assert!(!ex.symbols.iter().find(|s| s.name == "helper").unwrap().exported);
        assert_eq!(ex.imports[0].specifier, "net/http");
        assert_eq!(ex.call_sites[0].callee, "write");
    }

    #[test]
    fn rust_impl_functions_become_methods() {
        let src = r#"use crate::store::{Store, open as open_store};

pub struct Engine;

impl Engine {
    pub fn run(&self) {
        helper();
        Store::open();
    }
}

fn helper() {}
"#;
        let ex = run("src/engine.rs", src, Language::Rust);
        assert_eq!(qualified(&ex, SymbolKind::Method), vec!["Engine.run"]);
        assert_eq!(qualified(&ex, SymbolKind::Function), vec!["helper"]);
        assert_eq!(ex.imports[0].specifier, "crate::store");
        assert_eq!(ex.imports[0].names, vec!["Store".to_string(), "open".to_string()]);
        let callees: Vec<&str> = ex.call_sites.iter().map(|c| c.callee.as_str()).collect();
        assert_eq!(callees, vec!["helper", "open"]);
    }

    #[test]
    fn java_and_csharp_methods() {
        let java = "import com.acme.Repo;\npublic class Api {\n  public void get() { repo.find(1); }\n}\n";
        let ex = run("Api.java", java, Language::Java);
        assert_eq!(qualified(&ex, SymbolKind::Method), vec!["Api.get"]);
        assert_eq!(ex.imports[0].specifier, "com.acme");
        assert_eq!(ex.imports[0].names, vec!["Repo".to_string()]);
        assert_eq!(ex.call_sites[0].callee, "find");

        let cs = "using System.IO;\npublic class Svc {\n  public void Run() { File.WriteAllText(\"a\", \"b\"); }\n}\n";
        let ex = run("Svc.cs", cs, Language::CSharp);
        assert_eq!(qualified(&ex, SymbolKind::Method), vec!["Svc.Run"]);
        assert_eq!(ex.imports[0].specifier, "System.IO");
        assert_eq!(ex.call_sites[0].callee, "WriteAllText");
    }

    #[test]
    fn c_and_cpp_functions() {
        let c = "#include \"util.h\"\nstatic int helper(void) { return 0; }\nint main(void) { return helper(); }\n";
        let ex = run("main.c", c, Language::C);
        assert_eq!(qualified(&ex, SymbolKind::Function), vec!["helper", "main"]);
        assert!(!ex.symbols.iter().find(|s| s.name == "helper").unwrap().exported);
        assert_eq!(ex.imports[0].specifier, "util.h");

        let cpp = "class Foo {\n public:\n  void bar();\n};\nvoid Foo::bar() { baz(); }\n";
        let ex = run("foo.cpp", cpp, Language::Cpp);
        assert_eq!(qualified(&ex, SymbolKind::Method), vec!["Foo.bar"]);
        assert_eq!(ex.call_sites[0].owner, "method:foo.cpp:Foo.bar");
    }

    #[test]
    fn misplaced_symbol_fails_validation() {
        let ghost = |line| NameAnchor {
            name: "ghost".into(),
            line,
        };
        let src = "line one\nline two\nline three\nline four\nghost lives here\n";
        let err = validate_names("a.ts", src, &[ghost(1)]).unwrap_err();
        assert!(err.to_string().contains("ghost"), "{err}");
        validate_names("a.ts", src, &[ghost(3)]).unwrap();
    }

    #[test]
    fn java_method_under_stacked_annotations() {
        let java = "\
public class OrderController {
  @GetMapping(\"/orders\")
  @ResponseBody
  @Transactional
  @PreAuthorize(\"hasRole('ADMIN')\")
  public String list() {
    return repo.all();
  }
}
";
        let ex = run("OrderController.java", java, Language::Java);
        assert_eq!(qualified(&ex, SymbolKind::Method), vec!["OrderController.list"]);
        assert_eq!(ex.call_sites[0].owner, "method:OrderController.java:OrderController.list");
    }

    #[test]
    fn csharp_method_under_stacked_attributes() {
        let cs = "\
public class OrdersController {
  [HttpGet(\"/orders\")]
  [Produces(\"application/json\")]
  [Authorize]
  [ResponseCache(Duration = 60)]
  public string List() {
    return Repo.All();
  }
}
";
        let ex = run("OrdersController.cs", cs, Language::CSharp);
        assert_eq!(qualified(&ex, SymbolKind::Method), vec!["OrdersController.List"]);
    }

    #[test]
    fn typescript_method_under_stacked_decorators() {
        let ts = "\
export class OrdersController {
  @Get('/orders')
  @UseGuards(AuthGuard)
  @HttpCode(200)
  @Header('Cache-Control', 'none')
  list() {
    return this.repo.all();
  }
}
";
        let ex = run("orders.controller.ts", ts, Language::TypeScript);
        assert_eq!(qualified(&ex, SymbolKind::Method), vec!["OrdersController.list"]);
    }

    #[test]
    fn enclosing_lookups_prefer_innermost() {
        let src = "class A {\n  m() {\n    x();\n  }\n}\n";
        let ex = run("a.js", src, Language::JavaScript);
        assert_eq!(ex.enclosing_symbol(3).unwrap().qualified_name, "A.m");
        assert_eq!(ex.enclosing_callable(3).unwrap().qualified_name, "A.m");
        assert_eq!(ex.enclosing_callable(1).unwrap().kind, SymbolKind::Module);
    }

    #[test_case("crate::a::b", ("crate::a", vec!["b"]) ; "single")]
    #[test_case("crate::a::{b, c as d}", ("crate::a", vec!["b", "c"]) ; "group")]
    #[test_case("super::*", ("super", vec![]) ; "glob")]
    #[test_case("std", ("std", vec![]) ; "bare")]
    fn rust_use_splitting(arg: &str, expected: (&str, Vec<&str>)) {
        let (spec, names) = split_rust_use(arg);
        assert_eq!(spec, expected.0);
        assert_eq!(names, expected.1.into_iter().map(String::from).collect::<Vec<_>>());
    }
}
