//! Per-file connection probing.
//!
//! [`probe_file`] is a pure function of one file's text and its extraction:
//! it never looks at other files, so files can be probed in parallel and
//! re-probed at will. Its output is one-sided: connection candidates, plus
//! the entry points and final outcomes detected in the file.

use std::collections::{BTreeMap, HashSet};
use std::ops::Range;

use regex::Captures;

use crate::config::schema::ProbeConfig;
use crate::indexer::extractor::Extraction;
use crate::probe::catalog::{
    connection_idioms, controller_action_key, effect_idioms, entry_idioms, normalize_key, Anchor,
};
use crate::types::{
    make_entry_point_id, make_outcome_id, CandidateSide, ConnectionCandidate, DesignationOrigin,
    EdgeKind, EntryPoint, FinalOutcome, Language, Symbol, SymbolKind, TriggerKind,
};

/// Lines after a decorator searched for the definition it decorates.
const DECORATOR_REACH: u32 = 4;

/// Everything probing found in one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeOutput {
    pub candidates: Vec<ConnectionCandidate>,
    pub entry_points: Vec<EntryPoint>,
    pub outcomes: Vec<FinalOutcome>,
}

/// Probe one file for connection halves, triggers, and effects.
pub fn probe_file(
    file_path: &str,
    source: &str,
    language: Language,
    extraction: &Extraction,
    config: &ProbeConfig,
) -> ProbeOutput {
    let mut candidates: HashSet<ConnectionCandidate> = HashSet::new();
    let mut entries: BTreeMap<String, EntryPoint> = BTreeMap::new();
    let mut outcomes: BTreeMap<String, FinalOutcome> = BTreeMap::new();

    for (idx, text) in source.lines().enumerate() {
        let line = idx as u32 + 1;
        if is_comment(text, language) {
            continue;
        }
        let mut claimed: Vec<Range<usize>> = Vec::new();

        for idiom in connection_idioms().iter().filter(|i| config.is_enabled(i.kind)) {
            for caps in idiom.regex.captures_iter(text) {
                let Some(whole) = caps.get(0) else { continue };
                let span = whole.range();
                if claimed.iter().any(|c| c.start < span.end && span.start < c.end) {
                    continue;
                }

                let owner = match locate_owner(extraction, &caps, idiom.anchor, line) {
                    Located::Symbol(s) => s,
                    Located::MissingHandler if idiom.requires_handler => continue,
                    Located::MissingHandler | Located::Nothing => {
                        match extraction.enclosing_callable(line) {
                            Some(s) => s,
                            None => continue,
                        }
                    }
                };

                let raw_key = if idiom.key_from_symbol {
                    owner.name.clone()
                } else if let Some(k) = caps.name("key") {
                    k.as_str().to_string()
                } else if let (Some(c), Some(a)) = (caps.name("ctrl"), caps.name("action")) {
                    controller_action_key(c.as_str(), a.as_str())
                } else {
                    continue;
                };
                let key = normalize_key(idiom.kind, &raw_key);
                if key.is_empty() {
                    continue;
                }

                claimed.push(span);
                candidates.insert(ConnectionCandidate {
                    kind: idiom.kind,
                    key,
                    side: idiom.side,
                    symbol_id: owner.id.clone(),
                    file_path: file_path.to_string(),
                    line,
                });
                if let Some(trigger) = idiom.trigger {
                    add_entry(&mut entries, owner, trigger, Some(raw_key));
                }
            }
        }

        for idiom in entry_idioms() {
            for caps in idiom.regex.captures_iter(text) {
                let owner = match locate_owner(extraction, &caps, idiom.anchor, line) {
                    Located::Symbol(s) => Some(s),
                    _ => extraction.enclosing_callable(line),
                };
                if let Some(owner) = owner {
                    let detail = caps
                        .name("key")
                        .map(|k| k.as_str().to_string())
                        .or_else(|| Some(idiom.name.to_string()));
                    add_entry(&mut entries, owner, idiom.trigger, detail);
                }
            }
        }

        for idiom in effect_idioms() {
            if !idiom.regex.is_match(text) {
                continue;
            }
            if let Some(owner) = extraction.enclosing_callable(line) {
                let id = make_outcome_id(&owner.id, idiom.effect);
                outcomes.entry(id.clone()).or_insert_with(|| FinalOutcome {
                    id,
                    symbol_id: owner.id.clone(),
                    effect: idiom.effect,
                    origin: DesignationOrigin::Detected,
                    detail: Some(format!("{}:{line}", idiom.name)),
                });
            }
        }
    }

    if config.is_enabled(EdgeKind::ConventionRouting) {
        for (symbol, key) in controller_actions(extraction) {
            candidates.insert(ConnectionCandidate {
                kind: EdgeKind::ConventionRouting,
                key,
                side: CandidateSide::Receive,
                symbol_id: symbol.id.clone(),
                file_path: file_path.to_string(),
                line: symbol.start_line,
            });
        }
    }

    if config.is_enabled(EdgeKind::Http) {
        if let Some(route) = file_route(file_path) {
            for handler in file_route_handlers(extraction) {
                candidates.insert(ConnectionCandidate {
                    kind: EdgeKind::Http,
                    key: normalize_key(EdgeKind::Http, &route),
                    side: CandidateSide::Receive,
                    symbol_id: handler.id.clone(),
                    file_path: file_path.to_string(),
                    line: handler.start_line,
                });
                add_entry(&mut entries, handler, TriggerKind::HttpRoute, Some(route.clone()));
            }
        }
    }

    for main in main_functions(extraction, language) {
        add_entry(&mut entries, main, TriggerKind::CliCommand, Some("main".to_string()));
    }

    let mut candidates: Vec<ConnectionCandidate> = candidates.into_iter().collect();
    candidates.sort_by(|a, b| {
        (a.kind, &a.key, a.side, &a.symbol_id, a.line).cmp(&(b.kind, &b.key, b.side, &b.symbol_id, b.line))
    });

    ProbeOutput {
        candidates,
        entry_points: entries.into_values().collect(),
        outcomes: outcomes.into_values().collect(),
    }
}

fn add_entry(
    entries: &mut BTreeMap<String, EntryPoint>,
    owner: &Symbol,
    trigger: TriggerKind,
    detail: Option<String>,
) {
    let id = make_entry_point_id(&owner.id, trigger);
    entries.entry(id.clone()).or_insert_with(|| EntryPoint {
        id,
        symbol_id: owner.id.clone(),
        trigger,
        origin: DesignationOrigin::Detected,
        detail,
    });
}

// ---------------------------------------------------------------------------
// Owner lookup
// ---------------------------------------------------------------------------

enum Located<'a> {
    Symbol(&'a Symbol),
    /// A `handler` was captured but names nothing defined in this file.
    MissingHandler,
    Nothing,
}

fn locate_owner<'a>(extraction: &'a Extraction, caps: &Captures<'_>, anchor: Anchor, line: u32) -> Located<'a> {
    if anchor == Anchor::Decorated {
        return match decorated_symbol(extraction, line) {
            Some(s) => Located::Symbol(s),
            None => Located::Nothing,
        };
    }
    match caps.name("handler") {
        Some(h) => match handler_symbol(extraction, h.as_str()) {
            Some(s) => Located::Symbol(s),
            None => Located::MissingHandler,
        },
        None => Located::Nothing,
    }
}

/// `ctrl.list`, `this.onSave`, and `handlers::create` all name their last
/// segment.
fn handler_symbol<'a>(extraction: &'a Extraction, handler: &str) -> Option<&'a Symbol> {
    let name = handler
        .rsplit(|c| c == '.' || c == ':')
        .find(|s| !s.is_empty())
        .unwrap_or(handler);
    extraction
        .symbols
        .iter()
        .filter(|s| s.name == name && s.kind.is_call_target())
        .min_by_key(|s| (!s.kind.is_callable(), s.start_line))
}

/// The first callable or type defined on the decorator line or just below it.
fn decorated_symbol(extraction: &Extraction, line: u32) -> Option<&Symbol> {
    extraction
        .symbols
        .iter()
        .filter(|s| s.kind.is_call_target())
        .filter(|s| s.start_line >= line && s.start_line <= line + DECORATOR_REACH)
        .min_by_key(|s| (s.start_line, !s.kind.is_callable()))
}

fn is_comment(text: &str, language: Language) -> bool {
    let t = text.trim_start();
    t.starts_with("//")
        || t.starts_with("/*")
        || t.starts_with("* ")
        || (language == Language::Python && t.starts_with('#'))
}

// ---------------------------------------------------------------------------
// Symbol-derived receivers and entries
// ---------------------------------------------------------------------------

/// Public methods of `*Controller` types, keyed `controller#action`.
fn controller_actions(extraction: &Extraction) -> Vec<(&Symbol, String)> {
    extraction
        .symbols
        .iter()
        .filter(|s| s.kind == SymbolKind::Method)
        .filter_map(|s| {
            let (container, _) = s.qualified_name.rsplit_once('.')?;
            let class = container.rsplit('.').next().unwrap_or(container);
            if !class.ends_with("Controller") || s.name.starts_with('_') {
                return None;
            }
            Some((s, controller_action_key(class, &s.name)))
        })
        .collect()
}

/// Route served by a file under file-system routing (`pages/api/**`,
/// `app/**/route.*`).
pub fn file_route(file_path: &str) -> Option<String> {
    let without_ext = file_path.rsplit_once('.').map_or(file_path, |(stem, _)| stem);
    let segments: Vec<&str> = without_ext.split('/').collect();

    if let Some(pos) = segments.windows(2).position(|w| w == ["pages", "api"]) {
        let mut route: Vec<&str> = segments[pos + 1..].to_vec();
        if route.last() == Some(&"index") {
            route.pop();
        }
        return Some(format!("/{}", route.join("/")));
    }

    if segments.last() == Some(&"route") {
        let pos = segments.iter().rposition(|s| *s == "app")?;
        let route: Vec<&str> = segments[pos + 1..segments.len() - 1]
            .iter()
            .copied()
            .filter(|s| !(s.starts_with('(') && s.ends_with(')')))
            .collect();
        return Some(format!("/{}", route.join("/")));
    }
    None
}

fn file_route_handlers(extraction: &Extraction) -> Vec<&Symbol> {
    const VERBS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "handler", "default"];
    let handlers: Vec<&Symbol> = extraction
        .symbols
        .iter()
        .filter(|s| s.kind == SymbolKind::Function && s.exported && VERBS.contains(&s.name.as_str()))
        .collect();
    if handlers.is_empty() {
        extraction
            .symbols
            .iter()
            .filter(|s| s.kind == SymbolKind::Module)
            .collect()
    } else {
        handlers
    }
}

/// Program entry functions: `main` in compiled languages, `static void
/// main`/`Main` in Java and C#.
fn main_functions(extraction: &Extraction, language: Language) -> Vec<&Symbol> {
    extraction
        .symbols
        .iter()
        .filter(|s| match language {
            Language::Go | Language::Rust | Language::C | Language::Cpp => {
                s.kind == SymbolKind::Function && s.name == "main"
            }
            Language::Java | Language::CSharp => {
                s.kind == SymbolKind::Method
                    && (s.name == "main" || s.name == "Main")
                    && s.signature.as_deref().is_some_and(|sig| sig.contains("static"))
            }
            _ => false,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::extractor::extract;
    use crate::indexer::parser::CodeParser;
    use crate::types::EffectKind;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn probe(path: &str, source: &str) -> ProbeOutput {
        let lang = CodeParser::detect_language(path).unwrap();
        let tree = CodeParser::new().parse(path, source, lang).unwrap();
        let ex = extract(path, source, lang, &tree).unwrap();
        probe_file(path, source, lang, &ex, &ProbeConfig::default())
    }

    #[test]
    fn emitter_file_yields_one_emit_candidate() {
        let out = probe(
            "a.ts",
            "export function createOrder(bus) {\n  bus.emit('order.created', {});\n}\n",
        );
        assert_eq!(
            out.candidates,
            vec![ConnectionCandidate {
                kind: EdgeKind::Event,
                key: "order.created".into(),
                side: CandidateSide::Emit,
                symbol_id: "function:a.ts:createOrder".into(),
                file_path: "a.ts".into(),
                line: 2,
            }]
        );
    }

    #[test]
    fn listener_with_named_handler_is_owned_by_handler() {
        let out = probe(
            "b.ts",
            "export function onOrderCreated(o) {\n  return o;\n}\nbus.on('order.created', onOrderCreated);\n",
        );
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].side, CandidateSide::Receive);
        assert_eq!(out.candidates[0].symbol_id, "function:b.ts:onOrderCreated");
    }

    #[test]
    fn express_route_is_receive_candidate_and_entry_point() {
        let out = probe(
            "src/routes.ts",
            "export function getOrder(req, res) {\n  res.json({});\n}\napp.get('/orders/:id', getOrder);\n",
        );
        let http: Vec<_> = out.candidates.iter().filter(|c| c.kind == EdgeKind::Http).collect();
        assert_eq!(http.len(), 1);
        assert_eq!(http[0].key, "/orders/*");
        assert_eq!(out.entry_points.len(), 1);
        assert_eq!(out.entry_points[0].trigger, TriggerKind::HttpRoute);
        assert_eq!(out.entry_points[0].symbol_id, "function:src/routes.ts:getOrder");
        assert_eq!(out.outcomes.len(), 1);
        assert_eq!(out.outcomes[0].effect, EffectKind::Response);
        assert_eq!(out.outcomes[0].symbol_id, "function:src/routes.ts:getOrder");
    }

    #[test]
    fn python_decorated_route_anchors_to_function() {
        let out = probe(
            "app/views.py",
            "@app.route('/orders/<int:oid>')\ndef show_order(oid):\n    return jsonify({})\n",
        );
        assert_eq!(out.entry_points.len(), 1);
        assert_eq!(out.entry_points[0].symbol_id, "function:app/views.py:show_order");
        let http = &out.candidates[0];
        assert_eq!((http.kind, http.key.as_str()), (EdgeKind::Http, "/orders/*"));
    }

    #[test]
    fn ipc_handle_is_not_also_an_event_listener() {
        let out = probe(
            "main.js",
            "function saveFile(e, data) { return data; }\nipcMain.handle('save-file', saveFile);\n",
        );
        let kinds: Vec<EdgeKind> = out.candidates.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![EdgeKind::Ipc]);
    }

    #[test]
    fn commented_idioms_are_ignored() {
        let out = probe("a.ts", "// bus.emit('order.created')\nexport const x = 1;\n");
        assert!(out.candidates.is_empty());
    }

    #[test]
    fn disabled_category_is_skipped() {
        let source = "export function f(bus) { bus.emit('x.y', 1); }\n";
        let tree = CodeParser::new().parse("a.ts", source, Language::TypeScript).unwrap();
        let ex = extract("a.ts", source, Language::TypeScript, &tree).unwrap();
        let config = ProbeConfig {
            disabled_categories: vec![EdgeKind::Event],
        };
        assert!(probe_file("a.ts", source, Language::TypeScript, &ex, &config).candidates.is_empty());
    }

    #[test]
    fn duplicate_matches_collapse() {
        let out = probe(
            "a.ts",
            "export function f(bus) {\n  bus.emit('tick', 1); bus.emit('tick', 2);\n}\n",
        );
        assert_eq!(out.candidates.len(), 1);
    }

    #[test]
    fn controller_methods_receive_convention_routes() {
        let out = probe(
            "app/OrdersController.ts",
            "export class OrdersController {\n  create(req) { return req; }\n}\n",
        );
        let conv: Vec<_> = out
            .candidates
            .iter()
            .filter(|c| c.kind == EdgeKind::ConventionRouting)
            .collect();
        assert_eq!(conv.len(), 1);
        assert_eq!(conv[0].key, "orders#create");
        assert_eq!(conv[0].side, CandidateSide::Receive);
    }

    #[test]
    fn go_main_is_cli_entry() {
        let out = probe("cmd/tool/main.go", "package main\n\nfunc main() {\n}\n");
        assert_eq!(out.entry_points.len(), 1);
        assert_eq!(out.entry_points[0].trigger, TriggerKind::CliCommand);
    }

    #[test]
    fn celery_task_keyed_by_function_name() {
        let out = probe(
            "app/tasks.py",
            "@shared_task\ndef send_receipt(order_id):\n    pass\n",
        );
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].kind, EdgeKind::MessageQueue);
        assert_eq!(out.candidates[0].key, "send_receipt");
        assert_eq!(out.entry_points[0].trigger, TriggerKind::MessageConsumer);
    }

    #[test_case("pages/api/orders/[id].ts", Some("/api/orders/[id]") ; "pages_dynamic")]
    #[test_case("src/pages/api/index.ts", Some("/api") ; "pages_index")]
    #[test_case("app/api/orders/route.ts", Some("/api/orders") ; "app_router")]
    #[test_case("app/(shop)/cart/route.js", Some("/cart") ; "route_group")]
    #[test_case("src/lib/orders.ts", None ; "plain_module")]
    fn file_routes(path: &str, expected: Option<&str>) {
        assert_eq!(file_route(path).as_deref(), expected);
    }
}
