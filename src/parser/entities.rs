// SPDX-License-Identifier: MIT OR Apache-2.0

//! Code entity extraction from tree-sitter syntax trees.
//!
//! The indexer is pure: it receives a path and the file bytes and returns the
//! module entity plus every import, class, function and method it can find.
//! Broken syntax never aborts extraction; whatever survives error recovery is
//! returned together with a non-fatal [`SearchError::ParseFailure`].

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tree_sitter::Node;

use crate::entity::{entity_id, CodeEntity, EntityKind};
use crate::errors::SearchError;
use crate::parser::languages::{detect_language_for_path, LANGUAGES};

const MAX_SIGNATURE_CHARS: usize = 200;

/// Node kinds that mean something to the extractor, per language.
struct LanguageRules {
    imports: &'static [&'static str],
    classes: &'static [&'static str],
    /// Class-like declarations only count when they have a body
    classes_need_body: bool,
    functions: &'static [&'static str],
    /// Named scopes that produce no entity of their own
    scopes: &'static [&'static str],
    comments: &'static [&'static str],
    /// Nodes whose leading comments document the declaration they wrap
    wrappers: &'static [&'static str],
    /// Siblings skipped when looking for leading comments
    attributes: &'static [&'static str],
}

static PYTHON: LanguageRules = LanguageRules {
    imports: &[
        "import_statement",
        "import_from_statement",
        "future_import_statement",
    ],
    classes: &["class_definition"],
    classes_need_body: false,
    functions: &["function_definition"],
    scopes: &[],
    comments: &["comment"],
    wrappers: &["decorated_definition"],
    attributes: &[],
};

static JAVASCRIPT: LanguageRules = LanguageRules {
    imports: &["import_statement"],
    classes: &[
        "class_declaration",
        "abstract_class_declaration",
        "interface_declaration",
    ],
    classes_need_body: false,
    functions: &[
        "function_declaration",
        "generator_function_declaration",
        "method_definition",
    ],
    scopes: &["internal_module"],
    comments: &["comment"],
    wrappers: &["export_statement"],
    attributes: &["decorator"],
};

static RUST: LanguageRules = LanguageRules {
    imports: &["use_declaration"],
    classes: &["struct_item", "enum_item", "trait_item", "union_item"],
    classes_need_body: false,
    functions: &["function_item", "function_signature_item"],
    scopes: &["impl_item", "mod_item"],
    comments: &["line_comment", "block_comment"],
    wrappers: &[],
    attributes: &["attribute_item"],
};

static GO: LanguageRules = LanguageRules {
    imports: &["import_declaration"],
    classes: &["type_spec"],
    classes_need_body: false,
    functions: &["function_declaration", "method_declaration"],
    scopes: &[],
    comments: &["comment"],
    wrappers: &["type_declaration"],
    attributes: &[],
};

static JAVA: LanguageRules = LanguageRules {
    imports: &["import_declaration"],
    classes: &[
        "class_declaration",
        "interface_declaration",
        "enum_declaration",
        "record_declaration",
    ],
    classes_need_body: false,
    functions: &["method_declaration", "constructor_declaration"],
    scopes: &[],
    comments: &["line_comment", "block_comment"],
    wrappers: &[],
    attributes: &[],
};

static C: LanguageRules = LanguageRules {
    imports: &["preproc_include"],
    classes: &["struct_specifier", "union_specifier"],
    classes_need_body: true,
    functions: &["function_definition"],
    scopes: &[],
    comments: &["comment"],
    wrappers: &[],
    attributes: &[],
};

static CPP: LanguageRules = LanguageRules {
    imports: &["preproc_include"],
    classes: &["class_specifier", "struct_specifier", "union_specifier"],
    classes_need_body: true,
    functions: &["function_definition"],
    scopes: &["namespace_definition"],
    comments: &["comment"],
    wrappers: &["template_declaration"],
    attributes: &[],
};

static RUBY: LanguageRules = LanguageRules {
    imports: &[],
    classes: &["class", "module"],
    classes_need_body: false,
    functions: &["method", "singleton_method"],
    scopes: &[],
    comments: &["comment"],
    wrappers: &[],
    attributes: &[],
};

fn rules_for(language: &str) -> Option<&'static LanguageRules> {
    match language {
        "python" => Some(&PYTHON),
        "javascript" | "typescript" | "tsx" => Some(&JAVASCRIPT),
        "rust" => Some(&RUST),
        "go" => Some(&GO),
        "java" => Some(&JAVA),
        "c" => Some(&C),
        "cpp" => Some(&CPP),
        "ruby" => Some(&RUBY),
        _ => None,
    }
}

/// Result of indexing one source unit.
#[derive(Debug)]
pub struct ParseOutcome {
    /// Entities in source order; the module entity comes first when present
    pub entities: Vec<CodeEntity>,
    /// Non-fatal problem encountered while parsing
    pub diagnostic: Option<SearchError>,
}

impl ParseOutcome {
    /// True when the file parsed without any diagnostic.
    pub fn is_complete(&self) -> bool {
        self.diagnostic.is_none()
    }

    fn failed(diagnostic: SearchError) -> Self {
        Self {
            entities: Vec::new(),
            diagnostic: Some(diagnostic),
        }
    }
}

/// Extracts code entities from source files.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceIndexer;

impl SourceIndexer {
    pub fn new() -> Self {
        Self
    }

    /// Index one file, detecting the language from its extension.
    pub fn index(&self, file_path: &str, content: &[u8]) -> ParseOutcome {
        match detect_language_for_path(file_path) {
            Some(language) => self.index_as(file_path, content, language),
            None => {
                let ext = Path::new(file_path)
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("")
                    .to_string();
                let source = String::from_utf8_lossy(content);
                ParseOutcome {
                    entities: vec![module_entity(file_path, "unknown", &source, None)],
                    diagnostic: Some(SearchError::UnsupportedLanguage(ext)),
                }
            }
        }
    }

    /// Index one file as the given language.
    pub fn index_as(&self, file_path: &str, content: &[u8], language: &str) -> ParseOutcome {
        let source = match std::str::from_utf8(content) {
            Ok(source) => source,
            Err(err) => {
                return ParseOutcome::failed(SearchError::ParseFailure {
                    path: file_path.to_string(),
                    line: None,
                    message: format!("content is not valid UTF-8: {}", err),
                })
            }
        };

        let (Some(rules), Some(mut parser)) = (rules_for(language), LANGUAGES.parser(language))
        else {
            return ParseOutcome {
                entities: vec![module_entity(file_path, language, source, None)],
                diagnostic: Some(SearchError::UnsupportedLanguage(language.to_string())),
            };
        };

        let Some(tree) = parser.parse(source, None) else {
            return ParseOutcome::failed(SearchError::ParseFailure {
                path: file_path.to_string(),
                line: None,
                message: "parser returned no tree".to_string(),
            });
        };

        let root = tree.root_node();
        let mut extraction = Extraction::new(file_path, language, rules, source.as_bytes());
        let docstring = extraction.module_docstring(root);
        extraction
            .entities
            .push(module_entity(file_path, language, source, docstring));
        extraction.references.push(BTreeSet::new());

        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            extraction.visit(child);
        }

        let diagnostic = if root.has_error() {
            let line = first_error_line(root);
            tracing::debug!(path = file_path, ?line, "partial parse");
            Some(SearchError::ParseFailure {
                path: file_path.to_string(),
                line,
                message: "syntax error; entities were extracted from the parsable regions"
                    .to_string(),
            })
        } else {
            None
        };

        ParseOutcome {
            entities: extraction.finish(),
            diagnostic,
        }
    }
}

fn module_entity(
    file_path: &str,
    language: &str,
    source: &str,
    docstring: Option<String>,
) -> CodeEntity {
    let name = Path::new(file_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_path)
        .to_string();
    let end_line = source.lines().count().saturating_sub(1);

    CodeEntity {
        id: entity_id(file_path, &[], EntityKind::Module, &name),
        kind: EntityKind::Module,
        name,
        file_path: file_path.to_string(),
        language: language.to_string(),
        scope: Vec::new(),
        start_line: 0,
        end_line,
        parent_id: None,
        dependencies: BTreeSet::new(),
        docstring,
        signature: None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Class,
    /// Impl block: methods inside belong to the implemented type
    Impl,
    Function,
    Namespace,
}

struct Frame {
    name: String,
    kind: FrameKind,
    /// Id used as `parent_id` for entities declared inside
    id: Option<String>,
}

struct ImportSpec {
    name: String,
    /// Names the import brings into scope
    bound: Vec<String>,
}

struct Extraction<'a> {
    path: &'a str,
    language: &'a str,
    rules: &'static LanguageRules,
    source: &'a [u8],
    frames: Vec<Frame>,
    entities: Vec<CodeEntity>,
    /// Identifiers referenced by each entity, parallel to `entities`
    references: Vec<BTreeSet<String>>,
    /// (entity index, bound names) for each import entity
    imports: Vec<(usize, Vec<String>)>,
    seen_ids: HashMap<String, usize>,
}

impl<'a> Extraction<'a> {
    fn new(
        path: &'a str,
        language: &'a str,
        rules: &'static LanguageRules,
        source: &'a [u8],
    ) -> Self {
        Self {
            path,
            language,
            rules,
            source,
            frames: Vec::new(),
            entities: Vec::new(),
            references: Vec::new(),
            imports: Vec::new(),
            seen_ids: HashMap::new(),
        }
    }

    fn text(&self, node: Node) -> &'a str {
        node.utf8_text(self.source).unwrap_or("")
    }

    fn scope(&self) -> Vec<String> {
        self.frames.iter().map(|f| f.name.clone()).collect()
    }

    fn visit(&mut self, node: Node) {
        let kind = node.kind();

        if self.rules.imports.contains(&kind) || self.is_ruby_require(node) {
            self.push_imports(node);
            return;
        }

        if self.rules.classes.contains(&kind) && self.has_required_body(node) {
            if let Some(name) = self.declared_name(node) {
                let name = last_segment(&name).to_string();
                self.enter_class(node, name);
                return;
            }
        }

        if self.rules.functions.contains(&kind) {
            if let Some(name) = self.declared_name(node) {
                self.enter_callable(node, &name);
                return;
            }
        }

        if self.rules.scopes.contains(&kind) {
            if let Some(name) = self.scope_name(node) {
                let frame_kind = if kind == "impl_item" {
                    FrameKind::Impl
                } else {
                    FrameKind::Namespace
                };
                let id = (frame_kind == FrameKind::Impl)
                    .then(|| entity_id(self.path, &self.scope(), EntityKind::Class, &name));
                self.frames.push(Frame {
                    name,
                    kind: frame_kind,
                    id,
                });
                self.visit_children(node);
                self.frames.pop();
                return;
            }
        }

        self.visit_children(node);
    }

    fn visit_children(&mut self, node: Node) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child);
        }
    }

    fn enter_class(&mut self, node: Node, name: String) {
        let parent_id = self.frames.last().and_then(|f| f.id.clone());
        let scope = self.scope();
        let id = self.push_entity(node, EntityKind::Class, name.clone(), scope, parent_id);
        self.frames.push(Frame {
            name,
            kind: FrameKind::Class,
            id: Some(id),
        });
        self.visit_children(node);
        self.frames.pop();
    }

    fn enter_callable(&mut self, node: Node, declared: &str) {
        let mut qualifiers: Vec<String> = declared
            .split("::")
            .map(|s| strip_generics(s).trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let Some(name) = qualifiers.pop() else {
            self.visit_children(node);
            return;
        };

        // Go methods name their type through the receiver
        if node.kind() == "method_declaration" && self.language == "go" {
            if let Some(receiver) = node
                .child_by_field_name("receiver")
                .and_then(|r| first_descendant_of_kind(r, "type_identifier"))
            {
                qualifiers = vec![self.text(receiver).to_string()];
            }
        }

        let mut scope = self.scope();
        let (kind, parent_id) = if let Some(owner) = qualifiers.last() {
            let owner_scope: Vec<String> = scope
                .iter()
                .cloned()
                .chain(qualifiers[..qualifiers.len() - 1].iter().cloned())
                .collect();
            let parent = entity_id(self.path, &owner_scope, EntityKind::Class, owner);
            scope.extend(qualifiers.iter().cloned());
            (EntityKind::Method, Some(parent))
        } else {
            match self.frames.last() {
                Some(frame) if matches!(frame.kind, FrameKind::Class | FrameKind::Impl) => {
                    (EntityKind::Method, frame.id.clone())
                }
                Some(frame) if frame.kind == FrameKind::Function => {
                    (EntityKind::Function, frame.id.clone())
                }
                _ => (EntityKind::Function, None),
            }
        };

        let pushed_scope = scope.len() - self.frames.len();
        let id = self.push_entity(node, kind, name.clone(), scope.clone(), parent_id);

        // Qualifier scopes become temporary frames so nested entities nest under them
        for qualifier in &scope[self.frames.len()..] {
            self.frames.push(Frame {
                name: qualifier.clone(),
                kind: FrameKind::Namespace,
                id: None,
            });
        }
        self.frames.push(Frame {
            name,
            kind: FrameKind::Function,
            id: Some(id),
        });
        self.visit_children(node);
        for _ in 0..=pushed_scope {
            self.frames.pop();
        }
    }

    fn push_entity(
        &mut self,
        node: Node,
        kind: EntityKind,
        name: String,
        scope: Vec<String>,
        parent_id: Option<String>,
    ) -> String {
        let id = self.unique_id(entity_id(self.path, &scope, kind, &name));
        let docstring = self.docstring(node);
        let signature = self.signature(node);

        let mut references = BTreeSet::new();
        collect_identifiers(node, self.source, &mut references);

        self.entities.push(CodeEntity {
            id: id.clone(),
            kind,
            name,
            file_path: self.path.to_string(),
            language: self.language.to_string(),
            scope,
            start_line: node.start_position().row,
            end_line: end_line(node),
            parent_id,
            dependencies: BTreeSet::new(),
            docstring,
            signature,
        });
        self.references.push(references);
        id
    }

    /// Appends `#2`, `#3`, ... to ids already used in this file.
    fn unique_id(&mut self, id: String) -> String {
        let count = self.seen_ids.entry(id.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            id
        } else {
            format!("{}#{}", id, count)
        }
    }

    fn push_imports(&mut self, node: Node) {
        let parent_id = self.frames.last().and_then(|f| f.id.clone());
        let signature = self.signature(node);
        for spec in self.import_specs(node) {
            let scope = self.scope();
            let id = self.unique_id(entity_id(self.path, &scope, EntityKind::Import, &spec.name));
            self.entities.push(CodeEntity {
                id,
                kind: EntityKind::Import,
                name: spec.name,
                file_path: self.path.to_string(),
                language: self.language.to_string(),
                scope,
                start_line: node.start_position().row,
                end_line: end_line(node),
                parent_id: parent_id.clone(),
                dependencies: BTreeSet::new(),
                docstring: None,
                signature: signature.clone(),
            });
            self.references.push(BTreeSet::new());
            self.imports.push((self.entities.len() - 1, spec.bound));
        }
    }

    fn import_specs(&self, node: Node) -> Vec<ImportSpec> {
        let specs = match (self.language, node.kind()) {
            ("python", "import_statement") => {
                let mut cursor = node.walk();
                node.children_by_field_name("name", &mut cursor)
                    .filter_map(|name| self.python_import_target(name))
                    .collect()
            }
            ("python", "import_from_statement" | "future_import_statement") => {
                let module = node
                    .child_by_field_name("module_name")
                    .map(|m| self.text(m).to_string())
                    .unwrap_or_else(|| "__future__".to_string());
                let mut cursor = node.walk();
                let bound = node
                    .children_by_field_name("name", &mut cursor)
                    .filter_map(|name| self.python_import_target(name))
                    .map(|spec| {
                        spec.bound
                            .into_iter()
                            .next()
                            .unwrap_or_else(|| last_dotted(&spec.name).to_string())
                    })
                    .collect();
                vec![ImportSpec {
                    name: module,
                    bound,
                }]
            }
            ("go", _) => {
                let mut specs = Vec::new();
                let mut stack = vec![node];
                while let Some(current) = stack.pop() {
                    if current.kind() == "import_spec" {
                        if let Some(path) = current.child_by_field_name("path") {
                            let name = unquote(self.text(path)).to_string();
                            let alias = current
                                .child_by_field_name("name")
                                .map(|n| self.text(n).to_string())
                                .filter(|n| n != "_" && n != ".");
                            let bound = alias.unwrap_or_else(|| last_path(&name).to_string());
                            specs.push(ImportSpec {
                                name,
                                bound: vec![bound],
                            });
                        }
                        continue;
                    }
                    let mut cursor = current.walk();
                    let children: Vec<Node> = current.named_children(&mut cursor).collect();
                    stack.extend(children.into_iter().rev());
                }
                specs
            }
            ("c" | "cpp", _) => node
                .child_by_field_name("path")
                .map(|path| ImportSpec {
                    name: self
                        .text(path)
                        .trim_matches(|c| c == '<' || c == '>' || c == '"')
                        .to_string(),
                    bound: Vec::new(),
                })
                .into_iter()
                .collect(),
            ("ruby", _) => node
                .child_by_field_name("arguments")
                .and_then(|args| first_descendant_of_kind(args, "string_content"))
                .map(|s| ImportSpec {
                    name: self.text(s).to_string(),
                    bound: Vec::new(),
                })
                .into_iter()
                .collect(),
            ("java", _) => {
                let mut cursor = node.walk();
                let target = node
                    .named_children(&mut cursor)
                    .find(|c| matches!(c.kind(), "scoped_identifier" | "identifier"));
                target
                    .map(|t| {
                        let name = self.text(t).to_string();
                        let bound = vec![last_dotted(&name).to_string()];
                        ImportSpec { name, bound }
                    })
                    .into_iter()
                    .collect()
            }
            ("rust", _) => {
                let name = node
                    .child_by_field_name("argument")
                    .map(|a| collapse_whitespace(self.text(a)))
                    .unwrap_or_default();
                let mut bound = BTreeSet::new();
                collect_identifiers(node, self.source, &mut bound);
                vec![ImportSpec {
                    name,
                    bound: bound.into_iter().collect(),
                }]
            }
            _ => {
                // JavaScript / TypeScript
                let name = node
                    .child_by_field_name("source")
                    .map(|s| unquote(self.text(s)).to_string())
                    .unwrap_or_default();
                let mut bound = BTreeSet::new();
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    if child.kind() == "import_clause" {
                        collect_identifiers(child, self.source, &mut bound);
                    }
                }
                vec![ImportSpec {
                    name,
                    bound: bound.into_iter().collect(),
                }]
            }
        };
        specs
            .into_iter()
            .filter(|spec| !spec.name.is_empty())
            .collect()
    }

    fn python_import_target(&self, node: Node) -> Option<ImportSpec> {
        match node.kind() {
            "dotted_name" => {
                let name = self.text(node).to_string();
                let bound = name.split('.').next().unwrap_or("").to_string();
                Some(ImportSpec {
                    name,
                    bound: vec![bound],
                })
            }
            "aliased_import" => {
                let name = self.text(node.child_by_field_name("name")?).to_string();
                let alias = self.text(node.child_by_field_name("alias")?).to_string();
                Some(ImportSpec {
                    name,
                    bound: vec![alias],
                })
            }
            _ => None,
        }
    }

    fn is_ruby_require(&self, node: Node) -> bool {
        if self.language != "ruby" || node.kind() != "call" || node.child_by_field_name("receiver").is_some() {
            return false;
        }
        node.child_by_field_name("method")
            .map(|m| matches!(self.text(m), "require" | "require_relative" | "load"))
            .unwrap_or(false)
    }

    fn has_required_body(&self, node: Node) -> bool {
        !self.rules.classes_need_body || node.child_by_field_name("body").is_some()
    }

    fn declared_name(&self, node: Node) -> Option<String> {
        let name = if node.kind() == "function_definition" && matches!(self.language, "c" | "cpp") {
            let mut declarator = node.child_by_field_name("declarator")?;
            while let Some(inner) = declarator.child_by_field_name("declarator") {
                declarator = inner;
            }
            self.text(declarator)
        } else {
            self.text(node.child_by_field_name("name")?)
        };

        let name = name.trim();
        (!name.is_empty()).then(|| name.to_string())
    }

    fn scope_name(&self, node: Node) -> Option<String> {
        let field = if node.kind() == "impl_item" { "type" } else { "name" };
        let text = self.text(node.child_by_field_name(field)?);
        let name = strip_generics(last_segment(text)).trim();
        (!name.is_empty()).then(|| name.to_string())
    }

    fn signature(&self, node: Node) -> Option<String> {
        let line = self.text(node).lines().next()?.trim();
        if line.is_empty() {
            return None;
        }
        Some(line.chars().take(MAX_SIGNATURE_CHARS).collect())
    }

    fn docstring(&self, node: Node) -> Option<String> {
        if self.language == "python" {
            return node
                .child_by_field_name("body")
                .and_then(|body| self.leading_string(body));
        }
        self.leading_comments(node)
    }

    fn module_docstring(&self, root: Node) -> Option<String> {
        if self.language == "python" {
            return self.leading_string(root);
        }

        let mut lines = Vec::new();
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            if !self.rules.comments.contains(&child.kind()) {
                break;
            }
            lines.push(self.text(child));
        }
        clean_comments(&lines)
    }

    /// First statement string literal of a Python block or module.
    fn leading_string(&self, block: Node) -> Option<String> {
        let mut cursor = block.walk();
        let first = block
            .named_children(&mut cursor)
            .find(|c| !self.rules.comments.contains(&c.kind()))?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let literal = first.named_child(0)?;
        if literal.kind() != "string" {
            return None;
        }
        clean_string_literal(self.text(literal))
    }

    /// Contiguous comment block directly above a declaration.
    fn leading_comments(&self, node: Node) -> Option<String> {
        let mut anchor = node;
        if let Some(parent) = node.parent() {
            if self.rules.wrappers.contains(&parent.kind())
                && parent.named_child(0).map(|c| c.id()) == Some(node.id())
            {
                anchor = parent;
            }
        }

        let mut comments = Vec::new();
        let mut next_start = anchor.start_position().row;
        let mut sibling = anchor.prev_named_sibling();
        while let Some(prev) = sibling {
            let kind = prev.kind();
            if self.rules.attributes.contains(&kind) {
                next_start = prev.start_position().row;
                sibling = prev.prev_named_sibling();
                continue;
            }
            if !self.rules.comments.contains(&kind) || end_line(prev) + 1 < next_start {
                break;
            }
            comments.push(self.text(prev));
            next_start = prev.start_position().row;
            sibling = prev.prev_named_sibling();
        }

        comments.reverse();
        clean_comments(&comments)
    }

    /// Resolves references into dependency ids and returns the entities.
    fn finish(mut self) -> Vec<CodeEntity> {
        let mut bound_to_import: HashMap<&str, &str> = HashMap::new();
        for (index, bound) in &self.imports {
            for name in bound {
                bound_to_import
                    .entry(name.as_str())
                    .or_insert(self.entities[*index].id.as_str());
            }
        }

        let mut top_level: HashMap<&str, &str> = HashMap::new();
        for entity in &self.entities {
            if entity.scope.is_empty()
                && matches!(entity.kind, EntityKind::Class | EntityKind::Function)
            {
                top_level
                    .entry(entity.name.as_str())
                    .or_insert(entity.id.as_str());
            }
        }

        let all_imports: BTreeSet<String> = self
            .imports
            .iter()
            .map(|(index, _)| self.entities[*index].id.clone())
            .collect();

        let resolved: Vec<BTreeSet<String>> = self
            .entities
            .iter()
            .zip(self.references.iter())
            .map(|(entity, references)| match entity.kind {
                EntityKind::Module => all_imports.clone(),
                EntityKind::Import => BTreeSet::new(),
                _ => references
                    .iter()
                    .filter_map(|name| {
                        bound_to_import
                            .get(name.as_str())
                            .or_else(|| top_level.get(name.as_str()))
                    })
                    .filter(|id| **id != entity.id)
                    .map(|id| id.to_string())
                    .collect(),
            })
            .collect();

        for (entity, dependencies) in self.entities.iter_mut().zip(resolved) {
            entity.dependencies = dependencies;
        }
        self.entities
    }
}

/// Zero-indexed inclusive end line: a node ending at column 0 ends on the previous line.
fn end_line(node: Node) -> usize {
    let end = node.end_position();
    if end.column == 0 && end.row > node.start_position().row {
        end.row - 1
    } else {
        end.row
    }
}

fn first_error_line(root: Node) -> Option<usize> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(node.start_position().row);
        }
        if !node.has_error() {
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    None
}

fn first_descendant_of_kind<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if current.kind() == kind {
            return Some(current);
        }
        let mut cursor = current.walk();
        let children: Vec<Node> = current.named_children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    None
}

fn collect_identifiers(node: Node, source: &[u8], out: &mut BTreeSet<String>) {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        match current.kind() {
            "identifier" | "type_identifier" | "constant" | "package_identifier" => {
                if let Ok(text) = current.utf8_text(source) {
                    out.insert(text.to_string());
                }
            }
            _ => {
                let mut cursor = current.walk();
                stack.extend(current.named_children(&mut cursor));
            }
        }
    }
}

fn clean_comments(comments: &[&str]) -> Option<String> {
    let lines: Vec<String> = comments
        .iter()
        .flat_map(|c| c.lines())
        .map(|line| {
            let line = line.trim();
            let line = ["///", "//!", "//", "/**", "/*!", "/*", "#"]
                .iter()
                .find_map(|prefix| line.strip_prefix(prefix))
                .unwrap_or(line);
            let line = line.strip_suffix("*/").unwrap_or(line).trim();
            line.strip_prefix('*').unwrap_or(line).trim().to_string()
        })
        .collect();
    join_trimmed(lines)
}

fn clean_string_literal(literal: &str) -> Option<String> {
    let literal = literal.trim().trim_start_matches(['r', 'R', 'b', 'B', 'u', 'U', 'f', 'F']);
    let body = ["\"\"\"", "'''", "\"", "'"]
        .iter()
        .find_map(|quote| {
            literal
                .strip_prefix(quote)
                .and_then(|rest| rest.strip_suffix(quote))
        })
        .unwrap_or(literal);
    join_trimmed(body.lines().map(|l| l.trim().to_string()).collect())
}

fn join_trimmed(mut lines: Vec<String>) -> Option<String> {
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    let start = lines.iter().position(|l| !l.is_empty())?;
    Some(lines[start..].join("\n"))
}

fn unquote(text: &str) -> &str {
    text.trim_matches(|c| c == '"' || c == '\'' || c == '`')
}

fn last_segment(text: &str) -> &str {
    text.rsplit("::").next().unwrap_or(text)
}

fn last_dotted(text: &str) -> &str {
    text.rsplit('.').next().unwrap_or(text)
}

fn last_path(text: &str) -> &str {
    text.rsplit('/').next().unwrap_or(text)
}

fn strip_generics(text: &str) -> &str {
    if is_operator_name(text.trim()) {
        return text;
    }
    text.split('<').next().unwrap_or(text)
}

/// `operator<`, `operator<<`, `operator bool` and friends, but not `operator_id`.
fn is_operator_name(text: &str) -> bool {
    text.strip_prefix("operator")
        .is_some_and(|rest| !rest.starts_with(|c: char| c.is_alphanumeric() || c == '_'))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYTHON_SOURCE: &str = r#"import os
from collections import OrderedDict


class Calculator:
    """Adds numbers."""

    def add(self, a, b):
        return a + b


def helper():
    return os.getcwd()
"#;

    fn find<'e>(entities: &'e [CodeEntity], name: &str) -> &'e CodeEntity {
        entities
            .iter()
            .find(|e| e.name == name)
            .unwrap_or_else(|| panic!("no entity named {}", name))
    }

    #[test]
    fn test_extract_python_entities() {
        let outcome = SourceIndexer::new().index("pkg/calc.py", PYTHON_SOURCE.as_bytes());
        assert!(outcome.is_complete());
        let entities = &outcome.entities;

        let imports: Vec<_> = entities
            .iter()
            .filter(|e| e.kind == EntityKind::Import)
            .collect();
        assert!(imports.len() >= 2);

        let classes: Vec<_> = entities
            .iter()
            .filter(|e| e.kind == EntityKind::Class)
            .collect();
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].name, "Calculator");
        assert_eq!(classes[0].start_line, 4);
        assert_eq!(classes[0].end_line, 8);
        assert_eq!(classes[0].docstring.as_deref(), Some("Adds numbers."));

        let callables: Vec<_> = entities.iter().filter(|e| e.kind.is_callable()).collect();
        assert_eq!(callables.len(), 2);

        let method = find(entities, "add");
        assert_eq!(method.kind, EntityKind::Method);
        assert_eq!(method.parent_id.as_deref(), Some(classes[0].id.as_str()));
        assert_eq!(method.id, "pkg/calc.py::Calculator::add");

        let helper = find(entities, "helper");
        assert_eq!(helper.kind, EntityKind::Function);
        assert!(helper.parent_id.is_none());
        assert_eq!(helper.signature.as_deref(), Some("def helper():"));
    }

    #[test]
    fn test_module_entity_comes_first() {
        let outcome = SourceIndexer::new().index("pkg/calc.py", PYTHON_SOURCE.as_bytes());
        let module = &outcome.entities[0];
        assert_eq!(module.kind, EntityKind::Module);
        assert_eq!(module.id, "pkg/calc.py");
        assert_eq!(module.name, "calc");
        assert_eq!(module.dependencies.len(), 2);
    }

    #[test]
    fn test_ids_are_stable_across_runs_and_line_shifts() {
        let indexer = SourceIndexer::new();
        let first = indexer.index("calc.py", PYTHON_SOURCE.as_bytes());
        let second = indexer.index("calc.py", PYTHON_SOURCE.as_bytes());
        let ids = |o: &ParseOutcome| o.entities.iter().map(|e| e.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));

        let shifted = format!("\n\n# header comment\n{}", PYTHON_SOURCE);
        let third = indexer.index("calc.py", shifted.as_bytes());
        assert_eq!(ids(&first), ids(&third));
        assert_eq!(find(&third.entities, "Calculator").start_line, 7);
    }

    #[test]
    fn test_empty_file_yields_only_module() {
        let outcome = SourceIndexer::new().index("empty.py", b"");
        assert!(outcome.is_complete());
        assert_eq!(outcome.entities.len(), 1);
        assert_eq!(outcome.entities[0].kind, EntityKind::Module);
        assert_eq!(outcome.entities[0].end_line, 0);
    }

    #[test]
    fn test_malformed_source_returns_partial_results() {
        let source = "def ok():\n    return 1\n\n\ndef broken(:\n    pass\n";
        let outcome = SourceIndexer::new().index("broken.py", source.as_bytes());

        let diagnostic = outcome.diagnostic.as_ref().expect("diagnostic");
        assert!(diagnostic.is_parse_failure());
        assert!(outcome.entities.iter().any(|e| e.name == "ok"));
    }

    #[test]
    fn test_invalid_utf8_yields_no_entities() {
        let outcome = SourceIndexer::new().index("bad.py", &[0x66, 0x6f, 0xff, 0xfe]);
        assert!(outcome.entities.is_empty());
        assert!(outcome.diagnostic.unwrap().is_parse_failure());
    }

    #[test]
    fn test_unsupported_language_keeps_module() {
        let outcome = SourceIndexer::new().index("notes.txt", b"hello");
        assert_eq!(outcome.entities.len(), 1);
        assert!(matches!(
            outcome.diagnostic,
            Some(SearchError::UnsupportedLanguage(_))
        ));
    }

    #[test]
    fn test_python_dependencies() {
        let outcome = SourceIndexer::new().index("calc.py", PYTHON_SOURCE.as_bytes());
        let helper = find(&outcome.entities, "helper");
        assert!(helper.dependencies.contains("calc.py::import:os"));
        assert!(!helper.dependencies.contains("calc.py::import:collections"));
    }

    #[test]
    fn test_python_aliased_and_nested_imports() {
        let source = "import numpy as np, sys\n\ndef run():\n    import json\n    return np.zeros(3)\n";
        let outcome = SourceIndexer::new().index("run.py", source.as_bytes());
        let ids: Vec<_> = outcome
            .entities
            .iter()
            .filter(|e| e.kind == EntityKind::Import)
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(
            ids,
            vec!["run.py::import:numpy", "run.py::import:sys", "run.py::run::import:json"]
        );

        let run = find(&outcome.entities, "run");
        assert!(run.dependencies.contains("run.py::import:numpy"));
        let nested = find(&outcome.entities, "json");
        assert_eq!(nested.parent_id.as_deref(), Some("run.py::run"));
    }

    #[test]
    fn test_extract_rust_impl_methods() {
        let source = r#"use std::collections::HashMap;

/// A key-value cache.
#[derive(Debug)]
pub struct Cache {
    items: HashMap<String, String>,
}

impl Cache {
    /// Looks up a key.
    pub fn get(&self, key: &str) -> Option<&String> {
        self.items.get(key)
    }
}

fn build() -> Cache {
    Cache { items: HashMap::new() }
}
"#;
        let outcome = SourceIndexer::new().index("src/cache.rs", source.as_bytes());
        assert!(outcome.is_complete());

        let cache = find(&outcome.entities, "Cache");
        assert_eq!(cache.kind, EntityKind::Class);
        assert_eq!(cache.docstring.as_deref(), Some("A key-value cache."));

        let get = find(&outcome.entities, "get");
        assert_eq!(get.kind, EntityKind::Method);
        assert_eq!(get.id, "src/cache.rs::Cache::get");
        assert_eq!(get.parent_id.as_deref(), Some(cache.id.as_str()));
        assert_eq!(get.docstring.as_deref(), Some("Looks up a key."));

        let build = find(&outcome.entities, "build");
        assert_eq!(build.kind, EntityKind::Function);
        assert!(build.dependencies.contains("src/cache.rs::Cache"));
        assert!(build
            .dependencies
            .contains("src/cache.rs::import:std::collections::HashMap"));
    }

    #[test]
    fn test_extract_go_receiver_methods() {
        let source = r#"package server

import (
	"fmt"
	"net/http"
)

// Server handles requests.
type Server struct {
	addr string
}

// Start runs the server.
func (s *Server) Start() error {
	fmt.Println("starting", s.addr)
	return http.ListenAndServe(s.addr, nil)
}
"#;
        let outcome = SourceIndexer::new().index("server.go", source.as_bytes());
        let imports: Vec<_> = outcome
            .entities
            .iter()
            .filter(|e| e.kind == EntityKind::Import)
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(imports, vec!["fmt", "net/http"]);

        let server = find(&outcome.entities, "Server");
        assert_eq!(server.docstring.as_deref(), Some("Server handles requests."));

        let start = find(&outcome.entities, "Start");
        assert_eq!(start.kind, EntityKind::Method);
        assert_eq!(start.id, "server.go::Server::Start");
        assert_eq!(start.parent_id.as_deref(), Some("server.go::Server"));
        assert!(start.dependencies.contains("server.go::import:fmt"));
        assert!(start.dependencies.contains("server.go::import:net/http"));
    }

    #[test]
    fn test_extract_javascript_class() {
        let source = r#"import { readFile } from "fs";
import path from "path";

export class Loader {
  load(name) {
    return readFile(path.join("data", name));
  }
}

function main() {
  return new Loader();
}
"#;
        let outcome = SourceIndexer::new().index("app.js", source.as_bytes());
        let load = find(&outcome.entities, "load");
        assert_eq!(load.kind, EntityKind::Method);
        assert_eq!(load.parent_id.as_deref(), Some("app.js::Loader"));
        assert!(load.dependencies.contains("app.js::import:fs"));
        assert!(load.dependencies.contains("app.js::import:path"));

        let main = find(&outcome.entities, "main");
        assert!(main.dependencies.contains("app.js::Loader"));
    }

    #[test]
    fn test_java_overloads_get_distinct_ids() {
        let source = r#"import java.util.List;

public class Shapes {
    public int area(int side) { return side * side; }
    public int area(int w, int h) { return w * h; }
}
"#;
        let outcome = SourceIndexer::new().index("Shapes.java", source.as_bytes());
        let ids: Vec<_> = outcome
            .entities
            .iter()
            .filter(|e| e.kind == EntityKind::Method)
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(ids, vec!["Shapes.java::Shapes::area", "Shapes.java::Shapes::area#2"]);
    }

    #[test]
    fn test_cpp_out_of_line_method() {
        let source = r#"#include <vector>

class Stack {
public:
    void push(int v);
};

void Stack::push(int v) {
    items.push_back(v);
}
"#;
        let outcome = SourceIndexer::new().index("stack.cpp", source.as_bytes());
        assert!(outcome
            .entities
            .iter()
            .any(|e| e.kind == EntityKind::Import && e.name == "vector"));

        let push = find(&outcome.entities, "push");
        assert_eq!(push.kind, EntityKind::Method);
        assert_eq!(push.id, "stack.cpp::Stack::push");
        assert_eq!(push.parent_id.as_deref(), Some("stack.cpp::Stack"));
    }

    #[test]
    fn test_cpp_operator_overloads_keep_distinct_ids() {
        let source = r#"struct Point {
    int x;
    bool operator<(const Point& o) const { return x < o.x; }
    bool operator==(const Point& o) const { return x == o.x; }
    Point operator<<(int shift) const;
};

Point Point::operator<<(int shift) const {
    return Point{x << shift};
}
"#;
        let outcome = SourceIndexer::new().index("ops.cpp", source.as_bytes());
        assert!(outcome.entities.iter().all(|e| !e.id.contains('#')));

        let less = find(&outcome.entities, "operator<");
        assert_eq!(less.id, "ops.cpp::Point::operator<");
        assert_eq!(less.kind, EntityKind::Method);
        assert_eq!(find(&outcome.entities, "operator==").id, "ops.cpp::Point::operator==");

        let shift = find(&outcome.entities, "operator<<");
        assert_eq!(shift.id, "ops.cpp::Point::operator<<");
        assert_eq!(shift.parent_id.as_deref(), Some("ops.cpp::Point"));

        assert!(is_operator_name("operator bool"));
        assert!(!is_operator_name("operator_table"));
        assert_eq!(strip_generics("Vec<T>"), "Vec");
    }

    #[test]
    fn test_clean_comments() {
        assert_eq!(
            clean_comments(&["/**\n * Renders a page.\n */"]).as_deref(),
            Some("Renders a page.")
        );
        assert_eq!(
            clean_comments(&["// first", "// second"]).as_deref(),
            Some("first\nsecond")
        );
        assert_eq!(clean_comments(&["//"]), None);
    }
}
