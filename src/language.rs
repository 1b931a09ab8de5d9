//! Compile-time language registry.
//!
//! Maps file extensions to language descriptors: a grammar handle, the AST
//! node kinds that produce chunks (semantic boundaries), the node kinds that
//! build the context prefix, and embedded-language rules for container
//! formats. Markdown is segmented by a built-in splitter instead of a
//! grammar; its fenced code blocks are re-parsed through this registry.

use tree_sitter::Language;

/// Supported languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageId {
    Rust,
    Go,
    Python,
    Java,
    TypeScript,
    Tsx,
    JavaScript,
    Markdown,
}

/// Embedded-language rule: a container node whose body is parsed as another
/// language, resolved from an attribute (the fence info string) or a default.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedRule {
    /// Kind of the container node.
    pub parent_kind: &'static str,
    /// Language used when the attribute is absent or unresolvable.
    pub default_language: Option<&'static str>,
}

/// Language descriptor.
#[derive(Debug, Clone, Copy)]
pub struct LanguageSpec {
    pub id: LanguageId,
    /// Canonical language name as stored on file rows.
    pub name: &'static str,
    /// Node kinds that produce chunks.
    pub boundary_kinds: &'static [&'static str],
    /// Node kinds prepended to chunks when context preservation is on.
    pub context_kinds: &'static [&'static str],
    /// Embedded-language rules.
    pub embedded: &'static [EmbeddedRule],
}

impl LanguageSpec {
    /// Tree-sitter grammar for this language, if one exists.
    ///
    /// JavaScript is close enough to TypeScript that the TS grammar parses
    /// it; Markdown has no grammar here and takes the section segmenter.
    pub fn grammar(&self) -> Option<Language> {
        match self.id {
            LanguageId::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            LanguageId::Go => Some(tree_sitter_go::LANGUAGE.into()),
            LanguageId::Python => Some(tree_sitter_python::LANGUAGE.into()),
            LanguageId::Java => Some(tree_sitter_java::LANGUAGE.into()),
            LanguageId::TypeScript | LanguageId::JavaScript => {
                Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())
            }
            LanguageId::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            LanguageId::Markdown => None,
        }
    }

    /// Whether a node kind is a semantic boundary for this language.
    pub fn is_boundary(&self, kind: &str) -> bool {
        self.boundary_kinds.contains(&kind)
    }

    /// Whether a node kind contributes to the context prefix.
    pub fn is_context(&self, kind: &str) -> bool {
        self.context_kinds.contains(&kind)
    }

    /// Embedded rule matching a container node kind, if any.
    pub fn embedded_rule(&self, kind: &str) -> Option<&'static EmbeddedRule> {
        self.embedded.iter().find(|r| r.parent_kind == kind)
    }
}

const RUST: LanguageSpec = LanguageSpec {
    id: LanguageId::Rust,
    name: "rust",
    boundary_kinds: &[
        "function_item",
        "struct_item",
        "enum_item",
        "union_item",
        "impl_item",
        "trait_item",
        "mod_item",
        "macro_definition",
    ],
    context_kinds: &["use_declaration", "extern_crate_declaration", "type_item"],
    embedded: &[],
};

const GO: LanguageSpec = LanguageSpec {
    id: LanguageId::Go,
    name: "go",
    boundary_kinds: &[
        "function_declaration",
        "method_declaration",
        "type_declaration",
        "const_declaration",
        "var_declaration",
    ],
    context_kinds: &["package_clause", "import_declaration"],
    embedded: &[],
};

const PYTHON: LanguageSpec = LanguageSpec {
    id: LanguageId::Python,
    name: "python",
    boundary_kinds: &[
        "function_definition",
        "class_definition",
        "decorated_definition",
    ],
    context_kinds: &[
        "import_statement",
        "import_from_statement",
        "future_import_statement",
    ],
    embedded: &[],
};

const JAVA: LanguageSpec = LanguageSpec {
    id: LanguageId::Java,
    name: "java",
    boundary_kinds: &[
        "class_declaration",
        "interface_declaration",
        "enum_declaration",
        "record_declaration",
        "annotation_type_declaration",
    ],
    context_kinds: &["package_declaration", "import_declaration"],
    embedded: &[],
};

const TS_BOUNDARIES: &[&str] = &[
    "function_declaration",
    "generator_function_declaration",
    "class_declaration",
    "abstract_class_declaration",
    "interface_declaration",
    "enum_declaration",
    "module",
    "internal_module",
    "lexical_declaration",
    "variable_declaration",
    "export_statement",
];

const TS_CONTEXT: &[&str] = &["import_statement", "type_alias_declaration"];

const TYPESCRIPT: LanguageSpec = LanguageSpec {
    id: LanguageId::TypeScript,
    name: "typescript",
    boundary_kinds: TS_BOUNDARIES,
    context_kinds: TS_CONTEXT,
    embedded: &[],
};

const TSX: LanguageSpec = LanguageSpec {
    id: LanguageId::Tsx,
    name: "tsx",
    boundary_kinds: TS_BOUNDARIES,
    context_kinds: TS_CONTEXT,
    embedded: &[],
};

const JAVASCRIPT: LanguageSpec = LanguageSpec {
    id: LanguageId::JavaScript,
    name: "javascript",
    boundary_kinds: TS_BOUNDARIES,
    context_kinds: TS_CONTEXT,
    embedded: &[],
};

const MARKDOWN: LanguageSpec = LanguageSpec {
    id: LanguageId::Markdown,
    name: "markdown",
    boundary_kinds: &["heading", "code_block", "section"],
    context_kinds: &[],
    embedded: &[EmbeddedRule {
        parent_kind: "code_block",
        default_language: None,
    }],
};

/// All registered languages.
const REGISTRY: &[&LanguageSpec] = &[
    &RUST, &GO, &PYTHON, &JAVA, &TYPESCRIPT, &TSX, &JAVASCRIPT, &MARKDOWN,
];

/// Detect the language of a file by its extension (case-insensitive).
///
/// Returns `None` for unknown extensions; the chunker then falls back to
/// character windows.
pub fn detect(path: &std::path::Path) -> Option<&'static LanguageSpec> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    by_extension(&ext)
}

fn by_extension(ext: &str) -> Option<&'static LanguageSpec> {
    match ext.trim_start_matches('.') {
        "rs" => Some(&RUST),
        "go" => Some(&GO),
        "py" | "pyi" => Some(&PYTHON),
        "java" => Some(&JAVA),
        "ts" | "mts" | "cts" => Some(&TYPESCRIPT),
        "tsx" => Some(&TSX),
        "js" | "jsx" | "mjs" | "cjs" => Some(&JAVASCRIPT),
        "md" | "markdown" => Some(&MARKDOWN),
        _ => None,
    }
}

/// Resolve a language by name or extension alias.
///
/// Used for embedded code blocks where the fence info string may be a
/// language name ("typescript") or an extension ("ts").
pub fn resolve(name: &str) -> Option<&'static LanguageSpec> {
    let lower = name.trim().to_lowercase();
    REGISTRY
        .iter()
        .find(|spec| spec.name == lower)
        .copied()
        .or_else(|| by_extension(&lower))
}

/// Names of all supported languages.
pub fn supported_languages() -> Vec<&'static str> {
    REGISTRY.iter().map(|spec| spec.name).collect()
}

/// Normalize a grammar node kind to the compact chunk type stored and
/// returned to callers.
pub fn normalize_kind(kind: &str) -> &str {
    match kind {
        "function_item"
        | "function_declaration"
        | "function_definition"
        | "generator_function_declaration"
        | "method_declaration"
        | "method_definition"
        | "decorated_definition" => "function",
        "struct_item" => "struct",
        "class_declaration" | "class_definition" | "abstract_class_declaration"
        | "record_declaration" => "class",
        "enum_item" | "enum_declaration" => "enum",
        "union_item" => "union",
        "impl_item" => "impl",
        "trait_item" => "trait",
        "interface_declaration" | "annotation_type_declaration" => "interface",
        "mod_item" | "module" | "internal_module" => "module",
        "type_declaration" | "type_item" | "type_alias_declaration" => "type",
        "macro_definition" => "macro",
        "const_declaration" | "var_declaration" | "lexical_declaration"
        | "variable_declaration" => "variable",
        other => other,
    }
}
