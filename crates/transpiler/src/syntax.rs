//! Lightweight structural parse of a GLSL translation unit.
//!
//! The token stream is split into top-level items: runs of trivia,
//! preprocessor directives, function definitions or prototypes, interface
//! blocks, and every other declaration. Each item is tagged with the stage
//! section it appears in and the preprocessor branch that guards it, which
//! is all the rewrite passes need to tell global declarations apart from
//! parameter lists and function bodies.
use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::lexer::{self, matching_close, next_significant, prev_significant, Token, TokenKind};

/// Which stage(s) an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Shared,
    Vertex,
    Fragment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Vertex,
    Fragment,
}

impl Stage {
    pub const ALL: [Stage; 2] = [Stage::Vertex, Stage::Fragment];

    pub fn section(self) -> Section {
        match self {
            Stage::Vertex => Section::Vertex,
            Stage::Fragment => Section::Fragment,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "vertex" => Some(Stage::Vertex),
            "fragment" => Some(Stage::Fragment),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Vertex => f.write_str("vertex"),
            Stage::Fragment => f.write_str("fragment"),
        }
    }
}

impl Section {
    pub fn reaches(self, stage: Stage) -> bool {
        self == Section::Shared || self == stage.section()
    }

    /// True when items of both sections end up in at least one common stage.
    pub fn overlaps(self, other: Section) -> bool {
        self == Section::Shared || other == Section::Shared || self == other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Trivia,
    Directive,
    Function,
    Block,
    Declaration,
}

#[derive(Debug, Clone)]
pub struct Item {
    pub kind: ItemKind,
    pub section: Section,
    /// Preprocessor branch path; include guards do not contribute.
    pub branch: Vec<u32>,
    pub tokens: Vec<Token>,
}

/// Function name plus ordered parameter types; qualifiers are not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Signature {
    pub name: String,
    pub params: Vec<String>,
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.params.join(", "))
    }
}

/// Token positions of a function item's parts.
#[derive(Debug, Clone)]
pub struct FunctionShape {
    pub signature: Signature,
    pub return_type: String,
    pub name: usize,
    pub params_open: usize,
    pub params_close: usize,
    /// Opening and closing brace of the body; `None` for prototypes.
    pub body: Option<(usize, usize)>,
}

/// A parsed global declaration such as `uniform highp vec4 a, b[2];`.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub qualifiers: Vec<String>,
    pub ty: String,
    pub names: Vec<Declarator>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub name: String,
    pub array: Option<String>,
    pub has_initializer: bool,
}

pub const QUALIFIERS: [&str; 17] = [
    "const",
    "uniform",
    "in",
    "out",
    "inout",
    "attribute",
    "varying",
    "highp",
    "mediump",
    "lowp",
    "flat",
    "smooth",
    "noperspective",
    "centroid",
    "invariant",
    "precise",
    "buffer",
];

const FLOAT_TYPES: [&str; 13] = [
    "float", "vec2", "vec3", "vec4", "mat2", "mat3", "mat4", "mat2x2", "mat3x3", "mat4x4",
    "double", "dvec2", "dvec3",
];

const INT_TYPES: [&str; 12] = [
    "int", "ivec2", "ivec3", "ivec4", "uint", "uvec2", "uvec3", "uvec4", "bool", "bvec2",
    "bvec3", "bvec4",
];

pub fn is_float_type(name: &str) -> bool {
    FLOAT_TYPES.contains(&name) || name.starts_with("mat")
}

pub fn is_int_type(name: &str) -> bool {
    INT_TYPES.contains(&name)
}

pub fn is_builtin_type(name: &str) -> bool {
    is_float_type(name)
        || is_int_type(name)
        || name == "void"
        || name.starts_with("sampler")
        || name.starts_with("isampler")
        || name.starts_with("usampler")
}

impl Item {
    pub fn new(kind: ItemKind, section: Section, tokens: Vec<Token>) -> Self {
        Self {
            kind,
            section,
            branch: Vec::new(),
            tokens,
        }
    }

    /// Builds a declaration item from source text.
    pub fn declaration(section: Section, text: &str) -> Self {
        Self::new(ItemKind::Declaration, section, lexer::tokenize(text))
    }

    pub fn text(&self) -> String {
        lexer::render(&self.tokens)
    }

    /// `(name, rest)` of a directive item, such as `("pragma", "stage vertex")`.
    pub fn directive(&self) -> Option<(String, String)> {
        if self.kind != ItemKind::Directive {
            return None;
        }
        split_directive(&self.tokens.first()?.text)
    }

    /// Structure of a function definition or prototype.
    pub fn function(&self) -> Option<FunctionShape> {
        if self.kind != ItemKind::Function {
            return None;
        }
        function_shape(&self.tokens)
    }

    /// Parsed form of a plain (brace-free) declaration.
    pub fn parse_declaration(&self) -> Option<Declaration> {
        if self.kind != ItemKind::Declaration {
            return None;
        }
        parse_declaration(&self.tokens)
    }

    /// Names introduced at global scope by this item.
    pub fn declared_names(&self) -> Vec<String> {
        match self.kind {
            ItemKind::Declaration => {
                if let Some(decl) = self.parse_declaration() {
                    return decl.names.into_iter().map(|d| d.name).collect();
                }
                struct_name(&self.tokens).into_iter().collect()
            }
            ItemKind::Function => self
                .function()
                .map(|shape| vec![shape.signature.name])
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    pub fn is_uniform(&self) -> bool {
        self.tokens.iter().any(|token| token.is_ident("uniform"))
    }
}

/// Splits `#name rest` into its parts, joining continuation lines.
pub fn split_directive(text: &str) -> Option<(String, String)> {
    let body = text.trim_start().strip_prefix('#')?.trim_start();
    let end = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(body.len());
    let name = body[..end].to_string();
    let rest = body[end..].replace("\\\n", " ").replace("\\\r\n", " ");
    Some((name, rest.trim().to_string()))
}

/// Interprets the body of a `#pragma` directive as a stage marker.
///
/// `None` when the pragma is not about stages at all; `Err` carries the
/// unrecognised argument text.
pub fn stage_pragma(rest: &str) -> Option<Result<Stage, String>> {
    let mut words = rest.split_whitespace();
    if words.next()? != "stage" {
        return None;
    }
    let argument: Vec<&str> = words.collect();
    match argument.as_slice() {
        [name] => Some(Stage::parse(name).ok_or_else(|| name.to_string())),
        other => Some(Err(other.join(" "))),
    }
}

/// Name of a `struct Name { … };` declaration.
pub fn struct_name(tokens: &[Token]) -> Option<String> {
    let keyword = tokens.iter().position(|token| token.is_ident("struct"))?;
    let name = next_significant(tokens, keyword + 1)?;
    (tokens[name].kind == TokenKind::Ident).then(|| tokens[name].text.clone())
}

fn function_shape(tokens: &[Token]) -> Option<FunctionShape> {
    let mut depth = 0i32;
    let mut params_open = None;
    for (index, token) in tokens.iter().enumerate() {
        if token.kind != TokenKind::Punct {
            continue;
        }
        match token.text.as_str() {
            "=" if depth == 0 => return None,
            "(" if depth == 0 => {
                params_open = Some(index);
                break;
            }
            "(" | "[" | "{" => depth += 1,
            ")" | "]" | "}" => depth -= 1,
            _ => {}
        }
    }
    let params_open = params_open?;
    let name = prev_significant(tokens, params_open)?;
    if tokens[name].kind != TokenKind::Ident {
        return None;
    }
    let ret = prev_significant(tokens, name)?;
    if tokens[ret].kind != TokenKind::Ident || tokens[name].text == "layout" {
        return None;
    }
    let params_close = matching_close(tokens, params_open)?;
    let after = next_significant(tokens, params_close + 1)?;
    let body = if tokens[after].is_punct("{") {
        Some((after, matching_close(tokens, after)?))
    } else if tokens[after].is_punct(";") {
        None
    } else {
        return None;
    };

    Some(FunctionShape {
        signature: Signature {
            name: tokens[name].text.clone(),
            params: param_types(tokens, params_open, params_close),
        },
        return_type: tokens[ret].text.clone(),
        name,
        params_open,
        params_close,
        body,
    })
}

fn param_types(tokens: &[Token], open: usize, close: usize) -> Vec<String> {
    let mut types = Vec::new();
    for range in lexer::split_args(tokens, open, close) {
        let significant: Vec<&Token> = tokens[range]
            .iter()
            .filter(|token| !token.is_trivia() && token.kind != TokenKind::Directive)
            .collect();
        let mut iter = significant
            .iter()
            .skip_while(|token| QUALIFIERS.contains(&token.text.as_str()));
        let Some(ty) = iter.next() else {
            continue;
        };
        if ty.text == "void" && significant.len() == 1 {
            continue;
        }
        let mut key = ty.text.clone();
        let mut in_array = false;
        for token in iter {
            if token.is_punct("[") {
                in_array = true;
            }
            if in_array {
                key.push_str(&token.text);
            }
            if token.is_punct("]") {
                in_array = false;
            }
        }
        types.push(key);
    }
    types
}

/// Parses a brace-free declaration statement.
pub fn parse_declaration(tokens: &[Token]) -> Option<Declaration> {
    let significant: Vec<&Token> = tokens
        .iter()
        .filter(|token| !token.is_trivia() && token.kind != TokenKind::Directive)
        .collect();
    if significant.iter().any(|token| token.is_punct("{")) {
        return None;
    }
    let first = significant.first()?;
    if first.is_ident("precision") || first.is_ident("struct") {
        return None;
    }

    let mut index = 0;
    let mut qualifiers = Vec::new();
    while index < significant.len() {
        let token = significant[index];
        if token.is_ident("layout") {
            // Skip `layout(...)`.
            let mut depth = 0;
            index += 1;
            while index < significant.len() {
                if significant[index].is_punct("(") {
                    depth += 1;
                } else if significant[index].is_punct(")") {
                    depth -= 1;
                    if depth == 0 {
                        index += 1;
                        break;
                    }
                }
                index += 1;
            }
            continue;
        }
        if token.kind == TokenKind::Ident && QUALIFIERS.contains(&token.text.as_str()) {
            qualifiers.push(token.text.clone());
            index += 1;
            continue;
        }
        break;
    }

    let ty = significant.get(index)?;
    if ty.kind != TokenKind::Ident {
        return None;
    }
    index += 1;

    let mut names = Vec::new();
    let mut depth = 0;
    let mut current: Option<Declarator> = None;
    let mut collecting_array = false;
    while index < significant.len() {
        let token = significant[index];
        index += 1;
        if token.kind == TokenKind::Punct {
            match token.text.as_str() {
                "(" | "{" => depth += 1,
                ")" | "}" => depth -= 1,
                "[" if depth == 0 && current.as_ref().is_some_and(|d| !d.has_initializer) => {
                    collecting_array = true;
                    if let Some(decl) = current.as_mut() {
                        decl.array.get_or_insert_with(String::new);
                    }
                    continue;
                }
                "]" if collecting_array => {
                    collecting_array = false;
                    continue;
                }
                "=" if depth == 0 => {
                    if let Some(decl) = current.as_mut() {
                        decl.has_initializer = true;
                    }
                    continue;
                }
                "," | ";" if depth == 0 => {
                    if let Some(decl) = current.take() {
                        names.push(decl);
                    }
                    continue;
                }
                _ => {}
            }
        }
        if collecting_array {
            if let Some(array) = current.as_mut().and_then(|decl| decl.array.as_mut()) {
                array.push_str(&token.text);
            }
            continue;
        }
        if depth == 0
            && token.kind == TokenKind::Ident
            && current.is_none()
        {
            current = Some(Declarator {
                name: token.text.clone(),
                array: None,
                has_initializer: false,
            });
        }
    }
    if let Some(decl) = current.take() {
        names.push(decl);
    }
    if names.is_empty() {
        return None;
    }
    Some(Declaration {
        qualifiers,
        ty: ty.text.clone(),
        names,
    })
}

/// A whole translation unit as an ordered list of items.
#[derive(Debug, Clone, Default)]
pub struct SourceTree {
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Copy)]
enum Frame {
    Guard,
    Branch(u32),
}

struct BranchTracker {
    frames: Vec<Frame>,
    next_id: u32,
    pending_guard: Option<String>,
}

impl BranchTracker {
    fn new() -> Self {
        Self {
            frames: Vec::new(),
            next_id: 0,
            pending_guard: None,
        }
    }

    fn fresh(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn path(&self) -> Vec<u32> {
        self.frames
            .iter()
            .filter_map(|frame| match frame {
                Frame::Guard => None,
                Frame::Branch(id) => Some(*id),
            })
            .collect()
    }

    /// Updates the branch stack for a directive.
    fn observe(&mut self, name: &str, rest: &str) {
        let guard = self.pending_guard.take();
        match name {
            "ifndef" => {
                // Provisionally a branch; becomes a guard if `#define` of the
                // same macro follows immediately.
                let id = self.fresh();
                self.frames.push(Frame::Branch(id));
                self.pending_guard = Some(rest.to_string());
            }
            "if" | "ifdef" => {
                let id = self.fresh();
                self.frames.push(Frame::Branch(id));
            }
            "elif" | "else" => {
                let id = self.fresh();
                if let Some(top) = self.frames.last_mut() {
                    *top = Frame::Branch(id);
                }
            }
            "endif" => {
                self.frames.pop();
            }
            "define" => {
                let defined = rest.split_whitespace().next().unwrap_or_default();
                if guard.as_deref() == Some(defined) {
                    if let Some(top) = self.frames.last_mut() {
                        *top = Frame::Guard;
                    }
                }
            }
            _ => {}
        }
    }
}

impl SourceTree {
    pub fn parse(source: &str) -> Self {
        Self::from_tokens(lexer::tokenize(source))
    }

    pub fn from_tokens(tokens: Vec<Token>) -> Self {
        let mut items = Vec::new();
        let mut section = Section::Shared;
        let mut branches = BranchTracker::new();
        let mut index = 0;

        while index < tokens.len() {
            let token = &tokens[index];
            if token.is_trivia() {
                let end = (index..tokens.len())
                    .find(|&i| !tokens[i].is_trivia())
                    .unwrap_or(tokens.len());
                let mut item = Item::new(ItemKind::Trivia, section, tokens[index..end].to_vec());
                item.branch = branches.path();
                items.push(item);
                index = end;
                continue;
            }
            if token.kind == TokenKind::Directive {
                let parsed = split_directive(&token.text);
                if let Some((name, rest)) = &parsed {
                    if name == "pragma" {
                        if let Some(Ok(stage)) = stage_pragma(rest) {
                            section = stage.section();
                        }
                    }
                }
                let mut item = Item::new(ItemKind::Directive, section, vec![token.clone()]);
                // Directives that close or switch a branch belong to the outer path.
                if let Some((name, rest)) = &parsed {
                    if matches!(name.as_str(), "if" | "ifdef" | "ifndef") {
                        item.branch = branches.path();
                        branches.observe(name, rest);
                    } else {
                        branches.observe(name, rest);
                        item.branch = branches.path();
                    }
                }
                items.push(item);
                index += 1;
                continue;
            }

            branches.pending_guard = None;
            let end = statement_end(&tokens, index);
            let slice = tokens[index..end].to_vec();
            let kind = classify(&slice);
            let mut item = Item::new(kind, section, slice);
            item.branch = branches.path();
            items.push(item);
            index = end;
        }

        Self { items }
    }

    pub fn render(&self) -> String {
        self.items.iter().map(Item::text).collect()
    }

    pub fn functions(&self) -> impl Iterator<Item = (usize, FunctionShape)> + '_ {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| item.function().map(|shape| (index, shape)))
    }

    /// Types of every global declaration, keyed by name.
    pub fn global_types(&self) -> BTreeMap<String, String> {
        let mut types = BTreeMap::new();
        for item in &self.items {
            if let Some(decl) = item.parse_declaration() {
                for name in decl.names {
                    types.entry(name.name).or_insert_with(|| decl.ty.clone());
                }
            }
        }
        types
    }
}

/// Exclusive end of the statement starting at `start`.
fn statement_end(tokens: &[Token], start: usize) -> usize {
    let mut depth = 0i32;
    let mut last_significant: Option<usize> = None;
    let mut index = start;
    while index < tokens.len() {
        let token = &tokens[index];
        if token.kind == TokenKind::Punct {
            match token.text.as_str() {
                ";" if depth == 0 => return index + 1,
                "{" if depth == 0 => {
                    let is_function = last_significant.is_some_and(|i| tokens[i].is_punct(")"));
                    if is_function {
                        return matching_close(tokens, index).map_or(tokens.len(), |c| c + 1);
                    }
                    depth += 1;
                }
                "(" | "[" | "{" => depth += 1,
                ")" | "]" | "}" => {
                    if depth == 0 {
                        return index + 1;
                    }
                    depth -= 1;
                }
                _ => {}
            }
        }
        if !token.is_trivia() && token.kind != TokenKind::Directive {
            last_significant = Some(index);
        }
        index += 1;
    }
    tokens.len()
}

fn classify(tokens: &[Token]) -> ItemKind {
    if function_shape(tokens).is_some() {
        return ItemKind::Function;
    }
    let has_brace = tokens.iter().any(|token| token.is_punct("{"));
    if has_brace && !tokens.iter().any(|token| token.is_ident("struct")) {
        return ItemKind::Block;
    }
    ItemKind::Declaration
}
