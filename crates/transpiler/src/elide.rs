//! Redundant self-initializer elision.
//!
//! Matches exactly `T X = block.X;` or `T X = block.X <op> k;`, where the
//! member on the right is the same name being declared and `block` is a
//! parameter-block instance. Once the block is flattened `X` is a uniform,
//! so the statement would redeclare it. Other initializers, such as
//! `T Y = block.X * 2;`, are never touched.
//!
//! When the operation is not an identity, later uses of `X` in the same
//! scope are rewritten to `(X <op> k)` so the value stays the same. If the
//! scope also writes to `X` the statement is left alone.
use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::flatten::{instance_members, parameter_blocks};
use crate::lexer::{matching_close, next_significant, prev_significant, Token, TokenKind};
use crate::syntax::{is_builtin_type, ItemKind, SourceTree};

const PRECISION: [&str; 4] = ["const", "highp", "mediump", "lowp"];
const ARITHMETIC: [&str; 4] = ["*", "/", "+", "-"];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ElideReport {
    pub elided: Vec<String>,
    /// Matches left in place because the scope writes to the name.
    pub kept: Vec<String>,
}

/// A matched self-initializer spanning `start..=end` (`end` is the `;`).
#[derive(Debug, Clone)]
struct SelfInit {
    start: usize,
    end: usize,
    name: String,
    /// `op k` tokens for non-identity initializers.
    op: Option<Vec<Token>>,
}

pub fn run(tree: &mut SourceTree) -> ElideReport {
    let blocks = parameter_blocks(tree);
    let instances = instance_members(&blocks);
    let mut report = ElideReport::default();
    if instances.is_empty() {
        return report;
    }

    elide_globals(tree, &instances, &mut report);

    for item in &mut tree.items {
        if item.kind != ItemKind::Function {
            continue;
        }
        let mut cursor = 0;
        loop {
            let Some((_, body_close)) = item.function().and_then(|shape| shape.body) else {
                break;
            };
            let Some(found) = find_in_body(&item.tokens, cursor, body_close, &instances) else {
                break;
            };
            let Some(scope_close) = enclosing_close(&item.tokens, found.start) else {
                break;
            };
            let range = found.end + 1..scope_close;
            if found.op.is_some() && writes_in(&item.tokens[range.clone()], &found.name) {
                trace!(name = %found.name, "self-initializer kept; scope writes to it");
                report.kept.push(found.name.clone());
                cursor = found.end + 1;
                continue;
            }
            let mut tokens = item.tokens[..found.start].to_vec();
            let mut tail = item.tokens[range].to_vec();
            if let Some(op) = &found.op {
                substitute(&mut tail, &found.name, op);
            }
            tokens.extend(tail);
            tokens.extend_from_slice(&item.tokens[scope_close..]);
            item.tokens = tokens;
            report.elided.push(found.name);
            cursor = found.start;
        }
    }

    if !report.elided.is_empty() {
        debug!(elided = ?report.elided, "elided self-initializers");
    }
    report
}

fn elide_globals(
    tree: &mut SourceTree,
    instances: &HashMap<String, HashSet<String>>,
    report: &mut ElideReport,
) {
    let mut index = 0;
    while index < tree.items.len() {
        let item = &tree.items[index];
        if item.kind != ItemKind::Declaration {
            index += 1;
            continue;
        }
        let Some(found) = match_at(&item.tokens, 0, instances) else {
            index += 1;
            continue;
        };
        if next_significant(&item.tokens, found.end + 1).is_some() {
            index += 1;
            continue;
        }
        let later_writes = tree.items[index + 1..]
            .iter()
            .any(|item| writes_in(&item.tokens, &found.name));
        if found.op.is_some() && later_writes {
            report.kept.push(found.name);
            index += 1;
            continue;
        }
        tree.items.remove(index);
        if let Some(op) = &found.op {
            for later in &mut tree.items[index..] {
                if matches!(later.kind, ItemKind::Function | ItemKind::Declaration) {
                    substitute(&mut later.tokens, &found.name, op);
                }
            }
        }
        report.elided.push(found.name);
    }
}

/// First match at a statement start within `(cursor, body_close)`.
fn find_in_body(
    tokens: &[Token],
    cursor: usize,
    body_close: usize,
    instances: &HashMap<String, HashSet<String>>,
) -> Option<SelfInit> {
    let mut at_statement_start = cursor == 0
        || prev_significant(tokens, cursor).is_some_and(|p| {
            tokens[p].is_punct("{") || tokens[p].is_punct("}") || tokens[p].is_punct(";")
        });
    for index in cursor..body_close {
        let token = &tokens[index];
        if token.is_trivia() {
            continue;
        }
        if at_statement_start {
            if let Some(found) = match_at(tokens, index, instances) {
                return Some(found);
            }
        }
        at_statement_start = token.is_punct("{") || token.is_punct("}") || token.is_punct(";");
    }
    None
}

fn match_at(
    tokens: &[Token],
    start: usize,
    instances: &HashMap<String, HashSet<String>>,
) -> Option<SelfInit> {
    let mut index = next_significant(tokens, start)?;
    let first = index;
    while PRECISION.contains(&tokens[index].text.as_str()) && tokens[index].kind == TokenKind::Ident {
        index = next_significant(tokens, index + 1)?;
    }
    if !(tokens[index].kind == TokenKind::Ident && is_builtin_type(&tokens[index].text)) {
        return None;
    }
    let name_at = next_significant(tokens, index + 1)?;
    let name = &tokens[name_at];
    if name.kind != TokenKind::Ident {
        return None;
    }
    let eq = next_significant(tokens, name_at + 1)?;
    if !tokens[eq].is_punct("=") {
        return None;
    }
    let instance = next_significant(tokens, eq + 1)?;
    let members = instances.get(&tokens[instance].text)?;
    if tokens[instance].kind != TokenKind::Ident {
        return None;
    }
    let dot = next_significant(tokens, instance + 1)?;
    if !tokens[dot].is_punct(".") {
        return None;
    }
    let member = next_significant(tokens, dot + 1)?;
    if tokens[member].text != name.text || !members.contains(&name.text) {
        return None;
    }
    let after = next_significant(tokens, member + 1)?;
    if tokens[after].is_punct(";") {
        return Some(SelfInit {
            start: first,
            end: after,
            name: name.text.clone(),
            op: None,
        });
    }
    if !(tokens[after].kind == TokenKind::Punct && ARITHMETIC.contains(&tokens[after].text.as_str())) {
        return None;
    }
    let operand = next_significant(tokens, after + 1)?;
    let operand_end = match tokens[operand].kind {
        TokenKind::Number | TokenKind::Ident => operand,
        TokenKind::Punct if tokens[operand].is_punct("(") => matching_close(tokens, operand)?,
        _ => return None,
    };
    if tokens[operand..=operand_end]
        .iter()
        .any(|token| token.is_ident(&name.text))
    {
        return None;
    }
    let semi = next_significant(tokens, operand_end + 1)?;
    if !tokens[semi].is_punct(";") {
        return None;
    }
    let mut op = vec![tokens[after].clone()];
    op.push(Token::space(" "));
    op.extend(
        tokens[operand..=operand_end]
            .iter()
            .filter(|token| !token.is_trivia())
            .cloned(),
    );
    Some(SelfInit {
        start: first,
        end: semi,
        name: name.text.clone(),
        op: Some(op),
    })
}

/// Closing brace of the innermost block containing `index`.
fn enclosing_close(tokens: &[Token], index: usize) -> Option<usize> {
    let mut depth = 0i32;
    for position in (0..index).rev() {
        let token = &tokens[position];
        if token.is_punct("}") {
            depth += 1;
        } else if token.is_punct("{") {
            if depth == 0 {
                return matching_close(tokens, position);
            }
            depth -= 1;
        }
    }
    None
}

fn writes_in(tokens: &[Token], name: &str) -> bool {
    (0..tokens.len()).any(|index| {
        if !tokens[index].is_ident(name) {
            return false;
        }
        let prev = prev_significant(tokens, index).map(|p| &tokens[p]);
        if prev.is_some_and(|p| p.is_punct(".")) {
            return false;
        }
        next_significant(tokens, index + 1).is_some_and(|n| tokens[n].is_assignment())
            || prev.is_some_and(|p| p.is_punct("++") || p.is_punct("--"))
    })
}

/// Replaces free uses of `name` with `(name op k)`.
fn substitute(tokens: &mut Vec<Token>, name: &str, op: &[Token]) {
    let mut out = Vec::with_capacity(tokens.len());
    for (index, token) in tokens.iter().enumerate() {
        let is_use = token.is_ident(name)
            && !prev_significant(tokens, index).is_some_and(|p| {
                tokens[p].is_punct(".")
                    || (tokens[p].kind == TokenKind::Ident && is_builtin_type(&tokens[p].text))
            });
        if is_use {
            out.push(Token::punct("("));
            out.push(token.clone());
            out.push(Token::space(" "));
            out.extend(op.iter().cloned());
            out.push(Token::punct(")"));
        } else {
            out.push(token.clone());
        }
    }
    *tokens = out;
}
