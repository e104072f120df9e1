//! Dialect normalization rules.
//!
//! Each rule is an independent object with a stable name. The battery runs
//! them in a fixed order and records what each one did, so a pass whose
//! output fails to compile can be diagnosed rule by rule.
use serde::Serialize;
use tracing::{debug, warn};

use crate::dialect::{Dialect, TranspileOptions};
use crate::lexer::{matching_close, matching_open, next_significant, prev_significant, Token, TokenKind};
use crate::syntax::SourceTree;

mod layout;
mod literals;
mod loops;
mod polyfill;
mod qualifiers;
mod sampling;
mod types;

pub use layout::LayoutQualifiers;
pub use literals::IntegerLiteralPromotion;
pub use loops::DoWhileLoops;
pub use polyfill::BuiltinPolyfills;
pub use qualifiers::StorageQualifiers;
pub use sampling::TextureSampling;
pub use types::ScalarMatrixTypes;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RuleOutcome {
    Applied { rewrites: usize },
    NotApplicable,
    Skipped { reason: String },
}

impl RuleOutcome {
    /// Folds a rewrite count and any constructs the rule had to leave alone.
    pub fn from_counts(rewrites: usize, skipped: Vec<String>) -> Self {
        if rewrites > 0 {
            RuleOutcome::Applied { rewrites }
        } else if let Some(reason) = skipped.into_iter().next() {
            RuleOutcome::Skipped { reason }
        } else {
            RuleOutcome::NotApplicable
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, RuleOutcome::Applied { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleReport {
    pub rule: &'static str,
    #[serde(flatten)]
    pub outcome: RuleOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleContext {
    pub dialect: Dialect,
    pub preserve_lod: bool,
}

impl From<&TranspileOptions> for RuleContext {
    fn from(options: &TranspileOptions) -> Self {
        Self {
            dialect: options.dialect,
            preserve_lod: options.preserve_lod,
        }
    }
}

pub trait RewriteRule {
    fn name(&self) -> &'static str;
    fn apply(&self, tree: &mut SourceTree, ctx: &RuleContext) -> RuleOutcome;
}

/// Ordered list of rules.
pub struct RuleBattery {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl RuleBattery {
    /// The fixed rule order; later rules rely on earlier ones having run.
    pub fn standard() -> Self {
        Self {
            rules: vec![
                Box::new(LayoutQualifiers),
                Box::new(ScalarMatrixTypes),
                Box::new(TextureSampling),
                Box::new(DoWhileLoops),
                Box::new(StorageQualifiers),
                Box::new(IntegerLiteralPromotion),
                Box::new(BuiltinPolyfills),
            ],
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    pub fn run(&self, tree: &mut SourceTree, ctx: &RuleContext) -> Vec<RuleReport> {
        self.rules
            .iter()
            .map(|rule| {
                let outcome = rule.apply(tree, ctx);
                match &outcome {
                    RuleOutcome::Skipped { reason } => {
                        warn!(rule = rule.name(), reason = %reason, "rewrite rule skipped");
                    }
                    other => debug!(rule = rule.name(), outcome = ?other, "rewrite rule ran"),
                }
                RuleReport {
                    rule: rule.name(),
                    outcome,
                }
            })
            .collect()
    }
}

const KEYWORDS: [&str; 9] = [
    "return", "if", "else", "while", "for", "do", "switch", "case", "discard",
];

fn is_operand_ident(token: &Token) -> bool {
    token.kind == TokenKind::Ident && !KEYWORDS.contains(&token.text.as_str())
}

/// First token of the operand ending just before `op`.
pub(crate) fn left_operand(tokens: &[Token], op: usize) -> Option<usize> {
    let mut start = prev_significant(tokens, op)?;
    loop {
        let token = &tokens[start];
        if token.is_punct(")") || token.is_punct("]") {
            start = matching_open(tokens, start)?;
            if let Some(callee) = prev_significant(tokens, start) {
                if is_operand_ident(&tokens[callee]) {
                    start = callee;
                }
            }
        } else if !(is_operand_ident(token) || token.kind == TokenKind::Number) {
            return None;
        }
        match prev_significant(tokens, start) {
            Some(dot) if tokens[dot].is_punct(".") => {
                start = prev_significant(tokens, dot)?;
            }
            _ => return Some(start),
        }
    }
}

/// Last token of the operand starting just after `op`.
pub(crate) fn right_operand(tokens: &[Token], op: usize) -> Option<usize> {
    let mut index = next_significant(tokens, op + 1)?;
    if tokens[index].is_punct("-") || tokens[index].is_punct("+") || tokens[index].is_punct("!") {
        index = next_significant(tokens, index + 1)?;
    }
    let mut end = if tokens[index].is_punct("(") {
        matching_close(tokens, index)?
    } else if is_operand_ident(&tokens[index]) || tokens[index].kind == TokenKind::Number {
        index
    } else {
        return None;
    };
    loop {
        let Some(next) = next_significant(tokens, end + 1) else {
            return Some(end);
        };
        let token = &tokens[next];
        if token.is_punct("(") || token.is_punct("[") {
            end = matching_close(tokens, next)?;
        } else if token.is_punct(".") {
            let member = next_significant(tokens, next + 1)?;
            if tokens[member].kind != TokenKind::Ident {
                return Some(end);
            }
            end = member;
        } else {
            return Some(end);
        }
    }
}

/// Name of the call whose argument list encloses `index`, with the
/// position of its opening parenthesis.
pub(crate) fn enclosing_call(tokens: &[Token], index: usize) -> Option<(usize, usize)> {
    let mut depth = 0i32;
    for position in (0..index).rev() {
        let token = &tokens[position];
        if token.is_punct(")") || token.is_punct("]") {
            depth += 1;
        } else if token.is_punct("(") || token.is_punct("[") {
            if depth == 0 {
                if !token.is_punct("(") {
                    return None;
                }
                let callee = prev_significant(tokens, position)?;
                return is_operand_ident(&tokens[callee]).then_some((callee, position));
            }
            depth -= 1;
        } else if depth == 0 && (token.is_punct(";") || token.is_punct("{") || token.is_punct("}")) {
            return None;
        }
    }
    None
}

/// Whether a call at `index` (an identifier followed by `(`) is a free call
/// rather than a member access or a declaration.
pub(crate) fn is_call(tokens: &[Token], index: usize, name: &str) -> Option<usize> {
    if !tokens[index].is_ident(name) {
        return None;
    }
    if prev_significant(tokens, index).is_some_and(|p| tokens[p].is_punct(".")) {
        return None;
    }
    let open = next_significant(tokens, index + 1)?;
    tokens[open].is_punct("(").then_some(open)
}

/// Whether the identifier at `index` is preceded by a type name, as in a
/// function header or prototype.
pub(crate) fn prev_is_type(tokens: &[Token], index: usize) -> bool {
    prev_significant(tokens, index).is_some_and(|p| is_operand_ident(&tokens[p]))
}
