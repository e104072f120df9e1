use crate::lexer::{matching_close, next_significant, Token, TokenKind};
use crate::syntax::{ItemKind, SourceTree};

use super::{RewriteRule, RuleContext, RuleOutcome};

/// Strips `layout(...)` qualifiers (set/binding/location/push_constant/std140)
/// from global declarations. Neither ES target needs them once blocks are
/// flattened and attributes are bound by name.
pub struct LayoutQualifiers;

impl RewriteRule for LayoutQualifiers {
    fn name(&self) -> &'static str {
        "layout-qualifiers"
    }

    fn apply(&self, tree: &mut SourceTree, _ctx: &RuleContext) -> RuleOutcome {
        let mut rewrites = 0;
        for item in &mut tree.items {
            if !matches!(item.kind, ItemKind::Declaration | ItemKind::Block) {
                continue;
            }
            rewrites += strip_layouts(&mut item.tokens);
        }
        RuleOutcome::from_counts(rewrites, Vec::new())
    }
}

fn strip_layouts(tokens: &mut Vec<Token>) -> usize {
    let mut count = 0;
    while let Some(start) = tokens.iter().position(|token| token.is_ident("layout")) {
        let Some(open) = next_significant(tokens, start + 1).filter(|&i| tokens[i].is_punct("("))
        else {
            break;
        };
        let Some(close) = matching_close(tokens, open) else {
            break;
        };
        let mut end = close + 1;
        while end < tokens.len() && tokens[end].kind == TokenKind::Whitespace {
            end += 1;
        }
        tokens.drain(start..end);
        count += 1;
    }
    count
}
