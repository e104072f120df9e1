use std::collections::HashSet;

use crate::lexer::{next_significant, tokenize_code, Token, TokenKind};
use crate::syntax::{ItemKind, SourceTree};

use super::{left_operand, right_operand, RewriteRule, RuleContext, RuleOutcome};

/// Replaces types the ES targets lack: `uint`/`uvec*` become `float`/`vec*`,
/// `matNxN` becomes `matN`, `Nu` literals become `N.0`, and `%` on a former
/// unsigned operand becomes `mod()`. On GLSL ES 1.00, which has no `%` at
/// all, integer remainders go through `mod()` as well.
pub struct ScalarMatrixTypes;

fn replacement_type(name: &str) -> Option<&'static str> {
    Some(match name {
        "uint" => "float",
        "uvec2" => "vec2",
        "uvec3" => "vec3",
        "uvec4" => "vec4",
        "mat2x2" => "mat2",
        "mat3x3" => "mat3",
        "mat4x4" => "mat4",
        _ => return None,
    })
}

impl RewriteRule for ScalarMatrixTypes {
    fn name(&self) -> &'static str {
        "scalar-matrix-types"
    }

    fn apply(&self, tree: &mut SourceTree, ctx: &RuleContext) -> RuleOutcome {
        let unsigned = unsigned_names(tree);
        let mut rewrites = 0;
        let mut skipped = Vec::new();

        for item in &mut tree.items {
            if !matches!(
                item.kind,
                ItemKind::Function | ItemKind::Declaration | ItemKind::Block
            ) {
                continue;
            }
            rewrites += rewrite_remainders(&mut item.tokens, &unsigned, ctx.dialect.is_legacy());
            for token in &mut item.tokens {
                if token.kind == TokenKind::Ident {
                    if let Some(replacement) = replacement_type(&token.text) {
                        token.text = replacement.to_string();
                        rewrites += 1;
                    }
                } else if token.is_uint_literal() {
                    token.text = float_literal(&token.text);
                    rewrites += 1;
                }
            }
            let bitwise = item.tokens.iter().enumerate().any(|(index, token)| {
                matches!(token.text.as_str(), "&" | "|" | "^" | "<<" | ">>" | "~")
                    && token.kind == TokenKind::Punct
                    && operand_mentions(&item.tokens, index, &unsigned)
            });
            if bitwise {
                skipped.push("bitwise operator on a former unsigned value".to_string());
            }
        }
        RuleOutcome::from_counts(rewrites, skipped)
    }
}

/// Names declared with an unsigned type, including functions returning one.
fn unsigned_names(tree: &SourceTree) -> HashSet<String> {
    let mut names = HashSet::new();
    for item in &tree.items {
        let tokens = &item.tokens;
        for (index, token) in tokens.iter().enumerate() {
            if !(token.is_ident("uint") || token.text.starts_with("uvec")) {
                continue;
            }
            if let Some(name) = next_significant(tokens, index + 1) {
                if tokens[name].kind == TokenKind::Ident {
                    names.insert(tokens[name].text.clone());
                }
            }
        }
    }
    names
}

fn float_literal(text: &str) -> String {
    let digits = text.trim_end_matches(['u', 'U']);
    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).unwrap_or(0)
    } else {
        digits.parse::<u64>().unwrap_or(0)
    };
    format!("{value}.0")
}

fn mentions_unsigned(tokens: &[Token], unsigned: &HashSet<String>) -> bool {
    tokens.iter().any(|token| {
        token.is_uint_literal() || (token.kind == TokenKind::Ident && unsigned.contains(&token.text))
    })
}

fn operand_mentions(tokens: &[Token], op: usize, unsigned: &HashSet<String>) -> bool {
    let left = left_operand(tokens, op).map(|start| &tokens[start..op]);
    let right = right_operand(tokens, op).map(|end| &tokens[op + 1..=end]);
    left.is_some_and(|slice| mentions_unsigned(slice, unsigned))
        || right.is_some_and(|slice| mentions_unsigned(slice, unsigned))
}

fn rewrite_remainders(tokens: &mut Vec<Token>, unsigned: &HashSet<String>, legacy: bool) -> usize {
    let mut count = 0;
    let mut from = 0;
    while let Some(op) = (from..tokens.len())
        .find(|&i| tokens[i].is_punct("%") || tokens[i].is_punct("%="))
    {
        from = op + 1;
        let compound = tokens[op].is_punct("%=");
        let Some(start) = left_operand(tokens, op) else {
            continue;
        };
        let end = if compound {
            match (op + 1..tokens.len()).find(|&i| tokens[i].is_punct(";")) {
                Some(semi) => semi - 1,
                None => continue,
            }
        } else {
            match right_operand(tokens, op) {
                Some(end) => end,
                None => continue,
            }
        };
        let left = crate::lexer::render(&tokens[start..op]).trim().to_string();
        let right = crate::lexer::render(&tokens[op + 1..=end]).trim().to_string();
        let former_unsigned = mentions_unsigned(&tokens[start..=end], unsigned);
        let call = if former_unsigned {
            format!("mod({left}, {right})")
        } else if legacy {
            format!("int(mod(float({left}), float({right})))")
        } else {
            continue;
        };
        let text = if compound {
            format!("{left} = {call}")
        } else {
            call
        };
        let replacement = tokenize_code(&text);
        from = start + replacement.len();
        tokens.splice(start..=end, replacement);
        count += 1;
    }
    count
}
