use crate::lexer::{matching_close, split_args, tokenize_code, Token};
use crate::syntax::{ItemKind, SourceTree};

use super::{is_call, RewriteRule, RuleContext, RuleOutcome};

/// Normalizes texture sampling calls.
///
/// Render targets carry no mip chain, so `textureLod(s, uv, lod)` and the
/// bias form `texture(s, uv, bias)` collapse to `texture(s, uv)` unless LOD
/// preservation is requested. GLSL ES 1.00 spells the call `texture2D`.
pub struct TextureSampling;

/// Calls with no GLSL ES 1.00 counterpart.
const LEGACY_UNSUPPORTED: [&str; 5] = [
    "texelFetch",
    "textureSize",
    "textureGrad",
    "textureOffset",
    "texelFetchOffset",
];

impl RewriteRule for TextureSampling {
    fn name(&self) -> &'static str {
        "texture-sampling"
    }

    fn apply(&self, tree: &mut SourceTree, ctx: &RuleContext) -> RuleOutcome {
        let mut rewrites = 0;
        let mut skipped = Vec::new();
        for item in &mut tree.items {
            if item.kind != ItemKind::Function {
                continue;
            }
            rewrites += rewrite_calls(&mut item.tokens, ctx);
            if ctx.dialect.is_legacy() {
                for name in LEGACY_UNSUPPORTED {
                    let used = (0..item.tokens.len()).any(|i| is_call(&item.tokens, i, name).is_some());
                    if used {
                        skipped.push(format!("`{name}` has no GLSL ES 1.00 equivalent"));
                    }
                }
            }
        }
        RuleOutcome::from_counts(rewrites, skipped)
    }
}

fn rewrite_calls(tokens: &mut Vec<Token>, ctx: &RuleContext) -> usize {
    let legacy = ctx.dialect.is_legacy();
    let sample = if legacy { "texture2D" } else { "texture" };
    let mut count = 0;
    let mut index = 0;
    while index < tokens.len() {
        let name = tokens[index].text.clone();
        let Some(open) = is_call(tokens, index, &name) else {
            index += 1;
            continue;
        };
        let Some(close) = matching_close(tokens, open) else {
            index += 1;
            continue;
        };
        let args: Vec<String> = split_args(tokens, open, close)
            .into_iter()
            .map(|range| crate::lexer::render(&tokens[range]).trim().to_string())
            .collect();

        let rewritten = match (name.as_str(), args.len()) {
            ("textureLod", 3) if legacy || !ctx.preserve_lod => {
                Some(format!("{sample}({}, {})", args[0], args[1]))
            }
            ("textureLodOffset", 4) if !legacy && !ctx.preserve_lod => {
                Some(format!("textureOffset({}, {}, {})", args[0], args[1], args[3]))
            }
            ("texture", 3) if !ctx.preserve_lod => {
                Some(format!("{sample}({}, {})", args[0], args[1]))
            }
            ("texture", _) if legacy => Some(format!("texture2D({})", args.join(", "))),
            ("textureProj", _) if legacy => Some(format!("texture2DProj({})", args.join(", "))),
            _ => None,
        };

        match rewritten {
            Some(text) => {
                let replacement = tokenize_code(&text);
                // Resume inside the call so nested sampling is normalized too.
                let resume = index + 2;
                tokens.splice(index..=close, replacement);
                index = resume;
                count += 1;
            }
            None => index += 1,
        }
    }
    count
}
