use crate::lexer::{prev_significant, Token, TokenKind};
use crate::syntax::{ItemKind, Section, SourceTree};

use super::{RewriteRule, RuleContext, RuleOutcome};

/// Maps global storage and interpolation qualifiers onto the target
/// dialect. Only global declarations are touched, so `in`/`out` on function
/// parameters survive.
pub struct StorageQualifiers;

/// Interpolation qualifiers GLSL ES 1.00 does not know.
const LEGACY_DROPPED: [&str; 3] = ["flat", "smooth", "centroid"];

impl RewriteRule for StorageQualifiers {
    fn name(&self) -> &'static str {
        "storage-qualifiers"
    }

    fn apply(&self, tree: &mut SourceTree, ctx: &RuleContext) -> RuleOutcome {
        let legacy = ctx.dialect.is_legacy();
        let mut rewrites = 0;
        let mut skipped = Vec::new();
        let mut fragment_outputs = Vec::new();

        for (index, item) in tree.items.iter_mut().enumerate() {
            if item.kind != ItemKind::Declaration || item.parse_declaration().is_none() {
                continue;
            }
            rewrites += drop_qualifier(&mut item.tokens, "noperspective");
            if !legacy {
                continue;
            }
            for qualifier in LEGACY_DROPPED {
                rewrites += drop_qualifier(&mut item.tokens, qualifier);
            }
            let Some(decl) = item.parse_declaration() else {
                continue;
            };
            let storage = |name: &str| decl.qualifiers.iter().any(|q| q == name);
            match item.section {
                Section::Vertex => {
                    rewrites += rename_qualifier(&mut item.tokens, "in", "attribute");
                    rewrites += rename_qualifier(&mut item.tokens, "out", "varying");
                }
                Section::Fragment => {
                    rewrites += rename_qualifier(&mut item.tokens, "in", "varying");
                    if storage("out") {
                        fragment_outputs.push((index, decl.names));
                    }
                }
                Section::Shared => {
                    if storage("in") || storage("out") {
                        skipped.push("stage interface declared outside a stage section".to_string());
                    }
                }
            }
        }

        match fragment_outputs.as_slice() {
            [] => {}
            [(index, names)] if names.len() == 1 => {
                let output = names[0].name.clone();
                let index = *index;
                tree.items.remove(index);
                for item in &mut tree.items {
                    if item.section != Section::Vertex {
                        rewrites += rename_ident(&mut item.tokens, &output, "gl_FragColor");
                    }
                }
                rewrites += 1;
            }
            _ => skipped.push("more than one fragment output".to_string()),
        }

        RuleOutcome::from_counts(rewrites, skipped)
    }
}

fn drop_qualifier(tokens: &mut Vec<Token>, name: &str) -> usize {
    let Some(position) = tokens.iter().position(|token| token.is_ident(name)) else {
        return 0;
    };
    let mut end = position + 1;
    while end < tokens.len() && tokens[end].kind == TokenKind::Whitespace {
        end += 1;
    }
    tokens.drain(position..end);
    1
}

fn rename_qualifier(tokens: &mut [Token], from: &str, to: &str) -> usize {
    match tokens.iter_mut().find(|token| token.is_ident(from)) {
        Some(token) => {
            token.text = to.to_string();
            1
        }
        None => 0,
    }
}

fn rename_ident(tokens: &mut [Token], from: &str, to: &str) -> usize {
    let mut count = 0;
    for index in 0..tokens.len() {
        if !tokens[index].is_ident(from) {
            continue;
        }
        if prev_significant(tokens, index).is_some_and(|p| tokens[p].is_punct(".")) {
            continue;
        }
        tokens[index].text = to.to_string();
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;

    const SOURCE: &str = "#pragma stage vertex
layout(location = 0) in vec4 Position;
noperspective out vec2 vTexCoord;
void main() { vTexCoord = Position.xy; }
#pragma stage fragment
in vec2 vTexCoord;
flat in float vMask;
out vec4 FragColor;
void main() { FragColor = vec4(vTexCoord, vMask, 1.0); }
";

    fn run(source: &str, dialect: Dialect) -> (String, RuleOutcome) {
        let mut tree = SourceTree::parse(source);
        let outcome = StorageQualifiers.apply(
            &mut tree,
            &RuleContext {
                dialect,
                preserve_lod: false,
            },
        );
        (tree.render(), outcome)
    }

    #[test]
    fn es3_only_loses_noperspective() {
        let (out, outcome) = run(SOURCE, Dialect::Gles300);
        assert_eq!(outcome, RuleOutcome::Applied { rewrites: 1 });
        assert!(out.contains("\nout vec2 vTexCoord;"));
        assert!(out.contains("flat in float vMask;"));
        assert!(out.contains("FragColor = vec4"));
    }

    #[test]
    fn legacy_uses_attribute_varying_and_frag_color() {
        let (out, _) = run(SOURCE, Dialect::Gles100);
        assert!(out.contains("attribute vec4 Position;"));
        assert!(out.contains("\nvarying vec2 vTexCoord;\nvoid main() { vTexCoord"));
        assert!(out.contains("#pragma stage fragment\nvarying vec2 vTexCoord;"));
        assert!(out.contains("varying float vMask;"));
        assert!(!out.contains("out vec4 FragColor;"));
        assert!(out.contains("gl_FragColor = vec4(vTexCoord, vMask, 1.0);"));
    }

    #[test]
    fn parameter_qualifiers_are_untouched() {
        let source = "#pragma stage fragment\nvoid f(in float a, out float b) { b = a; }\n";
        let (out, outcome) = run(source, Dialect::Gles100);
        assert_eq!(out, source);
        assert_eq!(outcome, RuleOutcome::NotApplicable);
    }

    #[test]
    fn multiple_outputs_are_reported() {
        let source = "#pragma stage fragment\nout vec4 A;\nout vec4 B;\nvoid main() { A = B; }\n";
        let (out, outcome) = run(source, Dialect::Gles100);
        assert!(matches!(outcome, RuleOutcome::Skipped { .. }));
        assert!(out.contains("out vec4 A;"));
    }
}
