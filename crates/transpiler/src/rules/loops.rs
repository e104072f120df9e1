use crate::lexer::{self, matching_close, next_significant, tokenize_code, Token};
use crate::syntax::{ItemKind, SourceTree};

use super::{RewriteRule, RuleContext, RuleOutcome};

/// Rewrites `do { body } while (cond);` into a `while` loop guarded by a
/// first-iteration flag. Some ES drivers reject `do`/`while` outright.
pub struct DoWhileLoops;

impl RewriteRule for DoWhileLoops {
    fn name(&self) -> &'static str {
        "do-while-loops"
    }

    fn apply(&self, tree: &mut SourceTree, _ctx: &RuleContext) -> RuleOutcome {
        let mut rewrites = 0;
        let mut skipped = Vec::new();
        for item in &mut tree.items {
            if item.kind != ItemKind::Function {
                continue;
            }
            let mut from = 0;
            while let Some(start) = (from..item.tokens.len()).find(|&i| item.tokens[i].is_ident("do")) {
                match rewrite_at(&mut item.tokens, start, rewrites) {
                    Some(()) => {
                        rewrites += 1;
                        from = start;
                    }
                    None => {
                        skipped.push("do loop without a braced body and while condition".to_string());
                        from = start + 1;
                    }
                }
            }
        }
        RuleOutcome::from_counts(rewrites, skipped)
    }
}

fn rewrite_at(tokens: &mut Vec<Token>, start: usize, id: usize) -> Option<()> {
    let body_open = next_significant(tokens, start + 1).filter(|&i| tokens[i].is_punct("{"))?;
    let body_close = matching_close(tokens, body_open)?;
    let keyword = next_significant(tokens, body_close + 1).filter(|&i| tokens[i].is_ident("while"))?;
    let cond_open = next_significant(tokens, keyword + 1).filter(|&i| tokens[i].is_punct("("))?;
    let cond_close = matching_close(tokens, cond_open)?;
    let semi = next_significant(tokens, cond_close + 1).filter(|&i| tokens[i].is_punct(";"))?;

    let body = lexer::render(&tokens[body_open + 1..body_close]);
    let cond = lexer::render(&tokens[cond_open + 1..cond_close]);
    let flag = format!("_dw{id}");
    let text = format!(
        "{{ bool {flag} = true; while ({flag} || ({cond})) {{ {flag} = false;{body}}} }}",
        cond = cond.trim()
    );
    tokens.splice(start..=semi, tokenize_code(&text));
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;

    fn run(source: &str) -> (String, RuleOutcome) {
        let mut tree = SourceTree::parse(source);
        let outcome = DoWhileLoops.apply(
            &mut tree,
            &RuleContext {
                dialect: Dialect::Gles300,
                preserve_lod: false,
            },
        );
        (tree.render(), outcome)
    }

    #[test]
    fn do_while_becomes_flagged_while() {
        let (out, outcome) = run("void main() { do { i++; } while (i < 4); }\n");
        assert_eq!(outcome, RuleOutcome::Applied { rewrites: 1 });
        assert_eq!(
            out,
            "void main() { { bool _dw0 = true; while (_dw0 || (i < 4)) { _dw0 = false; i++; } } }\n"
        );
    }

    #[test]
    fn nested_loops_get_distinct_flags() {
        let (out, outcome) = run("void main() { do { do { j++; } while (j < 2); i++; } while (i < 3); }\n");
        assert_eq!(outcome, RuleOutcome::Applied { rewrites: 2 });
        assert!(out.contains("_dw0"));
        assert!(out.contains("_dw1"));
        assert!(!out.contains("do "));
    }

    #[test]
    fn unbraced_body_is_reported() {
        let (out, outcome) = run("void main() { do i++; while (i < 4); }\n");
        assert!(matches!(outcome, RuleOutcome::Skipped { .. }));
        assert!(out.contains("do i++;"));
    }

    #[test]
    fn plain_loops_are_not_applicable() {
        let (_, outcome) = run("void main() { while (i < 4) { i++; } float done = 1.0; }\n");
        assert_eq!(outcome, RuleOutcome::NotApplicable);
    }
}
