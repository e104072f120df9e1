use std::collections::HashMap;

use crate::lexer::{matching_close, next_significant, split_args, Token, TokenKind};
use crate::syntax::{is_builtin_type, is_float_type, ItemKind, SourceTree};

use super::{is_call, left_operand, right_operand, RewriteRule, RuleContext, RuleOutcome};

/// Promotes integer literals used where GLSL ES requires a float.
///
/// Desktop GLSL converts `x * 2` implicitly; ES does not. A literal is only
/// promoted when the other side is known to be floating point, so integer
/// arithmetic (loop counters, array indices) is left alone.
pub struct IntegerLiteralPromotion;

const ARITHMETIC: [&str; 10] = ["+", "-", "*", "/", "<", ">", "<=", ">=", "==", "!="];
const ASSIGNMENTS: [&str; 5] = ["=", "+=", "-=", "*=", "/="];

/// Builtins without integer overloads.
const FLOAT_ONLY: [&str; 27] = [
    "mod", "pow", "step", "smoothstep", "mix", "atan", "exp", "exp2", "log", "log2", "sqrt",
    "inversesqrt", "sin", "cos", "tan", "asin", "acos", "radians", "degrees", "fract", "floor",
    "ceil", "length", "distance", "dot", "normalize", "reflect",
];

/// Builtins whose result is float whenever an argument is.
const FLOAT_RESULT: [&str; 8] = ["texture", "texture2D", "textureLod", "cross", "min", "max", "clamp", "abs"];

/// Builtins that accept matching int or float arguments.
const GENERIC: [&str; 3] = ["min", "max", "clamp"];

const BUILTIN_VARIABLES: [(&str, &str); 4] = [
    ("gl_FragCoord", "vec4"),
    ("gl_Position", "vec4"),
    ("gl_FragColor", "vec4"),
    ("gl_PointCoord", "vec2"),
];

#[derive(Debug, Clone)]
struct Overload {
    return_type: String,
    params: Vec<String>,
}

struct TypeEnv<'a> {
    globals: &'a HashMap<String, String>,
    functions: &'a HashMap<String, Vec<Overload>>,
    locals: HashMap<String, String>,
}

impl TypeEnv<'_> {
    fn variable(&self, name: &str) -> Option<&str> {
        self.locals
            .get(name)
            .or_else(|| self.globals.get(name))
            .map(String::as_str)
    }

    fn returns_float(&self, name: &str) -> bool {
        self.functions
            .get(name)
            .is_some_and(|overloads| overloads.iter().any(|o| is_float_type(&o.return_type)))
    }

    /// True when every overload of `name` taking `arity` arguments expects a
    /// float at `position`.
    fn param_is_float(&self, name: &str, arity: usize, position: usize) -> bool {
        let Some(overloads) = self.functions.get(name) else {
            return false;
        };
        let matching: Vec<&Overload> = overloads.iter().filter(|o| o.params.len() == arity).collect();
        !matching.is_empty() && matching.iter().all(|o| is_float_type(&o.params[position]))
    }
}

impl RewriteRule for IntegerLiteralPromotion {
    fn name(&self) -> &'static str {
        "integer-literal-promotion"
    }

    fn apply(&self, tree: &mut SourceTree, _ctx: &RuleContext) -> RuleOutcome {
        let mut globals: HashMap<String, String> = tree.global_types().into_iter().collect();
        for (name, ty) in BUILTIN_VARIABLES {
            globals.entry(name.to_string()).or_insert_with(|| ty.to_string());
        }
        let mut functions: HashMap<String, Vec<Overload>> = HashMap::new();
        for (_, shape) in tree.functions() {
            functions.entry(shape.signature.name).or_default().push(Overload {
                return_type: shape.return_type,
                params: shape.signature.params,
            });
        }

        let mut rewrites = 0;
        for item in &mut tree.items {
            if !matches!(item.kind, ItemKind::Function | ItemKind::Declaration) {
                continue;
            }
            let return_type = item.function().map(|shape| shape.return_type);
            let env = TypeEnv {
                globals: &globals,
                functions: &functions,
                locals: local_types(&item.tokens),
            };
            rewrites += promote_calls(&mut item.tokens, &env);
            rewrites += promote_binary(&mut item.tokens, &env);
            rewrites += promote_assignments(&mut item.tokens, &env);
            if return_type.as_deref().is_some_and(is_float_type) {
                rewrites += promote_returns(&mut item.tokens);
            }
        }
        RuleOutcome::from_counts(rewrites, Vec::new())
    }
}

/// Parameters and locals declared with a builtin type, keyed by name.
fn local_types(tokens: &[Token]) -> HashMap<String, String> {
    let mut types = HashMap::new();
    let mut index = 0;
    while index < tokens.len() {
        let token = &tokens[index];
        index += 1;
        if token.kind != TokenKind::Ident || !is_builtin_type(&token.text) {
            continue;
        }
        let Some(name) = next_significant(tokens, index) else {
            break;
        };
        if tokens[name].kind != TokenKind::Ident || is_builtin_type(&tokens[name].text) {
            continue;
        }
        if next_significant(tokens, name + 1).is_some_and(|n| tokens[n].is_punct("(")) {
            continue;
        }
        types.insert(tokens[name].text.clone(), token.text.clone());

        // Further declarators: `float a = 1.0, b, c[2];`
        let mut depth = 0i32;
        let mut cursor = name + 1;
        while cursor < tokens.len() {
            let t = &tokens[cursor];
            if t.is_punct("(") || t.is_punct("[") {
                depth += 1;
            } else if t.is_punct(")") || t.is_punct("]") {
                depth -= 1;
                if depth < 0 {
                    break;
                }
            } else if depth == 0 && (t.is_punct(";") || t.is_punct("{")) {
                break;
            } else if depth == 0 && t.is_punct(",") {
                let Some(next) = next_significant(tokens, cursor + 1) else {
                    break;
                };
                if tokens[next].kind != TokenKind::Ident || is_builtin_type(&tokens[next].text) {
                    break;
                }
                let follows = next_significant(tokens, next + 1);
                let declarator = follows.is_some_and(|f| {
                    ["=", ",", ";", "["].iter().any(|p| tokens[f].is_punct(p))
                });
                if !declarator {
                    break;
                }
                types.insert(tokens[next].text.clone(), token.text.clone());
                cursor = next;
            }
            cursor += 1;
        }
        index = name + 1;
    }
    types
}

fn significant(tokens: &[Token], range: std::ops::RangeInclusive<usize>) -> Vec<usize> {
    range.filter(|&i| !tokens[i].is_trivia()).collect()
}

/// Index of the literal when the span is a bare integer literal, optionally negated.
fn bare_int_literal(tokens: &[Token], start: usize, end: usize) -> Option<usize> {
    if start > end {
        return None;
    }
    match significant(tokens, start..=end).as_slice() {
        [only] if tokens[*only].is_int_literal() => Some(*only),
        [sign, only] if tokens[*sign].is_punct("-") && tokens[*only].is_int_literal() => Some(*only),
        _ => None,
    }
}

fn promote(token: &mut Token) -> usize {
    token.text.push_str(".0");
    1
}

fn operand_is_float(tokens: &[Token], start: usize, end: usize, env: &TypeEnv) -> bool {
    let Some(&first) = significant(tokens, start..=end).first() else {
        return false;
    };
    let token = &tokens[first];
    if token.is_punct("-") || token.is_punct("+") {
        return operand_is_float(tokens, first + 1, end, env);
    }
    if token.is_punct("(") {
        return (first..=end).any(|i| token_is_float(tokens, i, env));
    }
    if token.kind == TokenKind::Number {
        return token.is_float_literal();
    }
    if token.kind != TokenKind::Ident {
        return false;
    }
    if next_significant(tokens, first + 1).is_some_and(|n| n <= end && tokens[n].is_punct("(")) {
        return call_is_float(tokens, first, env);
    }
    env.variable(&token.text).is_some_and(is_float_type)
}

fn token_is_float(tokens: &[Token], index: usize, env: &TypeEnv) -> bool {
    let token = &tokens[index];
    match token.kind {
        TokenKind::Number => token.is_float_literal(),
        TokenKind::Ident => {
            if next_significant(tokens, index + 1).is_some_and(|n| tokens[n].is_punct("(")) {
                call_is_float(tokens, index, env)
            } else {
                env.variable(&token.text).is_some_and(is_float_type)
            }
        }
        _ => false,
    }
}

fn call_is_float(tokens: &[Token], callee: usize, env: &TypeEnv) -> bool {
    let name = tokens[callee].text.as_str();
    if is_float_type(name) || env.returns_float(name) || FLOAT_ONLY.contains(&name) {
        return true;
    }
    if !FLOAT_RESULT.contains(&name) {
        return false;
    }
    let Some(open) = next_significant(tokens, callee + 1) else {
        return false;
    };
    let Some(close) = matching_close(tokens, open) else {
        return false;
    };
    name.starts_with("texture") || (open + 1..close).any(|i| token_is_float(tokens, i, env))
}

fn promote_binary(tokens: &mut [Token], env: &TypeEnv) -> usize {
    let mut count = 0;
    for op in 0..tokens.len() {
        if tokens[op].kind != TokenKind::Punct || !ARITHMETIC.contains(&tokens[op].text.as_str()) {
            continue;
        }
        let (Some(start), Some(end)) = (left_operand(tokens, op), right_operand(tokens, op)) else {
            continue;
        };
        let left = bare_int_literal(tokens, start, op - 1);
        let right = bare_int_literal(tokens, op + 1, end);
        match (left, right) {
            (Some(literal), None) if operand_is_float(tokens, op + 1, end, env) => {
                count += promote(&mut tokens[literal]);
            }
            (None, Some(literal)) if operand_is_float(tokens, start, op - 1, env) => {
                count += promote(&mut tokens[literal]);
            }
            _ => {}
        }
    }
    count
}

fn promote_assignments(tokens: &mut [Token], env: &TypeEnv) -> usize {
    let mut count = 0;
    for op in 0..tokens.len() {
        if tokens[op].kind != TokenKind::Punct || !ASSIGNMENTS.contains(&tokens[op].text.as_str()) {
            continue;
        }
        let Some(start) = left_operand(tokens, op) else {
            continue;
        };
        if !operand_is_float(tokens, start, op - 1, env) {
            continue;
        }
        let Some(stop) = (op + 1..tokens.len()).find(|&i| {
            tokens[i].is_punct(";") || tokens[i].is_punct(",") || tokens[i].is_punct(")")
        }) else {
            continue;
        };
        if let Some(literal) = bare_int_literal(tokens, op + 1, stop - 1) {
            count += promote(&mut tokens[literal]);
        }
    }
    count
}

fn promote_returns(tokens: &mut [Token]) -> usize {
    let mut count = 0;
    for index in 0..tokens.len() {
        if !tokens[index].is_ident("return") {
            continue;
        }
        let Some(semi) = (index + 1..tokens.len()).find(|&i| tokens[i].is_punct(";")) else {
            continue;
        };
        if let Some(literal) = bare_int_literal(tokens, index + 1, semi - 1) {
            count += promote(&mut tokens[literal]);
        }
    }
    count
}

fn promote_calls(tokens: &mut [Token], env: &TypeEnv) -> usize {
    let mut count = 0;
    for callee in 0..tokens.len() {
        if tokens[callee].kind != TokenKind::Ident {
            continue;
        }
        let name = tokens[callee].text.clone();
        let Some(open) = is_call(tokens, callee, &name) else {
            continue;
        };
        // A prototype or definition header, not a call.
        if super::prev_is_type(tokens, callee) {
            continue;
        }
        let Some(close) = matching_close(tokens, open) else {
            continue;
        };
        let args = split_args(tokens, open, close);
        let literals: Vec<Option<usize>> = args
            .iter()
            .map(|range| {
                if range.is_empty() {
                    None
                } else {
                    bare_int_literal(tokens, range.start, range.end - 1)
                }
            })
            .collect();
        if literals.iter().all(Option::is_none) {
            continue;
        }

        let promote_all = if FLOAT_ONLY.contains(&name.as_str()) {
            true
        } else if GENERIC.contains(&name.as_str()) {
            args.iter()
                .any(|range| !range.is_empty() && operand_is_float(tokens, range.start, range.end - 1, env))
        } else {
            false
        };

        for (position, literal) in literals.iter().enumerate() {
            let Some(literal) = *literal else {
                continue;
            };
            if promote_all || env.param_is_float(&name, args.len(), position) {
                count += promote(&mut tokens[literal]);
            }
        }
    }
    count
}
