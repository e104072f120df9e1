use crate::syntax::{ItemKind, SourceTree};

use super::{is_call, prev_is_type, RewriteRule, RuleContext, RuleOutcome};

/// Injects definitions for builtins the target dialect lacks.
///
/// Each polyfill sits behind its own `#ifndef` guard so a shader that
/// already carries one (through a shared include) compiles once.
pub struct BuiltinPolyfills;

const GEN_TYPES: [&str; 4] = ["float", "vec2", "vec3", "vec4"];

fn gen_type_overloads(body: impl Fn(&str) -> String) -> String {
    GEN_TYPES
        .iter()
        .map(|ty| format!("{ty} {}\n", body(ty)))
        .collect()
}

fn polyfill_source(name: &str) -> Option<String> {
    let body = match name {
        "round" => gen_type_overloads(|ty| format!("round({ty} x) {{ return floor(x + 0.5); }}")),
        "trunc" => gen_type_overloads(|ty| format!("trunc({ty} x) {{ return sign(x) * floor(abs(x)); }}")),
        "tanh" => gen_type_overloads(|ty| {
            format!("tanh({ty} x) {{ {ty} e = exp(2.0 * clamp(x, -20.0, 20.0)); return (e - 1.0) / (e + 1.0); }}")
        }),
        "sinh" => gen_type_overloads(|ty| format!("sinh({ty} x) {{ return 0.5 * (exp(x) - exp(-x)); }}")),
        "cosh" => gen_type_overloads(|ty| format!("cosh({ty} x) {{ return 0.5 * (exp(x) + exp(-x)); }}")),
        "transpose" => concat!(
            "mat2 transpose(mat2 m) { return mat2(m[0][0], m[1][0], m[0][1], m[1][1]); }\n",
            "mat3 transpose(mat3 m) { return mat3(m[0][0], m[1][0], m[2][0], m[0][1], m[1][1], m[2][1], m[0][2], m[1][2], m[2][2]); }\n",
            "mat4 transpose(mat4 m) { return mat4(m[0][0], m[1][0], m[2][0], m[3][0], m[0][1], m[1][1], m[2][1], m[3][1], ",
            "m[0][2], m[1][2], m[2][2], m[3][2], m[0][3], m[1][3], m[2][3], m[3][3]); }\n",
        )
        .to_string(),
        "determinant" => concat!(
            "float determinant(mat2 m) { return m[0][0] * m[1][1] - m[1][0] * m[0][1]; }\n",
            "float determinant(mat3 m) { return dot(m[0], cross(m[1], m[2])); }\n",
            "float determinant(mat4 m) {\n",
            "    float b00 = m[0][0] * m[1][1] - m[0][1] * m[1][0];\n",
            "    float b01 = m[0][0] * m[1][2] - m[0][2] * m[1][0];\n",
            "    float b02 = m[0][0] * m[1][3] - m[0][3] * m[1][0];\n",
            "    float b03 = m[0][1] * m[1][2] - m[0][2] * m[1][1];\n",
            "    float b04 = m[0][1] * m[1][3] - m[0][3] * m[1][1];\n",
            "    float b05 = m[0][2] * m[1][3] - m[0][3] * m[1][2];\n",
            "    float b06 = m[2][0] * m[3][1] - m[2][1] * m[3][0];\n",
            "    float b07 = m[2][0] * m[3][2] - m[2][2] * m[3][0];\n",
            "    float b08 = m[2][0] * m[3][3] - m[2][3] * m[3][0];\n",
            "    float b09 = m[2][1] * m[3][2] - m[2][2] * m[3][1];\n",
            "    float b10 = m[2][1] * m[3][3] - m[2][3] * m[3][1];\n",
            "    float b11 = m[2][2] * m[3][3] - m[2][3] * m[3][2];\n",
            "    return b00 * b11 - b01 * b10 + b02 * b09 + b03 * b08 - b04 * b07 + b05 * b06;\n",
            "}\n",
        )
        .to_string(),
        _ => return None,
    };
    let guard = format!("CRT_POLYFILL_{}", name.to_ascii_uppercase());
    Some(format!("#ifndef {guard}\n#define {guard}\n{body}#endif\n"))
}

const POLYFILLED: [&str; 7] = ["transpose", "determinant", "round", "trunc", "tanh", "sinh", "cosh"];

impl RewriteRule for BuiltinPolyfills {
    fn name(&self) -> &'static str {
        "builtin-polyfills"
    }

    fn apply(&self, tree: &mut SourceTree, ctx: &RuleContext) -> RuleOutcome {
        let defined: Vec<String> = tree
            .functions()
            .filter(|(_, shape)| shape.body.is_some())
            .map(|(_, shape)| shape.signature.name)
            .collect();
        let needed: Vec<&str> = POLYFILLED
            .into_iter()
            .filter(|name| !ctx.dialect.has_builtin(name))
            .filter(|name| !defined.iter().any(|d| d == name))
            .filter(|name| uses(tree, name))
            .collect();
        if needed.is_empty() {
            return RuleOutcome::NotApplicable;
        }

        let source: String = needed.iter().filter_map(|name| polyfill_source(name)).collect();
        let injected = SourceTree::parse(&source).items;
        let at = tree
            .items
            .iter()
            .position(|item| item.kind == ItemKind::Function)
            .unwrap_or(tree.items.len());
        tree.items.splice(at..at, injected);
        RuleOutcome::Applied {
            rewrites: needed.len(),
        }
    }
}

fn uses(tree: &SourceTree, name: &str) -> bool {
    tree.items
        .iter()
        .filter(|item| matches!(item.kind, ItemKind::Function | ItemKind::Declaration))
        .any(|item| {
            (0..item.tokens.len())
                .any(|i| is_call(&item.tokens, i, name).is_some() && !prev_is_type(&item.tokens, i))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;

    fn run(source: &str, dialect: Dialect) -> (String, RuleOutcome) {
        let mut tree = SourceTree::parse(source);
        let outcome = BuiltinPolyfills.apply(
            &mut tree,
            &RuleContext {
                dialect,
                preserve_lod: false,
            },
        );
        (tree.render(), outcome)
    }

    #[test]
    fn legacy_gets_guarded_polyfills_before_first_function() {
        let source = "uniform float x;\nvoid main() { float r = round(x) + tanh(x); }\n";
        let (out, outcome) = run(source, Dialect::Gles100);
        assert_eq!(outcome, RuleOutcome::Applied { rewrites: 2 });
        let guard = out.find("#ifndef CRT_POLYFILL_ROUND").unwrap();
        assert!(out.find("uniform float x;").unwrap() < guard);
        assert!(guard < out.find("void main()").unwrap());
        assert!(out.contains("vec3 round(vec3 x) { return floor(x + 0.5); }"));
        assert!(out.contains("#define CRT_POLYFILL_TANH"));
        assert!(!out.contains("CRT_POLYFILL_TRANSPOSE"));
    }

    #[test]
    fn es3_needs_nothing() {
        let source = "void main() { float r = round(x); }\n";
        let (out, outcome) = run(source, Dialect::Gles300);
        assert_eq!(outcome, RuleOutcome::NotApplicable);
        assert_eq!(out, source);
    }

    #[test]
    fn user_definitions_win() {
        let source = "float round(float v) { return floor(v); }\nvoid main() { float r = round(x); }\n";
        let (_, outcome) = run(source, Dialect::Gles100);
        assert_eq!(outcome, RuleOutcome::NotApplicable);
    }

    #[test]
    fn every_polyfill_has_a_body() {
        for name in POLYFILLED {
            let source = polyfill_source(name).unwrap();
            let tree = SourceTree::parse(&source);
            assert!(tree.functions().count() >= 3, "{name}");
        }
    }
}
