//! Parameter-block flattening.
//!
//! The push-constant and UBO blocks of the source dialect become one
//! uniform per member, `block.member` references lose their instance
//! prefix, and `#define X block.X` macros that turned into `#define X X`
//! are dropped.
//!
//! A pragma parameter that the shader writes to, or that it also declares
//! as a plain global, is dual-declared: `uniform T PARAM_X` carries the
//! runtime value and every entry point starts with `X = PARAM_X;`.
use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::lexer::{
    self, matching_close, next_significant, prev_significant, tokenize, Token, TokenKind,
};
use crate::pragmas::Pragmas;
use crate::syntax::{
    is_builtin_type, parse_declaration, Item, ItemKind, Section, SourceTree,
};

/// Prefix of the uniform that carries a dual-declared parameter.
pub const PARAM_PREFIX: &str = "PARAM_";

#[derive(Debug, Clone, PartialEq)]
pub struct BlockMember {
    pub ty: String,
    pub name: String,
    pub array: Option<String>,
}

/// A `uniform Name { … } instance;` block.
#[derive(Debug, Clone)]
pub struct ParameterBlock {
    pub item: usize,
    pub instance: Option<String>,
    pub members: Vec<BlockMember>,
    pub section: Section,
}

impl ParameterBlock {
    pub fn has_member(&self, name: &str) -> bool {
        self.members.iter().any(|member| member.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlattenReport {
    /// Members turned into plain same-named uniforms.
    pub uniforms: Vec<String>,
    /// Parameters bound through `PARAM_<name>`.
    pub dual: Vec<String>,
    pub identity_macros: usize,
}

/// Finds every uniform interface block in the tree.
pub fn parameter_blocks(tree: &SourceTree) -> Vec<ParameterBlock> {
    tree.items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.kind == ItemKind::Block)
        .filter_map(|(index, item)| parse_block(index, item))
        .collect()
}

fn parse_block(index: usize, item: &Item) -> Option<ParameterBlock> {
    let tokens = &item.tokens;
    let open = tokens.iter().position(|token| token.is_punct("{"))?;
    if !tokens[..open].iter().any(|token| token.is_ident("uniform")) {
        return None;
    }
    let close = matching_close(tokens, open)?;
    let instance = next_significant(tokens, close + 1)
        .filter(|&i| tokens[i].kind == TokenKind::Ident)
        .map(|i| tokens[i].text.clone());

    let mut members = Vec::new();
    let mut start = open + 1;
    for position in open + 1..close {
        if tokens[position].is_punct(";") {
            if let Some(decl) = parse_declaration(&tokens[start..=position]) {
                for declarator in decl.names {
                    members.push(BlockMember {
                        ty: decl.ty.clone(),
                        name: declarator.name,
                        array: declarator.array,
                    });
                }
            }
            start = position + 1;
        }
    }

    Some(ParameterBlock {
        item: index,
        instance,
        members,
        section: item.section,
    })
}

/// Instance name to member names, for blocks that have an instance name.
pub fn instance_members(blocks: &[ParameterBlock]) -> HashMap<String, HashSet<String>> {
    let mut map: HashMap<String, HashSet<String>> = HashMap::new();
    for block in blocks {
        if let Some(instance) = &block.instance {
            map.entry(instance.clone())
                .or_default()
                .extend(block.members.iter().map(|member| member.name.clone()));
        }
    }
    map
}

pub fn run(tree: &mut SourceTree, pragmas: &Pragmas) -> FlattenReport {
    let blocks = parameter_blocks(tree);
    let mut report = FlattenReport::default();
    if blocks.is_empty() {
        return report;
    }
    let instances = instance_members(&blocks);

    for item in &mut tree.items {
        match item.kind {
            ItemKind::Directive => {
                let Some(first) = item.tokens.first() else {
                    continue;
                };
                let mut body = lexer::tokenize_code(&first.text);
                if strip_instances(&mut body, &instances) > 0 {
                    item.tokens = vec![Token::new(TokenKind::Directive, lexer::render(&body))];
                }
            }
            ItemKind::Block => {}
            _ => {
                strip_instances(&mut item.tokens, &instances);
            }
        }
    }

    let before = tree.items.len();
    tree.items.retain(|item| !is_identity_macro(item));
    report.identity_macros = before - tree.items.len();

    // Indices shifted; find the blocks again.
    let blocks = parameter_blocks(tree);
    let dual: BTreeSet<String> = pragmas
        .parameters
        .iter()
        .map(|param| param.name.as_str())
        .filter(|name| blocks.iter().any(|block| block.has_member(name)))
        .filter(|name| is_written(tree, name) || plain_global(tree, name))
        .map(str::to_string)
        .collect();

    let mut emitted = HashSet::new();
    let mut replacements: Vec<(usize, Vec<Item>)> = Vec::new();
    for block in &blocks {
        let mut text = String::new();
        for member in &block.members {
            if !emitted.insert(member.name.clone()) {
                continue;
            }
            let array = member
                .array
                .as_ref()
                .map(|len| format!("[{len}]"))
                .unwrap_or_default();
            if dual.contains(&member.name) {
                text.push_str(&format!(
                    "uniform {} {PARAM_PREFIX}{}{array};\n",
                    member.ty, member.name
                ));
                if !plain_global(tree, &member.name) {
                    text.push_str(&format!("{} {}{array};\n", member.ty, member.name));
                }
                report.dual.push(member.name.clone());
            } else {
                text.push_str(&format!("uniform {} {}{array};\n", member.ty, member.name));
                report.uniforms.push(member.name.clone());
            }
        }
        let source = &tree.items[block.item];
        let items = SourceTree::parse(&text)
            .items
            .into_iter()
            .map(|mut item| {
                item.section = source.section;
                item.branch = source.branch.clone();
                item
            })
            .collect();
        replacements.push((block.item, items));
    }
    for (index, items) in replacements.into_iter().rev() {
        tree.items.splice(index..=index, items);
    }

    if !report.dual.is_empty() {
        let block_sections: Vec<Section> = blocks.iter().map(|block| block.section).collect();
        insert_prologues(tree, &report.dual, &block_sections);
    }

    debug!(
        uniforms = report.uniforms.len(),
        dual = report.dual.len(),
        identity_macros = report.identity_macros,
        "flattened parameter blocks"
    );
    report
}

/// Removes `instance .` before known members. Returns the rewrite count.
fn strip_instances(tokens: &mut Vec<Token>, instances: &HashMap<String, HashSet<String>>) -> usize {
    let mut out = Vec::with_capacity(tokens.len());
    let mut count = 0;
    let mut index = 0;
    while index < tokens.len() {
        let token = &tokens[index];
        if token.kind == TokenKind::Ident {
            if let Some(members) = instances.get(&token.text) {
                let after_dot = prev_significant(tokens, index).is_some_and(|p| tokens[p].is_punct("."));
                let dot = next_significant(tokens, index + 1).filter(|&d| tokens[d].is_punct("."));
                let member = dot
                    .and_then(|d| next_significant(tokens, d + 1))
                    .filter(|&m| tokens[m].kind == TokenKind::Ident && members.contains(&tokens[m].text));
                if let (false, Some(member)) = (after_dot, member) {
                    out.push(tokens[member].clone());
                    index = member + 1;
                    count += 1;
                    continue;
                }
            }
        }
        out.push(token.clone());
        index += 1;
    }
    *tokens = out;
    count
}

fn is_identity_macro(item: &Item) -> bool {
    let Some((name, rest)) = item.directive() else {
        return false;
    };
    if name != "define" {
        return false;
    }
    let mut words = rest.split_whitespace();
    matches!((words.next(), words.next(), words.next()), (Some(a), Some(b), None) if a == b)
}

/// Whether any function body assigns to `name`.
pub fn is_written(tree: &SourceTree, name: &str) -> bool {
    tree.items.iter().any(|item| {
        let Some((open, close)) = item.function().and_then(|shape| shape.body) else {
            return false;
        };
        let tokens = &item.tokens;
        (open + 1..close).any(|index| {
            if !tokens[index].is_ident(name) {
                return false;
            }
            let prev = prev_significant(tokens, index).map(|p| &tokens[p]);
            if prev.is_some_and(|p| p.is_punct(".") || (p.kind == TokenKind::Ident && is_builtin_type(&p.text))) {
                return false;
            }
            let next = next_significant(tokens, index + 1).map(|n| &tokens[n]);
            next.is_some_and(Token::is_assignment)
                || prev.is_some_and(|p| p.is_punct("++") || p.is_punct("--"))
        })
    })
}

/// Whether `name` is declared as a non-uniform global.
fn plain_global(tree: &SourceTree, name: &str) -> bool {
    tree.items.iter().any(|item| {
        item.parse_declaration().is_some_and(|decl| {
            !decl.qualifiers.iter().any(|q| q == "uniform")
                && decl.names.iter().any(|d| d.name == name)
        })
    })
}

fn insert_prologues(tree: &mut SourceTree, dual: &[String], block_sections: &[Section]) {
    let statements: String = dual
        .iter()
        .map(|name| format!("\n    {name} = {PARAM_PREFIX}{name};"))
        .collect();
    for item in &mut tree.items {
        if !block_sections.iter().any(|section| section.overlaps(item.section)) {
            continue;
        }
        let Some(shape) = item.function() else {
            continue;
        };
        if shape.signature.name != "main" {
            continue;
        }
        let Some((open, _)) = shape.body else {
            continue;
        };
        let insert = tokenize(&statements);
        item.tokens.splice(open + 1..open + 1, insert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pragmas;

    fn flatten(source: &str) -> (String, FlattenReport) {
        let mut tree = SourceTree::parse(source);
        let pragmas = pragmas::extract(&mut tree);
        let report = run(&mut tree, &pragmas);
        (tree.render(), report)
    }

    #[test]
    fn members_become_uniforms() {
        let (out, report) = flatten(
            "layout(push_constant) uniform Push {\n  vec4 SourceSize;\n  float GAIN, BIAS;\n} params;\n\
             layout(std140, set = 0, binding = 0) uniform UBO { mat4 MVP; } global;\n\
             void main() { gl_Position = global.MVP * vec4(params.GAIN); }\n",
        );
        assert!(out.contains("uniform vec4 SourceSize;\n"));
        assert!(out.contains("uniform float GAIN;\nuniform float BIAS;\n"));
        assert!(out.contains("uniform mat4 MVP;\n"));
        assert!(out.contains("gl_Position = MVP * vec4(GAIN);"));
        assert!(!out.contains("params"));
        assert_eq!(report.uniforms, ["SourceSize", "GAIN", "BIAS", "MVP"]);
    }

    #[test]
    fn identity_macros_are_removed() {
        let (out, report) = flatten(
            "uniform Push { float GAIN; } params;\n#define GAIN params.GAIN\n#define TWICE (params.GAIN * 2.0)\n",
        );
        assert!(!out.contains("#define GAIN"));
        assert!(out.contains("#define TWICE (GAIN * 2.0)"));
        assert_eq!(report.identity_macros, 1);
    }

    #[test]
    fn written_parameters_are_dual_declared() {
        let (out, report) = flatten(
            "#pragma parameter GAIN \"Gain\" 1.0 0.0 2.0\n\
             uniform Push { float GAIN; float KEEP; } params;\n\
             #pragma stage vertex\nvoid main() { }\n\
             #pragma stage fragment\nvoid main() { GAIN *= 2.0; float x = KEEP; }\n",
        );
        assert_eq!(report.dual, ["GAIN"]);
        assert!(out.contains("uniform float PARAM_GAIN;\nfloat GAIN;\nuniform float KEEP;\n"));
        assert_eq!(out.matches("GAIN = PARAM_GAIN;").count(), 2);
    }

    #[test]
    fn existing_plain_global_is_reused() {
        let (out, report) = flatten(
            "#pragma parameter MASK \"Mask\" 1.0 0.0 3.0\n\
             uniform Push { float MASK; } params;\nfloat MASK;\n\
             void main() { }\n",
        );
        assert_eq!(report.dual, ["MASK"]);
        assert_eq!(out.matches("float MASK;").count(), 1);
        assert!(out.contains("uniform float PARAM_MASK;"));
        assert!(out.contains("MASK = PARAM_MASK;"));
    }

    #[test]
    fn member_access_on_other_values_is_untouched() {
        let (out, _) = flatten("uniform Push { float x; } params;\nvoid main() { vec2 p; p.x = other.params.x; }\n");
        assert!(out.contains("p.x = other.params.x;"));
    }
}
