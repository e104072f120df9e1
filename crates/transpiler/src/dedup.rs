//! Function and struct deduplication.
//!
//! Definitions are keyed on `(name, parameter types)` plus the preprocessor
//! branch they sit in, so overloads survive and `#if`/`#else` alternatives
//! are not mistaken for repeats. The first definition wins. Sections are
//! honoured: a vertex-only and a fragment-only definition never collide,
//! and a shared repeat of a single-stage definition moves to the other
//! stage instead of being dropped.
use std::collections::HashMap;

use tracing::debug;

use crate::include::IncludePool;
use crate::syntax::{struct_name, ItemKind, Section, Signature, SourceTree};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupReport {
    pub dropped: Vec<Signature>,
    pub structs_dropped: Vec<String>,
    /// Shared function definitions that survived, in source order.
    pub pool: Vec<Signature>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Function(Signature, Vec<u32>),
    Struct(String, Vec<u32>),
}

enum Verdict {
    Keep,
    Drop,
    MoveTo(Section),
}

fn judge(seen: &[Section], section: Section) -> Verdict {
    let has = |s: Section| seen.contains(&s);
    match section {
        Section::Shared => {
            if has(Section::Shared) || (has(Section::Vertex) && has(Section::Fragment)) {
                Verdict::Drop
            } else if has(Section::Vertex) {
                Verdict::MoveTo(Section::Fragment)
            } else if has(Section::Fragment) {
                Verdict::MoveTo(Section::Vertex)
            } else {
                Verdict::Keep
            }
        }
        stage => {
            if has(Section::Shared) || has(stage) {
                Verdict::Drop
            } else {
                Verdict::Keep
            }
        }
    }
}

pub fn run(tree: &mut SourceTree, pool: &IncludePool) -> DedupReport {
    let mut seen: HashMap<Key, Vec<Section>> = HashMap::new();
    let mut report = DedupReport::default();
    let mut keep = Vec::with_capacity(tree.items.len());

    for item in &mut tree.items {
        let key = match item.kind {
            ItemKind::Function => match item.function() {
                Some(shape) if shape.body.is_some() => {
                    Key::Function(shape.signature, item.branch.clone())
                }
                _ => {
                    keep.push(true);
                    continue;
                }
            },
            ItemKind::Declaration => match struct_name(&item.tokens) {
                Some(name) if item.tokens.iter().any(|t| t.is_punct("{")) => {
                    Key::Struct(name, item.branch.clone())
                }
                _ => {
                    keep.push(true);
                    continue;
                }
            },
            _ => {
                keep.push(true);
                continue;
            }
        };

        let sections = seen.entry(key.clone()).or_default();
        match judge(sections, item.section) {
            Verdict::Keep => {
                sections.push(item.section);
                keep.push(true);
            }
            Verdict::MoveTo(section) => {
                sections.push(section);
                item.section = section;
                keep.push(true);
            }
            Verdict::Drop => {
                match key {
                    Key::Function(signature, _) => {
                        let origin = pool.symbols().get(&signature);
                        debug!(
                            function = %signature,
                            origin = ?origin,
                            "dropped duplicate function definition"
                        );
                        report.dropped.push(signature);
                    }
                    Key::Struct(name, _) => {
                        debug!(name = %name, "dropped duplicate struct definition");
                        report.structs_dropped.push(name);
                    }
                }
                keep.push(false);
            }
        }
    }

    let mut flags = keep.into_iter();
    tree.items.retain(|_| flags.next().unwrap_or(true));

    report.pool = tree
        .functions()
        .filter(|(index, shape)| {
            shape.body.is_some() && tree.items[*index].section == Section::Shared
        })
        .map(|(_, shape)| shape.signature)
        .collect();
    report
}
