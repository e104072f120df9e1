//! Stage-boundary validation and the vertex/fragment split.
use crate::error::TranspileError;
use crate::syntax::{stage_pragma, Item, ItemKind, SourceTree, Stage};

fn stage_marker(item: &Item) -> Option<Result<Stage, String>> {
    let (name, rest) = item.directive()?;
    if name != "pragma" {
        return None;
    }
    stage_pragma(&rest)
}

/// Checks that each stage is declared exactly once with a well-formed
/// pragma.
pub fn validate(tree: &SourceTree) -> Result<(), TranspileError> {
    let mut seen = Vec::new();
    for item in &tree.items {
        match stage_marker(item) {
            None => {}
            Some(Err(_)) => return Err(TranspileError::MalformedStage(item.text().trim().to_string())),
            Some(Ok(stage)) => {
                if seen.contains(&stage) {
                    return Err(TranspileError::DuplicateStage(stage));
                }
                seen.push(stage);
            }
        }
    }
    match Stage::ALL.into_iter().find(|stage| !seen.contains(stage)) {
        Some(missing) => Err(TranspileError::MissingStage(missing)),
        None => Ok(()),
    }
}

/// Builds the tree for one stage: shared items plus that stage's section,
/// without stage pragmas. The stage must define `main`.
pub fn split(tree: &SourceTree, stage: Stage) -> Result<SourceTree, TranspileError> {
    let items: Vec<Item> = tree
        .items
        .iter()
        .filter(|item| item.section.reaches(stage))
        .filter(|item| stage_marker(item).is_none())
        .cloned()
        .collect();
    let split = SourceTree { items };
    let has_main = split.functions().any(|(_, shape)| {
        shape.signature.name == "main" && shape.body.is_some()
    });
    if !has_main {
        return Err(TranspileError::MissingEntryPoint(stage));
    }
    Ok(split)
}

/// Names declared at global scope in a stage tree.
pub fn declared_names(tree: &SourceTree) -> Vec<String> {
    tree.items
        .iter()
        .filter(|item| item.kind == ItemKind::Declaration)
        .flat_map(Item::declared_names)
        .collect()
}
