use crate::document::Block;
use serde::Serialize;

/// A piece of text pulled out of the block tree for translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslatableUnit {
    /// Position in the depth-first, pre-order walk of the tree
    pub index: usize,
    /// Notion type of the originating block
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    #[serde(skip)]
    pub block_id: String,
}

/// Flatten `blocks` into translatable units.
///
/// Blocks are visited depth-first, pre-order: a block, then its whole
/// subtree, then its next sibling. Children are always visited, whether or
/// not their parent produced a unit. `reassemble` walks in the same order.
pub fn extract(blocks: &[Block]) -> Vec<TranslatableUnit> {
    let mut units = Vec::new();
    collect(blocks, &mut units);
    units
}

fn collect(blocks: &[Block], units: &mut Vec<TranslatableUnit>) {
    for block in blocks {
        if let Some(text) = block.translatable_text() {
            units.push(TranslatableUnit {
                index: units.len(),
                kind: block.type_name().to_string(),
                text,
                block_id: block.id.clone(),
            });
        }
        collect(&block.children, units);
    }
}
