use crate::document::{Block, RichText};
use crate::translator::TranslatedUnit;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReassembleError {
    #[error(
        "Translation unit count mismatch: tree has {expected} text blocks \
         but {actual} units were supplied"
    )]
    UnitCountMismatch { expected: usize, actual: usize },
}

/// Rebuild `blocks` with translated text re-inserted.
///
/// Walks the tree in the same depth-first, pre-order as `extract` and hands
/// the next pending unit to every block that has translatable text. The new
/// text replaces the block's runs with a single run that keeps the first
/// original run's annotations. Every other attribute is copied as-is.
pub fn reassemble(
    blocks: &[Block],
    units: &[TranslatedUnit],
) -> Result<Vec<Block>, ReassembleError> {
    let expected = count_text_blocks(blocks);
    if expected != units.len() {
        return Err(ReassembleError::UnitCountMismatch {
            expected,
            actual: units.len(),
        });
    }

    let mut pending = units.iter();
    Ok(rebuild(blocks, &mut pending))
}

fn count_text_blocks(blocks: &[Block]) -> usize {
    blocks
        .iter()
        .map(|block| {
            usize::from(block.translatable_text().is_some()) + count_text_blocks(&block.children)
        })
        .sum()
}

fn rebuild<'a, I>(blocks: &[Block], pending: &mut I) -> Vec<Block>
where
    I: Iterator<Item = &'a TranslatedUnit>,
{
    let mut rebuilt = Vec::with_capacity(blocks.len());

    for block in blocks {
        let kind = match (block.translatable_text(), block.kind.rich_text()) {
            (Some(_), Some(runs)) => match pending.next() {
                Some(unit) => {
                    let annotations = runs.first().and_then(|run| run.annotations.clone());
                    block
                        .kind
                        .with_rich_text(vec![RichText::plain(&unit.translated_text, annotations)])
                }
                None => block.kind.clone(),
            },
            _ => block.kind.clone(),
        };

        rebuilt.push(Block {
            id: block.id.clone(),
            kind,
            children: rebuild(&block.children, pending),
        });
    }

    rebuilt
}
