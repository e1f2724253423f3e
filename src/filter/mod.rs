pub mod aggregate;
pub mod color;
pub mod segmenter;

use rayon::prelude::*;

use crate::identifier::Metadata;
use aggregate::DocumentResult;
use segmenter::{CharacterRecord, PageResult};

/// One page as delivered by the extractor: glyphs, or the reason they could
/// not be read.
pub type RawPage = Result<Vec<CharacterRecord>, String>;

/// glyphs → per-page zones → document. Pages are independent, so they are
/// segmented in parallel and merged back in order.
pub fn classify_document(pages: &[RawPage], metadata: Metadata) -> DocumentResult {
    let results: Vec<PageResult> = pages
        .par_iter()
        .map(|page| match page {
            Ok(chars) => segmenter::process_page(chars),
            Err(note) => PageResult::failed(note.clone()),
        })
        .collect();
    aggregate::aggregate(results).with_metadata(metadata)
}
