use crate::domain::analysis::{AnalysisItem, TranscriptHighlight, TranscriptSection};

/// Interleaves statement text and highlight cards in reading order.
///
/// Each item contributes a `Regular` section with its original text (when
/// present and non-empty) followed by a `Highlight` section. Callers filter out
/// items without highlight text beforehand.
pub fn build_sections(items: &[AnalysisItem]) -> Vec<TranscriptSection> {
    let regular = items.iter().filter(|i| i.original_text().is_some()).count();
    let mut sections = Vec::with_capacity(items.len() + regular);

    for item in items {
        if let Some(text) = item.original_text() {
            sections.push(TranscriptSection::Regular {
                content: text.to_string(),
            });
        }
        sections.push(TranscriptSection::Highlight {
            content: item.highlight.clone(),
            highlight: TranscriptHighlight::from(item),
        });
    }

    sections
}

/// Gives the i-th retained item the original text found at index i of `source`.
///
/// Pairing is by position, not by id: when items were dropped from `source`
/// the texts shift relative to their highlights. Divergent lengths are logged.
pub fn align_original_text(
    mut retained: Vec<AnalysisItem>,
    source: &[AnalysisItem],
) -> Vec<AnalysisItem> {
    if retained.len() != source.len() {
        tracing::warn!(
            retained = retained.len(),
            source = source.len(),
            "highlight and original text lists differ in length; pairing by position"
        );
    }

    for (index, item) in retained.iter_mut().enumerate() {
        item.original_text = source.get(index).and_then(|s| s.original_text.clone());
    }
    retained
}
