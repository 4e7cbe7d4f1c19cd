use crate::config::ChunkingConfig;
use crate::extractor::CodeBlock;

/// Separators tried strongest-first when looking for a cut point near a
/// chunk boundary. The implicit last resort is a hard cut at the budget,
/// which guarantees progress on separator-free input.
const SEPARATORS: &[&str] = &["\n\n", "\n", " "];

/// Canonical text sent to the embedding provider for one block.
pub fn prepare_text(block: &CodeBlock) -> String {
    format!(
        "Type: {}\nName: {}\nSignature: {}\nCode: {}",
        block.block_type, block.name, block.signature, block.code
    )
}

/// Expand one block into `(embedding text, block)` pairs.
///
/// Within budget the block embeds whole. Oversize texts split into chunks;
/// chunk `i` (1-based) derives a block with `_chunk_i` appended to id and
/// name and `(part i)` appended to the signature, so chunk identity is as
/// stable as the parent's.
pub fn chunk_block(block: &CodeBlock, cfg: &ChunkingConfig) -> Vec<(String, CodeBlock)> {
    let text = prepare_text(block);
    if text.chars().count() <= cfg.max_length {
        return vec![(text, block.clone())];
    }

    split_text(&text, cfg.chunk_size, cfg.chunk_overlap)
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let n = i + 1;
            let mut derived = block.clone();
            derived.id = format!("{}_chunk_{}", block.id, n);
            derived.name = format!("{}_chunk_{}", block.name, n);
            derived.signature = format!("{} (part {})", block.signature, n);
            derived.code = chunk.clone();
            (chunk, derived)
        })
        .collect()
}

/// Split `text` at roughly `chunk_size`-character boundaries, preferring to
/// cut just after the strongest separator near each boundary. Every chunk
/// after the first starts `overlap` characters before the previous cut so
/// boundary tokens are embedded with both neighbors. Lengths are measured
/// in characters, never bytes, so multi-byte content cannot be split
/// mid-code-point.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = offsets.len() - 1;

    if chunk_size == 0 || char_count <= chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < char_count {
        let ideal_end = (start + chunk_size).min(char_count);
        let end = if ideal_end == char_count {
            char_count
        } else {
            cut_point(text, &offsets, start, ideal_end)
        };

        let lead = if chunks.is_empty() {
            start
        } else {
            start.saturating_sub(overlap)
        };
        chunks.push(text[offsets[lead]..offsets[end]].to_string());
        start = end;
    }
    chunks
}

/// Pick the cut for a chunk ending near `ideal_end` (exclusive char index).
/// Searches the trailing tenth of the chunk for each separator in turn and
/// cuts just after the match; falls back to the hard budget boundary.
fn cut_point(text: &str, offsets: &[usize], start: usize, ideal_end: usize) -> usize {
    let span = ideal_end - start;
    let floor = ideal_end - (span / 10).max(1);

    let window = &text[offsets[floor]..offsets[ideal_end]];
    for sep in SEPARATORS {
        if let Some(pos) = window.rfind(sep) {
            let byte = offsets[floor] + pos + sep.len();
            // Separators are ASCII, so the position after one is always a
            // char boundary present in `offsets`.
            if let Ok(ci) = offsets.binary_search(&byte) {
                if ci > start && ci < ideal_end {
                    return ci;
                }
            }
        }
    }
    ideal_end
}
