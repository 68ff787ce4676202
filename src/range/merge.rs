use super::ChunkMap;

/// Coalesces fetched chunks into a non-overlapping set.
///
/// Chunks are walked in offset order. A chunk fully inside the current one is
/// dropped, an overlapping or adjacent chunk contributes only the bytes past
/// the current end, and anything after a gap starts a new chunk. Where chunks
/// overlap the earlier chunk's bytes win.
pub fn merge_chunks<I>(chunks: I) -> ChunkMap
where
    I: IntoIterator<Item = (u64, Vec<u8>)>,
{
    let mut sorted: Vec<(u64, Vec<u8>)> = chunks
        .into_iter()
        .filter(|(_, bytes)| !bytes.is_empty())
        .collect();
    sorted.sort_by_key(|(offset, _)| *offset);

    let mut merged = ChunkMap::new();
    let mut sorted = sorted.into_iter();
    let Some((mut cur_start, mut cur_bytes)) = sorted.next() else {
        return merged;
    };

    for (next_start, next_bytes) in sorted {
        let cur_end = cur_start + cur_bytes.len() as u64 - 1;
        let next_end = next_start + next_bytes.len() as u64 - 1;
        if next_end <= cur_end {
            continue;
        }
        if next_start <= cur_end + 1 {
            let overlap = (cur_end + 1 - next_start) as usize;
            cur_bytes.extend_from_slice(&next_bytes[overlap..]);
        } else {
            merged.insert(cur_start, cur_bytes);
            cur_start = next_start;
            cur_bytes = next_bytes;
        }
    }
    merged.insert(cur_start, cur_bytes);

    merged
}
