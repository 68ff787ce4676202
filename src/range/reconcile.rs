use super::ByteRange;

/// Strips the parts of `requested` already covered by the first
/// `header_length` bytes of the object.
///
/// Ranges entirely inside the header are dropped, ranges straddling it are
/// cut to start at `header_length`, and the rest pass through in order.
pub fn reconcile(requested: &[ByteRange], header_length: u64) -> Vec<ByteRange> {
    requested
        .iter()
        .filter_map(|range| {
            if range.start >= header_length {
                Some(*range)
            } else if range.end < header_length {
                None
            } else {
                ByteRange::new(header_length, range.end)
            }
        })
        .collect()
}
