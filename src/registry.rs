use crate::range::ByteRange;
use std::collections::HashMap;
use std::fmt::Display;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileEntry {
    pub index: usize,
    pub offset: u64,
    pub byte_length: u64,
}

impl TileEntry {
    /// Inclusive byte range of the tile, None for empty tiles
    pub fn range(&self) -> Option<ByteRange> {
        ByteRange::from_offset_len(self.offset, self.byte_length)
    }

    /// One past the last byte, None if that lies beyond `u64::MAX`
    pub fn end_exclusive(&self) -> Option<u64> {
        self.offset.checked_add(self.byte_length)
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.range().is_some_and(|range| range.contains(offset))
    }
}

/// Tile offsets discovered during one read session.
///
/// Also tracks where tile data begins: `header_size` is the last byte that
/// can still belong to the header, i.e. the smallest tile offset minus one,
/// and it only ever shrinks.
#[derive(Clone, Debug)]
pub struct TileRangeRegistry {
    tiles: HashMap<usize, TileEntry>,
    header_size: u64,
    first_tile: Option<TileEntry>,
}

impl TileRangeRegistry {
    pub fn new(default_header_size: u64) -> Self {
        Self {
            tiles: HashMap::new(),
            header_size: default_header_size,
            first_tile: None,
        }
    }

    /// Records a tile, replacing any earlier entry for the same index.
    pub fn register(&mut self, index: usize, offset: u64, byte_length: u64) -> TileEntry {
        let entry = TileEntry {
            index,
            offset,
            byte_length,
        };
        self.tiles.insert(index, entry);

        if offset > 0 {
            if self.first_tile.map_or(true, |first| offset < first.offset) {
                self.first_tile = Some(entry);
            }
            if offset - 1 < self.header_size {
                self.header_size = offset - 1;
            }
        }

        entry
    }

    pub fn get(&self, index: usize) -> Option<&TileEntry> {
        self.tiles.get(&index)
    }

    /// The tile whose bytes include `offset`
    pub fn get_at_offset(&self, offset: u64) -> Option<&TileEntry> {
        self.tiles.values().find(|tile| tile.contains(offset))
    }

    pub fn index_at(&self, offset: u64) -> Option<usize> {
        self.get_at_offset(offset).map(|tile| tile.index)
    }

    pub fn header_size(&self) -> u64 {
        self.header_size
    }

    /// Number of leading bytes that make up the header region
    pub fn header_length(&self) -> u64 {
        self.header_size.saturating_add(1)
    }

    pub fn header_range(&self) -> ByteRange {
        ByteRange {
            start: 0,
            end: self.header_size,
        }
    }

    pub fn first_tile_offset(&self) -> Option<u64> {
        self.first_tile.map(|tile| tile.offset)
    }

    pub fn first_tile_byte_length(&self) -> Option<u64> {
        self.first_tile.map(|tile| tile.byte_length)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &TileEntry> {
        self.tiles.values()
    }

    /// Tile ranges in ascending offset order, ready for composing
    pub fn ranges(&self) -> Vec<ByteRange> {
        self.ranges_for(self.tiles.keys().copied())
    }

    /// Ranges of the given registered tiles in ascending offset order.
    /// Unknown indices and empty tiles are skipped.
    pub fn ranges_for<I: IntoIterator<Item = usize>>(&self, indices: I) -> Vec<ByteRange> {
        let mut ranges: Vec<ByteRange> = indices
            .into_iter()
            .filter_map(|index| self.tiles.get(&index))
            .filter_map(TileEntry::range)
            .collect();
        ranges.sort();
        ranges.dedup();
        ranges
    }
}

impl Display for TileRangeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TileRangeRegistry({} tiles, header {})",
            self.tiles.len(),
            self.header_range()
        )
    }
}
