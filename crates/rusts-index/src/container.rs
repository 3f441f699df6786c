//! Container partitioning of series-id bitmaps
//!
//! A series id is a 32-bit value split into a 16-bit container key (high
//! bits) and a 16-bit offset inside the container (low bits). All ids sharing
//! a high key form one container. Containers never overlap, so each one can be
//! grouped and loaded by a separate task without coordination.

use roaring::RoaringBitmap;
use rusts_core::SeriesId;

/// Container key of a series id
#[inline]
pub fn high_key(series_id: SeriesId) -> u16 {
    (series_id >> 16) as u16
}

/// Offset of a series id inside its container
#[inline]
pub fn low_key(series_id: SeriesId) -> u16 {
    (series_id & 0xFFFF) as u16
}

/// Rebuild a series id from its container key and offset
#[inline]
pub fn compose(high_key: u16, low_key: u16) -> SeriesId {
    ((high_key as u32) << 16) | low_key as u32
}

/// All series ids sharing one high key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesContainer {
    high_key: u16,
    /// Sorted, deduplicated offsets
    low_ids: Vec<u16>,
}

impl SeriesContainer {
    /// Container key
    pub fn high_key(&self) -> u16 {
        self.high_key
    }

    /// Offsets of the series in this container, ascending
    pub fn low_ids(&self) -> &[u16] {
        &self.low_ids
    }

    /// Iterate offsets, ascending
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.low_ids.iter().copied()
    }

    /// Iterate full series ids, ascending
    pub fn series_ids(&self) -> impl Iterator<Item = SeriesId> + '_ {
        let high = self.high_key;
        self.low_ids.iter().map(move |&low| compose(high, low))
    }

    /// Check if an offset is in this container
    pub fn contains(&self, low_id: u16) -> bool {
        self.low_ids.binary_search(&low_id).is_ok()
    }

    /// Number of series in this container
    pub fn len(&self) -> usize {
        self.low_ids.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.low_ids.is_empty()
    }

    /// Bitmap of the full series ids in this container
    pub fn to_bitmap(&self) -> RoaringBitmap {
        self.series_ids().collect()
    }
}

/// Distinct high keys of a bitmap, ascending
pub fn high_keys(bitmap: &RoaringBitmap) -> Vec<u16> {
    let mut keys: Vec<u16> = Vec::new();
    for id in bitmap.iter() {
        let key = high_key(id);
        if keys.last() != Some(&key) {
            keys.push(key);
        }
    }
    keys
}

/// Split a bitmap into containers, one per distinct high key, in ascending
/// key order. The union of the returned containers equals the input.
pub fn partition(bitmap: &RoaringBitmap) -> Vec<SeriesContainer> {
    let mut containers: Vec<SeriesContainer> = Vec::new();

    // Roaring iterates in ascending order, so ids of one container are contiguous
    for id in bitmap.iter() {
        let key = high_key(id);
        match containers.last_mut() {
            Some(container) if container.high_key == key => container.low_ids.push(low_key(id)),
            _ => containers.push(SeriesContainer {
                high_key: key,
                low_ids: vec![low_key(id)],
            }),
        }
    }

    containers
}
