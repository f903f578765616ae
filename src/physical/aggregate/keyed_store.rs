//! Keyed aggregation store
//!
//! A hash table from group key to a fixed region of value slots. The slot
//! layout is described by a [`ValueSchema`] that aggregate functions extend
//! before execution; every per-worker store of a query shares the same schema,
//! so a function's offset addresses the same slots in all of them.

use crate::physical::page_frame::WideColumn;
use crate::types::WideInt256;
use hashbrown::HashMap;

/// Group key; timestamps and integer group columns both map onto `i64`
pub type GroupKey = i64;

/// Key for rows whose group column is null
///
/// Integer keys share the `i64` domain, so a group value of `i64::MIN` is
/// indistinguishable from null and lands in the NULL group.
pub const NULL_KEY: GroupKey = i64::MIN;

const MICROS_PER_HOUR: i64 = 3_600_000_000;

/// How raw key column values become group keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Group column value as-is
    Int,
    /// Microsecond timestamp truncated to hour of day
    Hour,
}

impl KeyKind {
    #[inline]
    pub fn key_of(self, raw: Option<i64>) -> GroupKey {
        match raw {
            None => NULL_KEY,
            Some(v) => match self {
                KeyKind::Int => v,
                KeyKind::Hour => v.div_euclid(MICROS_PER_HOUR).rem_euclid(24),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Long,
    Long256,
}

/// Slot layout of a store's value region
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueSchema {
    types: Vec<ValueType>,
}

impl ValueSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a slot and return its offset
    pub fn push(&mut self, value_type: ValueType) -> usize {
        self.types.push(value_type);
        self.types.len() - 1
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, offset: usize) -> Option<ValueType> {
        self.types.get(offset).copied()
    }
}

/// Capabilities the aggregation core needs from a keyed store
///
/// Sum slots come in pairs: `offset` holds the wrapping 256-bit sum and
/// `offset + 1` the count of non-null values (in `l0`).
pub trait KeyedStore: Send {
    fn schema(&self) -> &ValueSchema;

    /// Value a slot of a newly created group starts from
    fn set_initial_slot(&mut self, offset: usize, value: WideInt256);

    /// Create groups for `keys` without touching their values
    fn register_distinct_keys(&mut self, keys: &[GroupKey]);

    /// Add each row's value to its group's sum pair
    fn add_wide(&mut self, keys: &[GroupKey], values: &WideColumn<'_>, offset: usize);

    /// Fold `other`'s sum pair at `offset` into this store
    fn merge_sums(&mut self, other: &dyn KeyedStore, offset: usize);

    /// Fold a scalar sum computed outside the keyed path into the NULL key
    fn wrap_up_sums(&mut self, offset: usize, sum: WideInt256, count: u64);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, key: GroupKey) -> Option<&[WideInt256]>;

    /// Every group, in unspecified order
    fn groups(&self) -> Box<dyn Iterator<Item = (GroupKey, &[WideInt256])> + '_>;
}

/// hashbrown-backed store
#[derive(Debug, Clone)]
pub struct HashKeyedStore {
    schema: ValueSchema,
    initial: Vec<WideInt256>,
    groups: HashMap<GroupKey, Box<[WideInt256]>>,
}

impl HashKeyedStore {
    pub fn new(schema: &ValueSchema) -> Self {
        Self {
            schema: schema.clone(),
            initial: vec![WideInt256::ZERO; schema.len()],
            groups: HashMap::new(),
        }
    }

    fn entry(&mut self, key: GroupKey) -> &mut [WideInt256] {
        let initial = &self.initial;
        self.groups
            .entry(key)
            .or_insert_with(|| initial.clone().into_boxed_slice())
    }
}

#[inline]
fn add_to_pair(slots: &mut [WideInt256], offset: usize, sum: &WideInt256, count: u64) {
    slots[offset] = slots[offset].wrapping_add(sum);
    let total = slots[offset + 1].l0().wrapping_add(count);
    slots[offset + 1] = WideInt256::from(total);
}

impl KeyedStore for HashKeyedStore {
    fn schema(&self) -> &ValueSchema {
        &self.schema
    }

    fn set_initial_slot(&mut self, offset: usize, value: WideInt256) {
        self.initial[offset] = value;
    }

    fn register_distinct_keys(&mut self, keys: &[GroupKey]) {
        for &key in keys {
            self.entry(key);
        }
    }

    fn add_wide(&mut self, keys: &[GroupKey], values: &WideColumn<'_>, offset: usize) {
        debug_assert_eq!(keys.len(), values.len());
        for (row, &key) in keys.iter().enumerate() {
            let value = values.get(row);
            let slots = self.entry(key);
            if !value.is_null() {
                add_to_pair(slots, offset, &value, 1);
            }
        }
    }

    fn merge_sums(&mut self, other: &dyn KeyedStore, offset: usize) {
        for (key, theirs) in other.groups() {
            let sum = theirs[offset];
            let count = theirs[offset + 1].l0();
            let slots = self.entry(key);
            add_to_pair(slots, offset, &sum, count);
        }
    }

    fn wrap_up_sums(&mut self, offset: usize, sum: WideInt256, count: u64) {
        if count == 0 {
            return;
        }
        let slots = self.entry(NULL_KEY);
        add_to_pair(slots, offset, &sum, count);
    }

    fn len(&self) -> usize {
        self.groups.len()
    }

    fn get(&self, key: GroupKey) -> Option<&[WideInt256]> {
        self.groups.get(&key).map(|slots| &slots[..])
    }

    fn groups(&self) -> Box<dyn Iterator<Item = (GroupKey, &[WideInt256])> + '_> {
        Box::new(self.groups.iter().map(|(k, v)| (*k, &v[..])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WIDE_INT_BYTES;

    fn sum_schema() -> (ValueSchema, usize) {
        let mut schema = ValueSchema::new();
        let offset = schema.push(ValueType::Long256);
        schema.push(ValueType::Long);
        (schema, offset)
    }

    fn column_bytes(values: &[WideInt256]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_key_kinds() {
        assert_eq!(KeyKind::Int.key_of(Some(42)), 42);
        assert_eq!(KeyKind::Int.key_of(None), NULL_KEY);
        // shares the null sentinel
        assert_eq!(KeyKind::Int.key_of(Some(i64::MIN)), NULL_KEY);
        // 1970-01-02T05:30:00
        let ts = (24 + 5) * MICROS_PER_HOUR + 30 * 60 * 1_000_000;
        assert_eq!(KeyKind::Hour.key_of(Some(ts)), 5);
        // before the epoch still lands in 0..24
        assert_eq!(KeyKind::Hour.key_of(Some(-1)), 23);
    }

    #[test]
    fn test_add_wide_skips_nulls() {
        let (schema, offset) = sum_schema();
        let mut store = HashKeyedStore::new(&schema);
        let bytes = column_bytes(&[
            WideInt256::from(1u64),
            WideInt256::from(2u64),
            WideInt256::NULL,
            WideInt256::from(u64::MAX),
        ]);
        assert_eq!(bytes.len(), 4 * WIDE_INT_BYTES);
        let values = WideColumn::from_bytes(&bytes, 4).unwrap();
        store.add_wide(&[10, 20, 30, 10], &values, offset);

        assert_eq!(store.len(), 3);
        let g10 = store.get(10).unwrap();
        assert_eq!(g10[offset], WideInt256::new(0, 1, 0, 0));
        assert_eq!(g10[offset + 1].l0(), 2);
        let g30 = store.get(30).unwrap();
        assert_eq!(g30[offset + 1].l0(), 0);
    }

    #[test]
    fn test_merge_copies_missing_keys() {
        let (schema, offset) = sum_schema();
        let mut a = HashKeyedStore::new(&schema);
        let mut b = HashKeyedStore::new(&schema);
        let bytes = column_bytes(&[WideInt256::from(3u64), WideInt256::from(4u64)]);
        let values = WideColumn::from_bytes(&bytes, 2).unwrap();
        a.add_wide(&[1, 2], &values, offset);
        b.add_wide(&[2, 3], &values, offset);

        a.merge_sums(&b, offset);
        assert_eq!(a.len(), 3);
        assert_eq!(a.get(1).unwrap()[offset], WideInt256::from(3u64));
        assert_eq!(a.get(2).unwrap()[offset], WideInt256::from(7u64));
        assert_eq!(a.get(2).unwrap()[offset + 1].l0(), 2);
        assert_eq!(a.get(3).unwrap()[offset], WideInt256::from(4u64));
    }

    #[test]
    fn test_wrap_up_targets_null_key() {
        let (schema, offset) = sum_schema();
        let mut store = HashKeyedStore::new(&schema);
        store.wrap_up_sums(offset, WideInt256::from(9u64), 0);
        assert!(store.is_empty());

        store.wrap_up_sums(offset, WideInt256::new(1, 2, 3, 4), 5);
        let slots = store.get(NULL_KEY).unwrap();
        assert_eq!(slots[offset], WideInt256::new(1, 2, 3, 4));
        assert_eq!(slots[offset + 1].l0(), 5);
    }

    #[test]
    fn test_initial_slot_applies_to_new_groups() {
        let (schema, offset) = sum_schema();
        let mut store = HashKeyedStore::new(&schema);
        store.set_initial_slot(offset, WideInt256::from(100u64));
        store.register_distinct_keys(&[7, 7, 8]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(7).unwrap()[offset], WideInt256::from(100u64));
    }
}
