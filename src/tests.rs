//! Crate-level property tests for the invariants in spec.md §8 that cut
//! across modules (case folding, numeric round-trips, the partition
//! property of the worker claim loop). Module-local behavior has its own
//! `#[cfg(test)]` block next to the code it tests; the end-to-end
//! scenarios S1-S6 live in `tests/filter.rs`.

use proptest::prelude::*;

use crate::bytestring::ByteString;
use crate::config::FilterConfig;
use crate::filter::{Filter, ResultItem};
use crate::heap::Heap;
use crate::table::test_support::uint32_table;
use crate::table::Table;
use crate::types::{ColumnType, Value};

fn ascii_fold_naive(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .map(|b| if b.is_ascii_uppercase() { b + (b'a' - b'A') } else { *b })
        .collect()
}

proptest! {
    /// Invariant 4: `equals_case` agrees with independently-folded equality.
    #[test]
    fn equals_case_matches_naive_ascii_fold(a in prop::collection::vec(any::<u8>(), 0..32), b in prop::collection::vec(any::<u8>(), 0..32)) {
        let lhs = ByteString::new(&a);
        let rhs = ByteString::new(&b);
        prop_assert_eq!(lhs.equals_case(&rhs), ascii_fold_naive(&a) == ascii_fold_naive(&b));
    }

    /// Invariant 4: reflexivity holds for any byte string.
    #[test]
    fn equals_case_is_reflexive(a in prop::collection::vec(any::<u8>(), 0..32)) {
        let s = ByteString::new(&a);
        prop_assert!(s.equals_case(&s));
    }

    /// Invariant 4: the empty needle always matches `contains_case`.
    #[test]
    fn contains_case_empty_needle_always_matches(a in prop::collection::vec(any::<u8>(), 0..32)) {
        let haystack = ByteString::new(&a);
        prop_assert!(haystack.contains_case(&ByteString::new(b"")));
    }

    /// Invariant 5: every numeric type round-trips any representable value.
    #[test]
    fn uint32_round_trips(v in any::<u32>()) {
        let mut buf = [0u8; 4];
        ColumnType::UInt32.set(&mut buf, 0, 4, &Value::U32(v)).unwrap();
        let got = ColumnType::UInt32.get(&buf, 0, 4).unwrap();
        prop_assert_eq!(got, Value::U32(v));
    }

    #[test]
    fn int32_round_trips(v in any::<i32>()) {
        let mut buf = [0u8; 4];
        ColumnType::Int32.set(&mut buf, 0, 4, &Value::I32(v)).unwrap();
        let got = ColumnType::Int32.get(&buf, 0, 4).unwrap();
        prop_assert_eq!(got, Value::I32(v));
    }

    /// Invariant 1: every row index in [0, rowCount) is visited exactly
    /// once across the whole worker pool, for varied row counts, batch
    /// sizes, and worker counts.
    #[test]
    fn partition_property_holds(
        row_count in 1u32..500,
        batch_size in 1u32..64,
        worker_count in 1usize..6,
    ) {
        let values: Vec<u32> = (0..row_count).collect();
        let heap = Heap::new(4 * 1024 * 1024);
        let block = uint32_table(&heap, &values);
        let table = Table::bind(block).unwrap();
        let mut config = FilterConfig::default();
        config.row_batch_size = batch_size;
        config.worker_count = worker_count;
        let filter = Filter::new(&table, config);
        let projection = vec![ResultItem { column: None, ty: ColumnType::UInt32, size: 4 }];
        let result = filter.run(&vec![], &projection).unwrap();

        prop_assert_eq!(result.count, row_count);
        prop_assert!(!result.truncated);
        let mut seen: Vec<u32> = (0..result.count)
            .map(|i| {
                let start = (i * result.row_size) as usize;
                u32::from_le_bytes(result.block.view()[start..start + 4].try_into().unwrap())
            })
            .collect();
        seen.sort();
        let expected: Vec<u32> = (0..row_count).collect();
        prop_assert_eq!(seen, expected);
    }
}
