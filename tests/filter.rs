//! End-to-end scenarios from spec.md §8, driven entirely through the
//! public API: build a KRDA table, compile rules, run the coordinator,
//! read back the packed result rows.

use kradata::heap::Heap;
use kradata::rule::{Leaf, Operation, RuleValue};
use kradata::table::Table;
use kradata::types::ColumnType;
use kradata::{Filter, FilterConfig, ResultItem};

struct ColumnSpec {
    name: &'static str,
    ty: ColumnType,
    size: u32,
}

/// Serializes a KRDA table (spec.md §6) from column specs and a row filler,
/// then binds it to a fresh `Table`.
fn build_table(heap: &Heap, columns: &[ColumnSpec], row_count: usize, fill_row: impl Fn(usize, &mut [u8])) -> Table {
    let row_stride: u32 = columns.iter().map(|c| c.size).sum();

    let mut header = Vec::new();
    header.extend_from_slice(b"KRDA");
    header.extend_from_slice(&1u16.to_le_bytes()); // version
    header.extend_from_slice(&0u16.to_le_bytes()); // flags
    header.extend_from_slice(&(row_count as u32).to_le_bytes());
    header.extend_from_slice(&row_stride.to_le_bytes());
    header.extend_from_slice(&(columns.len() as u16).to_le_bytes());
    header.extend_from_slice(&0u16.to_le_bytes()); // reserved

    let mut offset = 0u32;
    for column in columns {
        header.push(column.name.len() as u8);
        header.extend_from_slice(column.name.as_bytes());
        let type_name = column.ty.name();
        header.push(type_name.len() as u8);
        header.extend_from_slice(type_name.as_bytes());
        header.extend_from_slice(&offset.to_le_bytes());
        header.extend_from_slice(&column.size.to_le_bytes());
        offset += column.size;
    }
    while header.len() % 8 != 0 {
        header.push(0);
    }

    let header_len = header.len();
    header.resize(header_len + row_count * row_stride as usize, 0);
    for r in 0..row_count {
        let start = header_len + r * row_stride as usize;
        fill_row(r, &mut header[start..start + row_stride as usize]);
    }

    let block = heap.allocate(header.len()).unwrap();
    block.view_mut().copy_from_slice(&header);
    Table::bind(block).unwrap()
}

fn write_string(buf: &mut [u8], s: &str) {
    let bytes = s.as_bytes();
    buf[0..2].copy_from_slice(&(bytes.len() as u16).to_le_bytes());
    buf[2..2 + bytes.len()].copy_from_slice(bytes);
}

fn row_index_item() -> ResultItem {
    ResultItem { column: None, ty: ColumnType::UInt32, size: 4 }
}

fn u32_item(name: &'static str) -> ResultItem {
    ResultItem { column: Some(name.into()), ty: ColumnType::UInt32, size: 4 }
}

fn read_u32(view: &[u8], row_size: u32, row: u32, col_offset: u32) -> u32 {
    let start = (row * row_size + col_offset) as usize;
    u32::from_le_bytes(view[start..start + 4].try_into().unwrap())
}

#[test]
fn s1_trivial_match() {
    let heap = Heap::new(1 << 16);
    let values = [10u32, 20, 30];
    let table = build_table(
        &heap,
        &[ColumnSpec { name: "x", ty: ColumnType::UInt32, size: 4 }],
        3,
        |row, buf| buf.copy_from_slice(&values[row].to_le_bytes()),
    );

    let rules = vec![vec![Leaf {
        name: "x".into(),
        operation: Operation::Equal,
        value: RuleValue::Num(20.0),
    }]];
    let projection = vec![row_index_item(), u32_item("x")];

    let filter = Filter::new(&table, FilterConfig::default());
    let result = filter.run(&rules, &projection).unwrap();

    assert_eq!(result.count, 1);
    assert!(!result.truncated);
    assert_eq!(read_u32(result.block.view(), result.row_size, 0, 0), 1);
    assert_eq!(read_u32(result.block.view(), result.row_size, 0, 4), 20);
}

#[test]
fn s2_or_of_ands() {
    let heap = Heap::new(1 << 16);
    let a_values = [1u32, 2, 3];
    let b_values = ["foo", "bar", "foo"];
    let table = build_table(
        &heap,
        &[
            ColumnSpec { name: "a", ty: ColumnType::UInt32, size: 4 },
            ColumnSpec { name: "b", ty: ColumnType::String, size: 8 },
        ],
        3,
        |row, buf| {
            buf[0..4].copy_from_slice(&a_values[row].to_le_bytes());
            write_string(&mut buf[4..12], b_values[row]);
        },
    );

    let rules = vec![
        vec![
            Leaf { name: "a".into(), operation: Operation::MoreThan, value: RuleValue::Num(1.0) },
            Leaf { name: "b".into(), operation: Operation::Equal, value: RuleValue::Str("foo".into()) },
        ],
        vec![Leaf { name: "a".into(), operation: Operation::Equal, value: RuleValue::Num(2.0) }],
    ];

    let filter = Filter::new(&table, FilterConfig::default());
    let result = filter.run(&rules, &[row_index_item()]).unwrap();

    assert_eq!(result.count, 2);
    let mut matched: Vec<u32> = (0..result.count)
        .map(|i| read_u32(result.block.view(), result.row_size, i, 0))
        .collect();
    matched.sort();
    assert_eq!(matched, vec![1, 2]);
}

#[test]
fn s3_case_insensitive_contains() {
    let heap = Heap::new(1 << 16);
    let names = ["Alpha", "BETA", "gamma"];
    let table = build_table(
        &heap,
        &[ColumnSpec { name: "name", ty: ColumnType::String, size: 16 }],
        3,
        |row, buf| write_string(buf, names[row]),
    );

    let rules = vec![vec![Leaf {
        name: "name".into(),
        operation: Operation::Contains,
        value: RuleValue::Str("AL".into()),
    }]];

    let filter = Filter::new(&table, FilterConfig::default());
    let result = filter.run(&rules, &[row_index_item()]).unwrap();

    assert_eq!(result.count, 1);
    assert_eq!(read_u32(result.block.view(), result.row_size, 0, 0), 0);
}

#[test]
fn s4_empty_rules_match_all() {
    let heap = Heap::new(1 << 16);
    let values = [1u32, 2, 3, 4, 5];
    let table = build_table(
        &heap,
        &[ColumnSpec { name: "x", ty: ColumnType::UInt32, size: 4 }],
        5,
        |row, buf| buf.copy_from_slice(&values[row].to_le_bytes()),
    );

    let filter = Filter::new(&table, FilterConfig::default());
    let result = filter.run(&vec![], &[row_index_item()]).unwrap();

    assert_eq!(result.count, 5);
    assert!(!result.truncated);
}

#[test]
fn s5_result_truncation_no_overlap() {
    let heap = Heap::new(1 << 16);
    let values: Vec<u32> = (0..10).collect();
    let table = build_table(
        &heap,
        &[ColumnSpec { name: "x", ty: ColumnType::UInt32, size: 4 }],
        10,
        |row, buf| buf.copy_from_slice(&values[row].to_le_bytes()),
    );

    let mut config = FilterConfig::default();
    config.max_result_bytes = Some(3 * 4);
    let filter = Filter::new(&table, config);
    let result = filter.run(&vec![], &[row_index_item()]).unwrap();

    assert_eq!(result.count, 3);
    assert!(result.truncated);
    let mut matched: Vec<u32> = (0..result.count)
        .map(|i| read_u32(result.block.view(), result.row_size, i, 0))
        .collect();
    matched.sort();
    matched.dedup();
    assert_eq!(matched.len(), 3);
}

#[test]
fn s6_parallel_determinism_of_content() {
    let row_count = 5000u32;
    let values: Vec<u32> = (0..row_count).collect();

    let mut previous: Option<Vec<u32>> = None;
    for worker_count in [1usize, 2, 4, 8] {
        let heap = Heap::new(4 << 20);
        let table = build_table(
            &heap,
            &[ColumnSpec { name: "x", ty: ColumnType::UInt32, size: 4 }],
            row_count as usize,
            |row, buf| buf.copy_from_slice(&values[row].to_le_bytes()),
        );

        let mut config = FilterConfig::default();
        config.worker_count = worker_count;
        let filter = Filter::new(&table, config);
        let rules = vec![vec![Leaf {
            name: "x".into(),
            operation: Operation::MoreThan,
            value: RuleValue::Num(2500.0),
        }]];
        let result = filter.run(&rules, &[row_index_item()]).unwrap();

        let mut matched: Vec<u32> = (0..result.count)
            .map(|i| read_u32(result.block.view(), result.row_size, i, 0))
            .collect();
        matched.sort();

        if let Some(ref expected) = previous {
            assert_eq!(&matched, expected, "mismatch at worker_count={worker_count}");
        } else {
            previous = Some(matched);
        }
    }
}
