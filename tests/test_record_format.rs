/// Property-based tests for the tab-separated record formats
use chainstore::record::{Record, RecordKind};
use chainstore::record_io::RecordReader;
use chainstore::Error;
use proptest::prelude::*;
use std::io::Cursor;

fn name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9_.|-]{0,12}"
}

fn line_for(kind: RecordKind) -> BoxedStrategy<String> {
    match kind {
        RecordKind::Named => (name(), name(), any::<u32>(), any::<u32>())
            .prop_map(|(n, s, a, b)| format!("{n}\t{s}\t{a}\t{b}"))
            .boxed(),
        RecordKind::Grouped => (any::<u32>(), name(), name(), any::<u32>(), any::<u32>())
            .prop_map(|(id, n, s, a, b)| format!("{id}\t{n}\t{s}\t{a}\t{b}"))
            .boxed(),
        RecordKind::Fragment => (
            (any::<u32>(), name(), any::<u32>(), any::<u32>()),
            (name(), any::<u32>(), any::<u32>()),
            (0.0f64..1.0, -100i32..-1, 0u32..100_000, 0u32..=1000),
        )
            .prop_map(|((id, q, qs, qe), (s, ss, se), (mantissa, exp, score, ident))| {
                let e_value = mantissa * 10f64.powi(exp);
                format!(
                    "{id}\t{q}\t{qs}\t{qe}\t{s}\t{ss}\t{se}\t{e_value:e}\t{score}\t{}",
                    f64::from(ident) / 10.0
                )
            })
            .boxed(),
    }
}

fn any_line() -> impl Strategy<Value = String> {
    prop_oneof![
        line_for(RecordKind::Named),
        line_for(RecordKind::Grouped),
        line_for(RecordKind::Fragment),
    ]
}

proptest! {
    /// Property: parse -> serialize -> parse is the identity
    #[test]
    fn prop_round_trip(line in any_line()) {
        let first = Record::from_line(&line).unwrap();
        let again = Record::from_line(&first.to_string()).unwrap();
        prop_assert_eq!(first, again);
    }

    /// Property: a line is only accepted under its own kind
    #[test]
    fn prop_kind_is_exact(line in any_line()) {
        let detected = Record::from_line(&line).unwrap().kind();
        for kind in RecordKind::ALL {
            prop_assert_eq!(Record::parse_as(&line, kind).is_ok(), kind == detected);
        }
    }
}

#[test]
fn test_one_bad_line_rejects_the_batch() {
    let input = "1\tq\t1\t10\ts\t1\t10\t0.1\t5\t90\n\
                 2\tq\t1\t10\ts\t1\t10\t0.1\t5\n";
    let mut reader = RecordReader::with_kind(Cursor::new(input), RecordKind::Fragment);
    match reader.read_all() {
        Err(Error::MalformedRecord(msg)) => assert!(msg.contains("line 2"), "{msg}"),
        other => panic!("expected malformed record, got {other:?}"),
    }
}

#[test]
fn test_windows_line_endings() {
    let input = "orf1\tchr1\t10\t90\r\norf2\tchr1\t100\t190\r\n";
    let records = RecordReader::new(Cursor::new(input)).read_all().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].to_string(), "orf2\tchr1\t100\t190");
}
