//! Property-based tests for serial arithmetic and TXT value normalization

use proptest::prelude::*;
use transfer_endpoint::dns::materializer::{normalize_txt_value, TXT_CHUNK_LEN};
use transfer_endpoint::dns::protocol::QueryType;
use transfer_endpoint::dns::rdata::RecordData;
use transfer_endpoint::dns::serial::{next_serial, SERIAL_MAX};

// Printable text without the characters the presentation format escapes
fn txt_value_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9=:;,. -]{0,800}").unwrap()
}

proptest! {
    #[test]
    fn test_next_serial_never_zero(value in any::<u32>()) {
        let next = next_serial(value);
        prop_assert!(next >= 1);
        prop_assert!(next <= SERIAL_MAX);
    }

    #[test]
    fn test_next_serial_increments_in_range(value in 1..SERIAL_MAX) {
        prop_assert_eq!(next_serial(value), value + 1);
    }

    #[test]
    fn test_txt_value_survives_normalization(value in txt_value_strategy()) {
        let normalized = normalize_txt_value(&value);
        let parsed = RecordData::from_text(QueryType::Txt, &normalized, "example.com").unwrap();

        match parsed {
            RecordData::Txt(strings) => {
                prop_assert!(strings.iter().all(|s| s.len() <= TXT_CHUNK_LEN));
                let expected_chunks = if value.is_empty() {
                    1
                } else {
                    (value.len() + TXT_CHUNK_LEN - 1) / TXT_CHUNK_LEN
                };
                prop_assert_eq!(strings.len(), expected_chunks);
                prop_assert_eq!(strings.concat(), value.into_bytes());
            }
            other => prop_assert!(false, "Expected TXT data, got {:?}", other),
        }
    }

    #[test]
    fn test_quoted_value_is_not_double_quoted(value in txt_value_strategy()) {
        let quoted = format!("\"{}\"", value);
        prop_assert_eq!(normalize_txt_value(&quoted), normalize_txt_value(&value));
    }
}

#[test]
fn test_serial_wraps_to_one() {
    assert_eq!(next_serial(SERIAL_MAX), 1);
    assert_eq!(next_serial(0), 1);
}
