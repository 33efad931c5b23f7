//! Property tests for the value and property-map text forms.

use proptest::prelude::*;
use strata_types::{NamedValueSet, Value};

fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::I64),
        prop::num::f64::NORMAL.prop_map(Value::F64),
        "[ -~]{0,32}".prop_map(Value::Str),
        any::<[u8; 16]>().prop_map(|b| Value::Uuid(uuid::Uuid::from_bytes(b))),
        (0i64..4_000_000_000_000).prop_map(|ms| {
            Value::DateTime(chrono::DateTime::from_timestamp_millis(ms).expect("in range"))
        }),
        (-86_400_000i64..86_400_000).prop_map(|ms| {
            Value::Duration(chrono::Duration::milliseconds(ms))
        }),
        prop::collection::vec(any::<i64>().prop_map(Value::I64), 0..6).prop_map(Value::List),
    ]
}

fn name_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9_. -]{0,16}".prop_map(|s| s.trim_end().to_string())
        .prop_filter("non-empty", |s| !s.is_empty())
}

proptest! {
    #[test]
    fn value_text_form_round_trips(value in value_strategy()) {
        let parsed = Value::parse_typed(&value.type_name(), &value.to_text()).unwrap();
        prop_assert_eq!(parsed, value);
    }

    #[test]
    fn named_value_set_round_trips(
        pairs in prop::collection::vec((name_strategy(), value_strategy()), 0..8)
    ) {
        let props = NamedValueSet::from_pairs(pairs).unwrap();
        let parsed = NamedValueSet::parse(&props.serialize()).unwrap();
        prop_assert_eq!(parsed, props);
    }

    #[test]
    fn comparison_is_antisymmetric(a in value_strategy(), b in value_strategy()) {
        if let (Some(ab), Some(ba)) = (a.compare(&b), b.compare(&a)) {
            prop_assert_eq!(ab, ba.reverse());
        }
    }
}
