use lumodb_binding::{
    decode_key, decode_value, decode_value_ref, encode_key, encode_value, DbOptions, EnvConfig,
    Environment, Key, KeyType, Value, ValueRef, ValueType,
};
use proptest::prelude::*;
use tempfile::TempDir;

fn any_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<String>().prop_map(Value::String),
        proptest::collection::vec(any::<u8>(), 0..64).prop_map(Value::Binary),
        any::<f64>()
            .prop_filter("NaN never compares equal", |n| !n.is_nan())
            .prop_map(Value::Number),
        any::<bool>().prop_map(Value::Boolean),
    ]
}

fn any_key() -> impl Strategy<Value = Key> {
    prop_oneof![
        any::<String>().prop_map(Key::String),
        any::<u32>().prop_map(Key::Uint32),
        any::<u64>().prop_map(Key::Uint64),
        proptest::collection::vec(any::<u8>(), 1..64).prop_map(Key::Binary),
    ]
}

proptest! {
    #[test]
    fn values_decode_to_what_was_encoded(value in any_value()) {
        let bytes = encode_value(&value);
        prop_assert_eq!(bytes[0], value.value_type().discriminant());
        prop_assert_eq!(decode_value(&bytes, None).unwrap(), value.clone());
        prop_assert_eq!(decode_value_ref(&bytes, None).unwrap().to_value().unwrap(), value);
    }

    #[test]
    fn keys_decode_to_what_was_encoded(key in any_key()) {
        let key_type = key.key_type();
        let bytes = encode_key(&key, key_type).unwrap();
        prop_assert_eq!(decode_key(&bytes, key_type).unwrap(), key);
    }

    #[test]
    fn string_key_order_follows_code_units(a in any::<String>(), b in any::<String>()) {
        let ea = encode_key(&Key::String(a.clone()), KeyType::String).unwrap();
        let eb = encode_key(&Key::String(b.clone()), KeyType::String).unwrap();
        let ua: Vec<u16> = a.encode_utf16().collect();
        let ub: Vec<u16> = b.encode_utf16().collect();
        // Terminator only matters when one key is a prefix of the other
        if !ua.starts_with(&ub) && !ub.starts_with(&ua) {
            prop_assert_eq!(ea.cmp(&eb), ua.cmp(&ub));
        }
    }
}

#[test]
fn requested_type_reinterprets_payload() {
    let bytes = encode_value(&Value::Binary(vec![1]));
    assert_eq!(
        decode_value_ref(&bytes, Some(ValueType::Boolean)).unwrap(),
        ValueRef::Boolean(true)
    );
    assert!(decode_value(&bytes, Some(ValueType::Number)).is_err());
}

#[test]
fn stored_values_keep_their_type() {
    let dir = TempDir::new().unwrap();
    let env = Environment::open(EnvConfig::new(dir.path())).unwrap();
    let db = env
        .open_db(&DbOptions::new().name("big").create(true).key_is_uint64(true))
        .unwrap();

    let values = [
        Value::from("ünïcødé \u{1F600}"),
        Value::Binary(Vec::new()),
        Value::Number(-0.25),
        Value::Boolean(false),
    ];
    let mut txn = env.begin_txn(false).unwrap();
    for (i, value) in values.iter().enumerate() {
        txn.put(&db, 5_000_000_000u64 + i as u64, value.clone()).unwrap();
    }
    txn.commit().unwrap();

    let txn = env.begin_txn(true).unwrap();
    for (i, value) in values.iter().enumerate() {
        let stored = txn.get(&db, 5_000_000_000u64 + i as u64).unwrap();
        assert_eq!(stored.as_ref(), Some(value));
    }
}
