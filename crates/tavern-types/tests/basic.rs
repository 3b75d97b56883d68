use tavern_types::prelude::*;

#[test]
fn ids_serialize_transparently_enough() {
    let id = Id("role-1".into());
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"role-1\"");
    let back: Id = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn random_ids_are_unique() {
    assert_ne!(Id::new_random(), Id::new_random());
}

#[test]
fn now_ms_is_monotonic_enough() {
    let a = now_ms();
    let b = now_ms();
    assert!(b.0 >= a.0);
}
