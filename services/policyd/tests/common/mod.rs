//! Behaviour shared by every `PolicyStore` backend.
#![allow(dead_code)]

use policyd::store::{PolicyStore, StoreError};
use std::time::Duration;
use warden_authz::{Filter, PolicyRule, field_matches};

pub fn v(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

pub async fn rows(store: &dyn PolicyStore) -> Vec<(String, Vec<String>)> {
    store
        .load_all()
        .await
        .expect("load_all")
        .into_iter()
        .map(|rule| (rule.ptype, rule.values))
        .collect()
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn add_then_load_has_rule_once(store: &dyn PolicyStore) {
    store.add_rule("p", &v(&["role::1", "/menu", "GET"])).await.expect("add");
    let loaded = rows(store).await;
    let hits = loaded
        .iter()
        .filter(|(ptype, values)| ptype == "p" && *values == v(&["role::1", "/menu", "GET"]))
        .count();
    assert_eq!(hits, 1);

    let err = store
        .add_rule("p", &v(&["role::1", "/menu", "GET"]))
        .await
        .expect_err("duplicate");
    assert!(matches!(err, StoreError::Conflict(_)), "{err}");
}

pub async fn remove_rule_reports_presence(store: &dyn PolicyStore) {
    store.add_rule("g", &v(&["user::1", "role::1"])).await.expect("add");
    assert!(store.remove_rule("g", &v(&["user::1", "role::1"])).await.expect("remove"));
    assert!(rows(store).await.is_empty());
    assert!(!store.remove_rule("g", &v(&["user::1", "role::1"])).await.expect("remove again"));
}

pub async fn update_rule_is_not_reinvocable(store: &dyn PolicyStore) {
    store.add_rule("p", &v(&["role::1", "/menu", "GET"])).await.expect("add");
    store
        .update_rule("p", &v(&["role::1", "/menu", "GET"]), &v(&["role::1", "/menu", "POST"]))
        .await
        .expect("first update");
    let err = store
        .update_rule("p", &v(&["role::1", "/menu", "GET"]), &v(&["role::1", "/menu", "POST"]))
        .await
        .expect_err("second update");
    assert!(matches!(err, StoreError::NotFound(_)), "{err}");
    assert_eq!(rows(store).await, vec![("p".to_string(), v(&["role::1", "/menu", "POST"]))]);
}

pub async fn update_rule_clears_fields_past_new(store: &dyn PolicyStore) {
    store.add_rule("p", &v(&["role::1", "/menu", "GET"])).await.expect("add");
    store
        .update_rule("p", &v(&["role::1", "/menu", "GET"]), &v(&["role::2"]))
        .await
        .expect("update");
    assert_eq!(rows(store).await, vec![("p".to_string(), v(&["role::2"]))]);
}

pub async fn update_rule_keeps_columns_past_rewrite(store: &dyn PolicyStore) {
    store
        .add_rule("p", &v(&["role::1", "/a", "GET", "x", "y"]))
        .await
        .expect("add");
    store
        .update_rule("p", &v(&["role::1", "/a", "GET"]), &v(&["role::1", "/b"]))
        .await
        .expect("update");
    assert_eq!(
        rows(store).await,
        vec![("p".to_string(), v(&["role::1", "/b", "", "x", "y"]))]
    );

    // The cleared column still matches as empty.
    assert!(
        store
            .remove_rule("p", &v(&["role::1", "/b", "", "x"]))
            .await
            .expect("remove")
    );
    assert!(rows(store).await.is_empty());
}

pub async fn remove_filtered_by_first_field(store: &dyn PolicyStore) {
    let seed = [
        v(&["r::1", "/a", "GET"]),
        v(&["r::1", "/b", "POST", "tenant-1"]),
        v(&["r::2", "/a", "GET"]),
        v(&["r::11", "/a", "GET"]),
    ];
    store.add_rules("p", &seed).await.expect("seed");
    assert!(
        store
            .remove_filtered("p", 0, &field_matches(&["r::1"]))
            .await
            .expect("remove")
    );
    let left: Vec<Vec<String>> = rows(store).await.into_iter().map(|(_, values)| values).collect();
    assert_eq!(left, vec![v(&["r::2", "/a", "GET"]), v(&["r::11", "/a", "GET"])]);

    // Windows that leave v0..v5 fail closed.
    assert!(!store.remove_filtered("p", 6, &field_matches(&["x"])).await.expect("oob"));
    assert!(
        !store
            .remove_filtered("p", 4, &field_matches(&["a", "b", "c"]))
            .await
            .expect("oob window")
    );
    assert_eq!(rows(store).await.len(), 2);
}

pub async fn remove_filtered_treats_empty_as_wildcard(store: &dyn PolicyStore) {
    store
        .add_rules("p", &[v(&["r::1", "/a", "GET"]), v(&["r::2", "/a", "POST"])])
        .await
        .expect("seed");
    assert!(
        store
            .remove_filtered("p", 0, &field_matches(&["", "/a", "GET"]))
            .await
            .expect("remove")
    );
    assert_eq!(rows(store).await, vec![("p".to_string(), v(&["r::2", "/a", "POST"]))]);
}

pub async fn remove_rules_matches_column_wise(store: &dyn PolicyStore) {
    store
        .add_rules(
            "p",
            &[
                v(&["alice", "/a", "GET"]),
                v(&["bob", "/b", "POST"]),
                v(&["alice", "/b", "POST"]),
            ],
        )
        .await
        .expect("seed");
    // Column sets {alice,bob} x {/a,/b} x {GET,POST} also cover the third row.
    let removed = store
        .remove_rules("p", &[v(&["alice", "/a", "GET"]), v(&["bob", "/b", "POST"])])
        .await
        .expect("remove");
    assert_eq!(removed, 3);
    assert!(rows(store).await.is_empty());
}

pub async fn load_filtered_is_ordered(store: &dyn PolicyStore) {
    store.add_rule("p", &v(&["r::2", "/a", "GET"])).await.expect("add");
    store.add_rule("g", &v(&["user::1", "r::2"])).await.expect("add");
    store.add_rule("p", &v(&["r::1", "/a", "GET"])).await.expect("add");
    store.add_rule("p", &v(&["r::3", "/a", "GET"])).await.expect("add");

    let filter = Filter::new()
        .ptype("p")
        .field(0, ["r::1", "r::2"])
        .expect("filter");
    let loaded: Vec<Vec<String>> = store
        .load_filtered(&filter)
        .await
        .expect("load")
        .into_iter()
        .map(|rule| rule.values)
        .collect();
    assert_eq!(loaded, vec![v(&["r::2", "/a", "GET"]), v(&["r::1", "/a", "GET"])]);

    let everything = store.load_filtered(&Filter::new()).await.expect("load");
    assert_eq!(everything.len(), 4);
}

pub async fn save_all_replaces_everything(store: &dyn PolicyStore) {
    store.add_rule("p", &v(&["old", "/a", "GET"])).await.expect("add");
    let snapshot = vec![
        PolicyRule::new("p", ["role::1", "/menu", "GET"]).expect("rule"),
        PolicyRule::new("g", ["user::1", "role::1"]).expect("rule"),
    ];
    store.save_all(&snapshot).await.expect("save");
    assert_eq!(
        rows(store).await,
        vec![
            ("p".to_string(), v(&["role::1", "/menu", "GET"])),
            ("g".to_string(), v(&["user::1", "role::1"])),
        ]
    );

    // A conflicting snapshot leaves the previous one in place.
    let duplicate = vec![snapshot[0].clone(), snapshot[0].clone()];
    assert!(store.save_all(&duplicate).await.is_err());
    assert_eq!(rows(store).await.len(), 2);
}

pub async fn update_rules_pairs_by_position(store: &dyn PolicyStore) {
    store
        .add_rules("g", &[v(&["u1", "r1"]), v(&["u2", "r1"])])
        .await
        .expect("seed");
    let err = store
        .update_rules("g", &[v(&["u1", "r1"])], &[])
        .await
        .expect_err("length mismatch");
    assert!(matches!(err, StoreError::LengthMismatch { old: 1, new: 0 }));

    store
        .update_rules(
            "g",
            &[v(&["u1", "r1"]), v(&["u2", "r1"])],
            &[v(&["u1", "r2"]), v(&["u2", "r2"])],
        )
        .await
        .expect("update");
    assert_eq!(
        rows(store).await,
        vec![
            ("g".to_string(), v(&["u1", "r2"])),
            ("g".to_string(), v(&["u2", "r2"])),
        ]
    );

    // One missing pair rejects the whole batch.
    let err = store
        .update_rules(
            "g",
            &[v(&["u1", "r2"]), v(&["nobody", "r1"])],
            &[v(&["u1", "r3"]), v(&["nobody", "r3"])],
        )
        .await
        .expect_err("missing pair");
    assert!(matches!(err, StoreError::NotFound(_)));
    assert!(rows(store).await.contains(&("g".to_string(), v(&["u1", "r2"]))));
}

pub async fn update_filtered_returns_replaced_rows(store: &dyn PolicyStore) {
    store
        .add_rules(
            "p",
            &[v(&["r::1", "/a", "GET"]), v(&["r::1", "/b", "GET"]), v(&["r::2", "/a", "GET"])],
        )
        .await
        .expect("seed");
    let old = store
        .update_filtered("p", &[v(&["r::1", "/c", "GET"])], 0, &field_matches(&["r::1"]))
        .await
        .expect("update");
    assert_eq!(old, vec![v(&["r::1", "/a", "GET"]), v(&["r::1", "/b", "GET"])]);
    let left: Vec<Vec<String>> = rows(store).await.into_iter().map(|(_, values)| values).collect();
    assert_eq!(left, vec![v(&["r::2", "/a", "GET"]), v(&["r::1", "/c", "GET"])]);

    let err = store
        .update_filtered("p", &[], 6, &field_matches(&["x"]))
        .await
        .expect_err("bad window");
    assert!(matches!(err, StoreError::InvalidFilter(_)));
}
