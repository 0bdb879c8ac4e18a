//! Behavior of the store of messages waiting for an acknowledgement

use agrirouter_middleware::acknowledgement::{AcknowledgementEntry, AcknowledgementStore};
use agrirouter_middleware::protocol::TechnicalMessageType;
use agrirouter_middleware::testing::endpoint;
use chrono::Utc;
use proptest::prelude::*;
use std::time::Duration;

const DAY: i64 = 60 * 60 * 24;

fn entry_created(endpoint_id: &str, message_id: &str, age_secs: i64) -> AcknowledgementEntry {
    let mut entry = AcknowledgementEntry::new(
        endpoint_id,
        message_id,
        TechnicalMessageType::FeedHeaderQuery,
    );
    entry.created = Utc::now().timestamp() - age_secs;
    entry
}

proptest! {
    #[test]
    fn saved_entries_are_found_by_message_id(
        ids in proptest::collection::hash_set("[A-Za-z0-9-]{1,24}", 1..32)
    ) {
        let store = AcknowledgementStore::default();
        for id in &ids {
            store.save(AcknowledgementEntry::new("EP", id.as_str(), TechnicalMessageType::ListEndpoints));
        }

        prop_assert_eq!(store.len(), ids.len());
        for id in &ids {
            let found = store.find_by_message_id(id).unwrap();
            prop_assert_eq!(&found.message_id, id);
            prop_assert_eq!(found.technical_message_type, TechnicalMessageType::ListEndpoints);
        }
    }

    #[test]
    fn deleted_entries_are_gone(
        ids in proptest::collection::hash_set("[a-z0-9]{1,16}", 1..32),
        keep_every in 2usize..5
    ) {
        let store = AcknowledgementStore::default();
        for id in &ids {
            store.save(AcknowledgementEntry::new("EP", id.as_str(), TechnicalMessageType::FeedConfirm));
        }

        let (deleted, kept): (Vec<_>, Vec<_>) = ids
            .iter()
            .enumerate()
            .partition(|(index, _)| index % keep_every != 0);
        for (_, id) in &deleted {
            store.delete_by_message_id(id);
        }

        for (_, id) in &deleted {
            prop_assert!(store.find_by_message_id(id).is_none());
        }
        for (_, id) in &kept {
            prop_assert!(store.find_by_message_id(id).is_some());
        }
        prop_assert_eq!(store.len(), kept.len());
    }

    #[test]
    fn sweep_removes_exactly_the_entries_outside_the_window(
        ages in proptest::collection::vec(0i64..(14 * DAY), 1..40)
    ) {
        let store = AcknowledgementStore::default();
        for (index, age) in ages.iter().enumerate() {
            store.save(entry_created("EP", &format!("MSG-{index}"), *age));
        }
        // Keep clear of the boundary so a second passing mid-test cannot flip an entry
        let week = 7 * DAY;
        let expected_removed = ages.iter().filter(|age| **age > week + 5).count();
        let ambiguous = ages.iter().filter(|age| (week - 5..=week + 5).contains(*age)).count();
        prop_assume!(ambiguous == 0);

        let removed = store.clear_all_older_than_sweep_window();

        prop_assert_eq!(removed, expected_removed);
        prop_assert_eq!(store.len(), ages.len() - expected_removed);
    }
}

#[test]
fn test_week_old_entries_are_swept_and_recent_ones_kept() {
    let store = AcknowledgementStore::default();
    store.save(entry_created("EP1", "MSG-OLD", 8 * DAY));
    store.save(entry_created("EP1", "MSG-NEW", DAY));

    assert_eq!(store.clear_all_older_than_sweep_window(), 1);

    assert!(store.find_by_message_id("MSG-OLD").is_none());
    assert!(store.find_by_message_id("MSG-NEW").is_some());
}

#[test]
fn test_sweep_window_is_configurable() {
    let store = AcknowledgementStore::new(Duration::from_secs(60));
    store.save(entry_created("EP1", "MSG-1", 120));
    store.save(entry_created("EP1", "MSG-2", 10));

    assert_eq!(store.clear_all_older_than_sweep_window(), 1);
    assert_eq!(store.len(), 1);
    assert_eq!(store.sweep_window(), Duration::from_secs(60));
}

#[test]
fn test_saving_an_existing_message_id_replaces_the_entry() {
    let store = AcknowledgementStore::default();
    store.save(AcknowledgementEntry::new(
        "EP1",
        "MSG-1",
        TechnicalMessageType::FeedHeaderQuery,
    ));
    store.save(AcknowledgementEntry::new(
        "EP2",
        "MSG-1",
        TechnicalMessageType::Capabilities,
    ));

    assert_eq!(store.len(), 1);
    let entry = store.find_by_message_id("MSG-1").unwrap();
    assert_eq!(entry.agrirouter_endpoint_id, "EP2");
    assert_eq!(entry.technical_message_type, TechnicalMessageType::Capabilities);
}

#[test]
fn test_entries_are_listed_and_removed_per_endpoint() {
    let store = AcknowledgementStore::default();
    store.save(entry_created("ar-1", "MSG-1", 0));
    store.save(entry_created("ar-1", "MSG-2", 0));
    store.save(entry_created("ar-2", "MSG-3", 0));

    assert_eq!(store.find_all_for_endpoint("ar-1").len(), 2);
    assert!(store.find_all_for_endpoint("unknown").is_empty());

    assert_eq!(store.delete_all_for_endpoint(&endpoint("ext-1", "ar-1")), 2);
    assert!(store.find_all_for_endpoint("ar-1").is_empty());
    assert_eq!(store.find_all_for_endpoint("ar-2").len(), 1);
}

#[test]
fn test_absent_entries_are_no_ops() {
    let store = AcknowledgementStore::default();
    assert!(store.find_by_message_id("missing").is_none());
    assert!(!store.set_response("missing", "{}".to_string()));
    store.delete_by_message_id("missing");
    assert!(store.is_empty());
}

#[test]
fn test_delete_is_idempotent() {
    let store = AcknowledgementStore::default();
    let entry = AcknowledgementEntry::new("EP1", "MSG-1", TechnicalMessageType::FeedHeaderQuery);
    store.save(entry.clone());
    store.save(AcknowledgementEntry::new(
        "EP1",
        "MSG-2",
        TechnicalMessageType::FeedHeaderQuery,
    ));

    store.delete(&entry);
    store.delete(&entry);

    assert!(store.find_by_message_id("MSG-1").is_none());
    assert_eq!(store.len(), 1);
}
