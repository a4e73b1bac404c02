use docspace_model::{Attribute, AttributeMetadata, Entity};
use docspace_space::{AttributeSpace, HistoryFilter};
use docspace_types::{EntityId, ValueKind};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;

fn registered_note(space: &mut AttributeSpace) -> EntityId {
    let mut entity = Entity::with_id("note", EntityId::from("note_1"));
    entity.set_attribute_value("title", json!("Hello"));
    entity.set_attribute_value("count", json!(1));
    space.register_entity(entity)
}

// ── Registration ─────────────────────────────────────────────────

#[test]
fn register_entity_announces_entity_and_attributes() {
    let mut space = AttributeSpace::new();
    registered_note(&mut space);

    let registered = space.history(&HistoryFilter {
        event_type: Some("attribute:registered".to_string()),
        ..Default::default()
    });
    assert_eq!(registered.len(), 2);

    let entities = space.history(&HistoryFilter {
        event_type: Some("entity:registered".to_string()),
        ..Default::default()
    });
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].data.entity_id.as_deref(), Some("note_1"));
    assert_eq!(entities[0].data.entity_type.as_deref(), Some("note"));
}

#[test]
fn registered_attributes_are_queryable() {
    let mut space = AttributeSpace::new();
    registered_note(&mut space);

    assert!(space.has_attribute("note_1", "title"));
    assert!(!space.has_attribute("note_1", "missing"));
    let attr = space.attribute("note_1", "count").unwrap();
    assert_eq!(attr.kind(), &ValueKind::Integer);

    let mut names: Vec<String> = space
        .entity_attributes("note_1")
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    names.sort_unstable();
    assert_eq!(names, vec!["count", "title"]);
}

// ── Propagation through the tiers ────────────────────────────────

#[test]
fn changes_fan_out_in_tier_order() {
    let mut space = AttributeSpace::new();
    let id = registered_note(&mut space);

    let order = Rc::new(RefCell::new(Vec::new()));
    let o = order.clone();
    space.subscribe(id.as_str(), "title", move |_| {
        o.borrow_mut().push("attribute");
        Ok(())
    });
    let o = order.clone();
    space.subscribe_to_entity(id.as_str(), move |_| {
        o.borrow_mut().push("entity");
        Ok(())
    });
    let o = order.clone();
    space.subscribe_to_type("note", move |_| {
        o.borrow_mut().push("type");
        Ok(())
    });
    let o = order.clone();
    space.subscribe_global(move |_| {
        o.borrow_mut().push("global");
        Ok(())
    });

    space
        .entity_mut(id.as_str())
        .unwrap()
        .set_attribute_value("title", json!("Changed"));

    assert_eq!(
        order.borrow().as_slice(),
        ["attribute", "entity", "type", "global"]
    );
}

#[test]
fn change_notifications_carry_old_and_new_values() {
    let mut space = AttributeSpace::new();
    let id = registered_note(&mut space);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    space.subscribe(id.as_str(), "title", move |change| {
        sink.borrow_mut().push((
            change.old_value.clone(),
            change.new_value.clone(),
            change.event_type.clone(),
        ));
        Ok(())
    });

    space
        .entity_mut(id.as_str())
        .unwrap()
        .set_attribute_value("title", json!("Changed"));

    let events = seen.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0],
        (
            Some(json!("Hello")),
            Some(json!("Changed")),
            "attribute:changed".to_string()
        )
    );
}

#[test]
fn attribute_tier_only_sees_its_own_attribute() {
    let mut space = AttributeSpace::new();
    let id = registered_note(&mut space);

    let count = Rc::new(RefCell::new(0));
    let counter = count.clone();
    space.subscribe(id.as_str(), "title", move |_| {
        *counter.borrow_mut() += 1;
        Ok(())
    });

    let entity = space.entity_mut(id.as_str()).unwrap();
    entity.set_attribute_value("count", json!(2));
    entity.set_attribute_value("title", json!("Changed"));

    assert_eq!(*count.borrow(), 1);
}

#[test]
fn new_attributes_on_registered_entities_are_indexed() {
    let mut space = AttributeSpace::new();
    let id = registered_note(&mut space);

    space
        .entity_mut(id.as_str())
        .unwrap()
        .set_attribute_value("owner", json!("b@c.org"));

    assert!(space.has_attribute("note_1", "owner"));
    let attr = space.attribute("note_1", "owner").unwrap();
    assert_eq!(attr.kind(), &ValueKind::Email);
}

#[test]
fn failing_subscriber_does_not_block_siblings() {
    let mut space = AttributeSpace::new();
    let id = registered_note(&mut space);

    space.subscribe_global(|_| Err("observer exploded".to_string()));
    let count = Rc::new(RefCell::new(0));
    let counter = count.clone();
    space.subscribe_global(move |_| {
        *counter.borrow_mut() += 1;
        Ok(())
    });

    space
        .entity_mut(id.as_str())
        .unwrap()
        .set_attribute_value("title", json!("Changed"));

    assert_eq!(*count.borrow(), 1);
}

// ── Unsubscription ───────────────────────────────────────────────

#[test]
fn unsubscribed_callbacks_are_never_invoked() {
    let mut space = AttributeSpace::new();
    let id = registered_note(&mut space);

    let count = Rc::new(RefCell::new(0));
    let subscriptions = vec![
        {
            let c = count.clone();
            space.subscribe(id.as_str(), "title", move |_| {
                *c.borrow_mut() += 1;
                Ok(())
            })
        },
        {
            let c = count.clone();
            space.subscribe_to_entity(id.as_str(), move |_| {
                *c.borrow_mut() += 1;
                Ok(())
            })
        },
        {
            let c = count.clone();
            space.subscribe_to_type("note", move |_| {
                *c.borrow_mut() += 1;
                Ok(())
            })
        },
        {
            let c = count.clone();
            space.subscribe_global(move |_| {
                *c.borrow_mut() += 1;
                Ok(())
            })
        },
    ];

    for subscription in &subscriptions {
        assert!(space.unsubscribe(subscription));
        // second removal is a safe no-op
        assert!(!space.unsubscribe(subscription));
    }

    space
        .entity_mut(id.as_str())
        .unwrap()
        .set_attribute_value("title", json!("Changed"));

    assert_eq!(*count.borrow(), 0);
}

// ── Unregistration ───────────────────────────────────────────────

#[test]
fn unregister_entity_removes_everything() {
    let mut space = AttributeSpace::new();
    let id = registered_note(&mut space);

    assert!(space.unregister_entity(id.as_str()));
    assert!(space.entity(id.as_str()).is_none());
    assert!(!space.has_attribute("note_1", "title"));
    assert!(space.entity_attributes("note_1").is_empty());

    let unregistered = space.history(&HistoryFilter {
        event_type: Some("attribute:unregistered".to_string()),
        ..Default::default()
    });
    assert_eq!(unregistered.len(), 2);
    let entity_events = space.history(&HistoryFilter {
        event_type: Some("entity:unregistered".to_string()),
        ..Default::default()
    });
    assert_eq!(entity_events.len(), 1);
}

#[test]
fn unregistering_unknown_entities_is_a_noop() {
    let mut space = AttributeSpace::new();
    assert!(!space.unregister_entity("ghost_1"));
    assert!(space.history(&HistoryFilter::default()).is_empty());
}

#[test]
fn unregister_tears_down_attribute_subscriptions() {
    let mut space = AttributeSpace::new();
    let id = registered_note(&mut space);

    let count = Rc::new(RefCell::new(0));
    let counter = count.clone();
    space.subscribe(id.as_str(), "title", move |_| {
        *counter.borrow_mut() += 1;
        Ok(())
    });

    space.unregister_entity(id.as_str());

    // re-register under the same id; the old subscriber set is gone
    let mut entity = Entity::with_id("note", EntityId::from("note_1"));
    entity.set_attribute_value("title", json!("Back"));
    let id = space.register_entity(entity);
    space
        .entity_mut(id.as_str())
        .unwrap()
        .set_attribute_value("title", json!("Again"));

    assert_eq!(*count.borrow(), 0);
}

// ── History ──────────────────────────────────────────────────────

#[test]
fn history_never_exceeds_the_cap_and_keeps_the_newest() {
    let mut space = AttributeSpace::with_history_capacity(50);
    let id = registered_note(&mut space);

    for i in 0..80 {
        space
            .entity_mut(id.as_str())
            .unwrap()
            .set_attribute_value("count", json!(i + 100));
    }

    let history = space.history(&HistoryFilter::default());
    assert_eq!(history.len(), 50);
    // oldest-first order is preserved
    for pair in history.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
    let last = &history[history.len() - 1];
    assert_eq!(last.data.new_value, Some(json!(179)));
}

#[test]
fn history_filters_compose_conjunctively() {
    let mut space = AttributeSpace::new();
    let id = registered_note(&mut space);
    let entity = space.entity_mut(id.as_str()).unwrap();
    entity.set_attribute_value("title", json!("One"));
    entity.set_attribute_value("count", json!(2));
    entity.set_attribute_value("title", json!("Two"));

    let title_changes = space.history(&HistoryFilter {
        entity_id: Some("note_1".to_string()),
        attribute_name: Some("title".to_string()),
        event_type: Some("attribute:changed".to_string()),
        ..Default::default()
    });
    assert_eq!(title_changes.len(), 2);

    let limited = space.history(&HistoryFilter {
        attribute_name: Some("title".to_string()),
        event_type: Some("attribute:changed".to_string()),
        limit: Some(1),
        ..Default::default()
    });
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].data.new_value, Some(json!("Two")));
}

#[test]
fn clear_history_supports_a_cutoff() {
    let mut space = AttributeSpace::new();
    let id = registered_note(&mut space);

    let cutoff = chrono::Utc::now();
    space
        .entity_mut(id.as_str())
        .unwrap()
        .set_attribute_value("title", json!("After cutoff"));

    space.clear_history(Some(cutoff));
    let history = space.history(&HistoryFilter::default());
    assert!(!history.is_empty());
    assert!(history.iter().all(|r| r.timestamp >= cutoff));

    space.clear_history(None);
    assert!(space.history(&HistoryFilter::default()).is_empty());
}

// ── Search & stats ───────────────────────────────────────────────

#[test]
fn search_matches_attribute_names_case_insensitively() {
    let mut space = AttributeSpace::new();
    registered_note(&mut space);

    let hits = space.search_attributes("TIT").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, "note_1::title");

    assert!(space.search_attributes("[").is_err());
}

#[test]
fn stats_reflect_registry_contents() {
    let mut space = AttributeSpace::new();
    let id = registered_note(&mut space);
    let _sub = space.subscribe_global(|_| Ok(()));
    let _attr_sub = space.subscribe(id.as_str(), "title", |_| Ok(()));

    let stats = space.stats();
    assert_eq!(stats.total_attributes, 2);
    assert_eq!(stats.global_subscriptions, 1);
    assert_eq!(stats.total_subscriptions, 1);
    assert_eq!(stats.kind_distribution.get("integer"), Some(&1));
    assert_eq!(stats.entity_distribution.get("note_1"), Some(&2));
}

// ── Export / import ──────────────────────────────────────────────

#[test]
fn export_reflects_current_values() {
    let mut space = AttributeSpace::new();
    let id = registered_note(&mut space);
    space
        .entity_mut(id.as_str())
        .unwrap()
        .set_attribute_value("title", json!("Fresh"));

    let exported = space.export().unwrap();
    assert_eq!(
        exported["attributes"]["note_1::title"]["value"],
        json!("Fresh")
    );
}

#[test]
fn import_round_trips_attributes_and_history() {
    let mut space = AttributeSpace::new();
    registered_note(&mut space);
    let exported = space.export().unwrap();
    let history_len = space.history(&HistoryFilter::default()).len();

    let mut restored = AttributeSpace::new();
    restored.import(exported).unwrap();

    assert!(restored.has_attribute("note_1", "title"));
    let attr = restored.attribute("note_1", "count").unwrap();
    assert_eq!(attr.kind(), &ValueKind::Integer);
    assert_eq!(restored.history(&HistoryFilter::default()).len(), history_len);
    // imported attributes have no backing entity
    assert!(restored.entity("note_1").is_none());
}

#[test]
fn import_rejects_malformed_payloads() {
    let mut space = AttributeSpace::new();
    assert!(space.import(json!("not an export")).is_err());
    assert!(
        space
            .import(json!({"attributes": {"k": {"bogus": true}}, "timestamp": "2024-01-01T00:00:00Z"}))
            .is_err()
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn history_cap_holds_for_any_overflow(cap in 1usize..40, extra in 0usize..60) {
        let space = AttributeSpace::with_history_capacity(cap);
        let total = cap + extra;
        for i in 0..total {
            let attribute = Attribute::new(
                format!("a{i}"),
                json!(i),
                ValueKind::Integer,
                AttributeMetadata::default(),
            );
            space.register_attribute("e1", &attribute);
        }
        let history = space.history(&HistoryFilter::default());
        prop_assert_eq!(history.len(), cap);
        // exactly the most recent `cap` events survive, oldest first
        let first = history[0].data.attribute_name.clone();
        prop_assert_eq!(first, Some(format!("a{}", total - cap)));
        let last = history[history.len() - 1].data.attribute_name.clone();
        prop_assert_eq!(last, Some(format!("a{}", total - 1)));
    }
}

// ── Standalone attribute registration ────────────────────────────

#[test]
fn standalone_attributes_can_register_and_unregister() {
    let space = AttributeSpace::new();
    let attribute = Attribute::new(
        "theme",
        json!("dark"),
        ValueKind::Text,
        AttributeMetadata::default(),
    );
    space.register_attribute("prefs_1", &attribute);
    assert!(space.has_attribute("prefs_1", "theme"));

    assert!(space.unregister_attribute("prefs_1", "theme"));
    assert!(!space.unregister_attribute("prefs_1", "theme"));
    assert!(!space.has_attribute("prefs_1", "theme"));
}
