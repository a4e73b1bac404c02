use docspace_model::{
    AttributeMetadata, AttributeSource, Entity, EntityEventKind, MergeOptions,
};
use docspace_types::{AttributeValue, EntityId, ValueKind};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;

fn changed_counter(entity: &mut Entity) -> Rc<RefCell<Vec<(serde_json::Value, serde_json::Value)>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    entity.on("attribute:changed", move |event| {
        if let EntityEventKind::AttributeChanged {
            old_value,
            new_value,
            ..
        } = &event.kind
        {
            sink.borrow_mut()
                .push((old_value.clone(), new_value.clone()));
        }
        Ok(())
    });
    seen
}

// ── Auto-discovery ───────────────────────────────────────────────

#[test]
fn get_attribute_creates_on_first_request() {
    let mut entity = Entity::new("note");
    let created = Rc::new(RefCell::new(0));
    let counter = created.clone();
    entity.on("attribute:created", move |_| {
        *counter.borrow_mut() += 1;
        Ok(())
    });

    let attr = entity.get_attribute("title");
    assert_eq!(attr.kind(), &ValueKind::Text);
    assert_eq!(attr.metadata.source, AttributeSource::AutoDiscovery);
    assert_eq!(*created.borrow(), 1);

    // second request reuses the attribute
    entity.get_attribute("title");
    assert_eq!(*created.borrow(), 1);
}

#[test]
fn get_attribute_opt_never_creates() {
    let mut entity = Entity::new("note");
    assert!(entity.get_attribute_opt("missing").is_none());
    assert!(!entity.has_attribute("missing"));
    entity.get_attribute("present");
    assert!(entity.get_attribute_opt("present").is_some());
}

// ── set_attribute semantics ──────────────────────────────────────

#[test]
fn set_attribute_creates_with_entity_source() {
    let mut entity = Entity::new("note");
    assert!(entity.set_attribute("title", json!("Hello"), ValueKind::Text, AttributeMetadata::default()));
    let attr = entity.get_attribute_opt("title").unwrap();
    assert_eq!(attr.metadata.source, AttributeSource::Entity);
    assert_eq!(attr.value(), &AttributeValue::Text("Hello".to_string()));
}

#[test]
fn repeated_identical_writes_emit_one_change() {
    let mut entity = Entity::new("note");
    let seen = changed_counter(&mut entity);

    assert!(entity.set_attribute_value("title", json!("Hello")));
    assert!(entity.set_attribute_value("title", json!("Hello")));

    assert_eq!(seen.borrow().len(), 1);
}

#[test]
fn changed_event_carries_old_and_new_values() {
    let mut entity = Entity::new("note");
    let seen = changed_counter(&mut entity);

    entity.set_attribute_value("title", json!("first"));
    entity.set_attribute_value("title", json!("second"));

    let events = seen.borrow();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1], (json!("first"), json!("second")));
}

#[test]
fn failed_writes_emit_nothing() {
    let mut entity = Entity::new("note");
    entity.set_attribute("count", json!(1), ValueKind::Integer, AttributeMetadata::default());
    let seen = changed_counter(&mut entity);

    assert!(!entity.set_attribute("count", json!("nope"), ValueKind::Integer, AttributeMetadata::default()));
    assert!(seen.borrow().is_empty());
}

#[test]
fn set_attribute_value_infers_kinds() {
    let mut entity = Entity::new("contact");
    entity.set_attribute_value("email", json!("a@b.com"));
    entity.set_attribute_value("site", json!("https://x.com"));
    entity.set_attribute_value("age", json!(33));
    entity.set_attribute_value("score", json!(7.5));

    assert_eq!(entity.get_attribute_opt("email").unwrap().kind(), &ValueKind::Email);
    assert_eq!(entity.get_attribute_opt("site").unwrap().kind(), &ValueKind::Url);
    assert_eq!(entity.get_attribute_opt("age").unwrap().kind(), &ValueKind::Integer);
    assert_eq!(entity.get_attribute_opt("score").unwrap().kind(), &ValueKind::Number);
}

// ── Queries ──────────────────────────────────────────────────────

#[test]
fn attribute_names_keep_insertion_order() {
    let mut entity = Entity::new("note");
    entity.set_attribute_value("zebra", json!(1));
    entity.set_attribute_value("alpha", json!(2));
    entity.set_attribute_value("mid", json!(3));
    assert_eq!(entity.attribute_names(), vec!["zebra", "alpha", "mid"]);
}

#[test]
fn queries_filter_by_kind_required_and_empty() {
    let mut entity = Entity::new("note");
    entity.set_attribute_value("title", json!("x"));
    entity.set_attribute_value("count", json!(2));
    let mut meta = AttributeMetadata::default();
    meta.required = true;
    entity.set_attribute("owner", serde_json::Value::Null, ValueKind::Text, meta);

    assert_eq!(entity.attributes_by_kind(&ValueKind::Integer).len(), 1);
    assert_eq!(entity.required_attributes().len(), 1);
    let empties: Vec<&str> = entity.empty_attributes().iter().map(|a| a.name()).collect();
    assert_eq!(empties, vec!["owner"]);
}

#[test]
fn remove_attribute_emits_and_forgets() {
    let mut entity = Entity::new("note");
    entity.set_attribute_value("title", json!("x"));
    let removed = Rc::new(RefCell::new(Vec::new()));
    let sink = removed.clone();
    entity.on("attribute:removed", move |event| {
        if let EntityEventKind::AttributeRemoved { name, .. } = &event.kind {
            sink.borrow_mut().push(name.clone());
        }
        Ok(())
    });

    assert!(entity.remove_attribute("title"));
    assert!(!entity.remove_attribute("title"));
    assert!(!entity.has_attribute("title"));
    assert_eq!(removed.borrow().as_slice(), ["title"]);
}

// ── Validation ───────────────────────────────────────────────────

#[test]
fn validate_reports_required_and_empty() {
    let mut entity = Entity::new("note");
    let mut meta = AttributeMetadata::default();
    meta.required = true;
    entity.set_attribute("title", serde_json::Value::Null, ValueKind::Text, meta);

    let report = entity.validate();
    assert!(!report.is_valid);
    assert!(report.errors.iter().any(|e| e.contains("title")));

    entity.set_attribute_value("title", json!("present"));
    assert!(entity.validate().is_valid);
}

// ── Events: isolation and unsubscription ─────────────────────────

#[test]
fn failing_listener_does_not_block_the_next() {
    let mut entity = Entity::new("note");
    entity.on("attribute:changed", |_| Err("first listener exploded".to_string()));
    let seen = changed_counter(&mut entity);

    entity.set_attribute_value("title", json!("x"));
    assert_eq!(seen.borrow().len(), 1);
}

#[test]
fn off_is_idempotent() {
    let mut entity = Entity::new("note");
    let count = Rc::new(RefCell::new(0));
    let counter = count.clone();
    let id = entity.on("attribute:changed", move |_| {
        *counter.borrow_mut() += 1;
        Ok(())
    });

    assert!(entity.off("attribute:changed", id));
    assert!(!entity.off("attribute:changed", id));

    entity.set_attribute_value("title", json!("x"));
    assert_eq!(*count.borrow(), 0);
}

// ── Tags & metadata ──────────────────────────────────────────────

#[test]
fn tags_deduplicate() {
    let mut entity = Entity::new("note");
    entity.add_tag("draft");
    entity.add_tag("draft");
    assert_eq!(entity.metadata.tags, vec!["draft"]);
    entity.remove_tag("draft");
    assert!(!entity.has_tag("draft"));
}

// ── Serialization ────────────────────────────────────────────────

#[test]
fn serialize_round_trip_preserves_identity_and_values() {
    let mut entity = Entity::with_id("task", EntityId::from("task_fixed_1"));
    entity.set_attribute_value("title", json!("Write tests"));
    entity.set_attribute_value("done", json!(false));
    entity.set_attribute_value("estimate", json!(3));
    entity.add_tag("sprint-9");

    let data = entity.serialize().unwrap();
    assert_eq!(data["id"], json!("task_fixed_1"));
    assert_eq!(data["type"], json!("task"));
    assert_eq!(data["schemaVersion"], json!(1));

    let back = Entity::deserialize(data).unwrap();
    assert_eq!(back.id(), entity.id());
    assert_eq!(back.entity_type(), "task");
    let mut names = back.attribute_names();
    names.sort_unstable();
    assert_eq!(names, vec!["done", "estimate", "title"]);
    assert_eq!(
        back.get_attribute_opt("estimate").unwrap().value(),
        &AttributeValue::Integer(3)
    );
    assert_eq!(
        back.get_attribute_opt("done").unwrap().value(),
        &AttributeValue::Boolean(false)
    );
    assert!(back.has_tag("sprint-9"));
}

#[test]
fn deserialize_rejects_malformed_payloads() {
    assert!(Entity::deserialize(json!({"attributes": {}})).is_err());
    assert!(Entity::deserialize(json!(42)).is_err());
}

#[test]
fn duplicate_restamps_identity() {
    let mut entity = Entity::new("note");
    entity.set_attribute_value("title", json!("original"));

    let copy = entity.duplicate(None).unwrap();
    assert_ne!(copy.id(), entity.id());
    assert_eq!(
        copy.get_attribute_opt("title").unwrap().value(),
        &AttributeValue::Text("original".to_string())
    );
}

// ── Diff & merge ─────────────────────────────────────────────────

#[test]
fn compare_reports_added_removed_changed() {
    let mut ours = Entity::new("note");
    ours.set_attribute_value("title", json!("old"));
    ours.set_attribute_value("obsolete", json!(true));

    let mut theirs = Entity::new("note");
    theirs.set_attribute_value("title", json!("new"));
    theirs.set_attribute_value("fresh", json!(1));

    let diff = ours.compare(&theirs);
    assert_eq!(diff.added, vec!["fresh"]);
    assert_eq!(diff.removed, vec!["obsolete"]);
    assert_eq!(diff.changed.len(), 1);
    assert_eq!(diff.changed[0].name, "title");
    assert_eq!(diff.changed[0].old_value, json!("old"));
    assert_eq!(diff.changed[0].new_value, json!("new"));
}

#[test]
fn apply_changes_passes_toggle_independently() {
    let mut theirs = Entity::new("note");
    theirs.set_attribute_value("title", json!("theirs"));
    theirs.set_attribute_value("fresh", json!(1));

    // add only
    let mut ours = Entity::new("note");
    ours.set_attribute_value("title", json!("ours"));
    ours.set_attribute_value("stale", json!(true));
    ours.apply_changes(
        &theirs,
        &MergeOptions {
            overwrite_existing: false,
            add_new: true,
            remove_deleted: false,
        },
    );
    assert!(ours.has_attribute("fresh"));
    assert!(ours.has_attribute("stale"));
    assert_eq!(ours.get_attribute_value("title"), json!("ours"));

    // overwrite + remove
    ours.apply_changes(
        &theirs,
        &MergeOptions {
            overwrite_existing: true,
            add_new: false,
            remove_deleted: true,
        },
    );
    assert_eq!(ours.get_attribute_value("title"), json!("theirs"));
    assert!(!ours.has_attribute("stale"));
}

// ── Stats ────────────────────────────────────────────────────────

#[test]
fn stats_summarize_the_entity() {
    let mut entity = Entity::new("note");
    entity.set_attribute_value("title", json!("x"));
    entity.set_attribute_value("count", json!(1));
    entity.add_tag("draft");

    let stats = entity.stats();
    assert_eq!(stats.attribute_count, 2);
    assert_eq!(stats.kind_distribution.get("integer"), Some(&1));
    assert_eq!(stats.tags, vec!["draft"]);
}
