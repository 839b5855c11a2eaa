use super::*;

#[test]
fn test_publish_appends_jsonl_with_stable_keys() {
    let tmp = tempfile::tempdir().unwrap();
    let bus = EventBus::open(tmp.path(), "t1").unwrap();

    bus.publish(EventKind::TaskCreated, None, serde_json::json!({"prompt": "x"}))
        .unwrap();
    bus.publish(
        EventKind::SubtaskPlanned,
        Some("s1"),
        serde_json::json!({"assistant": "claude"}),
    )
    .unwrap();

    let content = std::fs::read_to_string(bus.log_path()).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("\"id\":0"));
    assert!(lines[0].contains("\"kind\":\"task-created\""));
    assert!(lines[0].contains("\"taskId\":\"t1\""));
    assert!(!lines[0].contains("subtaskId"));
    assert!(lines[1].contains("\"id\":1"));
    assert!(lines[1].contains("\"subtaskId\":\"s1\""));
}

#[test]
fn test_ids_are_strictly_increasing_without_gaps() {
    let tmp = tempfile::tempdir().unwrap();
    let bus = EventBus::open(tmp.path(), "t1").unwrap();
    for _ in 0..10 {
        bus.publish(EventKind::ProgressUpdated, None, serde_json::Value::Null)
            .unwrap();
    }

    let events = read_log(bus.log_path()).unwrap();
    let ids: Vec<u64> = events.iter().map(|e| e.id).collect();
    assert_eq!(ids, (0..10).collect::<Vec<u64>>());
}

#[test]
fn test_reopen_resumes_id_sequence() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let bus = EventBus::open(tmp.path(), "t1").unwrap();
        bus.publish(EventKind::TaskCreated, None, serde_json::Value::Null)
            .unwrap();
        bus.publish(EventKind::PlanUpdated, None, serde_json::Value::Null)
            .unwrap();
    }

    let bus = EventBus::open(tmp.path(), "t1").unwrap();
    let event = bus
        .publish(EventKind::TaskCompleted, None, serde_json::Value::Null)
        .unwrap();
    assert_eq!(event.id, 2);

    let ids: Vec<u64> = read_log(bus.log_path())
        .unwrap()
        .iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, vec![0, 1, 2]);
}

#[test]
fn test_partial_trailing_line_is_truncated_on_open() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let bus = EventBus::open(tmp.path(), "t1").unwrap();
        bus.publish(EventKind::TaskCreated, None, serde_json::Value::Null)
            .unwrap();
    }
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(tmp.path().join(EVENTS_FILE_NAME))
            .unwrap();
        file.write_all(br#"{"id":99,"kind":"task-comp"#).unwrap();
    }

    let bus = EventBus::open(tmp.path(), "t1").unwrap();
    let event = bus
        .publish(EventKind::TaskCompleted, None, serde_json::Value::Null)
        .unwrap();
    assert_eq!(event.id, 1);

    let content = std::fs::read_to_string(bus.log_path()).unwrap();
    assert!(!content.contains("task-comp\""));
    assert_eq!(content.lines().count(), 2);
    assert!(content.ends_with('\n'));
}

#[test]
fn test_subscribe_receives_in_publish_order() {
    let tmp = tempfile::tempdir().unwrap();
    let bus = EventBus::open(tmp.path(), "t1").unwrap();
    let rx = bus.subscribe(None);

    bus.publish(EventKind::TaskCreated, None, serde_json::Value::Null)
        .unwrap();
    bus.publish(EventKind::TaskCompleted, None, serde_json::Value::Null)
        .unwrap();

    let received: Vec<EventKind> = rx.try_iter().map(|e| e.kind).collect();
    assert_eq!(received, vec![EventKind::TaskCreated, EventKind::TaskCompleted]);
}

#[test]
fn test_subscribe_with_kind_filter() {
    let tmp = tempfile::tempdir().unwrap();
    let bus = EventBus::open(tmp.path(), "t1").unwrap();
    let rx = bus.subscribe(Some(vec![EventKind::LockDenied]));

    bus.publish(EventKind::LockGranted, Some("s1"), serde_json::Value::Null)
        .unwrap();
    bus.publish(
        EventKind::LockDenied,
        Some("s2"),
        serde_json::json!({"reason": {"kind": "file-conflict"}}),
    )
    .unwrap();

    let received: Vec<Event> = rx.try_iter().collect();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].kind, EventKind::LockDenied);
    assert_eq!(received[0].subtask_id.as_deref(), Some("s2"));
}

#[test]
fn test_dropped_subscriber_does_not_break_publish() {
    let tmp = tempfile::tempdir().unwrap();
    let bus = EventBus::open(tmp.path(), "t1").unwrap();
    drop(bus.subscribe(None));
    bus.publish(EventKind::TaskCreated, None, serde_json::Value::Null)
        .unwrap();
    bus.publish(EventKind::TaskCompleted, None, serde_json::Value::Null)
        .unwrap();
}

#[test]
fn test_query_filters_by_kind_and_subtask() {
    let tmp = tempfile::tempdir().unwrap();
    let bus = EventBus::open(tmp.path(), "t1").unwrap();
    bus.publish(EventKind::TaskCreated, None, serde_json::Value::Null)
        .unwrap();
    bus.publish(EventKind::SubtaskStarted, Some("s1"), serde_json::Value::Null)
        .unwrap();
    bus.publish(EventKind::SubtaskStarted, Some("s2"), serde_json::Value::Null)
        .unwrap();
    bus.publish(EventKind::SubtaskCompleted, Some("s1"), serde_json::Value::Null)
        .unwrap();

    let events = bus
        .query(&EventFilter {
            subtask_id: Some("s1".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(events.len(), 2);

    let events = bus
        .query(&EventFilter {
            kinds: Some(vec![EventKind::SubtaskCompleted]),
            subtask_id: Some("s1".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, 3);
}

#[test]
fn test_payload_round_trips() {
    let tmp = tempfile::tempdir().unwrap();
    let bus = EventBus::open(tmp.path(), "t1").unwrap();
    bus.publish(
        EventKind::LockDenied,
        Some("s1"),
        serde_json::json!({"files": ["src/util.js"]}),
    )
    .unwrap();

    let events = read_log(bus.log_path()).unwrap();
    assert_eq!(
        events[0].payload["files"][0],
        serde_json::json!("src/util.js")
    );
}

#[test]
fn test_corrupt_middle_line_is_skipped_on_read() {
    let tmp = tempfile::tempdir().unwrap();
    let bus = EventBus::open(tmp.path(), "t1").unwrap();
    bus.publish(EventKind::TaskCreated, None, serde_json::Value::Null)
        .unwrap();
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(bus.log_path())
            .unwrap();
        file.write_all(b"garbage line\n").unwrap();
    }
    bus.publish(EventKind::TaskCompleted, None, serde_json::Value::Null)
        .unwrap();

    let events = read_log(bus.log_path()).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].kind, EventKind::TaskCompleted);
}
