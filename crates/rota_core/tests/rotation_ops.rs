use chrono::{Duration, TimeZone, Utc};
use rota_core::{HistoryEntry, RotationError, RotationState};

fn names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("person-{i}")).collect()
}

fn state_with(people: &[&str], current_index: usize) -> RotationState {
    RotationState::from_parts(
        people.iter().map(|name| name.to_string()).collect(),
        current_index,
        Vec::new(),
    )
}

#[test]
fn add_person_trims_and_ignores_blank_names() {
    let mut state = RotationState::new();

    assert_eq!(state.add_person("  Anna  ").unwrap(), Some("Anna".to_string()));
    assert_eq!(state.add_person("   ").unwrap(), None);
    assert_eq!(state.add_person("").unwrap(), None);

    assert_eq!(state.people(), ["Anna".to_string()]);
}

#[test]
fn add_person_rejects_exact_duplicates_and_leaves_state_unchanged() {
    let mut state = state_with(&["Anna", "Ben"], 1);
    let before = state.clone();

    let err = state.add_person(" Anna ").unwrap_err();
    assert_eq!(err, RotationError::DuplicateName("Anna".to_string()));
    assert_eq!(state, before);

    // Case-sensitive: a differently cased name is a different person.
    assert_eq!(state.add_person("anna").unwrap(), Some("anna".to_string()));
    assert_eq!(state.current_index(), 1);
}

#[test]
fn add_then_delete_new_index_roundtrips_for_every_pointer() {
    for count in 1..6 {
        for current in 0..count {
            let mut state = RotationState::from_parts(names(count), current, Vec::new());
            let before = state.clone();

            state.add_person("newcomer").unwrap();
            let removed = state.delete_person(count).unwrap();

            assert_eq!(removed, "newcomer");
            assert_eq!(state, before, "count={count} current={current}");
        }
    }
}

#[test]
fn delete_on_single_person_is_refused() {
    let mut state = state_with(&["Anna"], 0);
    let before = state.clone();

    assert_eq!(state.delete_person(0).unwrap_err(), RotationError::LastPerson);
    assert_eq!(state, before);

    let mut empty = RotationState::new();
    assert_eq!(empty.delete_person(0).unwrap_err(), RotationError::LastPerson);
}

#[test]
fn delete_out_of_range_is_refused() {
    let mut state = state_with(&["Anna", "Ben"], 0);
    let err = state.delete_person(2).unwrap_err();
    assert_eq!(err, RotationError::IndexOutOfRange { index: 2, len: 2 });
    assert_eq!(state.people().len(), 2);
}

#[test]
fn delete_keeps_pointer_valid_and_on_the_same_person() {
    for count in 2..7 {
        for current in 0..count {
            for index in 0..count {
                let mut state = RotationState::from_parts(names(count), current, Vec::new());
                let up_next = state.current_person().unwrap().to_string();

                state.delete_person(index).unwrap();

                let label = format!("count={count} current={current} index={index}");
                assert!(state.current_index() < state.people().len(), "{label}");
                if index != current {
                    assert_eq!(state.current_person(), Some(up_next.as_str()), "{label}");
                } else if current == count - 1 {
                    assert_eq!(state.current_index(), 0, "{label}");
                } else {
                    assert_eq!(state.current_index(), current, "{label}");
                }
            }
        }
    }
}

#[test]
fn deleting_pointed_last_person_wraps_to_front() {
    let mut state = state_with(&["Anna", "Ben", "Cara"], 2);

    assert_eq!(state.delete_person(2).unwrap(), "Cara");
    assert_eq!(state.people(), ["Anna".to_string(), "Ben".to_string()]);
    assert_eq!(state.current_index(), 0);
}

#[test]
fn deleting_before_pointer_shifts_it_down() {
    let mut state = state_with(&["Anna", "Ben", "Cara"], 2);

    state.delete_person(0).unwrap();
    assert_eq!(state.current_index(), 1);
    assert_eq!(state.current_person(), Some("Cara"));
}

#[test]
fn mark_done_n_times_advances_by_n_mod_k_and_logs_in_order() {
    let start = Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap();
    for count in 1..5 {
        for calls in 0..(3 * count + 1) {
            let mut state = RotationState::from_parts(names(count), 0, Vec::new());
            let mut expected = Vec::new();
            for call in 0..calls {
                let at = start + Duration::minutes(call as i64);
                expected.push(HistoryEntry {
                    person: format!("person-{}", call % count),
                    timestamp: at,
                });
                state.mark_done_at(at).unwrap();
            }

            assert_eq!(state.current_index(), calls % count);
            assert_eq!(state.history(), expected.as_slice());
        }
    }
}

#[test]
fn skip_advances_like_mark_done_without_history() {
    for count in 1..5 {
        let mut skipped = RotationState::from_parts(names(count), 0, Vec::new());
        let mut done = skipped.clone();
        for _ in 0..(2 * count + 1) {
            skipped.skip().unwrap();
            done.mark_done().unwrap();
            assert_eq!(skipped.current_index(), done.current_index());
        }
        assert!(skipped.history().is_empty());
    }
}

#[test]
fn mark_done_and_skip_are_noops_on_empty_rotation() {
    let mut state = RotationState::new();
    assert_eq!(state.mark_done(), None);
    assert_eq!(state.skip(), None);
    assert_eq!(state, RotationState::new());
}

#[test]
fn done_then_skip_scenario() {
    let mut state = state_with(&["Anna", "Ben"], 0);

    let entry = state.mark_done().unwrap();
    assert_eq!(entry.person, "Anna");
    assert_eq!(state.history().len(), 1);
    assert_eq!(state.history()[0].person, "Anna");
    assert_eq!(state.current_index(), 1);

    assert_eq!(state.skip(), Some("Ben".to_string()));
    assert_eq!(state.current_index(), 0);
    assert_eq!(state.history().len(), 1);
}

#[test]
fn mark_done_truncates_timestamp_to_milliseconds() {
    let mut state = state_with(&["Anna"], 0);
    let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();

    let entry = state.mark_done_at(at).unwrap();
    assert_eq!(entry.timestamp.timestamp_subsec_nanos(), 123_000_000);
}

#[test]
fn reset_clears_everything() {
    let mut state = state_with(&["Anna", "Ben", "Cara"], 2);
    state.mark_done().unwrap();

    state.reset();

    assert_eq!(state, RotationState::from_parts(Vec::new(), 0, Vec::new()));
    assert!(!state.has_data());
}

#[test]
fn recent_history_is_newest_first_and_capped() {
    let mut state = state_with(&["Anna", "Ben", "Cara"], 0);
    let start = Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap();
    for day in 0..12 {
        state.mark_done_at(start + Duration::days(day)).unwrap();
    }

    let recent = state.recent_history(10);
    assert_eq!(recent.len(), 10);
    assert_eq!(recent[0].timestamp, start + Duration::days(11));
    assert_eq!(recent[9].timestamp, start + Duration::days(2));
}

#[test]
fn document_uses_persisted_field_names() {
    let mut state = state_with(&["Anna", "Ben"], 0);
    state
        .mark_done_at(Utc.with_ymd_and_hms(2025, 1, 5, 7, 30, 0).unwrap())
        .unwrap();

    let document = state.to_document().unwrap();
    assert_eq!(
        document,
        serde_json::json!({
            "people": ["Anna", "Ben"],
            "currentIndex": 1,
            "history": [{"person": "Anna", "timestamp": "2025-01-05T07:30:00.000Z"}]
        })
    );
    assert_eq!(RotationState::from_document(document).unwrap(), state);
}
