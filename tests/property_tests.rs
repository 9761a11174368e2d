//! Property-based tests for the opname core.
//!
//! These use proptest to check the ledger arithmetic, report ordering and the
//! session state machine across a wide range of inputs.

use opname_api::{
    auth::Role,
    directory::RecapRow,
    models::{AssetBaseline, AssetDiff, SessionStatus},
    reports::{category_rank, report_filename, sanitize_file_fragment, sort_recap},
    state_machine::{apply, SessionCommand, SessionFacts, TransitionPolicy},
};
use proptest::prelude::*;

// Strategies for generating test data
fn status_value() -> impl Strategy<Value = Option<String>> {
    proptest::option::of(prop_oneof![
        Just("working".to_string()),
        Just("broken".to_string()),
        Just("missing".to_string()),
    ])
}

fn room_value() -> impl Strategy<Value = Option<String>> {
    proptest::option::of("R[0-9]{3}")
}

fn baseline_strategy() -> impl Strategy<Value = AssetBaseline> {
    (status_value(), room_value(), proptest::option::of(any::<bool>())).prop_map(
        |(status, room, condition)| AssetBaseline {
            status,
            room,
            condition,
            ..AssetBaseline::default()
        },
    )
}

fn diff_strategy() -> impl Strategy<Value = AssetDiff> {
    (status_value(), room_value(), proptest::option::of(any::<bool>())).prop_map(
        |(status, room, condition)| AssetDiff {
            status,
            room,
            condition,
            ..AssetDiff::default()
        },
    )
}

fn recap_strategy() -> impl Strategy<Value = Vec<RecapRow>> {
    proptest::collection::vec(
        (
            prop_oneof![
                Just("working_assets"),
                Just("broken_assets"),
                Just("misplaced_assets"),
                Just("missing_assets"),
                Just("unknown_bucket"),
            ],
            "[A-Z][a-z]{2,8}",
            1i64..50,
        )
            .prop_map(|(category, variety, count)| RecapRow {
                category: category.to_string(),
                product_variety: variety,
                asset_count: count,
            }),
        0..12,
    )
}

fn status_strategy() -> impl Strategy<Value = SessionStatus> {
    prop_oneof![
        Just(SessionStatus::Active),
        Just(SessionStatus::Submitted),
        Just(SessionStatus::Escalated),
        Just(SessionStatus::Verified),
        Just(SessionStatus::Rejected),
        Just(SessionStatus::Cancelled),
    ]
}

fn role_strategy() -> impl Strategy<Value = Role> {
    prop_oneof![Just(Role::Staff), Just(Role::AreaManager), Just(Role::L1Support)]
}

/// What the ledger stores and reports for one scan.
fn record(baseline: &AssetBaseline, stored: &AssetDiff, diff: &AssetDiff) -> (AssetDiff, AssetDiff) {
    let applied = diff.changes_from(&baseline.overlay(stored));
    let to_store = stored.merge(diff).changes_from(baseline);
    (applied, to_store)
}

// Property: recording the same scan twice changes nothing the second time
proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn repeated_scan_applies_nothing(
        baseline in baseline_strategy(),
        stored in diff_strategy(),
        diff in diff_strategy(),
    ) {
        let stored = stored.changes_from(&baseline);
        let (_, once) = record(&baseline, &stored, &diff);
        let (applied, twice) = record(&baseline, &once, &diff);
        prop_assert!(applied.is_empty(), "second scan applied {:?}", applied);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn stored_diff_never_repeats_the_register(
        baseline in baseline_strategy(),
        stored in diff_strategy(),
        diff in diff_strategy(),
    ) {
        let (_, to_store) = record(&baseline, &stored, &diff);
        prop_assert_eq!(to_store.changes_from(&baseline), to_store.clone());
    }

    #[test]
    fn current_state_reflects_latest_scan(
        baseline in baseline_strategy(),
        stored in diff_strategy(),
        diff in diff_strategy(),
    ) {
        let (_, to_store) = record(&baseline, &stored, &diff);
        let current = baseline.overlay(&to_store);
        if let Some(status) = &diff.status {
            prop_assert_eq!(current.status.as_ref(), Some(status));
        }
        if let Some(room) = &diff.room {
            prop_assert_eq!(current.room.as_ref(), Some(room));
        }
    }
}

// Property: recap order does not depend on the order rows arrive in
proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn recap_order_is_input_independent(
        (rows, shuffled) in recap_strategy()
            .prop_flat_map(|rows| (Just(rows.clone()), Just(rows).prop_shuffle()))
    ) {
        let mut a = rows;
        let mut b = shuffled;
        sort_recap(&mut a);
        sort_recap(&mut b);
        let keys = |rows: &[RecapRow]| -> Vec<(String, String)> {
            rows.iter()
                .map(|r| (r.category.clone(), r.product_variety.clone()))
                .collect()
        };
        prop_assert_eq!(keys(&a), keys(&b));
        for pair in a.windows(2) {
            prop_assert!(category_rank(&pair[0].category) <= category_rank(&pair[1].category));
        }
    }

    #[test]
    fn file_fragments_are_safe(name in "\\PC{0,40}") {
        let fragment = sanitize_file_fragment(&name);
        prop_assert!(!fragment.is_empty());
        prop_assert!(fragment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));

        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let filename = report_filename(&name, date, "html");
        prop_assert!(filename.starts_with("BAP_opname_"));
        prop_assert!(filename.ends_with("_01-03-2024.html"));
    }
}

// Property: the state machine only ever moves forward
proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn staff_never_reviews(status in status_strategy(), reviewer in 1i64..100) {
        let facts = SessionFacts { status, initiator_id: 1 };
        let policy = TransitionPolicy { allow_l1_without_manager: true };
        for command in [
            SessionCommand::Approve { reviewer, role: Role::Staff },
            SessionCommand::Reject { reviewer, role: Role::Staff },
        ] {
            prop_assert!(apply(&facts, &command, &policy).is_err());
        }
    }

    #[test]
    fn terminal_sessions_stay_put(
        status in prop_oneof![
            Just(SessionStatus::Verified),
            Just(SessionStatus::Rejected),
            Just(SessionStatus::Cancelled),
        ],
        role in role_strategy(),
        actor in 1i64..100,
        allow in any::<bool>(),
    ) {
        let facts = SessionFacts { status, initiator_id: actor };
        let policy = TransitionPolicy { allow_l1_without_manager: allow };
        for command in [
            SessionCommand::Finish { by: actor },
            SessionCommand::Approve { reviewer: actor, role },
            SessionCommand::Reject { reviewer: actor, role },
            SessionCommand::Cancel { by: actor, role },
        ] {
            prop_assert!(apply(&facts, &command, &policy).is_err());
        }
    }

    #[test]
    fn successful_transitions_leave_the_current_status(
        status in status_strategy(),
        role in role_strategy(),
        actor in 1i64..5,
        initiator in 1i64..5,
        allow in any::<bool>(),
    ) {
        let facts = SessionFacts { status, initiator_id: initiator };
        let policy = TransitionPolicy { allow_l1_without_manager: allow };
        for command in [
            SessionCommand::Finish { by: actor },
            SessionCommand::Approve { reviewer: actor, role },
            SessionCommand::Reject { reviewer: actor, role },
            SessionCommand::Cancel { by: actor, role },
        ] {
            if let Ok(transition) = apply(&facts, &command, &policy) {
                prop_assert_eq!(transition.from, status);
                prop_assert_ne!(transition.to, status);
                prop_assert_ne!(transition.to, SessionStatus::Active);
            }
        }
    }
}
