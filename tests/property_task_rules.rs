//! Property tests for the task transition table and scenario classifier.

use proptest::prelude::*;

use arranger::domain::models::scenario::{classify, SCENARIO_TABLE};
use arranger::domain::models::TaskStatus;

const ALL_STATUSES: [TaskStatus; 8] = [
    TaskStatus::Pending,
    TaskStatus::Queued,
    TaskStatus::Assigned,
    TaskStatus::Running,
    TaskStatus::Completed,
    TaskStatus::Failed,
    TaskStatus::Blocked,
    TaskStatus::Paused,
];

fn status_strategy() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(ALL_STATUSES.to_vec())
}

proptest! {
    #[test]
    fn terminal_states_never_transition(next in status_strategy()) {
        prop_assert!(!TaskStatus::Completed.can_transition_to(next));
        prop_assert!(!TaskStatus::Failed.can_transition_to(next));
    }

    #[test]
    fn transitions_are_closed_over_the_table(from in status_strategy(), to in status_strategy()) {
        // can_transition_to agrees with the table itself.
        let listed = from.valid_transitions().contains(&to);
        prop_assert_eq!(from.can_transition_to(to), listed);
    }

    #[test]
    fn status_round_trips_through_str(status in status_strategy()) {
        prop_assert_eq!(TaskStatus::from_str(status.as_str()), Some(status));
    }

    #[test]
    fn classifier_always_yields_a_known_scenario(content in ".{0,200}") {
        let scenario = classify(&content);
        prop_assert!(SCENARIO_TABLE.iter().any(|rule| rule.id == scenario));
    }

    #[test]
    fn classifier_is_case_insensitive(word in prop::sample::select(vec!["BUG", "Fix", "HOTFIX", "Refactor"])) {
        let upper = classify(word);
        let lower = classify(&word.to_lowercase());
        prop_assert_eq!(upper, lower);
    }
}
