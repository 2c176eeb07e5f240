// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property tests for the version and duration primitives.

use dbt_core::{parse_duration, ToolVersion};
use proptest::prelude::*;

fn triple() -> impl Strategy<Value = ToolVersion> {
    (0u64..=1_000_000, 0u64..=1_000_000, 0u64..=1_000_000)
        .prop_map(|(a, b, c)| ToolVersion::new(a, b, c))
}

proptest! {
    #[test]
    fn display_parse_round_trips(v in triple()) {
        let rendered = v.to_string();
        prop_assert_eq!(rendered.parse::<ToolVersion>().unwrap(), v);
    }

    #[test]
    fn newer_than_is_irreflexive(v in triple()) {
        prop_assert!(!v.newer_than(&v));
    }

    #[test]
    fn ordering_is_total_and_antisymmetric(a in triple(), b in triple()) {
        let forward = a.newer_than(&b);
        let backward = b.newer_than(&a);
        if a == b {
            prop_assert!(!forward && !backward);
        } else {
            prop_assert_ne!(forward, backward);
        }
    }

    #[test]
    fn latest_of_dominates_every_input(versions in prop::collection::vec(triple(), 1..20)) {
        let latest = ToolVersion::latest_of(versions.iter().cloned()).unwrap();
        for v in &versions {
            prop_assert!(!v.newer_than(&latest));
        }
        prop_assert!(versions.contains(&latest));
    }

    #[test]
    fn non_numeric_components_never_parse(
        prefix in "[0-9]{1,4}",
        junk in "[a-zA-Z-][a-zA-Z0-9-]{0,6}",
    ) {
        let candidate = format!("{prefix}.{junk}.0");
        prop_assert!(candidate.parse::<ToolVersion>().is_err());
    }

    #[test]
    fn day_durations_expand_exactly(days in 0u32..=10_000) {
        let parsed = parse_duration(&format!("{days}d")).unwrap();
        prop_assert_eq!(parsed.as_secs(), u64::from(days) * 86_400);
    }

    #[test]
    fn week_durations_are_seven_days(weeks in 0u32..=1_000) {
        let as_weeks = parse_duration(&format!("{weeks}w")).unwrap();
        let as_days = parse_duration(&format!("{}d", weeks * 7)).unwrap();
        prop_assert_eq!(as_weeks, as_days);
    }
}
