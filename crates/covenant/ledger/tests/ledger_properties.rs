//! Set properties every ledger realization must keep

use chrono::{TimeZone, Utc};
use covenant_ledger::{InMemoryLedger, Ledger, SqliteLedger};
use covenant_types::{AcknowledgementRecord, DisplayMetadata, MemberId, PolicyVersion, SpaceId};
use proptest::prelude::*;
use std::collections::BTreeSet;

const VERSIONS: [&str; 3] = ["1.0", "1.1", "2.0"];

#[derive(Debug, Clone)]
enum Op {
    Acknowledge { member: i64, space: i64, version: usize, at: i64 },
    Discover { member: i64, space: i64, at: i64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1i64..8, -3i64..-1, 0usize..VERSIONS.len(), 0i64..1_000).prop_map(
            |(member, space, version, at)| Op::Acknowledge { member, space, version, at }
        ),
        (1i64..8, -3i64..-1, 0i64..1_000)
            .prop_map(|(member, space, at)| Op::Discover { member, space, at }),
    ]
}

async fn apply(ledger: &dyn Ledger, ops: &[Op]) {
    for op in ops {
        match op {
            Op::Acknowledge { member, space, version, at } => {
                let record = AcknowledgementRecord::acknowledgement(
                    MemberId::new(*member),
                    SpaceId::new(*space),
                    PolicyVersion::new(VERSIONS[*version]).unwrap(),
                    DisplayMetadata::new(),
                    Utc.timestamp_opt(1_700_000_000 + at, 0).unwrap(),
                );
                ledger.upsert(record).await.unwrap();
            }
            Op::Discover { member, space, at } => {
                ledger
                    .discover(
                        MemberId::new(*member),
                        SpaceId::new(*space),
                        DisplayMetadata::new(),
                        Utc.timestamp_opt(1_700_000_000 + at, 0).unwrap(),
                    )
                    .await
                    .unwrap();
            }
        }
    }
}

/// Checks the derived sets against a model built from the op list
async fn check_sets(ledger: &dyn Ledger, ops: &[Op]) {
    for space in [-3i64, -2] {
        let space_id = SpaceId::new(space);
        let known: BTreeSet<i64> = ops
            .iter()
            .filter_map(|op| match op {
                Op::Acknowledge { member, space: s, .. } | Op::Discover { member, space: s, .. }
                    if *s == space =>
                {
                    Some(*member)
                }
                _ => None,
            })
            .collect();

        for (index, raw) in VERSIONS.iter().enumerate() {
            let version = PolicyVersion::new(*raw).unwrap();
            let acknowledged: BTreeSet<i64> = ops
                .iter()
                .filter_map(|op| match op {
                    Op::Acknowledge { member, space: s, version: v, .. }
                        if *s == space && *v == index =>
                    {
                        Some(*member)
                    }
                    _ => None,
                })
                .collect();

            let expected: Vec<MemberId> = known
                .difference(&acknowledged)
                .copied()
                .map(MemberId::new)
                .collect();
            let missing = ledger.unacknowledged_members(space_id, &version).await.unwrap();
            assert_eq!(missing, expected, "space {space} version {raw}");

            let listed: BTreeSet<i64> = ledger
                .list_acknowledged(space_id, &version)
                .await
                .unwrap()
                .iter()
                .map(|r| r.member_id.get())
                .collect();
            assert_eq!(listed, acknowledged);
            assert!(listed.is_subset(&known));

            for member in &known {
                let has = ledger
                    .has_acknowledged(MemberId::new(*member), space_id, &version)
                    .await
                    .unwrap();
                assert_eq!(has, acknowledged.contains(member));
            }
        }

        // Exactly one row per identity no matter how often it was written.
        let exported = ledger.export(Some(space_id)).await.unwrap();
        let identities: BTreeSet<_> = exported
            .iter()
            .map(|r| (r.member_id, r.version.as_str().to_string()))
            .collect();
        assert_eq!(identities.len(), exported.len());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_memory_ledger_sets(ops in proptest::collection::vec(op_strategy(), 0..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let ledger = InMemoryLedger::new();
            apply(&ledger, &ops).await;
            check_sets(&ledger, &ops).await;
        });
    }

    #[test]
    fn prop_sqlite_ledger_sets(ops in proptest::collection::vec(op_strategy(), 0..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let ledger = SqliteLedger::in_memory().await.unwrap();
            apply(&ledger, &ops).await;
            check_sets(&ledger, &ops).await;
        });
    }
}
