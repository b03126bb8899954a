//! Property tests for the matcher's join

use crewcall_sync::matcher::matches_for;
use crewcall_sync::{
    fields, var, ActionLog, ActionName, ActionTemplate, Completion, Fields, FlowId, Origin,
    Pattern, SyncBuilder, SyncRegistry,
};
use proptest::prelude::*;
use std::collections::HashSet;

fn name(s: &str) -> ActionName {
    s.parse().unwrap()
}

fn pair_sync() -> SyncRegistry {
    let mut syncs = SyncRegistry::new();
    syncs
        .register(
            SyncBuilder::new("pair")
                .when(Pattern::new(name("A.ping")).input("k", var("k")))
                .when(Pattern::new(name("B.pong")).input("k", var("k")))
                .then(ActionTemplate::new(name("C.done")).binds(&["k"]))
                .build()
                .unwrap(),
        )
        .unwrap();
    syncs
}

#[derive(Debug, Clone)]
struct Step {
    ping: bool,
    key: u8,
    flow: usize,
    fails: bool,
}

fn step() -> impl Strategy<Value = Step> {
    (any::<bool>(), 0u8..3, 0usize..2, prop::bool::weighted(0.2)).prop_map(
        |(ping, key, flow, fails)| Step {
            ping,
            key,
            flow,
            fails,
        },
    )
}

proptest! {
    #[test]
    fn every_consistent_pair_fires_exactly_once(steps in prop::collection::vec(step(), 0..24)) {
        let log = ActionLog::new();
        let syncs = pair_sync();
        let flows = [FlowId::new(), FlowId::new()];

        let mut completed = Vec::new();
        let mut keys = HashSet::new();
        for step in &steps {
            let action = if step.ping { "A.ping" } else { "B.pong" };
            let flow = flows[step.flow];
            let id = log.record(name(action), fields! { "k" => step.key }, Origin::root(flow));
            let outcome = if step.fails {
                Completion::failure("boom")
            } else {
                Completion::success(Fields::new())
            };
            let record = log.complete(id, outcome).unwrap();

            for found in matches_for(&log, &syncs, &record) {
                let sources = found.frame.sources();
                prop_assert_eq!(sources.len(), 2);
                prop_assert!(sources.contains(&record.id));
                let ping = log.get(sources[0]).unwrap();
                let pong = log.get(sources[1]).unwrap();
                prop_assert_eq!(&ping.action, &name("A.ping"));
                prop_assert_eq!(&pong.action, &name("B.pong"));
                prop_assert_eq!(ping.flow, pong.flow);
                prop_assert!(ping.succeeded() && pong.succeeded());
                prop_assert_eq!(ping.input.get("k"), found.frame.get("k"));
                prop_assert_eq!(pong.input.get("k"), found.frame.get("k"));
                prop_assert!(keys.insert(found.key()));
            }
            completed.push(record);
        }

        let mut expected = 0;
        for ping in completed.iter().filter(|r| r.action == name("A.ping") && r.succeeded()) {
            for pong in completed.iter().filter(|r| r.action == name("B.pong") && r.succeeded()) {
                if ping.flow == pong.flow && ping.input.get("k") == pong.input.get("k") {
                    expected += 1;
                }
            }
        }
        prop_assert_eq!(keys.len(), expected);
    }
}
