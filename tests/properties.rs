//! Property tests: a committed set is the net effect of its operations.

use flexsync::{NullTransport, Query, SetVersion, SubscriptionOptions, SubscriptionSetManager};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
enum Op {
    AddNamed { name: u8, filter: u8 },
    RemoveByName { name: u8 },
    RemoveAll,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0u8..4, 0u8..4).prop_map(|(name, filter)| Op::AddNamed { name, filter }),
        3 => (0u8..4).prop_map(|name| Op::RemoveByName { name }),
        1 => Just(Op::RemoveAll),
    ]
}

fn query(filter: u8) -> Query {
    Query::filtered("Cat", format!("age > {}", filter))
}

proptest! {
    #[test]
    fn committed_set_matches_net_effect(ops in prop::collection::vec(op_strategy(), 0..24)) {
        let manager = SubscriptionSetManager::new(Arc::new(NullTransport));

        // Model: name -> filter, last write wins.
        let mut model: BTreeMap<String, u8> = BTreeMap::new();
        for op in &ops {
            match op {
                Op::AddNamed { name, filter } => {
                    model.insert(format!("s{}", name), *filter);
                }
                Op::RemoveByName { name } => {
                    model.remove(&format!("s{}", name));
                }
                Op::RemoveAll => model.clear(),
            }
        }

        let set = manager
            .update(|m| {
                for op in &ops {
                    match op {
                        Op::AddNamed { name, filter } => {
                            m.add(query(*filter), SubscriptionOptions::named(format!("s{}", name)))?;
                        }
                        Op::RemoveByName { name } => {
                            m.remove_by_name(&format!("s{}", name));
                        }
                        Op::RemoveAll => {
                            m.remove_all();
                        }
                    }
                }
                Ok(())
            })
            .unwrap();

        prop_assert_eq!(set.len(), model.len());
        for (name, filter) in &model {
            let sub = set.find_by_name(name);
            prop_assert!(sub.is_some());
            prop_assert_eq!(&sub.unwrap().query, &query(*filter));
        }

        // Version moves only when something is left to commit.
        let expected = if model.is_empty() { SetVersion(0) } else { SetVersion(1) };
        prop_assert_eq!(set.version(), expected);
    }

    #[test]
    fn versions_strictly_increase(batches in prop::collection::vec(0u8..3, 1..12)) {
        let manager = SubscriptionSetManager::new(Arc::new(NullTransport));
        let mut last = manager.version();

        for (i, adds) in batches.iter().enumerate() {
            let set = manager
                .update(|m| {
                    for j in 0..*adds {
                        m.add(
                            Query::filtered("Dog", format!("id == {}", i * 10 + j as usize)),
                            SubscriptionOptions::anonymous(),
                        )?;
                    }
                    Ok(())
                })
                .unwrap();

            if *adds == 0 {
                prop_assert_eq!(set.version(), last);
            } else {
                prop_assert!(set.version() > last);
                prop_assert_eq!(set.version(), last.next());
            }
            last = set.version();
        }
    }
}
