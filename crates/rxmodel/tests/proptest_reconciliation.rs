//! Property-based invariants of list reconciliation.
//!
//! For any two orderings of distinct entities, replacing the first with the
//! second must report:
//!
//! 1. A remove for exactly the elements that left, in snapshot order
//! 2. An add for exactly the elements that joined, in contents order
//! 3. Sorts only for retained elements whose old slot now holds another
//! 4. Nothing when the contents are reassigned unchanged
//! 5. The same events whether the change is one call or a transaction

use proptest::prelude::*;
use rxmodel::event::{Payload, MUTATION};
use rxmodel::test_utils::{entities, EventRecorder};
use rxmodel::{Entity, EventTarget, ObservableList, Value};

const POOL: usize = 8;

fn arb_order() -> impl Strategy<Value = Vec<usize>> {
    proptest::collection::vec(0..POOL, 0..=POOL).prop_map(|mut picks| {
        let mut seen = [false; POOL];
        picks.retain(|&i| !std::mem::replace(&mut seen[i], true));
        picks
    })
}

fn pick(pool: &[Entity], order: &[usize]) -> Vec<Value> {
    order.iter().map(|&i| Value::from(pool[i].clone())).collect()
}

fn contains(order: &[usize], i: usize) -> bool {
    order.contains(&i)
}

fn index_of(pool: &[Entity], entity: &Entity) -> usize {
    pool.iter()
        .position(|member| member.ptr_eq(entity))
        .expect("event model comes from the pool")
}

/// (category, pool index, old index) per recorded event.
fn summary(pool: &[Entity], recorder: &EventRecorder) -> Vec<(&'static str, usize, Option<usize>)> {
    recorder
        .events()
        .iter()
        .map(|event| {
            let model = event.model().expect("list events carry a model");
            (event.category().name(), index_of(pool, model), event.old_index())
        })
        .collect()
}

proptest! {
    #[test]
    fn removes_and_adds_match_set_difference(before in arb_order(), after in arb_order()) {
        let pool = entities(POOL);
        let list = ObservableList::new(Value::Array(pick(&pool, &before))).unwrap();
        let recorder = EventRecorder::attach(&list, &[&MUTATION]);

        list.replace_all(pick(&pool, &after)).unwrap();
        let events = summary(&pool, &recorder);

        let removed: Vec<usize> = events.iter().filter(|e| e.0 == "RemoveEvent").map(|e| e.1).collect();
        let expected_removed: Vec<usize> = before.iter().copied().filter(|&i| !contains(&after, i)).collect();
        prop_assert_eq!(removed, expected_removed);

        let added: Vec<usize> = events.iter().filter(|e| e.0 == "AddEvent").map(|e| e.1).collect();
        let expected_added: Vec<usize> = after.iter().copied().filter(|&i| !contains(&before, i)).collect();
        prop_assert_eq!(added, expected_added);
    }

    #[test]
    fn sorts_only_for_displaced_retained_elements(before in arb_order(), after in arb_order()) {
        let pool = entities(POOL);
        let list = ObservableList::new(Value::Array(pick(&pool, &before))).unwrap();
        let recorder = EventRecorder::attach(&list, &[&MUTATION]);

        list.replace_all(pick(&pool, &after)).unwrap();

        for event in recorder.events() {
            if let Payload::Sort { model, old_index } = event.payload() {
                let i = index_of(&pool, model);
                prop_assert!(contains(&after, i));
                prop_assert_eq!(before[*old_index], i);
                prop_assert!(*old_index < after.len());
                prop_assert_ne!(after[*old_index], i);
            }
        }
        let expected_sorts = before
            .iter()
            .enumerate()
            .filter(|&(j, &i)| contains(&after, i) && j < after.len() && after[j] != i)
            .count();
        prop_assert_eq!(recorder.events().iter().filter(|e| e.old_index().is_some()).count(), expected_sorts);
    }

    #[test]
    fn unchanged_contents_are_silent(order in arb_order()) {
        let pool = entities(POOL);
        let list = ObservableList::new(Value::Array(pick(&pool, &order))).unwrap();
        let recorder = EventRecorder::attach(&list, &[&MUTATION]);
        list.replace_all(pick(&pool, &order)).unwrap();
        prop_assert!(recorder.is_empty());
    }

    #[test]
    fn transaction_matches_single_replacement(before in arb_order(), after in arb_order()) {
        let pool = entities(POOL);

        let direct = ObservableList::new(Value::Array(pick(&pool, &before))).unwrap();
        let direct_events = EventRecorder::attach(&direct, &[&MUTATION]);
        direct.replace_all(pick(&pool, &after)).unwrap();

        let batched = ObservableList::new(Value::Array(pick(&pool, &before))).unwrap();
        let batched_events = EventRecorder::attach(&batched, &[&MUTATION]);
        batched
            .transaction(|| {
                batched.set_len(0)?;
                batched.push(pick(&pool, &after)).map(|_| ())
            })
            .unwrap();

        prop_assert_eq!(summary(&pool, &direct_events), summary(&pool, &batched_events));
    }
}
