//! Merge the module orders requested by several chunk groups into one sequence.
//!
//! Every group that contains a chunk wants the chunk's modules in its own post-order. The
//! resolver turns each group's sequence into "must come after" constraints and repeatedly
//! places the next module of some group whose predecessors are all placed. When every
//! candidate is blocked the groups disagree; the candidate with the fewest unplaced
//! predecessors is placed anyway and the violation is recorded as an [`OrderConflict`].

use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};

/// Result of ordering one module universe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleOrder {
  /// Module indices in emission order, each exactly once.
  pub modules: Vec<usize>,
  /// Forced placements, in the order they happened.
  pub conflicts: Vec<OrderConflict>,
}

/// A module placed although some of its requested predecessors were still missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderConflict {
  /// The force-placed module.
  pub module: usize,
  /// Predecessors that ended up after `module`.
  pub unmet: Vec<UnmetOrder>,
}

/// One predecessor relation broken by a forced placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmetOrder {
  /// Module that should have been placed earlier.
  pub module: usize,
  /// Consumers whose desired order was violated.
  pub violated: Vec<String>,
  /// Consumers that asked for the placed module to come first.
  pub fulfilled: Vec<String>,
}

#[derive(Debug)]
struct Consumer {
  name: String,
  order: Vec<usize>,
}

/// Best-effort topological merge over consumer orderings.
///
/// Consumers are scanned in registration order, which makes the result deterministic for
/// a given input.
#[derive(Debug)]
pub struct OrderResolver {
  size: usize,
  consumers: Vec<Consumer>,
}

impl OrderResolver {
  /// Create a resolver over the modules `0..size`.
  pub fn new(size: usize) -> Self {
    Self {
      size,
      consumers: Vec::new(),
    }
  }

  /// Register a consumer and the order it wants. Out of range and repeated indices are ignored.
  pub fn add_consumer(
    &mut self,
    name: impl Into<String>,
    order: impl IntoIterator<Item = usize>,
  ) -> &mut Self {
    let mut seen = HashSet::new();
    let order = order
      .into_iter()
      .filter(|&module| module < self.size && seen.insert(module))
      .collect();
    self.consumers.push(Consumer {
      name: name.into(),
      order,
    });
    self
  }

  /// Produce the merged order.
  pub fn resolve(self) -> ModuleOrder {
    let size = self.size;
    let mut predecessors: Vec<IndexSet<usize>> = vec![IndexSet::new(); size];
    // reasons[later][earlier] = consumers wanting `earlier` before `later`
    let mut reasons: Vec<IndexMap<usize, IndexSet<usize>>> = vec![IndexMap::new(); size];
    let mut listed = vec![false; size];

    let mut remaining: Vec<Vec<usize>> = self
      .consumers
      .iter()
      .enumerate()
      .map(|(consumer, Consumer { order, .. })| {
        for (position, &later) in order.iter().enumerate() {
          listed[later] = true;
          for &earlier in order[..position].iter().rev() {
            predecessors[later].insert(earlier);
            reasons[later].entry(earlier).or_default().insert(consumer);
          }
        }
        // reversed so the next module to place sits at the tail
        order.iter().rev().copied().collect()
      })
      .collect();

    let listed_count = listed.iter().filter(|&&flag| flag).count();
    let mut placed = vec![false; size];
    let mut result = ModuleOrder::default();

    while result.modules.len() < listed_count {
      let mut best: Option<(usize, Vec<usize>)> = None;
      let mut progressed = false;

      for (index, list) in remaining.iter_mut().enumerate() {
        while list.last().is_some_and(|&module| placed[module]) {
          list.pop();
        }
        let Some(&module) = list.last() else {
          continue;
        };

        let missing: Vec<usize> = predecessors[module]
          .iter()
          .copied()
          .filter(|&dep| !placed[dep])
          .collect();

        if missing.is_empty() {
          list.pop();
          placed[module] = true;
          result.modules.push(module);
          progressed = true;
          break;
        }

        if best
          .as_ref()
          .is_none_or(|(_, fewest)| fewest.len() > missing.len())
        {
          best = Some((index, missing));
        }
      }

      if progressed {
        continue;
      }

      let Some((index, missing)) = best else {
        break;
      };
      let Some(module) = remaining[index].pop() else {
        break;
      };
      placed[module] = true;
      result.modules.push(module);

      let names = |consumers: Option<&IndexSet<usize>>| -> Vec<String> {
        consumers
          .into_iter()
          .flatten()
          .map(|&consumer| self.consumers[consumer].name.clone())
          .collect()
      };
      let unmet = missing
        .into_iter()
        .map(|dep| UnmetOrder {
          module: dep,
          violated: names(reasons[module].get(&dep)),
          fulfilled: names(reasons[dep].get(&module)),
        })
        .collect();
      result.conflicts.push(OrderConflict { module, unmet });
    }

    result
      .modules
      .extend((0..size).filter(|&module| !listed[module]));
    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn resolve(size: usize, consumers: &[(&str, &[usize])]) -> ModuleOrder {
    let mut resolver = OrderResolver::new(size);
    for (name, order) in consumers {
      resolver.add_consumer(*name, order.iter().copied());
    }
    resolver.resolve()
  }

  fn is_linear_extension(order: &[usize], wanted: &[usize]) -> bool {
    let position = |module: usize| order.iter().position(|&m| m == module);
    wanted
      .windows(2)
      .all(|pair| position(pair[0]) < position(pair[1]))
  }

  fn assert_permutation(order: &[usize], size: usize) {
    let mut sorted = order.to_vec();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..size).collect::<Vec<_>>());
  }

  #[test]
  fn compatible_orders_merge_without_conflicts() {
    let first: &[usize] = &[0, 1, 3];
    let second: &[usize] = &[0, 2, 3];
    let third: &[usize] = &[1, 2];
    let result = resolve(4, &[("a", first), ("b", second), ("c", third)]);

    assert!(result.conflicts.is_empty());
    assert_permutation(&result.modules, 4);
    for wanted in [first, second, third] {
      assert!(is_linear_extension(&result.modules, wanted));
    }
  }

  #[test]
  fn single_consumer_order_is_kept() {
    let result = resolve(3, &[("main", &[2, 0, 1])]);
    assert_eq!(result.modules, vec![2, 0, 1]);
    assert!(result.conflicts.is_empty());
  }

  #[test]
  fn contradicting_consumers_report_conflict() {
    let result = resolve(2, &[("first", &[0, 1]), ("second", &[1, 0])]);

    assert_eq!(result.modules, vec![0, 1]);
    assert_eq!(result.conflicts, vec![OrderConflict {
      module: 0,
      unmet: vec![UnmetOrder {
        module: 1,
        violated: vec!["second".into()],
        fulfilled: vec!["first".into()],
      }],
    }]);
  }

  #[test]
  fn conflict_resolution_is_deterministic() {
    let consumers: &[(&str, &[usize])] = &[("x", &[0, 1, 2]), ("y", &[2, 1, 0]), ("z", &[1, 2])];
    let first = resolve(3, consumers);
    for _ in 0..5 {
      assert_eq!(resolve(3, consumers), first);
    }
    assert!(!first.conflicts.is_empty());
    assert_permutation(&first.modules, 3);
  }

  #[test]
  fn disjoint_and_unlisted_modules_appear_once() {
    let result = resolve(6, &[("a", &[4, 1]), ("b", &[0, 2]), ("c", &[2, 2, 9])]);

    assert!(result.conflicts.is_empty());
    assert_permutation(&result.modules, 6);
    // module 3 and 5 are not requested by anyone and come last
    assert_eq!(&result.modules[4..], &[3, 5]);
  }

  #[test]
  fn cycle_across_three_consumers_terminates() {
    let result = resolve(3, &[("a", &[0, 1]), ("b", &[1, 2]), ("c", &[2, 0])]);

    assert_permutation(&result.modules, 3);
    assert_eq!(result.conflicts.len(), 1);
    let conflict = &result.conflicts[0];
    assert_eq!(conflict.unmet.len(), 1);
    assert!(!conflict.unmet[0].violated.is_empty());
  }

  #[test]
  fn no_consumers_keeps_universe_order() {
    let result = resolve(3, &[]);
    assert_eq!(result.modules, vec![0, 1, 2]);
  }
}
