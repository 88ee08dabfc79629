//! Stabbing and range queries.
//!
//! A query walks the tree depth first from the root, narrowing the time
//! condition to each node's range and only descending into children whose
//! recorded range still intersects it. Results stream out leaf by leaf.

use crate::condition::TimeRangeCondition;
use crate::error::Result;
use crate::interval::HtInterval;
use crate::node::NodeType;
use crate::tree::HistoryTree;

type Predicate<'a, E> = Box<dyn Fn(&E) -> bool + Send + 'a>;

/// Lazy iterator over the intervals matching a query.
///
/// Yields `Err` at most once, when a node cannot be read; iteration stops
/// afterwards.
pub struct QueryIter<'a, E: HtInterval> {
    tree: &'a HistoryTree<E>,
    condition: TimeRangeCondition,
    predicate: Predicate<'a, E>,
    stack: Vec<u32>,
    pending: std::vec::IntoIter<E>,
}

impl<'a, E: HtInterval> QueryIter<'a, E> {
    fn new(tree: &'a HistoryTree<E>, condition: TimeRangeCondition, predicate: Predicate<'a, E>) -> Self {
        Self {
            stack: vec![tree.root_seq()],
            tree,
            condition,
            predicate,
            pending: Vec::new().into_iter(),
        }
    }
}

impl<E: HtInterval> Iterator for QueryIter<'_, E> {
    type Item = Result<E>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(interval) = self.pending.next() {
                return Some(Ok(interval));
            }
            let seq = self.stack.pop()?;
            let node = match self.tree.read_node(seq) {
                Ok(node) => node,
                Err(err) => {
                    self.stack.clear();
                    return Some(Err(err));
                }
            };
            let Some(condition) = self.condition.sub_condition(node.start(), node.end()) else {
                continue;
            };
            match node.node_type() {
                NodeType::Core => {
                    // Reversed so children are visited in link order.
                    let children = node.select_next_children(&condition);
                    self.stack.extend(children.into_iter().rev());
                }
                NodeType::Leaf => {
                    self.pending = node
                        .matching_intervals(&condition, &self.predicate)
                        .into_iter();
                }
            }
        }
    }
}

impl<E: HtInterval> HistoryTree<E> {
    /// All intervals intersecting `condition`.
    pub fn query(&self, condition: &TimeRangeCondition) -> QueryIter<'_, E> {
        QueryIter::new(self, condition.clone(), Box::new(|_: &E| true))
    }

    /// Intervals intersecting `condition` that also satisfy `predicate`.
    pub fn query_filtered<'a, F>(&'a self, condition: &TimeRangeCondition, predicate: F) -> QueryIter<'a, E>
    where
        F: Fn(&E) -> bool + Send + 'a,
    {
        QueryIter::new(self, condition.clone(), Box::new(predicate))
    }

    /// Intervals containing the single time `t`.
    pub fn query_at(&self, t: i64) -> QueryIter<'_, E> {
        self.query(&TimeRangeCondition::singleton(t))
    }

    /// Collects every match, failing on the first unreadable node.
    pub fn query_all(&self, condition: &TimeRangeCondition) -> Result<Vec<E>> {
        self.query(condition).collect()
    }

    /// The first interval found that intersects `condition` and satisfies
    /// `predicate`. Stops reading nodes as soon as one matches.
    pub fn first_match<F>(&self, condition: &TimeRangeCondition, predicate: F) -> Result<Option<E>>
    where
        F: Fn(&E) -> bool + Send,
    {
        let mut stack = vec![self.root_seq()];
        while let Some(seq) = stack.pop() {
            let node = self.read_node(seq)?;
            let Some(sub) = condition.sub_condition(node.start(), node.end()) else {
                continue;
            };
            match node.node_type() {
                NodeType::Core => stack.extend(node.select_next_children(&sub).into_iter().rev()),
                NodeType::Leaf => {
                    if let Some(found) = node.first_matching(&sub, &predicate) {
                        return Ok(Some(found));
                    }
                }
            }
        }
        Ok(None)
    }
}
