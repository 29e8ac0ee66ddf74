// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Retained-message tree.
//!
//! A prefix tree keyed by topic segment. Two root buckets exist from init
//! on: `""` for ordinary topics and `"$SYS"` for the system tree, so
//! root-level wildcards can never walk into `$`-topics. Further `$`-buckets
//! appear on demand. The bucket key only selects the subtree; the first
//! segment of a `$`-topic is walked again as a literal child inside its
//! bucket, so a message retained at a bare `$SYS` topic sits on a regular
//! node and matches like any other.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Error;
use crate::store::{MessageStore, RetainedMessage};
use crate::topic::{self, FilterToken};

mod delivery;

/// One level of the retain tree.
///
/// Children own their subtrees; a node holds at most one retained message
/// and each retained message is referenced by exactly one node.
#[derive(Debug, Default)]
pub struct RetainNode {
    children: HashMap<String, RetainNode>,
    retained: Option<Arc<RetainedMessage>>,
}

impl RetainNode {
    fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn retained(&self) -> Option<&Arc<RetainedMessage>> {
        self.retained.as_ref()
    }

    pub(crate) fn take_retained(&mut self) -> Option<Arc<RetainedMessage>> {
        self.retained.take()
    }
}

/// Outcome of one store operation, used by the caller to keep its metrics
/// straight.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreOutcome {
    /// An old retained message left the tree.
    pub removed: bool,

    /// A new retained message entered the tree.
    pub installed: bool,
}

/// Result of one recursion step of the matcher.
///
/// `ParentCandidate` bubbles up from a trailing `#` so the caller knows the
/// node owning that subtree matches as well; `foo/#` matches `foo` itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchFlag {
    Complete,
    ParentCandidate,
}

#[derive(Debug)]
pub struct RetainTree {
    roots: HashMap<String, RetainNode>,
}

impl Default for RetainTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RetainTree {
    #[must_use]
    pub fn new() -> Self {
        let mut roots = HashMap::new();
        roots.insert(String::new(), RetainNode::new());
        roots.insert("$SYS".to_string(), RetainNode::new());
        Self { roots }
    }

    /// Install or clear the retained message at `topic_name`.
    ///
    /// An empty payload clears the slot; the message itself is not kept.
    /// Reference counts are balanced through `store`: the incoming message
    /// is incremented before the outgoing one is decremented.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a malformed topic. The tree is unchanged
    /// in that case.
    pub fn store(
        &mut self,
        topic_name: &str,
        message: &Arc<RetainedMessage>,
        store: &dyn MessageStore,
    ) -> Result<StoreOutcome, Error> {
        let segments = topic::tokenize_topic(topic_name)?;
        let root_key = if segments[0].starts_with('$') {
            segments[0].as_str()
        } else {
            ""
        };

        let mut node = self
            .roots
            .entry(root_key.to_string())
            .or_insert_with(RetainNode::new);
        for segment in &segments {
            node = node
                .children
                .entry(segment.clone())
                .or_insert_with(RetainNode::new);
        }

        let mut outcome = StoreOutcome::default();
        let old = node.retained.take();
        if !message.payload().is_empty() {
            store.ref_inc(message);
            node.retained = Some(Arc::clone(message));
            outcome.installed = true;
        }
        if let Some(old) = old {
            store.ref_dec(&old);
            outcome.removed = true;
        }
        Ok(outcome)
    }

    /// Visit every node whose path matches the tokenized filter.
    ///
    /// Sibling order is whatever the child map yields; callers must not
    /// rely on it.
    pub fn match_filter(
        &mut self,
        tokens: &[FilterToken],
        visit: &mut dyn FnMut(&mut RetainNode),
    ) {
        // The bucket lookup only selects the subtree; the first token is
        // then matched as a literal child like every other level, so the
        // self-match rule applies to bare `$`-topics as well.
        let root_key = match tokens.first() {
            Some(FilterToken::Segment(segment)) if segment.starts_with('$') => segment.as_str(),
            _ => "",
        };
        if let Some(root) = self.roots.get_mut(root_key) {
            search(root, tokens, visit);
        }
    }

    /// Release the whole tree, decrementing every retained reference, and
    /// reseed the two permanent roots.
    pub fn clear(&mut self, store: &dyn MessageStore) {
        for root in self.roots.values_mut() {
            clean_node(root, store);
        }
        self.roots.clear();
        self.roots.insert(String::new(), RetainNode::new());
        self.roots.insert("$SYS".to_string(), RetainNode::new());
    }
}

fn clean_node(node: &mut RetainNode, store: &dyn MessageStore) {
    if let Some(retained) = node.retained.take() {
        store.ref_dec(&retained);
    }
    for child in node.children.values_mut() {
        clean_node(child, store);
    }
    node.children.clear();
}

fn search(
    node: &mut RetainNode,
    tokens: &[FilterToken],
    visit: &mut dyn FnMut(&mut RetainNode),
) -> SearchFlag {
    let mut flag = SearchFlag::Complete;
    match tokens.split_first() {
        // Filters always carry at least one token; empty tails stop in
        // `visit_or_descend` before recursing.
        None => {}
        Some((FilterToken::MultiWildcard, _)) => {
            for child in node.children.values_mut() {
                // The node owning this subtree matches too; report that to
                // the caller on unwind.
                flag = SearchFlag::ParentCandidate;
                if child.retained.is_some() {
                    visit(child);
                }
                if !child.children.is_empty() {
                    search(child, tokens, visit);
                }
            }
        }
        Some((FilterToken::SingleWildcard, tail)) => {
            for child in node.children.values_mut() {
                visit_or_descend(child, tail, visit);
            }
        }
        Some((FilterToken::Segment(segment), tail)) => {
            if let Some(child) = node.children.get_mut(segment.as_str()) {
                visit_or_descend(child, tail, visit);
            }
        }
    }
    flag
}

fn visit_or_descend(
    child: &mut RetainNode,
    tail: &[FilterToken],
    visit: &mut dyn FnMut(&mut RetainNode),
) {
    if tail.is_empty() {
        if child.retained.is_some() {
            visit(child);
        }
        return;
    }
    let deeper = search(child, tail, visit);
    if (deeper == SearchFlag::ParentCandidate
        || tail.first() == Some(&FilterToken::MultiWildcard))
        && child.retained.is_some()
    {
        visit(child);
    }
}
