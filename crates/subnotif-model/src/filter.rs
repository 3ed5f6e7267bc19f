// Copyright (C) 2025-present The NetGauze Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Subtree Filtering
//!
//! Implements [RFC 6241 Section 6](https://datatracker.ietf.org/doc/html/rfc6241#section-6)
//! subtree filters over the generic [Node] tree.
//!
//! A filter template is made of three kinds of nodes:
//! - **containment nodes**: have children, select a subset of a container or
//!   of every list entry.
//! - **selection nodes**: no children and no content, select the whole node.
//! - **content match nodes**: a leaf value, must be equal to the
//!   corresponding leaf (or any value of a leaf-list).
//!
//! Matching and pruning happen in a single pass: [SubtreeFilter::apply]
//! computes a [Selection] over the body (positions of the selected children,
//! list entries and leaf-list values), then materializes the pruned copy
//! from it. Selecting by position keeps ancestry and document order intact
//! and makes the union of overlapping selections trivial.
//!
//! ## Semantics
//!
//! - Top-level filter nodes are alternatives, the notification root must
//!   match at least one of them.
//! - Below the root every filter node must be satisfied by at least one
//!   sibling in the body.
//! - When all filter nodes under a containment node are content match nodes,
//!   the whole matched subtree is selected.
//! - An empty filter matches everything.

use crate::{
    node::{ListEntry, Node, NodeName},
    schema::{SchemaContext, SchemaNode, SchemaNodeKind},
    xpath::XPathFilter,
};
use std::{
    collections::{btree_map::Entry, BTreeMap, BTreeSet},
    sync::Arc,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterNode {
    name: NodeName,
    content: Option<Box<str>>,
    children: Vec<FilterNode>,
}

impl FilterNode {
    pub fn selection(name: NodeName) -> Self {
        Self {
            name,
            content: None,
            children: vec![],
        }
    }

    pub fn content_match(name: NodeName, content: impl Into<Box<str>>) -> Self {
        Self {
            name,
            content: Some(content.into()),
            children: vec![],
        }
    }

    pub fn containment(name: NodeName, children: Vec<FilterNode>) -> Self {
        Self {
            name,
            content: None,
            children,
        }
    }

    pub const fn name(&self) -> &NodeName {
        &self.name
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn children(&self) -> &[FilterNode] {
        &self.children
    }

    pub fn is_selection(&self) -> bool {
        self.content.is_none() && self.children.is_empty()
    }

    pub fn is_content_match(&self) -> bool {
        self.content.is_some() && self.children.is_empty()
    }

    /// Data tree representation of the template, as carried in the
    /// `stream-subtree-filter` anydata of state-change notifications.
    pub fn to_node(&self) -> Node {
        match &self.content {
            Some(content) if self.children.is_empty() => {
                Node::leaf(self.name.clone(), content.as_ref())
            }
            _ => Node::container(
                self.name.clone(),
                self.children.iter().map(FilterNode::to_node).collect(),
            ),
        }
    }
}

/// Outcome of evaluating a filter against a notification body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    accepted: bool,
    pruned: Option<Node>,
}

impl MatchResult {
    pub const fn accepted(pruned: Node) -> Self {
        Self {
            accepted: true,
            pruned: Some(pruned),
        }
    }

    pub const fn rejected() -> Self {
        Self {
            accepted: false,
            pruned: None,
        }
    }

    pub const fn is_accepted(&self) -> bool {
        self.accepted
    }

    pub const fn pruned(&self) -> Option<&Node> {
        self.pruned.as_ref()
    }

    pub fn into_pruned(self) -> Option<Node> {
        self.pruned
    }
}

#[derive(Debug, strum_macros::Display, PartialEq, Eq, Clone)]
pub enum FilterError {
    #[strum(to_string = "filter node `{0}` does not exist in the current schema context")]
    UnknownSchemaNode(String),

    #[strum(to_string = "filter node `{0}` is not a leaf and cannot match content")]
    ContentOnNonLeaf(String),

    #[strum(to_string = "filter node `{0}` is a leaf and cannot contain other nodes")]
    ChildrenOnLeaf(String),
}

impl std::error::Error for FilterError {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubtreeFilter {
    roots: Vec<FilterNode>,
}

impl SubtreeFilter {
    pub fn new(roots: Vec<FilterNode>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[FilterNode] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn matches(&self, body: &Node) -> bool {
        self.roots.is_empty() || self.roots.iter().any(|root| select(body, root).is_some())
    }

    pub fn prune(&self, body: &Node) -> Option<Node> {
        self.apply(body).into_pruned()
    }

    pub fn apply(&self, body: &Node) -> MatchResult {
        if self.roots.is_empty() {
            return MatchResult::accepted(body.clone());
        }
        let selection = self
            .roots
            .iter()
            .filter_map(|root| select(body, root))
            .reduce(Selection::union);
        match selection {
            Some(selection) => MatchResult::accepted(materialize(body, &selection)),
            None => MatchResult::rejected(),
        }
    }

    /// Checks every filter node resolves to a notification schema node.
    pub fn validate(&self, schema: &SchemaContext) -> Result<(), FilterError> {
        for root in &self.roots {
            let notification = schema
                .notification(root.name())
                .ok_or_else(|| FilterError::UnknownSchemaNode(root.name().to_string()))?;
            let path = root.name().to_string();
            validate_node(root, notification, notification.module(), &path)?;
        }
        Ok(())
    }
}

fn validate_node(
    filter: &FilterNode,
    schema: &SchemaNode,
    module: Option<&str>,
    path: &str,
) -> Result<(), FilterError> {
    let is_leaf = matches!(
        schema.kind(),
        SchemaNodeKind::Leaf | SchemaNodeKind::LeafList
    );
    if filter.content.is_some() && !is_leaf {
        return Err(FilterError::ContentOnNonLeaf(path.to_string()));
    }
    if !filter.children.is_empty() && is_leaf {
        return Err(FilterError::ChildrenOnLeaf(path.to_string()));
    }
    for child in &filter.children {
        let child_path = format!("{path}/{}", child.name());
        let (child_schema, child_module) = schema
            .child(module, child.name())
            .ok_or_else(|| FilterError::UnknownSchemaNode(child_path.clone()))?;
        validate_node(child, child_schema, child_module, &child_path)?;
    }
    Ok(())
}

/// Positions selected by a filter inside one body node.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Selection {
    Whole,
    Children(BTreeMap<usize, Selection>),
    Entries(BTreeMap<usize, Selection>),
    Values(BTreeSet<usize>),
}

impl Selection {
    fn union(self, other: Selection) -> Selection {
        match (self, other) {
            (Selection::Whole, _) | (_, Selection::Whole) => Selection::Whole,
            (Selection::Children(mut left), Selection::Children(right)) => {
                merge_positions(&mut left, right);
                Selection::Children(left)
            }
            (Selection::Entries(mut left), Selection::Entries(right)) => {
                merge_positions(&mut left, right);
                Selection::Entries(left)
            }
            (Selection::Values(mut left), Selection::Values(right)) => {
                left.extend(right);
                Selection::Values(left)
            }
            // Different shapes over the same node cannot be produced by select()
            _ => Selection::Whole,
        }
    }
}

fn merge_positions(into: &mut BTreeMap<usize, Selection>, from: BTreeMap<usize, Selection>) {
    for (position, selection) in from {
        match into.entry(position) {
            Entry::Vacant(vacant) => {
                vacant.insert(selection);
            }
            Entry::Occupied(mut occupied) => {
                let previous = std::mem::replace(occupied.get_mut(), Selection::Whole);
                *occupied.get_mut() = previous.union(selection);
            }
        }
    }
}

fn select(node: &Node, filter: &FilterNode) -> Option<Selection> {
    if !filter.name.matches(node.name()) {
        return None;
    }
    match node {
        Node::Leaf { value, .. } => {
            if !filter.children.is_empty() {
                return None;
            }
            match filter.content() {
                None => Some(Selection::Whole),
                Some(content) => (value.to_string() == content).then_some(Selection::Whole),
            }
        }
        Node::LeafList { values, .. } => {
            if !filter.children.is_empty() {
                return None;
            }
            match filter.content() {
                None => Some(Selection::Whole),
                Some(content) => {
                    let kept = values
                        .iter()
                        .enumerate()
                        .filter(|(_, value)| value.to_string() == content)
                        .map(|(position, _)| position)
                        .collect::<BTreeSet<_>>();
                    (!kept.is_empty()).then_some(Selection::Values(kept))
                }
            }
        }
        Node::Container { children, .. } => {
            if filter.content.is_some() {
                return None;
            }
            if filter.children.is_empty() {
                return Some(Selection::Whole);
            }
            select_children(children, &filter.children)
        }
        Node::List { entries, .. } => {
            if filter.content.is_some() {
                return None;
            }
            if filter.children.is_empty() {
                return Some(Selection::Whole);
            }
            let kept = entries
                .iter()
                .enumerate()
                .filter_map(|(position, entry)| {
                    select_children(entry, &filter.children).map(|selection| (position, selection))
                })
                .collect::<BTreeMap<_, _>>();
            (!kept.is_empty()).then_some(Selection::Entries(kept))
        }
    }
}

/// Every filter node must be satisfied by at least one of `children`.
fn select_children(children: &[Node], filters: &[FilterNode]) -> Option<Selection> {
    let mut selected = BTreeMap::new();
    for filter in filters {
        let mut satisfied = false;
        for (position, child) in children.iter().enumerate() {
            if let Some(selection) = select(child, filter) {
                satisfied = true;
                merge_positions(&mut selected, BTreeMap::from([(position, selection)]));
            }
        }
        if !satisfied {
            return None;
        }
    }
    if filters.iter().all(FilterNode::is_content_match) {
        Some(Selection::Whole)
    } else {
        Some(Selection::Children(selected))
    }
}

fn materialize(node: &Node, selection: &Selection) -> Node {
    match (node, selection) {
        (Node::Container { name, children }, Selection::Children(selected)) => Node::Container {
            name: name.clone(),
            children: materialize_children(children, selected),
        },
        (Node::List { name, entries }, Selection::Entries(selected)) => Node::List {
            name: name.clone(),
            entries: selected
                .iter()
                .filter_map(|(position, selection)| {
                    entries
                        .get(*position)
                        .map(|entry| materialize_entry(entry, selection))
                })
                .collect(),
        },
        (Node::LeafList { name, values }, Selection::Values(selected)) => Node::LeafList {
            name: name.clone(),
            values: selected
                .iter()
                .filter_map(|position| values.get(*position).cloned())
                .collect(),
        },
        _ => node.clone(),
    }
}

fn materialize_entry(entry: &ListEntry, selection: &Selection) -> ListEntry {
    match selection {
        Selection::Children(selected) => materialize_children(entry, selected),
        _ => entry.clone(),
    }
}

fn materialize_children(children: &[Node], selected: &BTreeMap<usize, Selection>) -> Vec<Node> {
    selected
        .iter()
        .filter_map(|(position, selection)| {
            children
                .get(*position)
                .map(|child| materialize(child, selection))
        })
        .collect()
}

/// A filter resolved and validated for one subscription.
///
/// Subtree filters gate delivery and prune the payload; XPath filters only
/// gate delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResolvedFilter {
    #[default]
    None,
    Subtree(Arc<SubtreeFilter>),
    XPath(Arc<XPathFilter>),
}

impl ResolvedFilter {
    pub fn apply(&self, body: &Node) -> MatchResult {
        match self {
            Self::None => MatchResult::accepted(body.clone()),
            Self::Subtree(filter) => filter.apply(body),
            Self::XPath(filter) => {
                if filter.matches(body) {
                    MatchResult::accepted(body.clone())
                } else {
                    MatchResult::rejected()
                }
            }
        }
    }

    pub fn validate(&self, schema: &SchemaContext) -> Result<(), FilterError> {
        match self {
            Self::None => Ok(()),
            Self::Subtree(filter) => filter.validate(schema),
            Self::XPath(filter) => filter.filter().validate(schema),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        node::LeafValue,
        tests::{
            inventory, toaster_out_of_bread, toaster_restocked, toaster_schema, TOASTER_MODULE,
        },
    };

    fn select_root(name: &str) -> SubtreeFilter {
        SubtreeFilter::new(vec![FilterNode::selection(NodeName::qualified(
            TOASTER_MODULE,
            name,
        ))])
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = SubtreeFilter::default();
        let body = toaster_restocked(5);
        assert!(filter.matches(&body));
        assert_eq!(filter.apply(&body), MatchResult::accepted(body.clone()));
    }

    #[test]
    fn test_selection_by_notification_name() {
        let filter = select_root("toasterRestocked");
        let restocked = toaster_restocked(5);
        assert!(filter.matches(&restocked));
        assert_eq!(filter.prune(&restocked), Some(restocked));
        assert!(!filter.matches(&toaster_out_of_bread()));
        assert_eq!(filter.apply(&toaster_out_of_bread()), MatchResult::rejected());
    }

    #[test]
    fn test_top_level_alternatives() {
        let filter = SubtreeFilter::new(vec![
            FilterNode::selection(NodeName::qualified(TOASTER_MODULE, "toasterRestocked")),
            FilterNode::selection(NodeName::qualified(TOASTER_MODULE, "toasterOutOfBread")),
        ]);
        assert!(filter.matches(&toaster_restocked(1)));
        assert!(filter.matches(&toaster_out_of_bread()));
        assert!(!filter.matches(&inventory()));
    }

    #[test]
    fn test_content_match_selects_whole_notification() {
        let filter = SubtreeFilter::new(vec![FilterNode::containment(
            NodeName::qualified(TOASTER_MODULE, "toasterRestocked"),
            vec![FilterNode::content_match(
                NodeName::local("amountOfBread"),
                "5",
            )],
        )]);
        assert_eq!(
            filter.apply(&toaster_restocked(5)),
            MatchResult::accepted(toaster_restocked(5))
        );
        assert_eq!(filter.apply(&toaster_restocked(4)), MatchResult::rejected());
    }

    #[test]
    fn test_missing_descendant_rejects() {
        let filter = SubtreeFilter::new(vec![FilterNode::containment(
            NodeName::qualified(TOASTER_MODULE, "toasterRestocked"),
            vec![FilterNode::selection(NodeName::local("color"))],
        )]);
        assert!(!filter.matches(&toaster_restocked(5)));
    }

    #[test]
    fn test_prune_list_entries_keeps_selected_leaf() {
        let filter = SubtreeFilter::new(vec![FilterNode::containment(
            NodeName::qualified(TOASTER_MODULE, "inventory"),
            vec![FilterNode::containment(
                NodeName::local("entry"),
                vec![FilterNode::selection(NodeName::local("id"))],
            )],
        )]);
        let expected = Node::container(
            NodeName::qualified(TOASTER_MODULE, "inventory"),
            vec![Node::list(
                NodeName::local("entry"),
                vec![
                    vec![Node::leaf(NodeName::local("id"), 1u32)],
                    vec![Node::leaf(NodeName::local("id"), 2u32)],
                ],
            )],
        );
        assert_eq!(
            filter.apply(&inventory()),
            MatchResult::accepted(expected)
        );
    }

    #[test]
    fn test_list_content_match_drops_other_entries() {
        let filter = SubtreeFilter::new(vec![FilterNode::containment(
            NodeName::qualified(TOASTER_MODULE, "inventory"),
            vec![FilterNode::containment(
                NodeName::local("entry"),
                vec![
                    FilterNode::content_match(NodeName::local("id"), "2"),
                    FilterNode::selection(NodeName::local("name")),
                ],
            )],
        )]);
        let expected = Node::container(
            NodeName::qualified(TOASTER_MODULE, "inventory"),
            vec![Node::list(
                NodeName::local("entry"),
                vec![vec![
                    Node::leaf(NodeName::local("id"), 2u32),
                    Node::leaf(NodeName::local("name"), "rye"),
                ]],
            )],
        );
        assert_eq!(filter.prune(&inventory()), Some(expected));
    }

    #[test]
    fn test_list_only_content_match_keeps_whole_entry() {
        let filter = SubtreeFilter::new(vec![FilterNode::containment(
            NodeName::qualified(TOASTER_MODULE, "inventory"),
            vec![FilterNode::containment(
                NodeName::local("entry"),
                vec![FilterNode::content_match(NodeName::local("name"), "wheat")],
            )],
        )]);
        let pruned = filter.prune(&inventory()).expect("matching entry");
        let entries = pruned.child("entry").expect("entry list").entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].len(), 3);
        assert!(pruned.child("location").is_none());
    }

    #[test]
    fn test_leaf_list_content_match() {
        let filter = SubtreeFilter::new(vec![FilterNode::containment(
            NodeName::qualified(TOASTER_MODULE, "inventory"),
            vec![FilterNode::containment(
                NodeName::local("entry"),
                vec![
                    FilterNode::content_match(NodeName::local("tags"), "brown"),
                    FilterNode::selection(NodeName::local("id")),
                ],
            )],
        )]);
        let expected = Node::container(
            NodeName::qualified(TOASTER_MODULE, "inventory"),
            vec![Node::list(
                NodeName::local("entry"),
                vec![vec![
                    Node::leaf(NodeName::local("id"), 1u32),
                    Node::leaf_list(NodeName::local("tags"), vec![LeafValue::from("brown")]),
                ]],
            )],
        );
        assert_eq!(filter.prune(&inventory()), Some(expected));
    }

    #[test]
    fn test_union_of_overlapping_selections() {
        let filter = SubtreeFilter::new(vec![
            FilterNode::containment(
                NodeName::qualified(TOASTER_MODULE, "inventory"),
                vec![FilterNode::selection(NodeName::local("location"))],
            ),
            FilterNode::containment(
                NodeName::qualified(TOASTER_MODULE, "inventory"),
                vec![FilterNode::containment(
                    NodeName::local("entry"),
                    vec![FilterNode::selection(NodeName::local("name"))],
                )],
            ),
        ]);
        let pruned = filter.prune(&inventory()).expect("accepted");
        // document order is preserved regardless of filter order
        assert_eq!(pruned.children()[0].name().name(), "entry");
        assert_eq!(pruned.children()[1].name().name(), "location");
        assert_eq!(pruned.child("entry").unwrap().entries()[0].len(), 1);
    }

    #[test]
    fn test_validate_against_schema() {
        let schema = toaster_schema();
        assert!(select_root("toasterRestocked").validate(&schema).is_ok());
        assert_eq!(
            select_root("toasterExploded").validate(&schema),
            Err(FilterError::UnknownSchemaNode(
                "example-toaster:toasterExploded".to_string()
            ))
        );

        let nested_unknown = SubtreeFilter::new(vec![FilterNode::containment(
            NodeName::qualified(TOASTER_MODULE, "inventory"),
            vec![FilterNode::containment(
                NodeName::local("entry"),
                vec![FilterNode::selection(NodeName::local("colour"))],
            )],
        )]);
        assert_eq!(
            nested_unknown.validate(&schema),
            Err(FilterError::UnknownSchemaNode(
                "example-toaster:inventory/entry/colour".to_string()
            ))
        );

        let content_on_list = SubtreeFilter::new(vec![FilterNode::containment(
            NodeName::qualified(TOASTER_MODULE, "inventory"),
            vec![FilterNode::content_match(NodeName::local("entry"), "x")],
        )]);
        assert_eq!(
            content_on_list.validate(&schema),
            Err(FilterError::ContentOnNonLeaf(
                "example-toaster:inventory/entry".to_string()
            ))
        );

        let children_on_leaf = SubtreeFilter::new(vec![FilterNode::containment(
            NodeName::qualified(TOASTER_MODULE, "toasterRestocked"),
            vec![FilterNode::containment(
                NodeName::local("amountOfBread"),
                vec![FilterNode::selection(NodeName::local("x"))],
            )],
        )]);
        assert_eq!(
            children_on_leaf.validate(&schema),
            Err(FilterError::ChildrenOnLeaf(
                "example-toaster:toasterRestocked/amountOfBread".to_string()
            ))
        );
    }

    #[test]
    fn test_filter_to_node() {
        let filter = FilterNode::containment(
            NodeName::qualified(TOASTER_MODULE, "toasterRestocked"),
            vec![FilterNode::content_match(
                NodeName::local("amountOfBread"),
                "5",
            )],
        );
        assert_eq!(
            filter.to_node(),
            Node::container(
                NodeName::qualified(TOASTER_MODULE, "toasterRestocked"),
                vec![Node::leaf(NodeName::local("amountOfBread"), "5")]
            )
        );
    }
}
