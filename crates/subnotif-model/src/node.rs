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

//! Schema-agnostic YANG data tree.
//!
//! Notification bodies are carried as a tree of [Node]s. A node without a
//! module inherits the module of its parent, the same way RFC 7951 member
//! names and XML default namespaces do.

use std::{fmt, str::FromStr};

/// Name of a data node, optionally qualified with the YANG module name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeName {
    module: Option<Box<str>>,
    name: Box<str>,
}

impl NodeName {
    pub fn new(module: Option<&str>, name: &str) -> Self {
        Self {
            module: module.map(Into::into),
            name: name.into(),
        }
    }

    pub fn qualified(module: &str, name: &str) -> Self {
        Self::new(Some(module), name)
    }

    pub fn local(name: &str) -> Self {
        Self::new(None, name)
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local names are equal, and modules are equal when both sides name one.
    /// An unqualified name acts as a module wildcard.
    pub fn matches(&self, other: &NodeName) -> bool {
        if self.name != other.name {
            return false;
        }
        match (self.module(), other.module()) {
            (Some(left), Some(right)) => left == right,
            _ => true,
        }
    }

    /// Module this node effectively belongs to, given the parent's module.
    pub fn effective_module<'a>(&'a self, parent_module: Option<&'a str>) -> Option<&'a str> {
        self.module().or(parent_module)
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.module {
            Some(module) => write!(f, "{module}:{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for NodeName {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.split_once(':') {
            Some((module, name)) => Self::qualified(module, name),
            None => Self::local(s),
        })
    }
}

/// Value of a leaf or a leaf-list entry.
///
/// Filters compare values by their canonical lexical form, see [fmt::Display].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafValue {
    String(Box<str>),
    Number(serde_json::Number),
    Boolean(bool),
    /// YANG `empty` type
    Empty,
}

impl fmt::Display for LeafValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
            Self::Boolean(value) => write!(f, "{value}"),
            Self::Empty => Ok(()),
        }
    }
}

impl From<&str> for LeafValue {
    fn from(value: &str) -> Self {
        Self::String(value.into())
    }
}

impl From<String> for LeafValue {
    fn from(value: String) -> Self {
        Self::String(value.into())
    }
}

impl From<bool> for LeafValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<u32> for LeafValue {
    fn from(value: u32) -> Self {
        Self::Number(value.into())
    }
}

impl From<u64> for LeafValue {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

impl From<i64> for LeafValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

/// Children of one list instance, in document order.
pub type ListEntry = Vec<Node>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Container { name: NodeName, children: Vec<Node> },
    List { name: NodeName, entries: Vec<ListEntry> },
    Leaf { name: NodeName, value: LeafValue },
    LeafList { name: NodeName, values: Vec<LeafValue> },
}

impl Node {
    pub fn container(name: NodeName, children: Vec<Node>) -> Self {
        Self::Container { name, children }
    }

    pub fn list(name: NodeName, entries: Vec<ListEntry>) -> Self {
        Self::List { name, entries }
    }

    pub fn leaf(name: NodeName, value: impl Into<LeafValue>) -> Self {
        Self::Leaf {
            name,
            value: value.into(),
        }
    }

    pub fn leaf_list(name: NodeName, values: Vec<LeafValue>) -> Self {
        Self::LeafList { name, values }
    }

    pub const fn name(&self) -> &NodeName {
        match self {
            Self::Container { name, .. }
            | Self::List { name, .. }
            | Self::Leaf { name, .. }
            | Self::LeafList { name, .. } => name,
        }
    }

    /// Children of a container, empty for every other node kind.
    pub fn children(&self) -> &[Node] {
        match self {
            Self::Container { children, .. } => children,
            _ => &[],
        }
    }

    /// Entries of a list, empty for every other node kind.
    pub fn entries(&self) -> &[ListEntry] {
        match self {
            Self::List { entries, .. } => entries,
            _ => &[],
        }
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children().iter().find(|child| child.name().name() == name)
    }

    pub const fn value(&self) -> Option<&LeafValue> {
        match self {
            Self::Leaf { value, .. } => Some(value),
            _ => None,
        }
    }
}
