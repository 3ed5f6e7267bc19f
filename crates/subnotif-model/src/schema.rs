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

//! Minimal view of the controller's YANG schema.
//!
//! The schema context is owned by an external model provider; this crate only
//! needs the module namespaces (for XML) and the shape of the notifications
//! (to reject filters naming unknown nodes when a subscription is created).

use crate::{node::NodeName, well_known_module, well_known_namespace};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModuleInfo {
    name: String,
    namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    revision: Option<String>,
}

impl ModuleInfo {
    pub fn new(name: &str, namespace: &str, revision: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            revision,
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaNodeKind {
    #[strum(to_string = "container")]
    Container,
    #[strum(to_string = "list")]
    List,
    #[strum(to_string = "leaf")]
    Leaf,
    #[strum(to_string = "leaf-list")]
    LeafList,
}

/// A schema node of a notification. Top-level nodes are the notifications
/// themselves; nested nodes without a module belong to their parent's module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchemaNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    module: Option<String>,
    name: String,
    kind: SchemaNodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<SchemaNode>,
}

impl SchemaNode {
    pub fn new(name: &str, kind: SchemaNodeKind) -> Self {
        Self::with_children(name, kind, vec![])
    }

    pub fn with_children(name: &str, kind: SchemaNodeKind, children: Vec<SchemaNode>) -> Self {
        Self {
            module: None,
            name: name.to_string(),
            kind,
            keys: vec![],
            children,
        }
    }

    pub fn list(name: &str, keys: Vec<String>, children: Vec<SchemaNode>) -> Self {
        Self {
            module: None,
            name: name.to_string(),
            kind: SchemaNodeKind::List,
            keys,
            children,
        }
    }

    /// A notification definition, modeled as a container in `module`.
    pub fn notification(module: &str, name: &str, children: Vec<SchemaNode>) -> Self {
        Self {
            module: Some(module.to_string()),
            name: name.to_string(),
            kind: SchemaNodeKind::Container,
            keys: vec![],
            children,
        }
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub const fn kind(&self) -> SchemaNodeKind {
        self.kind
    }
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
    pub fn children(&self) -> &[SchemaNode] {
        &self.children
    }

    /// The qualified name of this node, given the module of its parent.
    pub fn node_name(&self, parent_module: Option<&str>) -> NodeName {
        NodeName::new(self.module().or(parent_module), &self.name)
    }

    /// Finds the child matching `name`, returns it with its effective module.
    pub fn child<'a>(
        &'a self,
        own_module: Option<&'a str>,
        name: &NodeName,
    ) -> Option<(&'a SchemaNode, Option<&'a str>)> {
        self.children.iter().find_map(|child| {
            let module = child.module().or(own_module);
            name.matches(&NodeName::new(module, child.name()))
                .then_some((child, module))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchemaContext {
    #[serde(default)]
    modules: Vec<ModuleInfo>,
    #[serde(default)]
    notifications: Vec<SchemaNode>,
}

impl SchemaContext {
    pub fn new(modules: Vec<ModuleInfo>, notifications: Vec<SchemaNode>) -> Self {
        Self {
            modules,
            notifications,
        }
    }

    pub fn modules(&self) -> &[ModuleInfo] {
        &self.modules
    }

    pub fn notifications(&self) -> &[SchemaNode] {
        &self.notifications
    }

    pub fn module(&self, name: &str) -> Option<&ModuleInfo> {
        self.modules.iter().find(|module| module.name == name)
    }

    /// XML namespace of a module, including the modules the codecs always know
    pub fn namespace_of<'a>(&'a self, module: &str) -> Option<&'a str> {
        self.module(module)
            .map(ModuleInfo::namespace)
            .or_else(|| well_known_namespace(module))
    }

    /// Module name bound to an XML namespace
    pub fn module_by_namespace<'a>(&'a self, namespace: &str) -> Option<&'a str> {
        self.modules
            .iter()
            .find(|module| module.namespace == namespace)
            .map(ModuleInfo::name)
            .or_else(|| well_known_module(namespace))
    }

    /// Finds the notification definition matching `name`.
    pub fn notification(&self, name: &NodeName) -> Option<&SchemaNode> {
        self.notifications
            .iter()
            .find(|notification| name.matches(&notification.node_name(None)))
    }
}
