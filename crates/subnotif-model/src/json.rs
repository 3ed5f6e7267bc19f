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

//! [RFC 7951](https://datatracker.ietf.org/doc/html/rfc7951) JSON encoding of
//! data trees, and decoding of subtree filters carried as `anydata`.
//!
//! Member names are prefixed with the module name at the top level and
//! whenever the module differs from the parent's.

use crate::{
    filter::{FilterNode, SubtreeFilter},
    node::{LeafValue, Node, NodeName},
    notification::format_date_time,
    RESTCONF_MODULE,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

#[derive(Debug, strum_macros::Display, PartialEq, Eq, Clone)]
pub enum JsonCodecError {
    #[strum(to_string = "expected a JSON object for `{0}`")]
    ExpectedObject(String),

    #[strum(to_string = "invalid member name `{0}`")]
    InvalidMemberName(String),

    #[strum(to_string = "unsupported value for filter node `{0}`")]
    UnsupportedFilterValue(String),
}

impl std::error::Error for JsonCodecError {}

fn member_name(name: &NodeName, parent_module: Option<&str>) -> String {
    match name.module() {
        Some(module) if Some(module) != parent_module => format!("{module}:{}", name.name()),
        _ => name.name().to_string(),
    }
}

fn leaf_value(value: &LeafValue) -> Value {
    match value {
        LeafValue::String(value) => Value::String(value.to_string()),
        LeafValue::Number(value) => Value::Number(value.clone()),
        LeafValue::Boolean(value) => Value::Bool(*value),
        LeafValue::Empty => Value::Array(vec![Value::Null]),
    }
}

fn children_object(children: &[Node], module: Option<&str>) -> Map<String, Value> {
    children
        .iter()
        .map(|child| encode_member(child, module))
        .collect()
}

fn encode_member(node: &Node, parent_module: Option<&str>) -> (String, Value) {
    let module = node.name().effective_module(parent_module);
    let value = match node {
        Node::Container { children, .. } => Value::Object(children_object(children, module)),
        Node::List { entries, .. } => Value::Array(
            entries
                .iter()
                .map(|entry| Value::Object(children_object(entry, module)))
                .collect(),
        ),
        Node::Leaf { value, .. } => leaf_value(value),
        Node::LeafList { values, .. } => Value::Array(values.iter().map(leaf_value).collect()),
    };
    (member_name(node.name(), parent_module), value)
}

/// Encodes a top-level node as a single member object,
/// e.g. `{"example-toaster:toasterRestocked": {"amountOfBread": 5}}`.
pub fn encode_node(node: &Node) -> Value {
    let (name, value) = encode_member(node, None);
    Value::Object(Map::from_iter([(name, value)]))
}

/// RESTCONF notification envelope (RFC 8040 Section 6.4)
pub fn encode_notification(event_time: DateTime<Utc>, body: &Node) -> Value {
    let (name, value) = encode_member(body, None);
    let mut notification = Map::new();
    notification.insert(
        "event-time".to_string(),
        leaf_value(&format_date_time(event_time)),
    );
    notification.insert(name, value);
    Value::Object(Map::from_iter([(
        format!("{RESTCONF_MODULE}:notification"),
        Value::Object(notification),
    )]))
}

fn parse_member_name(member: &str) -> Result<NodeName, JsonCodecError> {
    let name = match member.split_once(':') {
        Some((module, name)) if !module.is_empty() => NodeName::qualified(module, name),
        Some(_) => return Err(JsonCodecError::InvalidMemberName(member.to_string())),
        None => NodeName::local(member),
    };
    if name.name().is_empty() {
        return Err(JsonCodecError::InvalidMemberName(member.to_string()));
    }
    Ok(name)
}

fn filter_nodes(name: NodeName, value: &Value) -> Result<Vec<FilterNode>, JsonCodecError> {
    match value {
        Value::Null => Ok(vec![FilterNode::selection(name)]),
        Value::Object(members) if members.is_empty() => Ok(vec![FilterNode::selection(name)]),
        Value::Object(members) => Ok(vec![FilterNode::containment(
            name,
            filter_roots(members)?,
        )]),
        Value::String(content) => Ok(vec![FilterNode::content_match(name, content.as_str())]),
        Value::Number(content) => Ok(vec![FilterNode::content_match(name, content.to_string())]),
        Value::Bool(content) => Ok(vec![FilterNode::content_match(name, content.to_string())]),
        // `[null]` is the encoding of the empty type
        Value::Array(items) if items.iter().all(Value::is_null) => {
            Ok(vec![FilterNode::selection(name)])
        }
        // list entries or leaf-list values, each one is a separate filter node
        Value::Array(items) => items.iter().try_fold(vec![], |mut acc, item| {
            if item.is_array() {
                return Err(JsonCodecError::UnsupportedFilterValue(name.to_string()));
            }
            acc.extend(filter_nodes(name.clone(), item)?);
            Ok(acc)
        }),
    }
}

fn filter_roots(members: &Map<String, Value>) -> Result<Vec<FilterNode>, JsonCodecError> {
    members.iter().try_fold(vec![], |mut acc, (member, value)| {
        acc.extend(filter_nodes(parse_member_name(member)?, value)?);
        Ok(acc)
    })
}

/// Decodes the content of `stream-subtree-filter`.
pub fn filter_from_json(value: &Value) -> Result<SubtreeFilter, JsonCodecError> {
    match value {
        Value::Object(members) => Ok(SubtreeFilter::new(filter_roots(members)?)),
        Value::Null => Ok(SubtreeFilter::default()),
        _ => Err(JsonCodecError::ExpectedObject(
            "stream-subtree-filter".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{inventory, toaster_restocked, TOASTER_MODULE};
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_encode_inventory() {
        assert_eq!(
            encode_node(&inventory()),
            json!({
                "example-toaster:inventory": {
                    "entry": [
                        {"id": 1, "name": "wheat", "tags": ["bread", "brown"]},
                        {"id": 2, "name": "rye"}
                    ],
                    "location": {"building": "B1"}
                }
            })
        );
    }

    #[test]
    fn test_module_change_prefix_and_empty() {
        let node = Node::container(
            NodeName::qualified("a", "top"),
            vec![
                Node::leaf(NodeName::qualified("a", "same"), LeafValue::Empty),
                Node::leaf(NodeName::qualified("b", "augmented"), true),
            ],
        );
        assert_eq!(
            encode_node(&node),
            json!({"a:top": {"same": [null], "b:augmented": true}})
        );
    }

    #[test]
    fn test_notification_envelope() {
        let event_time = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            encode_notification(event_time, &toaster_restocked(5)),
            json!({
                "ietf-restconf:notification": {
                    "event-time": "2026-03-04T05:06:07Z",
                    "example-toaster:toasterRestocked": {"amountOfBread": 5}
                }
            })
        );
    }

    #[test]
    fn test_filter_from_json() {
        let value = json!({
            "example-toaster:inventory": {
                "entry": [{"id": {}, "name": "wheat"}],
                "location": null
            }
        });
        let filter = filter_from_json(&value).unwrap();
        assert_eq!(
            filter,
            SubtreeFilter::new(vec![FilterNode::containment(
                NodeName::qualified(TOASTER_MODULE, "inventory"),
                vec![
                    FilterNode::containment(
                        NodeName::local("entry"),
                        vec![
                            FilterNode::selection(NodeName::local("id")),
                            FilterNode::content_match(NodeName::local("name"), "wheat"),
                        ]
                    ),
                    FilterNode::selection(NodeName::local("location")),
                ]
            )])
        );
        assert!(filter_from_json(&json!(null)).unwrap().is_empty());
    }

    #[test]
    fn test_filter_from_json_errors() {
        assert_eq!(
            filter_from_json(&json!("x")),
            Err(JsonCodecError::ExpectedObject(
                "stream-subtree-filter".to_string()
            ))
        );
        assert_eq!(
            filter_from_json(&json!({":x": {}})),
            Err(JsonCodecError::InvalidMemberName(":x".to_string()))
        );
        assert_eq!(
            filter_from_json(&json!({"a:x": [[1]]})),
            Err(JsonCodecError::UnsupportedFilterValue("a:x".to_string()))
        );
    }
}
