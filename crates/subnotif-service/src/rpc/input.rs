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

//! Decoding of RPC input and encoding of RPC output, in both the RFC 7951
//! JSON and the XML encodings.

use crate::error::SubscriptionError;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::str::FromStr;
use subnotif_model::{
    json::filter_from_json,
    notification::{format_date_time, Encoding, StreamFilter},
    schema::SchemaContext,
    xml::{filter_from_xml, parse_document, XmlElement, XmlWriter},
    xpath::XPathFilter,
    SubscriptionId, SUBSCRIBED_NOTIFICATIONS_MODULE, SUBSCRIBED_NOTIFICATIONS_NS,
};

const SUBTREE_FILTER: &str = "stream-subtree-filter";
const XPATH_FILTER: &str = "stream-xpath-filter";
const FILTER_NAME: &str = "stream-filter-name";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum RpcOperation {
    #[strum(to_string = "establish-subscription")]
    EstablishSubscription,

    #[strum(to_string = "modify-subscription")]
    ModifySubscription,

    #[strum(to_string = "delete-subscription")]
    DeleteSubscription,

    #[strum(to_string = "kill-subscription")]
    KillSubscription,
}

impl FromStr for RpcOperation {
    type Err = SubscriptionError;

    /// Accepts the operation name with or without the module prefix
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let name = strip_module(value);
        match name {
            "establish-subscription" => Ok(Self::EstablishSubscription),
            "modify-subscription" => Ok(Self::ModifySubscription),
            "delete-subscription" => Ok(Self::DeleteSubscription),
            "kill-subscription" => Ok(Self::KillSubscription),
            _ => Err(SubscriptionError::NotSupported(value.to_string())),
        }
    }
}

fn strip_module(name: &str) -> &str {
    name.strip_prefix(SUBSCRIBED_NOTIFICATIONS_MODULE)
        .and_then(|name| name.strip_prefix(':'))
        .unwrap_or(name)
}

/// Raw body of an RPC request
#[derive(Debug, Clone, PartialEq)]
pub enum RpcBody {
    Empty,
    Json(Value),
    Xml(XmlElement),
}

impl RpcBody {
    pub fn from_json_str(body: &str) -> Result<Self, SubscriptionError> {
        if body.trim().is_empty() {
            return Ok(Self::Empty);
        }
        serde_json::from_str(body)
            .map(Self::Json)
            .map_err(|err| SubscriptionError::invalid_value(format!("malformed JSON input: {err}")))
    }

    pub fn from_xml_str(body: &str) -> Result<Self, SubscriptionError> {
        if body.trim().is_empty() {
            return Ok(Self::Empty);
        }
        Ok(Self::Xml(parse_document(body)?))
    }
}

/// Input members of a JSON body with the module prefix removed
fn json_members(value: &Value) -> Result<Map<String, Value>, SubscriptionError> {
    let top = match value {
        Value::Object(top) => top,
        Value::Null => return Ok(Map::new()),
        _ => {
            return Err(SubscriptionError::invalid_value(
                "RPC input must be a JSON object",
            ))
        }
    };
    let input = match top.iter().next() {
        None => return Ok(Map::new()),
        Some((name, input)) if top.len() == 1 && strip_module(name) == "input" => input,
        Some((name, _)) => {
            return Err(SubscriptionError::invalid_value(format!(
                "unexpected member `{name}`, expecting `{SUBSCRIBED_NOTIFICATIONS_MODULE}:input`"
            )))
        }
    };
    match input {
        Value::Object(members) => Ok(members
            .iter()
            .map(|(name, value)| (strip_module(name).to_string(), value.clone()))
            .collect()),
        Value::Null => Ok(Map::new()),
        _ => Err(SubscriptionError::invalid_value("RPC input must be a JSON object")),
    }
}

fn json_string<'a>(members: &'a Map<String, Value>, name: &str) -> Result<Option<&'a str>, SubscriptionError> {
    match members.get(name) {
        None => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.as_str())),
        Some(other) => Err(SubscriptionError::invalid_value(format!(
            "`{name}` must be a string, found {other}"
        ))),
    }
}

fn json_id(members: &Map<String, Value>) -> Result<SubscriptionId, SubscriptionError> {
    match members.get("id") {
        None => Err(SubscriptionError::missing_element("No subscription id specified")),
        Some(Value::Number(id)) => id
            .as_u64()
            .and_then(|id| SubscriptionId::try_from(id).ok())
            .ok_or_else(|| SubscriptionError::invalid_value(format!("invalid subscription id {id}"))),
        Some(Value::String(id)) => parse_id(id),
        Some(other) => Err(SubscriptionError::invalid_value(format!(
            "invalid subscription id {other}"
        ))),
    }
}

fn parse_id(value: &str) -> Result<SubscriptionId, SubscriptionError> {
    value
        .trim()
        .parse()
        .map_err(|_| SubscriptionError::invalid_value(format!("invalid subscription id {value}")))
}

fn parse_date_time(name: &str, value: &str) -> Result<DateTime<Utc>, SubscriptionError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| {
            SubscriptionError::invalid_value(format!("invalid `{name}` value `{value}`: {err}"))
        })
}

fn parse_encoding(value: &str) -> Result<Encoding, SubscriptionError> {
    Encoding::from_identity(value.trim())
        .ok_or_else(|| SubscriptionError::invalid_value(format!("unsupported encoding `{value}`")))
}

fn single_filter(filters: Vec<StreamFilter>) -> Result<Option<StreamFilter>, SubscriptionError> {
    if filters.len() > 1 {
        return Err(SubscriptionError::invalid_value(
            "stream filters are mutually exclusive, at most one can be given",
        ));
    }
    Ok(filters.into_iter().next())
}

fn json_filter(members: &Map<String, Value>) -> Result<Option<StreamFilter>, SubscriptionError> {
    let mut filters = vec![];
    if let Some(subtree) = members.get(SUBTREE_FILTER) {
        filters.push(StreamFilter::Subtree(filter_from_json(subtree)?));
    }
    if let Some(xpath) = json_string(members, XPATH_FILTER)? {
        filters.push(StreamFilter::XPath(XPathFilter::parse(xpath)?));
    }
    if let Some(name) = json_string(members, FILTER_NAME)? {
        filters.push(StreamFilter::Named(name.to_string()));
    }
    single_filter(filters)
}

fn xml_filter(
    element: &XmlElement,
    schema: &SchemaContext,
) -> Result<Option<StreamFilter>, SubscriptionError> {
    let mut filters = vec![];
    if let Some(subtree) = element.child(SUBTREE_FILTER) {
        filters.push(StreamFilter::Subtree(filter_from_xml(subtree, schema)?));
    }
    if let Some(xpath) = element.child(XPATH_FILTER) {
        filters.push(StreamFilter::XPath(XPathFilter::parse(xpath.text())?));
    }
    if let Some(name) = element.child(FILTER_NAME) {
        filters.push(StreamFilter::Named(name.text().to_string()));
    }
    single_filter(filters)
}

/// Root of an XML input: either `<input>` or the operation element itself,
/// in the subscribed notifications namespace
fn xml_input<'a>(
    element: &'a XmlElement,
    operation: RpcOperation,
) -> Result<&'a XmlElement, SubscriptionError> {
    let namespace = Some(SUBSCRIBED_NOTIFICATIONS_NS);
    if element.is_tag(namespace, "input") || element.is_tag(namespace, &operation.to_string()) {
        Ok(element)
    } else {
        Err(SubscriptionError::invalid_value(format!(
            "unexpected element `{}`, expecting `input` in namespace {SUBSCRIBED_NOTIFICATIONS_NS}",
            element.name()
        )))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EstablishSubscriptionInput {
    stream: Option<String>,
    filter: Option<StreamFilter>,
    encoding: Option<Encoding>,
    stop_time: Option<DateTime<Utc>>,
    replay_start_time: Option<DateTime<Utc>>,
}

impl EstablishSubscriptionInput {
    pub fn new(stream: Option<&str>) -> Self {
        Self {
            stream: stream.map(str::to_string),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: StreamFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub const fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub const fn with_stop_time(mut self, stop_time: DateTime<Utc>) -> Self {
        self.stop_time = Some(stop_time);
        self
    }

    pub const fn with_replay_start_time(mut self, replay_start_time: DateTime<Utc>) -> Self {
        self.replay_start_time = Some(replay_start_time);
        self
    }

    pub fn stream(&self) -> Option<&str> {
        self.stream.as_deref()
    }

    pub const fn filter(&self) -> Option<&StreamFilter> {
        self.filter.as_ref()
    }

    pub const fn encoding(&self) -> Option<Encoding> {
        self.encoding
    }

    pub const fn stop_time(&self) -> Option<DateTime<Utc>> {
        self.stop_time
    }

    pub const fn replay_start_time(&self) -> Option<DateTime<Utc>> {
        self.replay_start_time
    }

    pub fn from_json(value: &Value) -> Result<Self, SubscriptionError> {
        let members = json_members(value)?;
        Ok(Self {
            stream: json_string(&members, "stream")?.map(str::to_string),
            filter: json_filter(&members)?,
            encoding: json_string(&members, "encoding")?
                .map(parse_encoding)
                .transpose()?,
            stop_time: json_string(&members, "stop-time")?
                .map(|value| parse_date_time("stop-time", value))
                .transpose()?,
            replay_start_time: json_string(&members, "replay-start-time")?
                .map(|value| parse_date_time("replay-start-time", value))
                .transpose()?,
        })
    }

    pub fn from_xml(element: &XmlElement, schema: &SchemaContext) -> Result<Self, SubscriptionError> {
        let input = xml_input(element, RpcOperation::EstablishSubscription)?;
        Ok(Self {
            stream: input.child("stream").map(|stream| stream.text().to_string()),
            filter: xml_filter(input, schema)?,
            encoding: input
                .child("encoding")
                .map(|encoding| parse_encoding(encoding.text()))
                .transpose()?,
            stop_time: input
                .child("stop-time")
                .map(|value| parse_date_time("stop-time", value.text()))
                .transpose()?,
            replay_start_time: input
                .child("replay-start-time")
                .map(|value| parse_date_time("replay-start-time", value.text()))
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifySubscriptionInput {
    id: SubscriptionId,
    filter: Option<StreamFilter>,
    stop_time: Option<DateTime<Utc>>,
    encoding: Option<Encoding>,
}

impl ModifySubscriptionInput {
    pub const fn new(id: SubscriptionId) -> Self {
        Self {
            id,
            filter: None,
            stop_time: None,
            encoding: None,
        }
    }

    pub fn with_filter(mut self, filter: StreamFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub const fn with_stop_time(mut self, stop_time: DateTime<Utc>) -> Self {
        self.stop_time = Some(stop_time);
        self
    }

    pub const fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    pub const fn filter(&self) -> Option<&StreamFilter> {
        self.filter.as_ref()
    }

    pub const fn stop_time(&self) -> Option<DateTime<Utc>> {
        self.stop_time
    }

    pub const fn encoding(&self) -> Option<Encoding> {
        self.encoding
    }

    pub fn from_json(value: &Value) -> Result<Self, SubscriptionError> {
        let members = json_members(value)?;
        Ok(Self {
            id: json_id(&members)?,
            filter: json_filter(&members)?,
            stop_time: json_string(&members, "stop-time")?
                .map(|value| parse_date_time("stop-time", value))
                .transpose()?,
            encoding: json_string(&members, "encoding")?
                .map(parse_encoding)
                .transpose()?,
        })
    }

    pub fn from_xml(element: &XmlElement, schema: &SchemaContext) -> Result<Self, SubscriptionError> {
        let input = xml_input(element, RpcOperation::ModifySubscription)?;
        let id = input
            .child("id")
            .ok_or_else(|| SubscriptionError::missing_element("No subscription id specified"))?;
        Ok(Self {
            id: parse_id(id.text())?,
            filter: xml_filter(input, schema)?,
            stop_time: input
                .child("stop-time")
                .map(|value| parse_date_time("stop-time", value.text()))
                .transpose()?,
            encoding: input
                .child("encoding")
                .map(|encoding| parse_encoding(encoding.text()))
                .transpose()?,
        })
    }
}

/// Input of `delete-subscription` and `kill-subscription`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionIdInput {
    id: SubscriptionId,
}

impl SubscriptionIdInput {
    pub const fn new(id: SubscriptionId) -> Self {
        Self { id }
    }

    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn from_json(value: &Value) -> Result<Self, SubscriptionError> {
        Ok(Self::new(json_id(&json_members(value)?)?))
    }

    pub fn from_xml(element: &XmlElement, operation: RpcOperation) -> Result<Self, SubscriptionError> {
        let input = xml_input(element, operation)?;
        let id = input
            .child("id")
            .ok_or_else(|| SubscriptionError::missing_element("No subscription id specified"))?;
        Ok(Self::new(parse_id(id.text())?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcRequest {
    Establish(EstablishSubscriptionInput),
    Modify(ModifySubscriptionInput),
    Delete(SubscriptionIdInput),
    Kill(SubscriptionIdInput),
}

impl RpcRequest {
    pub fn parse(
        operation: RpcOperation,
        body: &RpcBody,
        schema: &SchemaContext,
    ) -> Result<Self, SubscriptionError> {
        match body {
            RpcBody::Json(value) => Self::from_json(operation, value),
            RpcBody::Empty => Self::from_json(operation, &Value::Null),
            RpcBody::Xml(element) => match operation {
                RpcOperation::EstablishSubscription => Ok(Self::Establish(
                    EstablishSubscriptionInput::from_xml(element, schema)?,
                )),
                RpcOperation::ModifySubscription => Ok(Self::Modify(
                    ModifySubscriptionInput::from_xml(element, schema)?,
                )),
                RpcOperation::DeleteSubscription => Ok(Self::Delete(
                    SubscriptionIdInput::from_xml(element, operation)?,
                )),
                RpcOperation::KillSubscription => Ok(Self::Kill(
                    SubscriptionIdInput::from_xml(element, operation)?,
                )),
            },
        }
    }

    fn from_json(operation: RpcOperation, value: &Value) -> Result<Self, SubscriptionError> {
        match operation {
            RpcOperation::EstablishSubscription => Ok(Self::Establish(
                EstablishSubscriptionInput::from_json(value)?,
            )),
            RpcOperation::ModifySubscription => {
                Ok(Self::Modify(ModifySubscriptionInput::from_json(value)?))
            }
            RpcOperation::DeleteSubscription => {
                Ok(Self::Delete(SubscriptionIdInput::from_json(value)?))
            }
            RpcOperation::KillSubscription => Ok(Self::Kill(SubscriptionIdInput::from_json(value)?)),
        }
    }
}

/// A named filter as stored under `filters/stream-filter`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFilterEntry {
    name: String,
    filter: StreamFilter,
}

impl StreamFilterEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn filter(&self) -> &StreamFilter {
        &self.filter
    }

    pub fn into_parts(self) -> (String, StreamFilter) {
        (self.name, self.filter)
    }

    /// Accepts `{"ietf-subscribed-notifications:stream-filter": [{...}]}`
    /// with exactly one entry, or the entry object itself
    pub fn from_json(value: &Value) -> Result<Self, SubscriptionError> {
        let entry = match value {
            Value::Object(top) if top.len() == 1 => match top.iter().next() {
                Some((name, inner)) if strip_module(name) == "stream-filter" => match inner {
                    Value::Array(entries) if entries.len() == 1 => &entries[0],
                    Value::Object(_) => inner,
                    _ => {
                        return Err(SubscriptionError::invalid_value(
                            "exactly one stream-filter entry is expected",
                        ))
                    }
                },
                _ => value,
            },
            _ => value,
        };
        let Value::Object(members) = entry else {
            return Err(SubscriptionError::invalid_value(
                "stream-filter entry must be a JSON object",
            ));
        };
        let members = members
            .iter()
            .map(|(name, value)| (strip_module(name).to_string(), value.clone()))
            .collect::<Map<_, _>>();
        let name = json_string(&members, "name")?
            .ok_or_else(|| SubscriptionError::missing_element("No stream filter name specified"))?
            .to_string();
        let filter = json_filter(&members)?.ok_or_else(|| {
            SubscriptionError::missing_element(format!("stream filter {name} has no filter"))
        })?;
        Self::try_new(name, filter)
    }

    pub fn from_xml(element: &XmlElement, schema: &SchemaContext) -> Result<Self, SubscriptionError> {
        if !element.is_tag(Some(SUBSCRIBED_NOTIFICATIONS_NS), "stream-filter") {
            return Err(SubscriptionError::invalid_value(format!(
                "unexpected element `{}`, expecting `stream-filter`",
                element.name()
            )));
        }
        let name = element
            .child("name")
            .map(|name| name.text().to_string())
            .ok_or_else(|| SubscriptionError::missing_element("No stream filter name specified"))?;
        let filter = xml_filter(element, schema)?.ok_or_else(|| {
            SubscriptionError::missing_element(format!("stream filter {name} has no filter"))
        })?;
        Self::try_new(name, filter)
    }

    fn try_new(name: String, filter: StreamFilter) -> Result<Self, SubscriptionError> {
        if matches!(filter, StreamFilter::Named(_)) {
            return Err(SubscriptionError::invalid_value(format!(
                "stream filter {name} cannot refer to another stream filter"
            )));
        }
        Ok(Self { name, filter })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstablishSubscriptionOutput {
    id: SubscriptionId,
    replay_start_time_revision: Option<DateTime<Utc>>,
}

impl EstablishSubscriptionOutput {
    pub const fn new(id: SubscriptionId, replay_start_time_revision: Option<DateTime<Utc>>) -> Self {
        Self {
            id,
            replay_start_time_revision,
        }
    }

    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    pub const fn replay_start_time_revision(&self) -> Option<DateTime<Utc>> {
        self.replay_start_time_revision
    }

    pub fn to_json(&self) -> Value {
        let mut output = json!({"id": self.id});
        if let (Some(revision), Some(output)) =
            (self.replay_start_time_revision, output.as_object_mut())
        {
            output.insert(
                "replay-start-time-revision".to_string(),
                json!(format_date_time(revision).to_string()),
            );
        }
        let mut envelope = Map::new();
        envelope.insert(format!("{SUBSCRIBED_NOTIFICATIONS_MODULE}:output"), output);
        Value::Object(envelope)
    }

    pub fn to_xml(&self) -> Result<String, subnotif_model::xml::XmlWriterError> {
        let schema = SchemaContext::default();
        let mut writer = XmlWriter::new(quick_xml::writer::Writer::new(vec![]), &schema);
        writer.start_element("output", Some(SUBSCRIBED_NOTIFICATIONS_NS))?;
        writer.text_element("id", None, &self.id.to_string())?;
        if let Some(revision) = self.replay_start_time_revision {
            writer.text_element(
                "replay-start-time-revision",
                None,
                &format_date_time(revision).to_string(),
            )?;
        }
        writer.end_element("output")?;
        Ok(String::from_utf8(writer.into_inner())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ErrorTag,
        tests::{toaster_schema, TOASTER_MODULE, TOASTER_NS},
    };
    use chrono::TimeZone;
    use rstest::rstest;
    use subnotif_model::{
        filter::{FilterNode, SubtreeFilter},
        node::NodeName,
    };

    fn restocked_filter() -> StreamFilter {
        StreamFilter::Subtree(SubtreeFilter::new(vec![FilterNode::selection(
            NodeName::qualified(TOASTER_MODULE, "toasterRestocked"),
        )]))
    }

    #[rstest]
    #[case("establish-subscription", RpcOperation::EstablishSubscription)]
    #[case(
        "ietf-subscribed-notifications:modify-subscription",
        RpcOperation::ModifySubscription
    )]
    #[case("delete-subscription", RpcOperation::DeleteSubscription)]
    #[case(
        "ietf-subscribed-notifications:kill-subscription",
        RpcOperation::KillSubscription
    )]
    fn test_operation_names(#[case] name: &str, #[case] operation: RpcOperation) {
        assert_eq!(RpcOperation::from_str(name), Ok(operation));
    }

    #[test]
    fn test_unknown_operation() {
        let err = RpcOperation::from_str("resync-subscription").unwrap_err();
        assert_eq!(err.error_tag(), ErrorTag::OperationNotSupported);
    }

    #[test]
    fn test_establish_json() {
        let body = json!({
            "ietf-subscribed-notifications:input": {
                "stream": "NETCONF",
                "stream-subtree-filter": {"example-toaster:toasterRestocked": {}},
                "encoding": "encode-xml",
                "stop-time": "2026-10-16T10:00:00Z"
            }
        });
        let input = EstablishSubscriptionInput::from_json(&body).unwrap();
        assert_eq!(
            input,
            EstablishSubscriptionInput::new(Some("NETCONF"))
                .with_filter(restocked_filter())
                .with_encoding(Encoding::Xml)
                .with_stop_time(Utc.with_ymd_and_hms(2026, 10, 16, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_establish_json_prefixed_members() {
        let body = json!({
            "ietf-subscribed-notifications:input": {
                "ietf-subscribed-notifications:stream": "NETCONF",
                "ietf-subscribed-notifications:stream-filter-name": "restocked"
            }
        });
        let input = EstablishSubscriptionInput::from_json(&body).unwrap();
        assert_eq!(input.stream(), Some("NETCONF"));
        assert_eq!(
            input.filter(),
            Some(&StreamFilter::Named("restocked".to_string()))
        );
        assert_eq!(input.encoding(), None);
    }

    #[rstest]
    #[case(json!({"ietf-subscribed-notifications:input": {"stream": "NETCONF", "stream-filter-name": "a", "stream-xpath-filter": "/example-toaster:toasterRestocked"}}), ErrorTag::InvalidValue)]
    #[case(json!({"ietf-subscribed-notifications:input": {"stream": "NETCONF", "encoding": "encode-cbor"}}), ErrorTag::InvalidValue)]
    #[case(json!({"ietf-subscribed-notifications:input": {"stream": "NETCONF", "stop-time": "yesterday"}}), ErrorTag::InvalidValue)]
    #[case(json!({"ietf-subscribed-notifications:input": {"stream": 1}}), ErrorTag::InvalidValue)]
    #[case(json!({"ietf-subscribed-notifications:output": {}}), ErrorTag::InvalidValue)]
    #[case(json!({"ietf-subscribed-notifications:input": {"stream": "NETCONF", "stream-xpath-filter": "toasterRestocked"}}), ErrorTag::InvalidValue)]
    fn test_establish_json_invalid(#[case] body: Value, #[case] tag: ErrorTag) {
        let err = EstablishSubscriptionInput::from_json(&body).unwrap_err();
        assert_eq!(err.error_tag(), tag);
    }

    #[test]
    fn test_missing_stream_is_not_a_parse_error() {
        let request = RpcRequest::parse(
            RpcOperation::EstablishSubscription,
            &RpcBody::Empty,
            &toaster_schema(),
        )
        .unwrap();
        assert_eq!(
            request,
            RpcRequest::Establish(EstablishSubscriptionInput::new(None))
        );
    }

    #[test]
    fn test_establish_xml() {
        let body = format!(
            "<?xml version=\"1.0\"?>\
             <input xmlns=\"{SUBSCRIBED_NOTIFICATIONS_NS}\">\
               <stream>NETCONF</stream>\
               <stream-subtree-filter><toasterRestocked xmlns=\"{TOASTER_NS}\"/></stream-subtree-filter>\
               <replay-start-time>2026-10-16T10:00:00+02:00</replay-start-time>\
             </input>"
        );
        let request = RpcRequest::parse(
            RpcOperation::EstablishSubscription,
            &RpcBody::from_xml_str(&body).unwrap(),
            &toaster_schema(),
        )
        .unwrap();
        assert_eq!(
            request,
            RpcRequest::Establish(
                EstablishSubscriptionInput::new(Some("NETCONF"))
                    .with_filter(restocked_filter())
                    .with_replay_start_time(Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 0).unwrap())
            )
        );
    }

    #[test]
    fn test_modify_and_delete() {
        let modify = json!({
            "ietf-subscribed-notifications:input": {
                "id": 2147483648u32,
                "stream-xpath-filter": "/example-toaster:toasterRestocked"
            }
        });
        let request = RpcRequest::parse(
            RpcOperation::ModifySubscription,
            &RpcBody::Json(modify),
            &toaster_schema(),
        )
        .unwrap();
        let RpcRequest::Modify(input) = request else {
            panic!("expected modify request, found {request:?}");
        };
        assert_eq!(input.id(), 2147483648);
        assert!(matches!(input.filter(), Some(StreamFilter::XPath(_))));

        let delete = format!(
            "<delete-subscription xmlns=\"{SUBSCRIBED_NOTIFICATIONS_NS}\"><id>7</id></delete-subscription>"
        );
        assert_eq!(
            RpcRequest::parse(
                RpcOperation::DeleteSubscription,
                &RpcBody::from_xml_str(&delete).unwrap(),
                &toaster_schema(),
            ),
            Ok(RpcRequest::Delete(SubscriptionIdInput::new(7)))
        );

        let kill = json!({"ietf-subscribed-notifications:input": {"id": "9"}});
        assert_eq!(
            RpcRequest::parse(
                RpcOperation::KillSubscription,
                &RpcBody::Json(kill),
                &toaster_schema()
            ),
            Ok(RpcRequest::Kill(SubscriptionIdInput::new(9)))
        );

        let err = RpcRequest::parse(
            RpcOperation::KillSubscription,
            &RpcBody::Empty,
            &toaster_schema(),
        )
        .unwrap_err();
        assert_eq!(err.error_tag(), ErrorTag::MissingElement);
    }

    #[test]
    fn test_stream_filter_entry() {
        let body = json!({
            "ietf-subscribed-notifications:stream-filter": [{
                "name": "restocked",
                "stream-subtree-filter": {"example-toaster:toasterRestocked": {}}
            }]
        });
        let entry = StreamFilterEntry::from_json(&body).unwrap();
        assert_eq!(entry.name(), "restocked");
        assert_eq!(entry.filter(), &restocked_filter());

        let nested = json!({"name": "other", "stream-filter-name": "restocked"});
        assert!(StreamFilterEntry::from_json(&nested).is_err());

        let xml = format!(
            "<stream-filter xmlns=\"{SUBSCRIBED_NOTIFICATIONS_NS}\"><name>restocked</name>\
             <stream-xpath-filter>/example-toaster:toasterRestocked</stream-xpath-filter>\
             </stream-filter>"
        );
        let entry = StreamFilterEntry::from_xml(
            &parse_document(&xml).unwrap(),
            &toaster_schema(),
        )
        .unwrap();
        assert!(matches!(entry.filter(), StreamFilter::XPath(_)));
    }

    #[test]
    fn test_output() {
        let output = EstablishSubscriptionOutput::new(
            2147483648,
            Some(Utc.with_ymd_and_hms(2026, 10, 16, 10, 0, 0).unwrap()),
        );
        assert_eq!(
            output.to_json(),
            json!({
                "ietf-subscribed-notifications:output": {
                    "id": 2147483648u32,
                    "replay-start-time-revision": "2026-10-16T10:00:00Z"
                }
            })
        );
        assert_eq!(
            EstablishSubscriptionOutput::new(1, None).to_xml().unwrap(),
            format!("<output xmlns=\"{SUBSCRIBED_NOTIFICATIONS_NS}\"><id>1</id></output>")
        );
    }
}
