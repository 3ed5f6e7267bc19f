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

//! Errors reported by the subscription subsystem and their protocol
//! representation (RFC 8040 `errors` container).

use crate::{datastore::DatastoreError, dispatcher::DispatcherHandleError, state_machine::SubscriptionState};
use serde_json::json;
use subnotif_model::{
    filter::FilterError,
    json::JsonCodecError,
    schema::SchemaContext,
    xml::{ParsingError, XmlWriter, XmlWriterError},
    xpath::XPathError,
    SubscriptionId, RESTCONF_NS, SUBSCRIBED_NOTIFICATIONS_MODULE,
};

/// RFC 6241 Appendix A error tags used by this subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum ErrorTag {
    #[strum(to_string = "invalid-value")]
    InvalidValue,

    #[strum(to_string = "missing-element")]
    MissingElement,

    #[strum(to_string = "operation-failed")]
    OperationFailed,

    #[strum(to_string = "operation-not-supported")]
    OperationNotSupported,

    #[strum(to_string = "in-use")]
    InUse,
}

#[derive(Debug, Clone, PartialEq, Eq, strum_macros::Display)]
pub enum SubscriptionError {
    #[strum(to_string = "{0} refers to an unknown stream")]
    UnknownStream(String),

    #[strum(to_string = "{0} refers to an unknown stream filter")]
    UnknownFilter(String),

    #[strum(to_string = "no subscription with id {0}")]
    UnknownSubscription(SubscriptionId),

    /// Removing a subscription that is not in the registry
    #[strum(to_string = "subscription {0} not found")]
    NotFound(SubscriptionId),

    #[strum(to_string = "subscription {0} is not owned by the requesting session")]
    WrongSession(SubscriptionId),

    #[strum(to_string = "no active or suspended subscription with given id")]
    NoActiveSubscription(SubscriptionId),

    /// Another receiver is still attached to the subscription's stream
    #[strum(to_string = "subscription {0} already has a receiver attached")]
    ReceiverAttached(SubscriptionId),

    #[strum(to_string = "subscription {id} cannot move from {from} to {to}")]
    IllegalTransition {
        id: SubscriptionId,
        from: SubscriptionState,
        to: SubscriptionState,
    },

    #[strum(to_string = "{message}")]
    Validation { tag: ErrorTag, message: String },

    #[strum(to_string = "operation not supported: {0}")]
    NotSupported(String),

    #[strum(to_string = "operation failed: {0}")]
    OperationFailed(String),

    #[strum(to_string = "internal error: {0}")]
    Internal(String),
}

impl std::error::Error for SubscriptionError {}

impl SubscriptionError {
    pub fn missing_element(message: impl Into<String>) -> Self {
        Self::Validation {
            tag: ErrorTag::MissingElement,
            message: message.into(),
        }
    }

    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::Validation {
            tag: ErrorTag::InvalidValue,
            message: message.into(),
        }
    }

    pub const fn error_tag(&self) -> ErrorTag {
        match self {
            Self::UnknownStream(_)
            | Self::UnknownFilter(_)
            | Self::UnknownSubscription(_)
            | Self::NotFound(_)
            | Self::WrongSession(_)
            | Self::NoActiveSubscription(_) => ErrorTag::InvalidValue,
            Self::Validation { tag, .. } => *tag,
            Self::NotSupported(_) => ErrorTag::OperationNotSupported,
            Self::ReceiverAttached(_) => ErrorTag::InUse,
            Self::IllegalTransition { .. } | Self::OperationFailed(_) | Self::Internal(_) => {
                ErrorTag::OperationFailed
            }
        }
    }

    /// RFC 8639 error identity, when one describes the failure
    pub fn error_app_tag(&self) -> Option<String> {
        let identity = match self {
            Self::UnknownStream(_) => "stream-unavailable",
            Self::UnknownFilter(_) => "filter-unavailable",
            Self::UnknownSubscription(_) | Self::NotFound(_) | Self::NoActiveSubscription(_) => {
                "no-such-subscription"
            }
            _ => return None,
        };
        Some(format!("{SUBSCRIBED_NOTIFICATIONS_MODULE}:{identity}"))
    }
}

impl From<FilterError> for SubscriptionError {
    fn from(value: FilterError) -> Self {
        Self::invalid_value(value.to_string())
    }
}

impl From<XPathError> for SubscriptionError {
    fn from(value: XPathError) -> Self {
        Self::invalid_value(value.to_string())
    }
}

impl From<JsonCodecError> for SubscriptionError {
    fn from(value: JsonCodecError) -> Self {
        Self::invalid_value(value.to_string())
    }
}

impl From<ParsingError> for SubscriptionError {
    fn from(value: ParsingError) -> Self {
        match value {
            ParsingError::MissingElement(element) => {
                Self::missing_element(format!("required element `{element}` is missing"))
            }
            other => Self::invalid_value(other.to_string()),
        }
    }
}

impl From<DatastoreError> for SubscriptionError {
    fn from(value: DatastoreError) -> Self {
        Self::OperationFailed(value.to_string())
    }
}

impl From<DispatcherHandleError> for SubscriptionError {
    fn from(value: DispatcherHandleError) -> Self {
        Self::Internal(value.to_string())
    }
}

/// Protocol representation of a failed operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    tag: ErrorTag,
    app_tag: Option<String>,
    message: String,
}

impl RpcError {
    pub const fn tag(&self) -> ErrorTag {
        self.tag
    }

    pub fn app_tag(&self) -> Option<&str> {
        self.app_tag.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut error = json!({
            "error-type": "application",
            "error-tag": self.tag.to_string(),
            "error-message": self.message,
        });
        if let (Some(app_tag), Some(error)) = (&self.app_tag, error.as_object_mut()) {
            error.insert("error-app-tag".to_string(), json!(app_tag));
        }
        json!({"ietf-restconf:errors": {"error": [error]}})
    }

    pub fn to_xml(&self) -> Result<String, XmlWriterError> {
        let schema = SchemaContext::default();
        let mut writer = XmlWriter::new(quick_xml::writer::Writer::new(vec![]), &schema);
        writer.start_element("errors", Some(RESTCONF_NS))?;
        writer.start_element("error", None)?;
        writer.text_element("error-type", None, "application")?;
        writer.text_element("error-tag", None, &self.tag.to_string())?;
        if let Some(app_tag) = &self.app_tag {
            writer.text_element("error-app-tag", None, app_tag)?;
        }
        writer.text_element("error-message", None, &self.message)?;
        writer.end_element("error")?;
        writer.end_element("errors")?;
        Ok(String::from_utf8(writer.into_inner())?)
    }
}

impl From<&SubscriptionError> for RpcError {
    fn from(value: &SubscriptionError) -> Self {
        Self {
            tag: value.error_tag(),
            app_tag: value.error_app_tag(),
            message: value.to_string(),
        }
    }
}
