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

use serde_with::serde_as;
use std::{net::SocketAddr, time::Duration};
use subnotif_model::schema::SchemaContext;
use subnotif_service::streams::StreamConfig;

const SUBSCRIBER_TIMEOUT_DURATION_DEFAULT: Duration = Duration::from_millis(100);

pub(crate) const fn default_subscriber_timeout_duration() -> Duration {
    SUBSCRIBER_TIMEOUT_DURATION_DEFAULT
}

pub(crate) const fn default_telemetry_timeout() -> Duration {
    Duration::from_secs(5)
}

pub(crate) const fn default_telemetry_interval() -> Duration {
    Duration::from_secs(60)
}

pub(crate) const fn default_cmd_size_buffer() -> usize {
    100
}

pub(crate) const fn default_buffer_size() -> usize {
    1_000
}

pub(crate) fn default_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8181))
}

pub(crate) fn default_root() -> String {
    "restconf".to_string()
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SubscriptionServerConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default, skip_serializing_if = "::std::option::Option::is_none")]
    pub telemetry: Option<TelemetryConfig>,

    #[serde(default)]
    pub server: HttpConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Event streams served in addition to `NETCONF`
    #[serde(default)]
    pub streams: Vec<StreamConfig>,

    /// Modules and notification definitions filters are validated against
    #[serde(default)]
    pub schema: SchemaContext,
}

#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    #[serde(skip_serializing_if = "::std::option::Option::is_none")]
    pub threads: Option<usize>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TelemetryConfig {
    pub url: String,

    /// Metrics exporter GRPC timeout
    #[serde(default = "default_telemetry_timeout")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub exporter_timeout: Duration,

    /// Configures the intervening time between exports for a
    /// [opentelemetry_sdk::metrics::PeriodicReader]
    #[serde(default = "default_telemetry_interval")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub reader_interval: Duration,
}

impl TelemetryConfig {
    pub fn url(&self) -> &str {
        self.url.as_str()
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_address")]
    pub address: SocketAddr,

    /// RESTCONF root resource, without slashes
    #[serde(default = "default_root")]
    pub root: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            root: default_root(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_cmd_size_buffer")]
    pub cmd_buffer_size: usize,

    /// Events buffered per attached stream listener
    #[serde(default = "default_buffer_size")]
    pub listener_buffer_size: usize,

    #[serde(default = "default_subscriber_timeout_duration")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub subscriber_timeout: Duration,

    /// Events buffered between the notification router and the dispatcher
    #[serde(default = "default_buffer_size")]
    pub router_buffer_size: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            cmd_buffer_size: default_cmd_size_buffer(),
            listener_buffer_size: default_buffer_size(),
            subscriber_timeout: default_subscriber_timeout_duration(),
            router_buffer_size: default_buffer_size(),
        }
    }
}
