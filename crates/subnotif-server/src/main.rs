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

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use std::{env, path::PathBuf, str::FromStr};
use subnotif_server::{
    config::{SubscriptionServerConfig, TelemetryConfig},
    SubscriptionService,
};
use tracing::{error, info, Level};

fn init_tracing(level: &'_ str) -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(Level::from_str(level)?)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn init_meter_provider(config: &TelemetryConfig) -> anyhow::Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(config.url())
        .with_timeout(config.exporter_timeout)
        .build()?;
    let reader = PeriodicReader::builder(exporter)
        .with_interval(config.reader_interval)
        .build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    opentelemetry::global::set_meter_provider(provider.clone());
    Ok(provider)
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        anyhow::bail!("Usage: {} <config-file>", args[0]);
    }
    let config_file = PathBuf::from(&args[1]);
    let config: SubscriptionServerConfig = Figment::new()
        .merge(Yaml::file(config_file))
        .merge(Env::prefixed("SUBNOTIF_").split("__"))
        .extract()
        .map_err(|err| anyhow::anyhow!("Parsing config file failed: {err}"))?;
    init_tracing(&config.logging.level)?;

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    // If num threads is not configured then the default use all CPU cores is used
    if let Some(num_threads) = config.runtime.threads {
        runtime_builder.worker_threads(num_threads);
    }
    runtime_builder.enable_all();
    let runtime = runtime_builder.build()?;
    runtime.block_on(async move {
        let meter_provider = config
            .telemetry
            .as_ref()
            .map(init_meter_provider)
            .transpose()?;
        let meter = opentelemetry::global::meter("subnotif-server");
        let service = SubscriptionService::start(&config, meter).await?;

        let shutdown = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "failed to listen for the termination signal");
            }
            info!("Termination signal received, gracefully shutting down");
        };
        let served = service.serve(&config, shutdown).await;
        service.shutdown().await?;
        if let Some(provider) = meter_provider {
            if let Err(err) = provider.shutdown() {
                error!(error = %err, "failed to flush metrics");
            }
        }
        served
    })
}
