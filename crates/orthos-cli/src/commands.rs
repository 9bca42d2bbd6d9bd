// Copyright 2025 Orthos Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Command implementations behind the `orthos` binary.
//!
//! Results go to stdout (or the `-o` file for `run`); everything else is
//! logged to stderr. A command that completes but reports failures returns
//! an error so the process exits non-zero.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use orthos_common::{Document, RunParameters};
use orthos_orchestrator::{Corrector, Reference, ServerReport, Stage, StartOptions};
use orthos_server::{ModuleServer, ServerLimits};

/// Splits a comma-separated id list. `None` or an empty string selects
/// every module.
pub fn parse_ids(ids: Option<&str>) -> Vec<String> {
    ids.map(|ids| {
        ids.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

pub async fn lifecycle(
    corrector: &Corrector,
    stage: Stage,
    ids: &[String],
    parameters: &RunParameters,
) -> Result<()> {
    let report = match stage {
        Stage::Reset => corrector.reset(ids).await?,
        Stage::Train => corrector.train(ids, parameters).await?,
        Stage::Test => corrector.test(ids, parameters).await?,
        Stage::Tune => corrector.tune(ids, parameters).await?,
    };
    print!("{}", report);

    if !report.is_success() {
        bail!("{} failed for: {}", stage, report.failed().join(", "));
    }
    Ok(())
}

/// Annotates `document` and writes the result as JSON to `output`, or to
/// stdout when no output path is given.
pub async fn run(
    corrector: &Corrector,
    document: &Path,
    ids: &[String],
    parameters: &RunParameters,
    output: Option<&Path>,
) -> Result<()> {
    let document = Document::from_path(document)
        .with_context(|| format!("cannot read document {}", document.display()))?;
    let annotated = corrector.run(document, ids, parameters).await?;

    if annotated.partial {
        tracing::warn!(failed = ?annotated.failed(), "some modules failed, output is partial");
    }

    let json = serde_json::to_string_pretty(&annotated)?;
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))?;
            tracing::info!(path = %path.display(), "annotated document written");
        }
        None => println!("{}", json),
    }
    Ok(())
}

pub async fn evaluate(
    corrector: &Corrector,
    document: &Path,
    reference: &Path,
    ids: &[String],
) -> Result<()> {
    let document = Document::from_path(document)
        .with_context(|| format!("cannot read document {}", document.display()))?;
    let reference = Reference::from_path(reference)?;

    let report = corrector
        .evaluate(document, &reference, ids, &RunParameters::default())
        .await?;
    println!("{}", report);
    Ok(())
}

pub async fn start_servers(
    corrector: &Corrector,
    config_path: &Path,
    ids: &[String],
    host: Option<String>,
) -> Result<()> {
    let program = std::env::current_exe().context("cannot locate the orthos executable")?;
    let options = StartOptions::new(program, absolute(config_path)?).with_host(host);

    let report = corrector.start_servers(ids, &options).await?;
    finish_servers("startservers", report)
}

pub async fn stop_servers(
    corrector: &Corrector,
    ids: &[String],
    force: bool,
    host: Option<&str>,
) -> Result<()> {
    let report = corrector.stop_servers(ids, force, host).await?;
    finish_servers("stopservers", report)
}

fn finish_servers(command: &str, report: ServerReport) -> Result<()> {
    print!("{}", report);
    if !report.is_success() {
        bail!("{} did not complete for every server", command);
    }
    Ok(())
}

pub async fn list_servers(corrector: &Corrector) -> Result<()> {
    let statuses = corrector.list_servers().await?;
    if statuses.is_empty() {
        println!("no remote modules configured");
    }
    for status in statuses {
        println!("{}", status);
    }
    Ok(())
}

/// Serves one module in the foreground until it receives `Shutdown` or the
/// process is interrupted.
pub async fn serve(
    corrector: &Corrector,
    id: &str,
    bind: &str,
    request_timeout_ms: Option<u64>,
) -> Result<()> {
    let module = corrector
        .module(id)
        .ok_or_else(|| anyhow!("unknown module '{}'", id))?
        .clone();

    let mut limits = ServerLimits::new();
    if let Some(ms) = request_timeout_ms {
        limits = limits.with_request_timeout(Duration::from_millis(ms));
    }

    let server = ModuleServer::bind(module, limits, bind).await?;
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, draining in-flight requests");
            shutdown.graceful();
        }
    });

    server.run().await?;
    tracing::info!(module = %id, "module server stopped");
    Ok(())
}

/// Spawned servers may run from another working directory.
fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}
