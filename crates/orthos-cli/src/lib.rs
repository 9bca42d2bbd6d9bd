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

//! # Orthos CLI
//!
//! Command-line interface for the Orthos correction-module orchestrator.
//!
//! Every invocation loads one corrector configuration and runs one command
//! against it. Nothing persists between invocations except module servers
//! started with `startservers` and the record of them kept under the
//! corrector's root.
//!
//! ## Architecture
//!
//! The binary parses arguments with `argh` and hands off to [`commands`],
//! which drives `orthos-orchestrator` and, for `serve`, `orthos-server`.
//!
//! ## Key Commands
//!
//! - `orthos <config> train`: build model artifacts from sources
//! - `orthos <config> run <document>`: annotate a document, JSON on stdout
//! - `orthos <config> startservers`: launch the module servers for this host
//! - `orthos <config> serve <id>`: run a single module server in the foreground

pub mod commands;
