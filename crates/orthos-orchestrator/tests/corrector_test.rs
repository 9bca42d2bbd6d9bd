//! Corrector Integration Tests
//!
//! These tests build correctors from configuration files in a temporary
//! root and exercise the full command surface:
//! - a run that mixes a local module with a remote one nobody serves
//! - the reset / train / run cycle and repeatable training
//! - remote dispatch to an in-process module server
//! - server listing, stopping and start-up failures
//! - evaluation against a reference

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};

use orthos_common::protocol::{Document, ErrorKind, OrthosError, RunParameters};
use orthos_common::transport::ShutdownHandle;
use orthos_modules::{Endpoint, Module, ModuleFactory, ModuleSpec};
use orthos_orchestrator::evaluation::ReferenceCorrection;
use orthos_orchestrator::{Corrector, Outcome, Reference, ServerOutcome, StartOptions};
use orthos_server::{ModuleServer, ServerLimits};

// ============================================================================
// Test Helpers
// ============================================================================

const ERRORS: &str = "teh\tthe\n";

fn write_errors(root: &Path) -> PathBuf {
    let source = root.join("errors.tsv");
    std::fs::write(&source, ERRORS).unwrap();
    source
}

fn errorlist_decl() -> Value {
    json!({ "module": "errorlist", "id": "errorlist", "source": "errors.tsv", "model": "errors.model" })
}

/// A port nothing listens on.
fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Writes `corrector.json` under `root` and builds a corrector from it.
fn corrector(root: &Path, modules: Vec<Value>) -> Corrector {
    let config = json!({
        "id": "test",
        "root": root,
        "timeout_ms": 5000,
        "probe_timeout_ms": 300,
        "retry": { "max_retries": 1, "initial_backoff_ms": 10, "max_backoff_ms": 20 },
        "modules": modules,
    });
    let path = root.join("corrector.json");
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    Corrector::from_file(&path).unwrap()
}

/// Serves a trained errorlist on a random local port.
async fn serve_errorlist(root: &Path) -> (u16, ShutdownHandle, tokio::task::JoinHandle<orthos_common::Result<()>>) {
    let spec = ModuleSpec::new("errorlist", "errorlist").with_source(write_errors(root), root.join("served.model"));
    let module: Arc<dyn Module> = ModuleFactory::builtin().create(spec).unwrap();
    module.train(&RunParameters::default()).unwrap();

    let server = ModuleServer::bind(module, ServerLimits::default(), "127.0.0.1:0")
        .await
        .unwrap();
    let port = server.local_addr().unwrap().port();
    let shutdown = server.shutdown_handle();
    (port, shutdown, tokio::spawn(server.run()))
}

fn letter() -> Document {
    Document::from_text("letter", "I wa teh best.")
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_local_module_survives_unreachable_remote_module() {
    let dir = tempfile::tempdir().unwrap();
    write_errors(dir.path());

    let corrector = corrector(
        dir.path(),
        vec![
            errorlist_decl(),
            json!({
                "module": "confusible",
                "id": "confusible",
                "model": "confusible.model",
                "sets": ["then|than"],
                "servers": [{ "host": "127.0.0.1", "port": closed_port() }],
            }),
        ],
    );
    let trained = corrector
        .train(&["errorlist".to_string()], &RunParameters::default())
        .await
        .unwrap();
    assert!(trained.is_success());

    let annotated = corrector.run(letter(), &[], &RunParameters::default()).await.unwrap();

    let suggestions = annotated.suggestions_of("errorlist").unwrap();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0].original, "teh");
    assert!(suggestions[0].proposes("the"));

    assert!(annotated.partial);
    assert_eq!(annotated.failed(), vec!["confusible"]);
    assert_eq!(annotated.failures[0].kind, ErrorKind::NoAvailableServer);
    // the input text is never rewritten
    assert_eq!(annotated.document.text, "I wa teh best.");
}

#[tokio::test]
async fn test_reset_then_run_reports_model_missing() {
    let dir = tempfile::tempdir().unwrap();
    write_errors(dir.path());
    let corrector = corrector(dir.path(), vec![errorlist_decl(), json!({ "module": "dummy", "id": "noop" })]);

    assert!(corrector.train(&[], &RunParameters::default()).await.unwrap().is_success());
    assert!(corrector.reset(&[]).await.unwrap().is_success());
    assert!(!dir.path().join("errors.model").exists());

    let annotated = corrector.run(letter(), &[], &RunParameters::default()).await.unwrap();
    assert!(annotated.partial);
    assert_eq!(annotated.failures[0].module, "errorlist");
    assert_eq!(annotated.failures[0].kind, ErrorKind::ModelMissing);
    assert!(annotated.suggestions_of("noop").is_some());

    // with nothing else to fall back on the whole run fails
    let err = corrector
        .run(letter(), &["errorlist".to_string()], &RunParameters::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OrthosError::NoModuleSucceeded));
}

#[tokio::test]
async fn test_training_is_repeatable() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("errors.tsv"), "wa\twas\nteh\tthe\nteh\tthe\n").unwrap();
    let corrector = corrector(dir.path(), vec![errorlist_decl()]);
    let model = dir.path().join("errors.model");

    assert!(corrector.train(&[], &RunParameters::default()).await.unwrap().is_success());
    let first = std::fs::read(&model).unwrap();
    assert!(corrector.train(&[], &RunParameters::default()).await.unwrap().is_success());
    assert_eq!(std::fs::read(&model).unwrap(), first);

    let annotated = corrector.run(letter(), &[], &RunParameters::default()).await.unwrap();
    assert!(!annotated.partial);
    assert_eq!(annotated.suggestions().count(), 2);
}

#[tokio::test]
async fn test_relative_test_source_is_read_from_root() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("words.txt"), "the cat was here").unwrap();
    std::fs::write(dir.path().join("heldout.txt"), "the cat zzz qqq").unwrap();
    let corrector = corrector(
        dir.path(),
        vec![json!({
            "module": "lexicon",
            "id": "lexicon",
            "source": "words.txt",
            "model": "lexicon.model",
            "test_source": "heldout.txt",
        })],
    );
    // the test process runs from the crate directory, not the root
    assert_ne!(std::env::current_dir().unwrap(), dir.path());

    assert!(corrector.train(&[], &RunParameters::default()).await.unwrap().is_success());
    let report = corrector.test(&[], &RunParameters::default()).await.unwrap();
    match report.outcome("lexicon") {
        Some(Outcome::Succeeded(metrics)) => {
            assert_eq!(metrics.get("tokens"), Some(4.0));
            assert_eq!(metrics.get("oov_rate"), Some(0.5));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_stage_parameters_reach_modules() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("words.txt"), "the cat was here").unwrap();
    let other = dir.path().join("other.txt");
    std::fs::write(&other, "the cat").unwrap();
    let corrector = corrector(
        dir.path(),
        vec![json!({
            "module": "lexicon",
            "id": "lexicon",
            "source": "words.txt",
            "model": "lexicon.model",
        })],
    );
    assert!(corrector.train(&[], &RunParameters::default()).await.unwrap().is_success());

    // nothing configured to test against
    let report = corrector.test(&[], &RunParameters::default()).await.unwrap();
    assert!(matches!(report.outcome("lexicon"), Some(Outcome::Succeeded(m)) if m.get("oov_rate").is_none()));

    let parameters = RunParameters::default()
        .with_extra([format!("test_source={}", other.display())])
        .unwrap();
    let report = corrector.test(&[], &parameters).await.unwrap();
    match report.outcome("lexicon") {
        Some(Outcome::Succeeded(metrics)) => assert_eq!(metrics.get("oov_rate"), Some(0.0)),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_lifecycle_reports_skip_and_failure() {
    let dir = tempfile::tempdir().unwrap();
    let corrector = corrector(dir.path(), vec![errorlist_decl(), json!({ "module": "dummy", "id": "noop" })]);

    // no source written
    let report = corrector.train(&[], &RunParameters::default()).await.unwrap();
    assert!(!report.is_success());
    assert!(matches!(
        report.outcome("errorlist"),
        Some(Outcome::Failed { kind: ErrorKind::MissingSource, .. })
    ));
    assert!(matches!(report.outcome("noop"), Some(Outcome::Skipped(_))));

    let err = corrector
        .test(&["lexicon".to_string()], &RunParameters::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OrthosError::UnknownModule(_)));
}

#[tokio::test]
async fn test_remote_module_served_in_process() {
    let dir = tempfile::tempdir().unwrap();
    let (port, shutdown, task) = serve_errorlist(dir.path()).await;

    let corrector = corrector(
        dir.path(),
        vec![json!({
            "module": "errorlist",
            "id": "errorlist",
            "model": "errors.model",
            "servers": [
                { "host": "127.0.0.1", "port": closed_port() },
                { "host": "127.0.0.1", "port": port },
            ],
        })],
    );

    let annotated = corrector.run(letter(), &[], &RunParameters::default()).await.unwrap();
    assert!(!annotated.partial);
    let suggestions = annotated.suggestions_of("errorlist").unwrap();
    assert_eq!(suggestions.len(), 1);
    assert!(suggestions[0].proposes("the"));
    // the corrector's own model was never built
    assert!(!dir.path().join("errors.model").exists());

    shutdown.graceful();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_list_and_stop_servers() {
    let dir = tempfile::tempdir().unwrap();
    let (port, _shutdown, task) = serve_errorlist(dir.path()).await;
    let down = closed_port();

    let corrector = corrector(
        dir.path(),
        vec![json!({
            "module": "errorlist",
            "id": "errorlist",
            "model": "errors.model",
            "servers": [
                { "host": "127.0.0.1", "port": port },
                { "host": "127.0.0.1", "port": down },
            ],
        })],
    );

    let statuses = corrector.list_servers().await.unwrap();
    assert_eq!(statuses.len(), 2);
    assert!(statuses[0].handle.is_reachable());
    assert_eq!(statuses[0].load().unwrap().load, 0.0);
    assert!(!statuses[1].handle.is_reachable());
    assert!(statuses[1].to_string().contains("down"));

    let report = corrector.stop_servers(&[], false, None).await.unwrap();
    assert!(report.is_success());
    assert_eq!(
        report.outcome(&Endpoint::new("127.0.0.1", port)),
        Some(&ServerOutcome::Stopped)
    );
    assert_eq!(
        report.outcome(&Endpoint::new("127.0.0.1", down)),
        Some(&ServerOutcome::NotRunning)
    );
    task.await.unwrap().unwrap();

    let statuses = corrector.list_servers().await.unwrap();
    assert!(statuses.iter().all(|s| !s.handle.is_reachable()));
}

#[tokio::test]
async fn test_start_servers_reports_port_in_use() {
    let dir = tempfile::tempdir().unwrap();
    write_errors(dir.path());
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let corrector = corrector(
        dir.path(),
        vec![json!({
            "module": "errorlist",
            "id": "errorlist",
            "source": "errors.tsv",
            "model": "errors.model",
            "servers": [
                { "host": "127.0.0.1", "port": port },
                { "host": "elsewhere.invalid", "port": port },
            ],
        })],
    );

    let options = StartOptions::new("/nonexistent/orthos", dir.path().join("corrector.json"));
    let report = corrector.start_servers(&[], &options).await.unwrap();

    // only the endpoint on this host is attempted
    assert_eq!(report.actions.len(), 1);
    assert!(!report.is_success());
    assert!(matches!(
        report.outcome(&Endpoint::new("127.0.0.1", port)),
        Some(ServerOutcome::Failed { kind: ErrorKind::PortInUse, .. })
    ));
    drop(taken);
}

#[tokio::test]
async fn test_evaluate_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("errors.tsv"), "teh\tthe\nbest\tbets\n").unwrap();
    let corrector = corrector(dir.path(), vec![errorlist_decl()]);
    corrector.train(&[], &RunParameters::default()).await.unwrap();

    // "I wa teh best." : wa@2..4, teh@5..8
    let reference = Reference {
        corrections: vec![
            ReferenceCorrection {
                offset: 2,
                length: 2,
                correction: "was".into(),
            },
            ReferenceCorrection {
                offset: 5,
                length: 3,
                correction: "the".into(),
            },
        ],
    };

    let report = corrector
        .evaluate(letter(), &reference, &[], &RunParameters::default())
        .await
        .unwrap();

    let scores = report.module("errorlist").unwrap();
    assert_eq!(
        (scores.true_positives, scores.false_positives, scores.false_negatives),
        (1, 1, 1)
    );
    assert_eq!(scores.f1, 0.5);
    assert_eq!(report.overall, *scores);
    assert!(report.failed.is_empty());
}
