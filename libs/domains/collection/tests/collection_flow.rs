//! End-to-end collection flow against a scripted transport.
//!
//! Exercises the runner/executor/processor/graph stack together the way
//! the collector service drives it, without a live SSH endpoint.

use async_trait::async_trait;
use domain_collection::{
    CollectError, CollectJob, CollectResult, Graph, GraphTemplate, HostConfig, JobRunner,
    ProcessorChain, RunnerConfig, ScriptOutput, ScriptRunner, TransportConfig,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;
use worker_pool::JobContext;

const TEMPLATE: &str = r#"{
    "version": "1.0",
    "remote_host": "10.0.0.5:22",
    "login": "svc",
    "password": "secret",
    "structure": {
        "id": "system",
        "type": "object",
        "children": [
            { "id": "kernel", "type": "string", "script": "uname -r", "post_process": "trim" },
            { "id": "tmp-files", "type": "array", "script": "ls /tmp", "post_process": "trim split_lines" },
            {
                "id": "hardware",
                "type": "object",
                "children": [
                    { "id": "cpu", "type": "string", "script": "lscpu", "post_process": "trim key_value" }
                ]
            }
        ]
    }
}"#;

#[derive(Clone)]
enum Respond {
    Lines(Vec<&'static str>),
    WithStderr(Vec<&'static str>, Vec<&'static str>),
    AlwaysExit(u32),
    BlockUntilCancelled,
}

struct FakeTransport {
    responses: HashMap<String, Respond>,
    calls: Mutex<HashMap<String, u32>>,
    runs: AtomicU32,
}

impl FakeTransport {
    fn new(responses: &[(&str, Respond)]) -> Arc<Self> {
        Arc::new(Self {
            responses: responses
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            calls: Mutex::new(HashMap::new()),
            runs: AtomicU32::new(0),
        })
    }

    fn calls_for(&self, script: &str) -> u32 {
        *self.calls.lock().unwrap().get(script).unwrap_or(&0)
    }
}

#[async_trait]
impl ScriptRunner for FakeTransport {
    async fn run_script(&self, script: &str, ctx: &JobContext) -> CollectResult<ScriptOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        *self
            .calls
            .lock()
            .unwrap()
            .entry(script.to_string())
            .or_insert(0) += 1;

        match self.responses.get(script) {
            Some(Respond::Lines(stdout)) => Ok(ScriptOutput {
                stdout: stdout.iter().map(|s| s.to_string()).collect(),
                stderr: vec![],
                exit_status: 0,
            }),
            Some(Respond::WithStderr(stdout, stderr)) => Ok(ScriptOutput {
                stdout: stdout.iter().map(|s| s.to_string()).collect(),
                stderr: stderr.iter().map(|s| s.to_string()).collect(),
                exit_status: 0,
            }),
            Some(Respond::AlwaysExit(status)) => Err(CollectError::ScriptExit { status: *status }),
            Some(Respond::BlockUntilCancelled) => {
                ctx.cancelled().await;
                Err(CollectError::from_cancelled_ctx(ctx))
            }
            None => Err(CollectError::Internal(format!(
                "no scripted response for {:?}",
                script
            ))),
        }
    }
}

fn runner() -> JobRunner {
    JobRunner::new(
        RunnerConfig::new("unused.json")
            .with_default_login("svc")
            .with_traversal_workers(7),
    )
}

fn graph_for(job: &CollectJob) -> Graph {
    let template = GraphTemplate::from_json(TEMPLATE).unwrap();
    let graph = Graph::new(
        TransportConfig {
            version: template.version.clone(),
            remote_host: template.remote_host.clone(),
            login: template.login.clone().unwrap_or_default(),
            password: template.password.clone().unwrap_or_default(),
            ssh_key_path: String::new(),
        },
        HostConfig {
            customer_id: 1,
            host_id: job.host_id,
            script_id: job.script_id,
            ..Default::default()
        },
        job.execution_id,
        template.structure,
    );
    graph.validate(&ProcessorChain::new()).unwrap();
    graph
}

fn job() -> CollectJob {
    CollectJob {
        host_id: 1,
        script_id: 1,
        execution_id: Uuid::new_v4(),
    }
}

#[tokio::test]
async fn happy_path_produces_the_persisted_document_shape() {
    let job = job();
    let transport = FakeTransport::new(&[
        ("uname -r", Respond::Lines(vec!["  6.1.0-harvest  "])),
        (
            "ls /tmp",
            Respond::WithStderr(vec!["fileA fileB"], vec!["ls: giving unsolicited advice"]),
        ),
        (
            "lscpu",
            Respond::Lines(vec!["Architecture: x86_64", "CPU(s): 8"]),
        ),
    ]);

    let graph = runner()
        .traverse(graph_for(&job), Arc::clone(&transport), &JobContext::background())
        .await
        .unwrap();

    let value = serde_json::to_value(&graph).unwrap();

    // Envelope the dataservice expects.
    assert_eq!(value["uuid"].as_str().unwrap(), job.execution_id.to_string());
    assert_eq!(value["hostconfig"]["hostId"], 1);
    assert_eq!(value["config"]["remote_host"], "10.0.0.5:22");

    let children = value["rootnode"]["children"].as_array().unwrap();
    assert_eq!(children[0]["id"], "kernel");
    assert_eq!(children[0]["result"][0], "6.1.0-harvest");

    assert_eq!(children[1]["id"], "tmp-files");
    assert_eq!(
        children[1]["result"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect::<Vec<_>>(),
        vec!["fileA", "fileB"]
    );
    // Captured stderr rides along under "error".
    assert_eq!(children[1]["error"][0], "ls: giving unsolicited advice");

    // key_value pair order is unspecified: compare as a set.
    let cpu = children[2]["children"][0]["result"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect::<HashSet<_>>();
    assert_eq!(
        cpu,
        HashSet::from(["Architecture: x86_64", "CPU(s): 8"])
    );

    // Credentials and scripts never reach the wire.
    let raw = value.to_string();
    assert!(!raw.contains("secret"));
    assert!(!raw.contains("uname"));

    // Every leaf ran exactly once.
    assert_eq!(transport.calls_for("uname -r"), 1);
    assert_eq!(transport.calls_for("ls /tmp"), 1);
    assert_eq!(transport.calls_for("lscpu"), 1);
}

#[tokio::test(start_paused = true)]
async fn one_failing_leaf_fails_the_job_and_nothing_is_returned() {
    let transport = FakeTransport::new(&[
        ("uname -r", Respond::Lines(vec!["6.1.0"])),
        ("ls /tmp", Respond::AlwaysExit(2)),
        ("lscpu", Respond::Lines(vec!["Architecture: x86_64"])),
    ]);

    let job = job();
    let err = runner()
        .traverse(graph_for(&job), Arc::clone(&transport), &JobContext::background())
        .await
        .unwrap_err();

    assert!(matches!(err, CollectError::ScriptExit { status: 2 }));
}

#[tokio::test(start_paused = true)]
async fn cancelling_the_job_stops_every_worker() {
    let transport = FakeTransport::new(&[
        ("uname -r", Respond::BlockUntilCancelled),
        ("ls /tmp", Respond::BlockUntilCancelled),
        ("lscpu", Respond::BlockUntilCancelled),
    ]);

    let (handle, ctx) = JobContext::new();
    let job = job();
    let graph = graph_for(&job);
    let r = runner();

    let running = tokio::spawn({
        let transport = Arc::clone(&transport);
        async move { r.traverse(graph, transport, &ctx).await }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.cancel();

    let err = running.await.unwrap().unwrap_err();
    assert!(err.is_cancellation());
}

#[tokio::test(start_paused = true)]
async fn job_deadline_converts_to_a_permanent_failure() {
    let transport = FakeTransport::new(&[
        ("uname -r", Respond::BlockUntilCancelled),
        ("ls /tmp", Respond::BlockUntilCancelled),
        ("lscpu", Respond::BlockUntilCancelled),
    ]);

    let (_handle, ctx) = JobContext::with_timeout(Duration::from_millis(100));
    let job = job();
    let err = runner()
        .traverse(graph_for(&job), Arc::clone(&transport), &ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, CollectError::DeadlineExceeded));
}
