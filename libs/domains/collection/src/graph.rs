//! The collection graph: a declarative tree of nodes to execute.
//!
//! Nodes live in an arena (`Vec<Node>`) with index-based children, so a
//! job can hand out `NodeId`s to concurrent traversal workers while the
//! graph itself stays behind a plain `Arc`. Each node's output sits in a
//! `OnceLock`, which makes the write-at-most-once invariant structural
//! rather than conventional.
//!
//! Lifetime of a graph: assembled per job from a template + request,
//! mutated only through `Node::publish_output` during traversal,
//! serialized once at the end and handed to the store.

use crate::error::CollectError;
use crate::models::{HostConfig, TransportConfig};
use crate::processor::ProcessorChain;
use crate::CollectResult;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Buffer size of the lazy node sequence hand-off.
const NODE_BUFFER: usize = 100;

/// Shape of a node's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Grouping node; carries no script.
    Object,
    /// Leaf whose output is a single logical value.
    String,
    /// Leaf whose output is a list of values.
    Array,
}

/// Index of a node within its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Output captured by the eventually-successful execution attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeOutput {
    pub result: Vec<String>,
    pub stderr: Vec<String>,
}

/// A vertex in the collection graph.
#[derive(Debug)]
pub struct Node {
    pub id: String,
    pub node_type: NodeType,
    pub script: String,
    pub post_process: Option<String>,
    pub children: Vec<NodeId>,
    output: OnceLock<NodeOutput>,
}

impl Node {
    /// Leaves with a script run; object/empty-script nodes are no-ops.
    pub fn runnable(&self) -> bool {
        self.node_type != NodeType::Object && !self.script.is_empty()
    }

    /// Post-process chain tokens, in declaration order.
    pub fn post_process_tokens(&self) -> Vec<&str> {
        self.post_process
            .as_deref()
            .unwrap_or("")
            .split([' ', ','])
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// Record the node's output. Fails on a second write.
    pub fn publish_output(&self, output: NodeOutput) -> CollectResult<()> {
        self.output.set(output).map_err(|_| {
            CollectError::Internal(format!("output for node '{}' written twice", self.id))
        })
    }

    pub fn output(&self) -> Option<&NodeOutput> {
        self.output.get()
    }
}

fn valid_node_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Declarative node shape as it appears in template JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub post_process: Option<String>,
    #[serde(default)]
    pub children: Vec<NodeSpec>,
}

/// A graph template: transport defaults plus the `structure` root node.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphTemplate {
    #[serde(default)]
    pub version: Option<String>,
    pub remote_host: String,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub ssh_key_path: Option<String>,
    pub structure: NodeSpec,
}

impl GraphTemplate {
    pub fn from_json(data: &str) -> CollectResult<Self> {
        serde_json::from_str(data).map_err(|e| CollectError::Template(e.to_string()))
    }

    /// Load from disk. The template catalog is a file today; a service
    /// lookup keyed by script id is the intended replacement.
    pub fn from_file(path: &str) -> CollectResult<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| CollectError::Template(format!("failed to read {}: {}", path, e)))?;
        Self::from_json(&data)
    }
}

/// The full tree plus transport/host metadata and execution id for one run.
#[derive(Debug)]
pub struct Graph {
    pub transport: TransportConfig,
    pub host: HostConfig,
    pub execution_id: Uuid,
    nodes: Vec<Node>,
    root: NodeId,
}

impl Graph {
    /// Assemble a graph from a template structure.
    pub fn new(
        transport: TransportConfig,
        host: HostConfig,
        execution_id: Uuid,
        structure: NodeSpec,
    ) -> Self {
        let mut nodes = Vec::new();
        let root = Self::add_spec(&mut nodes, structure);
        Self {
            transport,
            host,
            execution_id,
            nodes,
            root,
        }
    }

    fn add_spec(nodes: &mut Vec<Node>, spec: NodeSpec) -> NodeId {
        let index = nodes.len();
        nodes.push(Node {
            id: spec.id,
            node_type: spec.node_type,
            script: spec.script,
            post_process: spec.post_process,
            children: Vec::new(),
            output: OnceLock::new(),
        });

        let mut children = Vec::with_capacity(spec.children.len());
        for child in spec.children {
            children.push(Self::add_spec(nodes, child));
        }
        nodes[index].children = children;

        NodeId(index)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth-first pre-order walk of the tree.
    pub fn preorder(&self) -> Preorder<'_> {
        Preorder {
            graph: self,
            stack: vec![self.root],
        }
    }

    /// Validate the tree. Fail-fast: the first violation aborts the load.
    pub fn validate(&self, chain: &ProcessorChain) -> CollectResult<()> {
        if self.nodes.is_empty() {
            return Err(CollectError::Validation("graph has no nodes".to_string()));
        }

        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut visited = vec![false; self.nodes.len()];

        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if visited[id.0] {
                return Err(CollectError::Validation(format!(
                    "node '{}' is reachable twice (cycle or shared subtree)",
                    self.node(id).id
                )));
            }
            visited[id.0] = true;

            let node = self.node(id);

            if !valid_node_id(&node.id) {
                return Err(CollectError::Validation(format!(
                    "invalid node id: {:?}",
                    node.id
                )));
            }
            if !seen_ids.insert(&node.id) {
                return Err(CollectError::Validation(format!(
                    "duplicate node id: '{}'",
                    node.id
                )));
            }

            match node.node_type {
                NodeType::Object => {
                    if !node.script.trim().is_empty() {
                        return Err(CollectError::Validation(format!(
                            "object node '{}' must not carry a script",
                            node.id
                        )));
                    }
                    if node.children.is_empty() {
                        return Err(CollectError::Validation(format!(
                            "object node '{}' has no children",
                            node.id
                        )));
                    }
                }
                NodeType::String | NodeType::Array => {
                    if node.script.trim().is_empty() {
                        return Err(CollectError::Validation(format!(
                            "leaf node '{}' has an empty script",
                            node.id
                        )));
                    }
                    if !node.children.is_empty() {
                        return Err(CollectError::Validation(format!(
                            "leaf node '{}' must not have children",
                            node.id
                        )));
                    }
                }
            }

            if let Some(output) = node.output() {
                for entry in output.result.iter().chain(output.stderr.iter()) {
                    if entry.trim().is_empty() {
                        return Err(CollectError::Validation(format!(
                            "node '{}' carries a blank output entry",
                            node.id
                        )));
                    }
                }
            }

            for token in node.post_process_tokens() {
                if !chain.contains(token) {
                    return Err(CollectError::UnknownProcessor(token.to_string()));
                }
            }

            stack.extend(node.children.iter().copied());
        }

        Ok(())
    }

    /// Start the lazy DFS pre-order sequence for this graph.
    ///
    /// A producer task feeds node ids into a bounded channel; any number
    /// of consumers drain it concurrently, each id delivered exactly once.
    /// Dropping every consumer (or calling `shutdown`) stops the producer.
    pub fn sequence(graph: &Arc<Graph>) -> NodeSequence {
        let (tx, rx) = mpsc::channel(NODE_BUFFER);
        let g = Arc::clone(graph);

        let producer = tokio::spawn(async move {
            let mut stack = vec![g.root()];
            while let Some(id) = stack.pop() {
                if tx.send(id).await.is_err() {
                    break; // close-on-drain
                }
                let node = g.node(id);
                stack.extend(node.children.iter().rev().copied());
            }
        });

        NodeSequence {
            rx: Arc::new(Mutex::new(rx)),
            producer: Arc::new(Mutex::new(Some(producer))),
        }
    }
}

/// Borrowing DFS pre-order iterator over node ids.
pub struct Preorder<'a> {
    graph: &'a Graph,
    stack: Vec<NodeId>,
}

impl Iterator for Preorder<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        let node = self.graph.node(id);
        self.stack.extend(node.children.iter().rev().copied());
        Some(id)
    }
}

/// Multi-consumer hand-off of the DFS pre-order walk.
///
/// Restartable only by producing a new sequence from the graph.
#[derive(Clone)]
pub struct NodeSequence {
    rx: Arc<Mutex<mpsc::Receiver<NodeId>>>,
    producer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl NodeSequence {
    /// Next undelivered node, `None` once the walk is exhausted.
    pub async fn next(&self) -> Option<NodeId> {
        self.rx.lock().await.recv().await
    }

    /// Stop the hand-off and wait for the producer task to finish.
    ///
    /// After this returns, the producer holds no reference to the graph.
    pub async fn shutdown(&self) {
        self.rx.lock().await.close();
        let handle = self.producer.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

// Wire format: { config, hostconfig, uuid, rootnode }, nodes rendered
// recursively with omit-if-empty and stderr under the "error" key.
// Scripts and post-process declarations never leave the process.

impl Serialize for Graph {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("config", &self.transport)?;
        map.serialize_entry("hostconfig", &self.host)?;
        map.serialize_entry("uuid", &self.execution_id.to_string())?;
        map.serialize_entry(
            "rootnode",
            &NodeView {
                graph: self,
                id: self.root,
            },
        )?;
        map.end()
    }
}

struct NodeView<'a> {
    graph: &'a Graph,
    id: NodeId,
}

impl Serialize for NodeView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let node = self.graph.node(self.id);
        let mut map = serializer.serialize_map(None)?;

        map.serialize_entry("id", &node.id)?;
        map.serialize_entry("type", &node.node_type)?;

        if !node.children.is_empty() {
            let children: Vec<NodeView> = node
                .children
                .iter()
                .map(|&id| NodeView {
                    graph: self.graph,
                    id,
                })
                .collect();
            map.serialize_entry("children", &children)?;
        }

        if let Some(output) = node.output() {
            if !output.result.is_empty() {
                map.serialize_entry("result", &output.result)?;
            }
            if !output.stderr.is_empty() {
                map.serialize_entry("error", &output.stderr)?;
            }
        }

        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
                { "id": "tmp-files", "type": "array", "script": "ls /tmp", "post_process": "trim split_lines" }
            ]
        }
    }"#;

    fn test_graph() -> Graph {
        let template = GraphTemplate::from_json(TEMPLATE).unwrap();
        let transport = TransportConfig {
            version: template.version.clone(),
            remote_host: template.remote_host.clone(),
            login: template.login.clone().unwrap_or_default(),
            password: template.password.clone().unwrap_or_default(),
            ssh_key_path: String::new(),
        };
        Graph::new(
            transport,
            HostConfig {
                customer_id: 1,
                host_id: 2,
                script_id: 3,
                ..Default::default()
            },
            Uuid::new_v4(),
            template.structure,
        )
    }

    #[test]
    fn test_template_parses() {
        let template = GraphTemplate::from_json(TEMPLATE).unwrap();
        assert_eq!(template.remote_host, "10.0.0.5:22");
        assert_eq!(template.structure.children.len(), 2);
        assert_eq!(template.structure.node_type, NodeType::Object);
    }

    #[test]
    fn test_template_rejects_malformed_json() {
        assert!(matches!(
            GraphTemplate::from_json("{not json"),
            Err(CollectError::Template(_))
        ));
    }

    #[test]
    fn test_preorder_matches_declaration_order() {
        let graph = test_graph();
        let ids: Vec<&str> = graph
            .preorder()
            .map(|id| graph.node(id).id.as_str())
            .collect();
        assert_eq!(ids, vec!["system", "kernel", "tmp-files"]);
    }

    #[test]
    fn test_validation_accepts_well_formed_graph() {
        let graph = test_graph();
        graph.validate(&ProcessorChain::new()).unwrap();
    }

    #[test]
    fn test_validation_rejects_duplicate_ids() {
        let mut template = GraphTemplate::from_json(TEMPLATE).unwrap();
        template.structure.children[1].id = "kernel".to_string();
        let graph = Graph::new(
            TransportConfig {
                version: None,
                remote_host: "h:22".into(),
                login: String::new(),
                password: String::new(),
                ssh_key_path: String::new(),
            },
            HostConfig::default(),
            Uuid::new_v4(),
            template.structure,
        );
        let err = graph.validate(&ProcessorChain::new()).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_validation_rejects_object_with_script() {
        let spec = NodeSpec {
            id: "root".into(),
            node_type: NodeType::Object,
            script: "echo no".into(),
            post_process: None,
            children: vec![NodeSpec {
                id: "leaf".into(),
                node_type: NodeType::String,
                script: "uname".into(),
                post_process: None,
                children: vec![],
            }],
        };
        let graph = Graph::new(
            TransportConfig {
                version: None,
                remote_host: "h:22".into(),
                login: String::new(),
                password: String::new(),
                ssh_key_path: String::new(),
            },
            HostConfig::default(),
            Uuid::new_v4(),
            spec,
        );
        let err = graph.validate(&ProcessorChain::new()).unwrap_err();
        assert!(err.to_string().contains("script"));
    }

    #[test]
    fn test_validation_rejects_leaf_without_script() {
        let spec = NodeSpec {
            id: "leaf".into(),
            node_type: NodeType::Array,
            script: "  ".into(),
            post_process: None,
            children: vec![],
        };
        let graph = Graph::new(
            TransportConfig {
                version: None,
                remote_host: "h:22".into(),
                login: String::new(),
                password: String::new(),
                ssh_key_path: String::new(),
            },
            HostConfig::default(),
            Uuid::new_v4(),
            spec,
        );
        assert!(graph.validate(&ProcessorChain::new()).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_node_id() {
        let spec = NodeSpec {
            id: "bad id!".into(),
            node_type: NodeType::String,
            script: "uname".into(),
            post_process: None,
            children: vec![],
        };
        let graph = Graph::new(
            TransportConfig {
                version: None,
                remote_host: "h:22".into(),
                login: String::new(),
                password: String::new(),
                ssh_key_path: String::new(),
            },
            HostConfig::default(),
            Uuid::new_v4(),
            spec,
        );
        let err = graph.validate(&ProcessorChain::new()).unwrap_err();
        assert!(err.to_string().contains("invalid node id"));
    }

    #[test]
    fn test_validation_rejects_unknown_post_processor() {
        let mut template = GraphTemplate::from_json(TEMPLATE).unwrap();
        template.structure.children[0].post_process = Some("upper".to_string());
        let graph = Graph::new(
            TransportConfig {
                version: None,
                remote_host: "h:22".into(),
                login: String::new(),
                password: String::new(),
                ssh_key_path: String::new(),
            },
            HostConfig::default(),
            Uuid::new_v4(),
            template.structure,
        );
        let err = graph.validate(&ProcessorChain::new()).unwrap_err();
        assert!(matches!(err, CollectError::UnknownProcessor(name) if name == "upper"));
    }

    #[test]
    fn test_publish_output_is_write_once() {
        let graph = test_graph();
        let kernel = graph.preorder().nth(1).unwrap();

        graph
            .node(kernel)
            .publish_output(NodeOutput {
                result: vec!["6.1.0".to_string()],
                stderr: vec![],
            })
            .unwrap();

        let second = graph.node(kernel).publish_output(NodeOutput::default());
        assert!(second.is_err());

        let output = graph.node(kernel).output().unwrap();
        assert_eq!(output.result, vec!["6.1.0"]);
    }

    #[tokio::test]
    async fn test_sequence_delivers_each_node_exactly_once() {
        let graph = Arc::new(test_graph());
        let sequence = Graph::sequence(&graph);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..3 {
            let seq = sequence.clone();
            tasks.spawn(async move {
                let mut got = Vec::new();
                while let Some(id) = seq.next().await {
                    got.push(id);
                }
                got
            });
        }

        let mut all: Vec<NodeId> = Vec::new();
        while let Some(res) = tasks.join_next().await {
            all.extend(res.unwrap());
        }
        sequence.shutdown().await;

        assert_eq!(all.len(), graph.len());
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), graph.len());
    }

    #[tokio::test]
    async fn test_sequence_shutdown_releases_graph() {
        let graph = Arc::new(test_graph());
        let sequence = Graph::sequence(&graph);

        // Drain nothing; shut the hand-off down early.
        sequence.shutdown().await;
        drop(sequence);

        let graph = Arc::try_unwrap(graph);
        assert!(graph.is_ok());
    }

    #[test]
    fn test_wire_format_shape() {
        let graph = test_graph();
        let kernel = graph.preorder().nth(1).unwrap();
        graph
            .node(kernel)
            .publish_output(NodeOutput {
                result: vec!["6.1.0".to_string()],
                stderr: vec!["warning: locale".to_string()],
            })
            .unwrap();

        let value = serde_json::to_value(&graph).unwrap();

        assert_eq!(value["config"]["remote_host"], "10.0.0.5:22");
        assert_eq!(value["hostconfig"]["hostId"], 2);
        assert_eq!(
            value["uuid"].as_str().unwrap(),
            graph.execution_id.to_string()
        );

        let root = &value["rootnode"];
        assert_eq!(root["id"], "system");
        assert_eq!(root["type"], "object");

        let kernel_node = &root["children"][0];
        assert_eq!(kernel_node["id"], "kernel");
        assert_eq!(kernel_node["result"][0], "6.1.0");
        assert_eq!(kernel_node["error"][0], "warning: locale");

        // Scripts, credentials and unpopulated outputs stay internal.
        let raw = value.to_string();
        assert!(!raw.contains("uname"));
        assert!(!raw.contains("secret"));
        assert!(root["children"][1].get("result").is_none());
    }
}
