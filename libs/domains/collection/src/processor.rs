//! Post-processor chain for leaf output.
//!
//! A registry of named transformations over the captured stdout lines.
//! Chains are declared per node (`post_process`) and applied in order,
//! each step consuming the previous step's output. An unknown name fails
//! the whole chain before any step runs.

use crate::error::CollectError;
use crate::graph::NodeType;
use crate::CollectResult;
use std::collections::HashMap;

pub const PROCESSOR_TRIM: &str = "trim";
pub const PROCESSOR_SPLIT_LINES: &str = "split_lines";
pub const PROCESSOR_KEY_VALUE: &str = "key_value";
pub const PROCESSOR_KEY_VALUE_JSON: &str = "key_value_json";

/// A named transformation over a slice of output lines.
pub trait PostProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Apply the processor's logic to the input lines.
    fn process(&self, lines: Vec<String>, node_type: NodeType) -> CollectResult<Vec<String>>;
}

/// Registry of processors, applied as declared chains.
pub struct ProcessorChain {
    processors: HashMap<&'static str, Box<dyn PostProcessor>>,
}

impl ProcessorChain {
    /// Registry with the built-in processors.
    pub fn new() -> Self {
        let mut chain = Self {
            processors: HashMap::new(),
        };
        chain.register(Box::new(TrimProcessor));
        chain.register(Box::new(SplitLinesProcessor));
        chain.register(Box::new(KeyValueProcessor));
        chain.register(Box::new(KeyValueJsonProcessor));
        chain
    }

    /// Add a processor to the registry (replaces an existing name).
    pub fn register(&mut self, processor: Box<dyn PostProcessor>) {
        self.processors.insert(processor.name(), processor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processors.contains_key(name)
    }

    /// Apply the named processors to the input lines in order.
    ///
    /// Every name is resolved before the first step runs, so a typo in the
    /// chain cannot leave half-processed output behind. Empty input
    /// short-circuits to empty output.
    pub fn process(
        &self,
        lines: Vec<String>,
        node_type: NodeType,
        names: &[&str],
    ) -> CollectResult<Vec<String>> {
        for name in names {
            if !self.processors.contains_key(*name) {
                return Err(CollectError::UnknownProcessor((*name).to_string()));
            }
        }

        if lines.is_empty() {
            return Ok(lines);
        }

        let mut result = lines;
        for name in names {
            let processor = &self.processors[*name];
            result = processor.process(result, node_type)?;
        }
        Ok(result)
    }
}

impl Default for ProcessorChain {
    fn default() -> Self {
        Self::new()
    }
}

// Processor implementations

/// Trims whitespace from each line; count and order preserved.
struct TrimProcessor;

impl PostProcessor for TrimProcessor {
    fn name(&self) -> &'static str {
        PROCESSOR_TRIM
    }

    fn process(&self, lines: Vec<String>, _node_type: NodeType) -> CollectResult<Vec<String>> {
        Ok(lines.into_iter().map(|l| l.trim().to_string()).collect())
    }
}

/// Splits each line into whitespace-separated fields for array nodes.
struct SplitLinesProcessor;

impl PostProcessor for SplitLinesProcessor {
    fn name(&self) -> &'static str {
        PROCESSOR_SPLIT_LINES
    }

    fn process(&self, lines: Vec<String>, node_type: NodeType) -> CollectResult<Vec<String>> {
        if node_type != NodeType::Array {
            return Ok(lines);
        }
        let mut result = Vec::with_capacity(lines.len() * 3);
        for line in &lines {
            result.extend(line.split_whitespace().map(str::to_string));
        }
        Ok(result)
    }
}

/// Parse `key:value` lines into a map.
///
/// A single input line with embedded newlines is split first. Lines
/// without a separator are dropped; an empty key is an error; the last
/// write wins per key.
fn parse_key_value_lines(lines: &[String]) -> CollectResult<HashMap<String, String>> {
    let split_single;
    let lines: &[String] = if lines.len() == 1 && lines[0].trim().contains('\n') {
        split_single = lines[0]
            .trim()
            .split('\n')
            .map(str::to_string)
            .collect::<Vec<_>>();
        &split_single
    } else {
        lines
    };

    let mut kv = HashMap::new();
    for line in lines {
        let Some((key, value)) = line.trim().split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(CollectError::Processor {
                name: PROCESSOR_KEY_VALUE.to_string(),
                message: format!("empty key in line: {:?}", line),
            });
        }
        kv.insert(key.to_string(), value.trim().to_string());
    }
    Ok(kv)
}

/// Renders `key:value` input as one `"k: v"` string per pair.
///
/// Pair order is unspecified; consumers must compare as sets.
struct KeyValueProcessor;

impl PostProcessor for KeyValueProcessor {
    fn name(&self) -> &'static str {
        PROCESSOR_KEY_VALUE
    }

    fn process(&self, lines: Vec<String>, node_type: NodeType) -> CollectResult<Vec<String>> {
        if node_type != NodeType::String || lines.is_empty() {
            return Ok(lines);
        }

        let kv = parse_key_value_lines(&lines)?;
        Ok(kv
            .into_iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect())
    }
}

/// Renders `key:value` input as a single JSON object string.
struct KeyValueJsonProcessor;

impl PostProcessor for KeyValueJsonProcessor {
    fn name(&self) -> &'static str {
        PROCESSOR_KEY_VALUE_JSON
    }

    fn process(&self, lines: Vec<String>, node_type: NodeType) -> CollectResult<Vec<String>> {
        if node_type != NodeType::String || lines.is_empty() {
            return Ok(lines);
        }

        let kv = parse_key_value_lines(&lines)?;
        let rendered = serde_json::to_string(&kv).map_err(|e| CollectError::Processor {
            name: PROCESSOR_KEY_VALUE_JSON.to_string(),
            message: e.to_string(),
        })?;
        Ok(vec![rendered])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn as_set(lines: &[String]) -> HashSet<&str> {
        lines.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_trim() {
        let chain = ProcessorChain::new();
        let input = vec!["  hello    ".to_string(), " world ".to_string()];
        let result = chain
            .process(input, NodeType::String, &[PROCESSOR_TRIM])
            .unwrap();
        assert_eq!(result, vec!["hello", "world"]);
    }

    #[test]
    fn test_trim_is_idempotent() {
        let chain = ProcessorChain::new();
        let input = vec!["  a  ".to_string(), "b".to_string()];
        let once = chain
            .process(input, NodeType::Array, &[PROCESSOR_TRIM])
            .unwrap();
        let twice = chain
            .process(once.clone(), NodeType::Array, &[PROCESSOR_TRIM])
            .unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_split_lines_on_array_nodes() {
        let chain = ProcessorChain::new();
        let input = vec!["a b  c".to_string(), "d".to_string()];
        let result = chain
            .process(input, NodeType::Array, &[PROCESSOR_SPLIT_LINES])
            .unwrap();
        assert_eq!(result, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_split_lines_passes_through_other_types() {
        let chain = ProcessorChain::new();
        let input = vec!["a b c".to_string()];
        let result = chain
            .process(input.clone(), NodeType::String, &[PROCESSOR_SPLIT_LINES])
            .unwrap();
        assert_eq!(result, input);
    }

    #[test]
    fn test_key_value_pairs() {
        let chain = ProcessorChain::new();
        let input = vec![" key1: value1 ".to_string(), " key2: value2 ".to_string()];
        let result = chain
            .process(input, NodeType::String, &[PROCESSOR_KEY_VALUE])
            .unwrap();
        // Pair order is unspecified, compare as a set.
        assert_eq!(
            as_set(&result),
            HashSet::from(["key1: value1", "key2: value2"])
        );
    }

    #[test]
    fn test_key_value_single_multiline_input() {
        let chain = ProcessorChain::new();
        let input = vec!["  key1: value1\n    key2: value2  ".to_string()];
        let result = chain
            .process(input, NodeType::String, &[PROCESSOR_TRIM, PROCESSOR_KEY_VALUE])
            .unwrap();
        assert_eq!(
            as_set(&result),
            HashSet::from(["key1: value1", "key2: value2"])
        );
    }

    #[test]
    fn test_key_value_drops_malformed_lines() {
        let chain = ProcessorChain::new();
        let input = vec!["no separator here".to_string(), "k: v".to_string()];
        let result = chain
            .process(input, NodeType::String, &[PROCESSOR_KEY_VALUE])
            .unwrap();
        assert_eq!(result, vec!["k: v"]);
    }

    #[test]
    fn test_key_value_rejects_empty_keys() {
        let chain = ProcessorChain::new();
        let input = vec![" : value".to_string()];
        let err = chain
            .process(input, NodeType::String, &[PROCESSOR_KEY_VALUE])
            .unwrap_err();
        assert!(matches!(err, CollectError::Processor { .. }));
    }

    #[test]
    fn test_key_value_last_write_wins() {
        let chain = ProcessorChain::new();
        let input = vec!["k: first".to_string(), "k: second".to_string()];
        let result = chain
            .process(input, NodeType::String, &[PROCESSOR_KEY_VALUE])
            .unwrap();
        assert_eq!(result, vec!["k: second"]);
    }

    #[test]
    fn test_key_value_idempotent_up_to_key_set() {
        let chain = ProcessorChain::new();
        let input = vec!["k1: v1".to_string(), "k2: v2".to_string()];
        let once = chain
            .process(input, NodeType::String, &[PROCESSOR_KEY_VALUE])
            .unwrap();
        let twice = chain
            .process(once.clone(), NodeType::String, &[PROCESSOR_KEY_VALUE])
            .unwrap();
        assert_eq!(as_set(&once), as_set(&twice));
    }

    #[test]
    fn test_key_value_passes_through_array_nodes() {
        let chain = ProcessorChain::new();
        let input = vec!["k: v".to_string()];
        let result = chain
            .process(input.clone(), NodeType::Array, &[PROCESSOR_KEY_VALUE])
            .unwrap();
        assert_eq!(result, input);
    }

    #[test]
    fn test_key_value_json_renders_object() {
        let chain = ProcessorChain::new();
        let input = vec!["k1: v1".to_string(), "k2: v2".to_string()];
        let result = chain
            .process(input, NodeType::String, &[PROCESSOR_KEY_VALUE_JSON])
            .unwrap();
        assert_eq!(result.len(), 1);

        let parsed: HashMap<String, String> = serde_json::from_str(&result[0]).unwrap();
        assert_eq!(parsed["k1"], "v1");
        assert_eq!(parsed["k2"], "v2");
    }

    #[test]
    fn test_unknown_processor_fails_before_any_step() {
        let chain = ProcessorChain::new();
        let input = vec!["  padded  ".to_string()];
        let err = chain
            .process(
                input,
                NodeType::String,
                &[PROCESSOR_TRIM, "not_a_processor"],
            )
            .unwrap_err();
        assert!(matches!(err, CollectError::UnknownProcessor(name) if name == "not_a_processor"));
    }

    #[test]
    fn test_empty_input_short_circuits() {
        let chain = ProcessorChain::new();
        let result = chain
            .process(vec![], NodeType::String, &[PROCESSOR_KEY_VALUE])
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_chain_order_is_significant() {
        let chain = ProcessorChain::new();
        // trim first, then key_value: whitespace around keys disappears
        let input = vec!["  k : v  ".to_string()];
        let result = chain
            .process(input, NodeType::String, &[PROCESSOR_TRIM, PROCESSOR_KEY_VALUE])
            .unwrap();
        assert_eq!(result, vec!["k: v"]);
    }
}
