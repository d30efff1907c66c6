//! Text utility nodes.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::flow::action::{NodeBehavior, NodeCtx, NodeOutput};
use crate::flow::registry::BehaviorRegistry;

/// Render a JSON value the way a text node shows it
fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Emits its configured `value`.
pub struct TextNode;

#[async_trait]
impl NodeBehavior for TextNode {
    fn name(&self) -> &str {
        "text"
    }

    async fn process(&self, ctx: &NodeCtx) -> anyhow::Result<NodeOutput> {
        let value: String = ctx.config("value")?;
        Ok(NodeOutput::value(value))
    }

    fn config_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "required": ["value"],
            "properties": { "value": { "type": "string" } }
        }))
    }
}

/// Joins every connected input with an optional `separator`.
pub struct ConcatNode;

#[async_trait]
impl NodeBehavior for ConcatNode {
    fn name(&self) -> &str {
        "concat"
    }

    async fn process(&self, ctx: &NodeCtx) -> anyhow::Result<NodeOutput> {
        let separator: String = ctx.config_opt("separator")?.unwrap_or_default();
        let parts: Vec<String> = ctx.input_values().into_iter().flatten().map(as_text).collect();
        Ok(NodeOutput::value(parts.join(&separator)))
    }
}

/// Uppercases its first input.
pub struct UppercaseNode;

#[async_trait]
impl NodeBehavior for UppercaseNode {
    fn name(&self) -> &str {
        "uppercase"
    }

    async fn process(&self, ctx: &NodeCtx) -> anyhow::Result<NodeOutput> {
        let input = ctx
            .first_input()
            .ok_or_else(|| anyhow::anyhow!("uppercase needs a connected input"))?;
        Ok(NodeOutput::value(as_text(input).to_uppercase()))
    }
}

/// Fills `{{input}}` (first input) and `{{inputN}}` (N-th input, 1-based)
/// placeholders of the configured `template`. Missing inputs render empty.
pub struct TemplateNode;

#[async_trait]
impl NodeBehavior for TemplateNode {
    fn name(&self) -> &str {
        "template"
    }

    async fn process(&self, ctx: &NodeCtx) -> anyhow::Result<NodeOutput> {
        let mut rendered: String = ctx.config("template")?;
        let inputs = ctx.input_values();

        // Highest index first so {{input1}} never clobbers {{input10}}
        for (idx, value) in inputs.iter().enumerate().rev() {
            let text = value.map(as_text).unwrap_or_default();
            rendered = rendered.replace(&format!("{{{{input{}}}}}", idx + 1), &text);
        }
        let first = inputs.first().copied().flatten().map(as_text).unwrap_or_default();
        rendered = rendered.replace("{{input}}", &first);

        Ok(NodeOutput::value(rendered))
    }

    fn config_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "required": ["template"],
            "properties": { "template": { "type": "string" } }
        }))
    }
}

/// Splits its first input once at `delimiter`, sending the head to the first
/// output socket and the tail to the second. Without a delimiter match only
/// the head socket gets a value.
pub struct SplitNode;

#[async_trait]
impl NodeBehavior for SplitNode {
    fn name(&self) -> &str {
        "split"
    }

    async fn process(&self, ctx: &NodeCtx) -> anyhow::Result<NodeOutput> {
        let delimiter: String = ctx.config("delimiter")?;
        let input = ctx.first_input().map(as_text).unwrap_or_default();

        let mut outputs = ctx.node.outputs().map(|s| s.id);
        let head_socket = outputs
            .next()
            .ok_or_else(|| anyhow::anyhow!("split needs at least one output socket"))?;
        let tail_socket = outputs.next();

        let mut entries = Vec::with_capacity(2);
        match input.split_once(delimiter.as_str()) {
            Some((head, tail)) => {
                entries.push((head_socket, head.to_string()));
                if let Some(tail_socket) = tail_socket {
                    entries.push((tail_socket, tail.to_string()));
                }
            }
            None => entries.push((head_socket, input)),
        }
        Ok(NodeOutput::sockets(entries))
    }

    fn config_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "required": ["delimiter"],
            "properties": { "delimiter": { "type": "string", "minLength": 1 } }
        }))
    }
}

/// Register every text node
pub fn register_text_nodes(registry: &BehaviorRegistry) {
    registry.register(Arc::new(TextNode));
    registry.register(Arc::new(ConcatNode));
    registry.register(Arc::new(UppercaseNode));
    registry.register(Arc::new(TemplateNode));
    registry.register(Arc::new(SplitNode));
}
