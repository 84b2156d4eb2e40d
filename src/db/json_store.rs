

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::models::{Attribute, NodeRecord};
use super::store::{NodeStore, StoreError};


/// Reads mind-map documents exported as a JSON array.
///
/// Documents keep the field names of the source collection (`_id`, `nodeid`,
/// `richText`, `parentID`, `children`, `linkedNodes`, ...). Relation fields are
/// loosely typed there: a reference may be a plain id, an `{"$oid": ..}`
/// wrapper, an embedded sub-document, or a scalar where a list is expected.
/// All of that is normalized here into [`NodeRecord`].
pub struct JsonNodeStore {
    path: PathBuf,
}

impl JsonNodeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl NodeStore for JsonNodeStore {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, StoreError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            StoreError::Unavailable(format!("{}: {}", self.path.display(), e))
        })?;
        let value: Value = serde_json::from_str(&raw)?;
        let records = normalize_documents(value)?;

        info!("Loaded {} node documents from {}", records.len(), self.path.display());
        Ok(records)
    }

    fn name(&self) -> &str {
        "json"
    }
}


pub fn normalize_documents(value: Value) -> Result<Vec<NodeRecord>, StoreError> {
    let Value::Array(documents) = value else {
        return Err(StoreError::Malformed("expected a JSON array of node documents".to_string()));
    };

    let mut docs: Vec<(String, Map<String, Value>)> = Vec::with_capacity(documents.len());
    let mut aliases: HashMap<String, String> = HashMap::new();

    for (position, doc) in documents.into_iter().enumerate() {
        let Value::Object(doc) = doc else {
            warn!("Skipping non-object document at position {}", position);
            continue;
        };

        let object_id = doc.get("_id").and_then(reference_key);
        let node_id = doc
            .get("nodeid")
            .and_then(reference_key)
            .or_else(|| object_id.clone());

        let Some(node_id) = node_id else {
            warn!("Skipping document at position {} without `_id` or `nodeid`", position);
            continue;
        };

        if let Some(object_id) = object_id {
            aliases.insert(object_id, node_id.clone());
        }
        aliases.insert(node_id.clone(), node_id.clone());
        docs.push((node_id, doc));
    }

    let resolve = |reference: String| aliases.get(&reference).cloned().unwrap_or(reference);

    let records = docs
        .into_iter()
        .map(|(id, doc)| {
            let embedding = parse_embedding(&id, doc.get("embedding"));
            NodeRecord {
                text: text_field(&doc, "text"),
                longform_text: text_field(&doc, "richText"),
                notes: text_field(&doc, "notes"),
                links: as_list(doc.get("links"))
                    .into_iter()
                    .filter_map(scalar_string)
                    .collect(),
                attributes: as_list(doc.get("attributes"))
                    .into_iter()
                    .filter_map(parse_attribute)
                    .collect(),
                embedding,
                parent_id: doc.get("parentID").and_then(reference_key).map(&resolve),
                children_ids: references(doc.get("children")).into_iter().map(&resolve).collect(),
                linked_ids: references(doc.get("linkedNodes")).into_iter().map(&resolve).collect(),
                id,
            }
        })
        .collect();

    Ok(records)
}


/// Extracts the id a reference points at, whatever shape it arrived in.
fn reference_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => ["$oid", "_id", "nodeid", "id"]
            .iter()
            .find_map(|key| map.get(*key).and_then(reference_key)),
        _ => None,
    }
}

fn references(value: Option<&Value>) -> Vec<String> {
    as_list(value).into_iter().filter_map(reference_key).collect()
}

fn as_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn text_field(doc: &Map<String, Value>, key: &str) -> String {
    doc.get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn parse_attribute(value: &Value) -> Option<Attribute> {
    let map = value.as_object()?;
    let name = map.get("name").and_then(Value::as_str)?.trim();
    let value = map.get("value").and_then(scalar_string)?;
    Some(Attribute {
        name: name.to_string(),
        value: value.trim().to_string(),
    })
}

fn parse_embedding(id: &str, value: Option<&Value>) -> Option<Vec<f32>> {
    let items = value?.as_array()?;
    if items.is_empty() {
        return None;
    }

    let parsed: Option<Vec<f32>> = items.iter().map(|v| v.as_f64().map(|f| f as f32)).collect();
    if parsed.is_none() {
        debug!("Ignoring non-numeric embedding on node {}", id);
    }
    parsed
}
