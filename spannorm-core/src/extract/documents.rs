use crate::attributes::{Attributes, nest};
use crate::error::{CoreResult, SpanNormError};
use crate::model::NodeWithScore;
use crate::payload::Payload;
use crate::serialize::safe_json_dumps;
use crate::telemetry::keys;

/// `{prefix}.N.document.*` for scored nodes.
pub fn nodes(prefix: &str, nodes: &[NodeWithScore]) -> Attributes {
    let mut attrs = Attributes::new();
    for (i, node) in nodes.iter().enumerate() {
        let mut doc = Attributes::new();
        doc.insert(keys::DOCUMENT_ID.into(), node.id.as_str().into());
        if let Some(content) = node.content.as_deref().filter(|c| !c.is_empty()) {
            doc.insert(keys::DOCUMENT_CONTENT.into(), content.into());
        }
        if let Some(score) = node.score {
            doc.insert(keys::DOCUMENT_SCORE.into(), score.into());
        }
        if node.metadata.is_truthy() {
            doc.insert(keys::DOCUMENT_METADATA.into(), safe_json_dumps(&node.metadata).into());
        }
        attrs.extend(nest(prefix, i, doc));
    }
    attrs
}

/// `retrieval.documents.N.*` from serialized documents (`page_content`,
/// `metadata`).
pub fn serialized_documents(documents: &Payload) -> CoreResult<Attributes> {
    let items = documents.as_list().ok_or_else(|| {
        SpanNormError::extraction("retrieval_documents", format!("expected list, found {}", documents.type_name()))
    })?;
    let mut attrs = Attributes::new();
    for (i, document) in items.iter().enumerate() {
        let mut doc = Attributes::new();
        if let Some(content) = document.get("page_content") {
            let text = content.as_str().ok_or_else(|| {
                SpanNormError::extraction("retrieval_documents", "page_content is not a string")
            })?;
            if !text.is_empty() {
                doc.insert(keys::DOCUMENT_CONTENT.into(), text.into());
            }
        }
        if let Some(metadata) = document.get("metadata").filter(|m| m.is_truthy()) {
            doc.insert(keys::DOCUMENT_METADATA.into(), safe_json_dumps(metadata).into());
        }
        attrs.extend(nest(keys::RETRIEVAL_DOCUMENTS, i, doc));
    }
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nodes_flatten_with_optional_fields() {
        let list = vec![
            NodeWithScore {
                id: "n1".into(),
                content: Some("Paris is the capital.".into()),
                score: Some(0.9),
                metadata: Payload::from(json!({"source": "wiki"})),
            },
            NodeWithScore {
                id: "n2".into(),
                content: None,
                score: None,
                metadata: Payload::Null,
            },
        ];
        let attrs = nodes(keys::RETRIEVAL_DOCUMENTS, &list);
        assert_eq!(attrs.get("retrieval.documents.0.document.id").and_then(|v| v.as_str()), Some("n1"));
        assert_eq!(attrs.get("retrieval.documents.0.document.score").and_then(|v| v.as_f64()), Some(0.9));
        assert_eq!(
            attrs.get("retrieval.documents.0.document.metadata").and_then(|v| v.as_str()),
            Some(r#"{"source": "wiki"}"#)
        );
        assert!(attrs.contains_key("retrieval.documents.1.document.id"));
        assert!(!attrs.contains_key("retrieval.documents.1.document.score"));
    }

    #[test]
    fn serialized_documents_read_page_content() {
        let docs = Payload::from(json!([{"page_content": "a", "metadata": {"p": 1}}, {"page_content": "b"}]));
        let attrs = serialized_documents(&docs).unwrap();
        assert_eq!(attrs.get("retrieval.documents.1.document.content").and_then(|v| v.as_str()), Some("b"));
        assert!(serialized_documents(&Payload::from("x")).is_err());
    }
}
