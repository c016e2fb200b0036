//! Record types and identifier resolution.
//!
//! Business records are opaque JSON objects owned by module code outside the
//! engine. The engine only needs one thing from them: a stable identifier,
//! which is resolved by walking an ordered list of candidate fields.

use crate::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Origin of a record snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Read from the local store
    Local,
    /// Read from the remote store
    Remote,
}

/// Ordered list of fields consulted to resolve a record identifier.
///
/// The first field holding a usable value wins. Null, empty strings and
/// booleans are skipped; numbers are rendered in decimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifierChain {
    fields: &'static [&'static str],
}

impl IdentifierChain {
    /// `id` → `numeroRegistro` → `registroId` → `gastoId`.
    pub const STANDARD: IdentifierChain = IdentifierChain {
        fields: &["id", "numeroRegistro", "registroId", "gastoId"],
    };

    /// Create a chain over the given fields, in priority order.
    pub const fn new(fields: &'static [&'static str]) -> Self {
        Self { fields }
    }

    /// Fields in the order they are consulted.
    pub fn fields(&self) -> &'static [&'static str] {
        self.fields
    }

    /// Resolve the identifier of a record body.
    pub fn resolve(&self, body: &Value) -> Option<RecordId> {
        self.fields
            .iter()
            .find_map(|field| body.get(field).and_then(identifier_text))
    }

    /// Resolve the identifier of a remote document, falling back to the
    /// document key when no body field yields one.
    pub fn resolve_remote(&self, body: &Value, doc_id: &str) -> Option<RecordId> {
        self.resolve(body).or_else(|| {
            let doc_id = doc_id.trim();
            (!doc_id.is_empty()).then(|| doc_id.to_string())
        })
    }
}

fn identifier_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A business record as seen by the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Resolved identifier, the sole reconciliation key
    pub id: RecordId,
    /// Which side this snapshot was read from
    pub origin: Origin,
    /// The untouched business payload
    pub body: Value,
}

impl Record {
    /// Build a local-side record, resolving its identifier.
    ///
    /// Returns `None` when the body carries no usable identifier.
    pub fn local(body: Value, chain: IdentifierChain) -> Option<Self> {
        let id = chain.resolve(&body)?;
        Some(Self {
            id,
            origin: Origin::Local,
            body,
        })
    }

    /// Build a remote-side record, resolving its identifier with the
    /// document key as last resort.
    pub fn remote(body: Value, doc_id: &str, chain: IdentifierChain) -> Option<Self> {
        let id = chain.resolve_remote(&body, doc_id)?;
        Some(Self {
            id,
            origin: Origin::Remote,
            body,
        })
    }

    /// Read a string field from the body.
    pub fn field_str(&self, field: &str) -> Option<&str> {
        self.body.get(field).and_then(Value::as_str)
    }

    /// The tenant the body is scoped to, if any.
    pub fn tenant_id(&self) -> Option<&str> {
        self.field_str("tenantId")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolve_prefers_explicit_id() {
        let body = json!({"id": "A-1", "numeroRegistro": "2500001"});
        assert_eq!(IdentifierChain::STANDARD.resolve(&body), Some("A-1".into()));
    }

    #[test]
    fn resolve_walks_chain_in_order() {
        let chain = IdentifierChain::STANDARD;

        let body = json!({"numeroRegistro": "2500001", "registroId": "R-9"});
        assert_eq!(chain.resolve(&body), Some("2500001".into()));

        let body = json!({"registroId": "R-9", "gastoId": "G-3"});
        assert_eq!(chain.resolve(&body), Some("R-9".into()));

        let body = json!({"gastoId": 77});
        assert_eq!(chain.resolve(&body), Some("77".into()));
    }

    #[test]
    fn resolve_skips_unusable_values() {
        let body = json!({"id": "", "numeroRegistro": null, "registroId": false, "gastoId": "G-1"});
        assert_eq!(IdentifierChain::STANDARD.resolve(&body), Some("G-1".into()));

        let body = json!({"nombre": "sin id"});
        assert_eq!(IdentifierChain::STANDARD.resolve(&body), None);
    }

    #[test]
    fn remote_falls_back_to_document_key() {
        let chain = IdentifierChain::STANDARD;
        let body = json!({"monto": 100});

        let record = Record::remote(body.clone(), "doc-5", chain).unwrap();
        assert_eq!(record.id, "doc-5");
        assert_eq!(record.origin, Origin::Remote);

        assert!(Record::local(body, chain).is_none());
    }

    #[test]
    fn body_id_wins_over_document_key() {
        let body = json!({"id": "7", "tipoGasto": "casetas"});
        let record = Record::remote(body, "gasto_7", IdentifierChain::STANDARD).unwrap();
        assert_eq!(record.id, "7");
    }

    #[test]
    fn custom_chain() {
        let chain = IdentifierChain::new(&["folio", "id"]);
        let body = json!({"id": "x", "folio": "F-10"});
        assert_eq!(chain.resolve(&body), Some("F-10".into()));
        assert_eq!(chain.fields(), &["folio", "id"]);
    }

    #[test]
    fn tenant_accessor() {
        let record = Record::local(json!({"id": "1", "tenantId": "acme"}), IdentifierChain::STANDARD)
            .unwrap();
        assert_eq!(record.tenant_id(), Some("acme"));
    }
}
