//! Business modules and their fixed storage layout.
//!
//! The set of modules is closed: every module has a wire name (also its
//! remote collection name), a list of flat local keys, optionally a section of
//! the shared local document, and an identifier chain.

use crate::record::IdentifierChain;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Local key of the shared document holding sub-collections for
/// logistics, traffic and billing.
pub const SHARED_DOCUMENT_KEY: &str = "erp_shared_data";

/// A business module participating in reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Module {
    #[serde(rename = "logistica")]
    Logistics,
    #[serde(rename = "trafico")]
    Traffic,
    #[serde(rename = "facturacion")]
    Billing,
    #[serde(rename = "operadores")]
    Operators,
    #[serde(rename = "diesel")]
    Diesel,
    #[serde(rename = "mantenimiento")]
    Maintenance,
    #[serde(rename = "tesoreria")]
    Treasury,
    #[serde(rename = "cxc")]
    Receivables,
    #[serde(rename = "cxp")]
    Payables,
    #[serde(rename = "inventario")]
    Inventory,
}

/// Where a module writes records in the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTarget {
    /// Append to a flat list under this key
    Flat(&'static str),
    /// Insert into `erp_shared_data[section][id]`
    SharedSection(&'static str),
}

impl Module {
    /// All modules, in the order a full pass visits them.
    pub const ALL: [Module; 10] = [
        Module::Logistics,
        Module::Traffic,
        Module::Billing,
        Module::Operators,
        Module::Diesel,
        Module::Maintenance,
        Module::Treasury,
        Module::Receivables,
        Module::Payables,
        Module::Inventory,
    ];

    /// Wire name, also used as the remote collection name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Logistics => "logistica",
            Module::Traffic => "trafico",
            Module::Billing => "facturacion",
            Module::Operators => "operadores",
            Module::Diesel => "diesel",
            Module::Maintenance => "mantenimiento",
            Module::Treasury => "tesoreria",
            Module::Receivables => "cxc",
            Module::Payables => "cxp",
            Module::Inventory => "inventario",
        }
    }

    /// Flat local keys read for this module.
    pub fn flat_keys(&self) -> &'static [&'static str] {
        match self {
            Module::Logistics => &["erp_logistica"],
            Module::Traffic => &["erp_trafico"],
            Module::Billing => &["erp_facturacion"],
            Module::Operators => &["erp_operadores_gastos", "erp_operadores_incidencias"],
            Module::Diesel => &["erp_diesel_movimientos"],
            Module::Maintenance => &["erp_mantenimiento"],
            Module::Treasury => &["erp_tesoreria_movimientos"],
            Module::Receivables => &["erp_cxc_data"],
            Module::Payables => &["erp_cxp_data"],
            Module::Inventory => &["erp_inventario", "erp_inv"],
        }
    }

    /// Section of the shared document holding this module's records, if any.
    pub fn shared_section(&self) -> Option<&'static str> {
        match self {
            Module::Logistics => Some("registros"),
            Module::Traffic => Some("trafico"),
            Module::Billing => Some("facturas"),
            _ => None,
        }
    }

    /// Identifier chain used for both sides of this module.
    pub fn identifier_chain(&self) -> IdentifierChain {
        IdentifierChain::STANDARD
    }

    /// Where a record of this module is written locally.
    pub fn write_target(&self, body: &Value) -> WriteTarget {
        if let Some(section) = self.shared_section() {
            return WriteTarget::SharedSection(section);
        }
        match self {
            Module::Operators if body.get("tipoGasto").is_some_and(is_present) => {
                WriteTarget::Flat("erp_operadores_gastos")
            }
            Module::Operators => WriteTarget::Flat("erp_operadores_incidencias"),
            _ => WriteTarget::Flat(self.flat_keys()[0]),
        }
    }

    /// Remote document key for a record of this module.
    pub fn remote_doc_id(&self, id: &str, body: &Value) -> String {
        if *self != Module::Operators {
            return id.to_string();
        }

        let tipo = body.get("tipo").and_then(Value::as_str);
        if body.get("tipoGasto").is_some_and(is_present) || tipo == Some("gasto") {
            format!("gasto_{id}")
        } else if body.get("tipoIncidencia").is_some_and(is_present) || tipo == Some("incidencia")
        {
            format!("incidencia_{id}")
        } else {
            id.to_string()
        }
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Module {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Module::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::UnknownModule(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_names_roundtrip() {
        for module in Module::ALL {
            assert_eq!(module.as_str().parse::<Module>().unwrap(), module);
            let wire = serde_json::to_value(module).unwrap();
            assert_eq!(wire, json!(module.as_str()));
        }
        assert!("nomina".parse::<Module>().is_err());
    }

    #[test]
    fn shared_document_modules() {
        assert_eq!(Module::Logistics.shared_section(), Some("registros"));
        assert_eq!(Module::Traffic.shared_section(), Some("trafico"));
        assert_eq!(Module::Billing.shared_section(), Some("facturas"));
        assert_eq!(Module::Diesel.shared_section(), None);

        assert_eq!(
            Module::Billing.write_target(&json!({"id": "1"})),
            WriteTarget::SharedSection("facturas")
        );
    }

    #[test]
    fn operators_write_target_depends_on_kind() {
        let gasto = json!({"id": "1", "tipoGasto": "casetas"});
        let incidencia = json!({"id": "2", "tipoIncidencia": "retardo"});

        assert_eq!(
            Module::Operators.write_target(&gasto),
            WriteTarget::Flat("erp_operadores_gastos")
        );
        assert_eq!(
            Module::Operators.write_target(&incidencia),
            WriteTarget::Flat("erp_operadores_incidencias")
        );
        assert_eq!(
            Module::Inventory.write_target(&gasto),
            WriteTarget::Flat("erp_inventario")
        );
    }

    #[test]
    fn operators_remote_doc_ids() {
        let m = Module::Operators;
        assert_eq!(m.remote_doc_id("7", &json!({"tipoGasto": "diesel"})), "gasto_7");
        assert_eq!(m.remote_doc_id("7", &json!({"tipo": "gasto"})), "gasto_7");
        assert_eq!(m.remote_doc_id("8", &json!({"tipo": "incidencia"})), "incidencia_8");
        assert_eq!(m.remote_doc_id("9", &json!({})), "9");
        assert_eq!(Module::Treasury.remote_doc_id("9", &json!({"tipo": "gasto"})), "9");
    }
}
