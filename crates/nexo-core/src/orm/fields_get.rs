//! Field introspection.

use std::collections::BTreeMap;

use nexo_proto::FieldInfo;

use super::environment::Environment;
use crate::error::Result;

impl Environment {
    /// Describe the fields of `model`, all of them or only `fields`.
    ///
    /// Introspection reads the registry only and needs no model access.
    pub fn fields_get(&self, model: &str, fields: Option<&[&str]>) -> Result<BTreeMap<String, FieldInfo>> {
        let model = self.model(model)?;
        match fields {
            Some(names) => names
                .iter()
                .map(|name| Ok((name.to_string(), model.require_field(name)?.info())))
                .collect(),
            None => Ok(model
                .fields()
                .map(|field| (field.name.clone(), field.info()))
                .collect()),
        }
    }
}
