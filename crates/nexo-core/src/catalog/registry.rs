//! The model registry.
//!
//! Built once at bootstrap from the declarations of every loaded module and
//! immutable afterwards. Units of work share it through an `Arc`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::model::{ModelDecl, ModelDef};
use super::normalize::normalize;
use super::types::{FieldKind, Storage};
use crate::base;
use crate::compute::DependencyGraph;
use crate::error::{Error, Result};
use crate::sql::parse_order;

/// A named group of model declarations.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub models: Vec<ModelDecl>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            models: Vec::new(),
        }
    }

    /// Add a model declaration or extension.
    pub fn with_model(mut self, model: ModelDecl) -> Self {
        self.models.push(model);
        self
    }
}

/// Immutable catalog of normalized models and their dependency graph.
#[derive(Debug)]
pub struct Registry {
    models: BTreeMap<String, Arc<ModelDef>>,
    graph: DependencyGraph,
    /// Cached fields made stale by a change of `(model, field)`.
    related: HashMap<(String, String), Vec<(String, String)>>,
    modules: Vec<String>,
}

impl Registry {
    /// Start a builder preloaded with the `base` module.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Get a model by name.
    pub fn model(&self, name: &str) -> Result<&Arc<ModelDef>> {
        self.models
            .get(name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// All models, by name.
    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelDef>> {
        self.models.values()
    }

    /// Compute dependency graph.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Loaded module names, in load order.
    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    /// Fields on other models whose cached value mirrors `(model, field)`:
    /// the one-to-many side of a many-to-one, the other side of a shared
    /// pivot table.
    pub fn related_fields(&self, model: &str, field: &str) -> &[(String, String)] {
        self.related
            .get(&(model.to_string(), field.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Relational fields of every model that point at `comodel`.
    pub fn fields_targeting<'a>(&'a self, comodel: &'a str) -> impl Iterator<Item = (&'a ModelDef, &'a super::FieldDef)> + 'a {
        self.models.values().flat_map(move |model| {
            model
                .fields()
                .filter(move |f| f.comodel() == Some(comodel))
                .map(move |f| (model.as_ref(), f))
        })
    }
}

/// Collects module declarations and builds a [`Registry`].
#[derive(Debug)]
pub struct RegistryBuilder {
    modules: Vec<Module>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// A builder holding only the `base` module.
    pub fn new() -> Self {
        Self {
            modules: vec![base::module()],
        }
    }

    /// Load a module after the ones already added.
    pub fn module(mut self, module: Module) -> Self {
        self.modules.push(module);
        self
    }

    /// Shorthand for a single-model module named after the model.
    pub fn model(self, model: ModelDecl) -> Self {
        let name = model.name.clone();
        self.module(Module::new(name).with_model(model))
    }

    /// Merge, normalize and cross-check every declaration.
    pub fn build(self) -> Result<Registry> {
        let mut decls: Vec<ModelDecl> = Vec::new();
        let mut module_names = Vec::with_capacity(self.modules.len());

        for module in self.modules {
            module_names.push(module.name.clone());
            for decl in module.models {
                let existing = decls.iter_mut().find(|d| d.name == decl.name);
                match (existing, decl.extends) {
                    (Some(base), true) => base.merge(decl),
                    (None, true) => {
                        return Err(Error::Validation(format!(
                            "module '{}' extends unknown model '{}'",
                            module.name, decl.name
                        )))
                    }
                    (Some(_), false) => {
                        return Err(Error::Validation(format!(
                            "module '{}' redeclares model '{}'",
                            module.name, decl.name
                        )))
                    }
                    (None, false) => decls.push(decl),
                }
            }
        }

        let mut models = BTreeMap::new();
        for decl in decls {
            let model = normalize(decl)?;
            models.insert(model.name.clone(), Arc::new(model));
        }

        check_relations(&models)?;
        check_pivots(&models)?;
        for model in models.values() {
            parse_order(model, &model.order)?;
        }

        let graph = DependencyGraph::build(&models)?;
        let related = related_fields(&models);

        tracing::debug!(
            models = models.len(),
            modules = module_names.len(),
            "registry built"
        );

        Ok(Registry {
            models,
            graph,
            related,
            modules: module_names,
        })
    }
}

fn check_relations(models: &BTreeMap<String, Arc<ModelDef>>) -> Result<()> {
    for model in models.values() {
        for field in model.fields() {
            let Some(comodel_name) = field.comodel() else {
                continue;
            };
            let comodel = models.get(comodel_name).ok_or_else(|| {
                Error::Validation(format!(
                    "{}.{} references unknown model '{comodel_name}'",
                    model.name, field.name
                ))
            })?;

            if let FieldKind::One2many { inverse, .. } = &field.kind {
                let valid = comodel.field(inverse).is_some_and(|inv| {
                    matches!(&inv.kind, FieldKind::Many2one { comodel, .. } if *comodel == model.name)
                        && inv.is_column()
                });
                if !valid {
                    return Err(Error::Validation(format!(
                        "{}.{}: '{inverse}' is not a stored many2one from '{comodel_name}' to '{}'",
                        model.name, field.name, model.name
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Two many-to-many fields may share a pivot table only as the two sides
/// of one relation, with their columns swapped.
fn check_pivots(models: &BTreeMap<String, Arc<ModelDef>>) -> Result<()> {
    let mut seen: HashMap<&str, Vec<(String, &str, &str)>> = HashMap::new();
    for model in models.values() {
        for field in model.fields() {
            let Storage::Pivot(pivot) = &field.storage else {
                continue;
            };
            let users = seen.entry(pivot.table.as_str()).or_default();
            for (other, column1, column2) in users.iter() {
                if (pivot.column1.as_str(), pivot.column2.as_str()) != (*column2, *column1) {
                    return Err(Error::Validation(format!(
                        "{}.{}: pivot table '{}' is already used by {other}; set an explicit relation",
                        model.name, field.name, pivot.table
                    )));
                }
            }
            users.push((
                format!("{}.{}", model.name, field.name),
                pivot.column1.as_str(),
                pivot.column2.as_str(),
            ));
        }
    }
    Ok(())
}

fn related_fields(
    models: &BTreeMap<String, Arc<ModelDef>>,
) -> HashMap<(String, String), Vec<(String, String)>> {
    let mut related: HashMap<(String, String), Vec<(String, String)>> = HashMap::new();

    for model in models.values() {
        for field in model.fields() {
            match (&field.kind, &field.storage) {
                (FieldKind::One2many { comodel, inverse }, _) => {
                    related
                        .entry((comodel.clone(), inverse.clone()))
                        .or_default()
                        .push((model.name.clone(), field.name.clone()));
                }
                (FieldKind::Many2many { comodel, .. }, Storage::Pivot(pivot)) => {
                    let Some(other) = models.get(comodel) else {
                        continue;
                    };
                    for mirror in other.fields() {
                        let shares_pivot = matches!(&mirror.storage, Storage::Pivot(p) if p.table == pivot.table);
                        let same_field = other.name == model.name && mirror.name == field.name;
                        if shares_pivot && !same_field {
                            related
                                .entry((model.name.clone(), field.name.clone()))
                                .or_default()
                                .push((other.name.clone(), mirror.name.clone()));
                        }
                    }
                }
                _ => {}
            }
        }
    }
    related
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldDef;

    fn sales() -> Module {
        Module::new("sale")
            .with_model(
                ModelDecl::new("sale.order")
                    .with_field(FieldDef::char("name"))
                    .with_field(FieldDef::one2many("line_ids", "sale.line", "order_id")),
            )
            .with_model(
                ModelDecl::new("sale.line")
                    .with_field(FieldDef::many2one("order_id", "sale.order"))
                    .with_field(FieldDef::float("amount")),
            )
    }

    #[test]
    fn test_build_includes_base() {
        let registry = Registry::builder().module(sales()).build().unwrap();
        assert!(registry.contains("res.users"));
        assert!(registry.contains("ir.rule"));
        assert!(registry.contains("sale.order"));
        assert_eq!(registry.modules(), ["base".to_string(), "sale".to_string()]);
        assert!(matches!(registry.model("nope"), Err(Error::UnknownModel(_))));
    }

    #[test]
    fn test_related_fields() {
        let registry = Registry::builder().module(sales()).build().unwrap();
        assert_eq!(
            registry.related_fields("sale.line", "order_id"),
            [("sale.order".to_string(), "line_ids".to_string())]
        );
        assert!(registry.related_fields("sale.line", "amount").is_empty());
    }

    #[test]
    fn test_extension() {
        let registry = Registry::builder()
            .module(sales())
            .module(Module::new("sale_note").with_model(
                ModelDecl::extend("sale.order").with_field(FieldDef::text("note")),
            ))
            .build()
            .unwrap();
        assert!(registry.model("sale.order").unwrap().has_field("note"));
    }

    fn tagged(fields: Vec<FieldDef>) -> Module {
        let mut doc = ModelDecl::new("p.doc");
        for field in fields {
            doc = doc.with_field(field);
        }
        Module::new("p")
            .with_model(doc)
            .with_model(ModelDecl::new("p.tag").with_field(FieldDef::char("name")))
    }

    #[test]
    fn test_rejects_two_fields_on_one_derived_pivot() {
        let err = Registry::builder()
            .module(tagged(vec![
                FieldDef::many2many("tag_ids", "p.tag"),
                FieldDef::many2many("other_tag_ids", "p.tag"),
            ]))
            .build()
            .unwrap_err();
        match err {
            Error::Validation(msg) => {
                assert!(msg.contains("p.doc.other_tag_ids"), "{msg}");
                assert!(msg.contains("p_doc_p_tag_rel"), "{msg}");
                assert!(msg.contains("explicit relation"), "{msg}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_accepts_explicit_pivots_and_inverse_pairs() {
        let registry = Registry::builder()
            .module(tagged(vec![
                FieldDef::many2many("tag_ids", "p.tag"),
                FieldDef::many2many("other_tag_ids", "p.tag").with_relation("p_doc_other_tag_rel", "doc_id", "tag_id"),
            ]))
            .module(Module::new("p_inverse").with_model(
                ModelDecl::extend("p.tag").with_field(FieldDef::many2many("doc_ids", "p.doc")),
            ))
            .build()
            .unwrap();
        assert_eq!(
            registry.related_fields("p.tag", "doc_ids"),
            [("p.doc".to_string(), "tag_ids".to_string())]
        );
    }

    #[test]
    fn test_rejects_broken_relations() {
        let err = Registry::builder()
            .model(ModelDecl::new("a.b").with_field(FieldDef::many2one("x_id", "no.such")))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = Registry::builder()
            .model(ModelDecl::new("a.b").with_field(FieldDef::one2many("x_ids", "res.users", "name")))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = Registry::builder()
            .model(ModelDecl::extend("a.b"))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = Registry::builder()
            .model(ModelDecl::new("a.b").with_order("name desc"))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
