//! Static compute dependency graph.
//!
//! Edges run from a source `(model, field)` to the computed fields that read
//! it, together with the path from changed source records to the dependent
//! records.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::catalog::{FieldKind, ModelDef, Storage};
use crate::error::{Error, Result};

/// How to get from modified source records to the records to recompute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerPath {
    /// Same records.
    Same,
    /// Follow the many-to-one `field` of the source records
    /// (`line.order_id` for a dependency on `line_ids.amount`).
    Forward { field: String },
    /// Dependents whose many-to-one `field` points at the source records
    /// (`order.partner_id` for a dependency on `partner_id.name`).
    Reverse { field: String },
    /// Dependents linked to the source records through a pivot table.
    Pivot {
        table: String,
        dependent_column: String,
        source_column: String,
    },
}

/// One edge of the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    /// Model of the computed field.
    pub model: String,
    /// The computed field.
    pub field: String,
    pub path: TriggerPath,
}

/// Source field to dependent computed fields.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    triggers: HashMap<(String, String), Vec<Trigger>>,
}

impl DependencyGraph {
    /// Build the graph from the `depends` lists of every computed field.
    pub fn build(models: &BTreeMap<String, Arc<ModelDef>>) -> Result<Self> {
        let mut graph = DependencyGraph::default();

        for model in models.values() {
            for field in model.fields() {
                let Some(compute) = &field.compute else {
                    continue;
                };
                for dep in &compute.depends {
                    graph.add_dependency(models, model, &field.name, dep)?;
                }
            }
        }

        Ok(graph)
    }

    fn add_dependency(
        &mut self,
        models: &BTreeMap<String, Arc<ModelDef>>,
        model: &ModelDef,
        field: &str,
        dep: &str,
    ) -> Result<()> {
        let invalid = |reason: &str| {
            Error::Validation(format!(
                "{}.{} depends on '{dep}': {reason}",
                model.name, field
            ))
        };

        let mut parts = dep.split('.');
        let head = parts.next().unwrap_or_default();
        let tail = parts.next();
        if parts.next().is_some() {
            return Err(invalid("only one relational hop is supported"));
        }

        let head_field = model
            .field(head)
            .ok_or_else(|| invalid("unknown field"))?;

        // The computed field always depends on the head on its own record.
        self.push(&model.name, head, Trigger {
            model: model.name.clone(),
            field: field.to_string(),
            path: TriggerPath::Same,
        });

        // Re-parenting a child changes the membership of a one2many.
        if let FieldKind::One2many { comodel, inverse } = &head_field.kind {
            self.push(comodel, inverse, Trigger {
                model: model.name.clone(),
                field: field.to_string(),
                path: TriggerPath::Forward {
                    field: inverse.clone(),
                },
            });
        }

        let Some(tail) = tail else {
            return Ok(());
        };

        let comodel_name = head_field
            .comodel()
            .ok_or_else(|| invalid("dotted path through a non-relational field"))?;
        let comodel = models
            .get(comodel_name)
            .ok_or_else(|| invalid("unknown related model"))?;
        if !comodel.has_field(tail) {
            return Err(invalid("unknown related field"));
        }

        let path = match (&head_field.kind, &head_field.storage) {
            (FieldKind::Many2one { .. }, _) => TriggerPath::Reverse {
                field: head.to_string(),
            },
            (FieldKind::One2many { inverse, .. }, _) => TriggerPath::Forward {
                field: inverse.clone(),
            },
            (FieldKind::Many2many { .. }, Storage::Pivot(pivot)) => TriggerPath::Pivot {
                table: pivot.table.clone(),
                dependent_column: pivot.column1.clone(),
                source_column: pivot.column2.clone(),
            },
            _ => return Err(invalid("unsupported relational path")),
        };

        self.push(comodel_name, tail, Trigger {
            model: model.name.clone(),
            field: field.to_string(),
            path,
        });
        Ok(())
    }

    fn push(&mut self, model: &str, field: &str, trigger: Trigger) {
        let entry = self
            .triggers
            .entry((model.to_string(), field.to_string()))
            .or_default();
        if !entry.contains(&trigger) {
            entry.push(trigger);
        }
    }

    /// Computed fields fed by `(model, field)`.
    pub fn dependents(&self, model: &str, field: &str) -> &[Trigger] {
        self.triggers
            .get(&(model.to_string(), field.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether anything depends on `(model, field)`.
    pub fn has_dependents(&self, model: &str, field: &str) -> bool {
        !self.dependents(model, field).is_empty()
    }

    /// Number of edges.
    pub fn len(&self) -> usize {
        self.triggers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{normalize, FieldDef, ModelDecl};

    fn models(decls: Vec<ModelDecl>) -> BTreeMap<String, Arc<ModelDef>> {
        decls
            .into_iter()
            .map(|d| {
                let m = normalize(d).unwrap();
                (m.name.clone(), Arc::new(m))
            })
            .collect()
    }

    fn sales() -> BTreeMap<String, Arc<ModelDef>> {
        models(vec![
            ModelDecl::new("sale.order")
                .with_field(FieldDef::many2one("partner_id", "res.partner"))
                .with_field(FieldDef::one2many("line_ids", "sale.line", "order_id"))
                .with_field(
                    FieldDef::float("total")
                        .computed("_compute_total", ["line_ids.amount"], |_, _| Ok(()))
                        .stored(),
                )
                .with_field(FieldDef::char("partner_name").computed(
                    "_compute_partner_name",
                    ["partner_id.name"],
                    |_, _| Ok(()),
                )),
            ModelDecl::new("sale.line")
                .with_field(FieldDef::many2one("order_id", "sale.order"))
                .with_field(FieldDef::float("amount")),
            ModelDecl::new("res.partner").with_field(FieldDef::char("name")),
        ])
    }

    #[test]
    fn test_one2many_dependency() {
        let graph = DependencyGraph::build(&sales()).unwrap();
        let forward = Trigger {
            model: "sale.order".into(),
            field: "total".into(),
            path: TriggerPath::Forward {
                field: "order_id".into(),
            },
        };
        assert_eq!(graph.dependents("sale.line", "amount"), [forward.clone()]);
        assert_eq!(graph.dependents("sale.line", "order_id"), [forward]);
        assert_eq!(graph.dependents("sale.order", "line_ids")[0].path, TriggerPath::Same);
    }

    #[test]
    fn test_many2one_dependency() {
        let graph = DependencyGraph::build(&sales()).unwrap();
        assert_eq!(
            graph.dependents("res.partner", "name"),
            [Trigger {
                model: "sale.order".into(),
                field: "partner_name".into(),
                path: TriggerPath::Reverse {
                    field: "partner_id".into(),
                },
            }]
        );
        assert!(graph.has_dependents("sale.order", "partner_id"));
        assert!(!graph.has_dependents("res.partner", "id"));
    }

    #[test]
    fn test_rejects_unknown_dependencies() {
        let broken = models(vec![ModelDecl::new("a.b").with_field(
            FieldDef::integer("y").computed("_compute_y", ["nope"], |_, _| Ok(())),
        )]);
        assert!(matches!(DependencyGraph::build(&broken), Err(Error::Validation(_))));

        let deep = models(vec![ModelDecl::new("a.b")
            .with_field(FieldDef::many2one("parent_id", "a.b"))
            .with_field(FieldDef::integer("y").computed(
                "_compute_y",
                ["parent_id.parent_id.y"],
                |_, _| Ok(()),
            ))]);
        assert!(matches!(DependencyGraph::build(&deep), Err(Error::Validation(_))));
    }
}
