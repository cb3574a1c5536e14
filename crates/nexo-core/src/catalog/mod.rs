//! Model catalog: field descriptors, declarations, normalization and the
//! registry.

pub mod field;
pub mod model;
pub mod normalize;
pub mod registry;
pub mod types;

pub use field::{ComputeFn, ComputeSpec, DefaultValue, FieldDef};
pub use model::{ModelDecl, ModelDef, CREATE_DATE_FIELD, ID_FIELD, MAGIC_FIELDS, WRITE_DATE_FIELD};
pub use normalize::{normalize, pivot_table, table_name};
pub use registry::{Module, Registry, RegistryBuilder};
pub use types::{FieldKind, OnDelete, PivotTable, Storage};
