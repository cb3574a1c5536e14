//! The built-in `base` module: metadata, security and identity models that
//! every registry carries.

use crate::catalog::{FieldDef, ModelDecl, Module, OnDelete};

/// Name of the built-in module.
pub const BASE_MODULE: &str = "base";

/// Declarations of the `base` module.
pub fn module() -> Module {
    Module::new(BASE_MODULE)
        .with_model(company())
        .with_model(groups())
        .with_model(users())
        .with_model(ir_model())
        .with_model(ir_model_fields())
        .with_model(ir_model_access())
        .with_model(ir_rule())
        .with_model(ir_attachment())
}

fn company() -> ModelDecl {
    ModelDecl::new("res.company")
        .with_description("Companies")
        .with_order("name")
        .with_field(FieldDef::char("name").with_label("Company Name").required().unique())
}

fn groups() -> ModelDecl {
    ModelDecl::new("res.groups")
        .with_description("Access Groups")
        .with_field(FieldDef::char("name").required())
        .with_field(
            FieldDef::many2many("implied_ids", "res.groups")
                .with_relation("res_groups_implied_rel", "gid", "hid")
                .with_label("Inherits")
                .with_help("Users of this group also belong to these groups."),
        )
        .with_field(
            FieldDef::many2many("users", "res.users")
                .with_relation("res_groups_res_users_rel", "res_groups_id", "res_users_id"),
        )
}

fn users() -> ModelDecl {
    ModelDecl::new("res.users")
        .with_description("Users")
        .with_order("login")
        .with_field(FieldDef::char("name").required())
        .with_field(FieldDef::char("login").required().unique())
        .with_field(FieldDef::boolean("active").with_default(true))
        .with_field(FieldDef::many2one("company_id", "res.company").with_ondelete(OnDelete::Restrict))
        .with_field(
            FieldDef::many2many("company_ids", "res.company")
                .with_relation("res_company_users_rel", "user_id", "cid")
                .with_label("Allowed Companies"),
        )
        .with_field(
            FieldDef::many2many("groups_id", "res.groups")
                .with_relation("res_groups_res_users_rel", "res_users_id", "res_groups_id")
                .with_label("Groups"),
        )
}

fn ir_model() -> ModelDecl {
    ModelDecl::new("ir.model")
        .with_description("Models")
        .with_order("model")
        .with_field(FieldDef::char("name").with_label("Model Description").required())
        .with_field(FieldDef::char("model").required().unique())
        .with_field(FieldDef::char("modules").with_label("In Apps"))
        .with_field(FieldDef::one2many("field_id", "ir.model.fields", "model_id").with_label("Fields"))
}

fn ir_model_fields() -> ModelDecl {
    ModelDecl::new("ir.model.fields")
        .with_description("Fields")
        .with_order("name")
        .with_field(FieldDef::char("name").with_label("Field Name").required())
        .with_field(FieldDef::char("model").with_label("Model Name").required().with_index())
        .with_field(
            FieldDef::many2one("model_id", "ir.model")
                .with_ondelete(OnDelete::Cascade)
                .required(),
        )
        .with_field(FieldDef::char("field_description").with_label("Field Label"))
        .with_field(FieldDef::char("ttype").with_label("Field Type").required())
        .with_field(FieldDef::char("relation").with_label("Related Model"))
        .with_field(FieldDef::char("relation_field"))
        .with_field(FieldDef::boolean("required"))
        .with_field(FieldDef::boolean("readonly"))
        .with_field(FieldDef::boolean("store").with_default(true))
}

fn ir_model_access() -> ModelDecl {
    ModelDecl::new("ir.model.access")
        .with_description("Model Access")
        .with_field(FieldDef::char("name").required())
        .with_field(FieldDef::boolean("active").with_default(true))
        .with_field(
            FieldDef::many2one("model_id", "ir.model")
                .with_ondelete(OnDelete::Cascade)
                .required()
                .with_index(),
        )
        .with_field(
            FieldDef::many2one("group_id", "res.groups")
                .with_ondelete(OnDelete::Cascade)
                .with_help("Empty means the access applies to every user."),
        )
        .with_field(FieldDef::boolean("perm_read").with_label("Read Access"))
        .with_field(FieldDef::boolean("perm_write").with_label("Write Access"))
        .with_field(FieldDef::boolean("perm_create").with_label("Create Access"))
        .with_field(FieldDef::boolean("perm_unlink").with_label("Delete Access"))
}

fn ir_rule() -> ModelDecl {
    ModelDecl::new("ir.rule")
        .with_description("Record Rules")
        .with_order("model_id, name")
        .with_field(FieldDef::char("name"))
        .with_field(FieldDef::boolean("active").with_default(true))
        .with_field(
            FieldDef::many2one("model_id", "ir.model")
                .with_ondelete(OnDelete::Cascade)
                .required()
                .with_index(),
        )
        .with_field(
            FieldDef::many2many("groups", "res.groups")
                .with_relation("rule_group_rel", "rule_group_id", "group_id")
                .with_help("Empty means the rule applies to every user."),
        )
        .with_field(FieldDef::text("domain_force").with_label("Domain"))
        .with_field(FieldDef::boolean("perm_read").with_label("Apply for Read").with_default(true))
        .with_field(FieldDef::boolean("perm_write").with_label("Apply for Write").with_default(true))
        .with_field(FieldDef::boolean("perm_create").with_label("Apply for Create").with_default(true))
        .with_field(FieldDef::boolean("perm_unlink").with_label("Apply for Delete").with_default(true))
}

fn ir_attachment() -> ModelDecl {
    ModelDecl::new("ir.attachment")
        .with_description("Attachments")
        .with_field(FieldDef::char("name").required())
        .with_field(FieldDef::char("res_model").with_label("Resource Model").with_index())
        .with_field(FieldDef::char("res_field").with_label("Resource Field"))
        .with_field(FieldDef::integer("res_id").with_label("Resource ID").with_index())
        .with_field(FieldDef::binary("datas").with_label("File Content").in_column())
}
