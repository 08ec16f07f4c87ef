//! Content schema of a passport template
//!
//! The schema is read-only input to the engine. It comes from the template
//! catalog together with the instance ids of repeatable fields already created
//! on a given passport.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{PartnerRole, ResponsibilityUnit};

/// A runtime instance of a repeatable field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInstance {
    pub instance_id: String,
}

/// A single piece of structured data inside a block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub repeatable: bool,
    /// Existing instances; only meaningful for repeatable fields
    #[serde(default)]
    pub instances: Vec<FieldInstance>,
}

impl Field {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            repeatable: false,
            instances: Vec::new(),
        }
    }

    pub fn repeatable<I, S>(id: impl Into<String>, label: impl Into<String>, instances: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            label: label.into(),
            repeatable: true,
            instances: instances
                .into_iter()
                .map(|i| FieldInstance {
                    instance_id: i.into(),
                })
                .collect(),
        }
    }

    /// Id of the single implicit instance of a non-repeatable field
    pub fn singleton_instance_id(&self) -> String {
        format!("{}-0", self.id)
    }

    /// Instance ids that currently exist for this field
    pub fn instance_ids(&self) -> Vec<String> {
        if self.repeatable {
            self.instances.iter().map(|i| i.instance_id.clone()).collect()
        } else {
            vec![self.singleton_instance_id()]
        }
    }

    pub fn has_instance(&self, instance_id: &str) -> bool {
        if self.repeatable {
            self.instances.iter().any(|i| i.instance_id == instance_id)
        } else {
            instance_id == self.singleton_instance_id()
        }
    }

    /// Field-level units for every existing instance
    pub fn units(&self) -> impl Iterator<Item = ResponsibilityUnit> + '_ {
        self.instance_ids()
            .into_iter()
            .map(move |instance_id| ResponsibilityUnit::field(self.id.clone(), instance_id))
    }
}

/// A named section of a template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub display_order: i32,
    #[serde(default = "default_delegable")]
    pub delegable: bool,
    /// Roles allowed to take over this block; empty means any role
    #[serde(default)]
    pub allowed_roles: Vec<PartnerRole>,
    #[serde(default)]
    pub fields: Vec<Field>,
}

fn default_delegable() -> bool {
    true
}

impl Block {
    pub fn new(id: impl Into<String>, display_order: i32) -> Self {
        Self {
            id: id.into(),
            display_order,
            delegable: true,
            allowed_roles: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_allowed_roles(mut self, roles: impl IntoIterator<Item = PartnerRole>) -> Self {
        self.allowed_roles = roles.into_iter().collect();
        self
    }

    pub fn not_delegable(mut self) -> Self {
        self.delegable = false;
        self
    }

    /// The identity header (display order 0) is never handed to suppliers
    pub fn is_delegable(&self) -> bool {
        self.delegable && self.display_order > 0
    }

    pub fn allows_role(&self, role: PartnerRole) -> bool {
        self.allowed_roles.is_empty() || self.allowed_roles.contains(&role)
    }

    pub fn field(&self, field_id: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == field_id)
    }
}

/// Blocks of a template, with per-passport instances filled in
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentSchema {
    #[serde(default)]
    pub template_id: String,
    pub blocks: Vec<Block>,
}

impl ContentSchema {
    pub fn new(template_id: impl Into<String>, mut blocks: Vec<Block>) -> Self {
        blocks.sort_by_key(|b| b.display_order);
        Self {
            template_id: template_id.into(),
            blocks,
        }
    }

    pub fn block(&self, block_id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == block_id)
    }

    /// The block containing a field
    pub fn block_of_field(&self, field_id: &str) -> Option<&Block> {
        self.blocks
            .iter()
            .find(|b| b.fields.iter().any(|f| f.id == field_id))
    }

    /// Blocks that can be handed to suppliers, in display order
    pub fn delegable_blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(|b| b.is_delegable())
    }

    /// The block a unit belongs to
    pub fn block_of_unit(&self, unit: &ResponsibilityUnit) -> Option<&Block> {
        match unit {
            ResponsibilityUnit::Block { block_id } => self.block(block_id),
            ResponsibilityUnit::Field { field_id, .. } => self.block_of_field(field_id),
        }
    }

    /// Check that a unit exists, is delegable and may go to `role`
    pub fn check_unit(&self, unit: &ResponsibilityUnit, role: PartnerRole) -> Result<()> {
        let block = match unit {
            ResponsibilityUnit::Block { block_id } => self
                .block(block_id)
                .ok_or_else(|| AppError::Validation(format!("Unknown block: {}", block_id)))?,
            ResponsibilityUnit::Field {
                field_id,
                instance_id,
            } => {
                let block = self
                    .block_of_field(field_id)
                    .ok_or_else(|| AppError::Validation(format!("Unknown field: {}", field_id)))?;
                let field = block
                    .field(field_id)
                    .ok_or_else(|| AppError::Validation(format!("Unknown field: {}", field_id)))?;
                if !field.has_instance(instance_id) {
                    return Err(AppError::Validation(format!(
                        "Unknown instance {} of field {}",
                        instance_id, field_id
                    )));
                }
                block
            }
        };

        if !block.is_delegable() {
            return Err(AppError::Validation(format!(
                "Block {} cannot be delegated to partners",
                block.id
            )));
        }
        if !block.allows_role(role) {
            return Err(AppError::Validation(format!(
                "Role {} is not allowed on block {}",
                role.label(),
                block.id
            )));
        }
        Ok(())
    }
}

/// Source of passport content schemas (template catalog)
pub trait SchemaProvider: Send + Sync {
    /// Schema of the passport's template, including created instance ids
    fn get_schema(&self, passport_id: Uuid) -> BoxFuture<'_, Result<ContentSchema>>;
}

/// Schema provider backed by an in-memory catalog
#[derive(Default)]
pub struct StaticSchemaProvider {
    schemas: RwLock<HashMap<Uuid, ContentSchema>>,
}

impl StaticSchemaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog file: a JSON object keyed by passport id
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Schema(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let catalog: HashMap<Uuid, ContentSchema> = serde_json::from_str(raw)
            .map_err(|e| AppError::Schema(format!("Invalid schema catalog: {}", e)))?;
        let catalog = catalog
            .into_iter()
            .map(|(id, schema)| (id, ContentSchema::new(schema.template_id, schema.blocks)))
            .collect();
        Ok(Self {
            schemas: RwLock::new(catalog),
        })
    }

    /// Register or replace the schema of a passport
    pub fn insert(&self, passport_id: Uuid, schema: ContentSchema) {
        if let Ok(mut schemas) = self.schemas.write() {
            schemas.insert(passport_id, schema);
        }
    }
}

impl SchemaProvider for StaticSchemaProvider {
    fn get_schema(&self, passport_id: Uuid) -> BoxFuture<'_, Result<ContentSchema>> {
        let found = self
            .schemas
            .read()
            .map_err(|_| AppError::Internal("Schema catalog lock poisoned".to_string()))
            .map(|schemas| schemas.get(&passport_id).cloned());
        Box::pin(async move {
            found?.ok_or_else(|| AppError::NotFound(format!("Passport {} not found", passport_id)))
        })
    }
}
