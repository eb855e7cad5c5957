//! Setup command handlers: database, users, templates and spaces

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use uuid::Uuid;

use wit_core::catalog::{Identity, Space, SpaceTemplate};
use wit_core::{Config, FieldDefinition, WorkItemType};

use super::Session;
use crate::output::Output;

/// Report the database location; opening it already created the schema
pub fn init(config: &Config, output: &Output) -> Result<()> {
    output.success(&format!(
        "Database ready at {}",
        config.database_path().display()
    ));
    Ok(())
}

pub fn create_user(
    session: &mut Session<'_>,
    username: String,
    full_name: Option<String>,
    email: Option<String>,
) -> Result<()> {
    let mut identity = Identity::new(username);
    identity.full_name = full_name;
    identity.email = email;

    session
        .db
        .write(|tx| identity.insert(tx))
        .with_context(|| format!("Failed to create user '{}'", identity.username))?;

    session.output.created("user", identity.id);
    Ok(())
}

pub fn create_space(
    session: &mut Session<'_>,
    name: String,
    template: Uuid,
    owner: Option<Uuid>,
) -> Result<()> {
    let mut space = Space::new(name, template);
    space.owner_id = owner;

    session
        .db
        .write(|tx| {
            SpaceTemplate::load(tx, template)?;
            if let Some(owner) = owner {
                Identity::load(tx, owner)?;
            }
            space.insert(tx)
        })
        .with_context(|| format!("Failed to create space '{}'", space.name))?;

    session.output.created("space", space.id);
    Ok(())
}

// ==================== Template import ====================

/// A space template file
///
/// ```toml
/// [template]
/// name = "scrum"
///
/// [[types]]
/// name = "task"
/// extends = "base"
///
/// [types.fields."system.title"]
/// label = "Title"
/// required = true
/// type = { shape = "simple", kind = "string" }
/// ```
#[derive(Debug, Deserialize)]
struct TemplateFile {
    template: TemplateSection,
    #[serde(default)]
    types: Vec<TypeSection>,
}

#[derive(Debug, Deserialize)]
struct TemplateSection {
    name: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TypeSection {
    name: String,
    description: Option<String>,
    #[serde(default = "default_can_construct")]
    can_construct: bool,
    /// Name of a type declared earlier in the same file
    extends: Option<String>,
    #[serde(default)]
    fields: BTreeMap<String, FieldDefinition>,
}

fn default_can_construct() -> bool {
    true
}

/// Resolve a template file into the template and its types, in file order
fn build_template(file: TemplateFile) -> Result<(SpaceTemplate, Vec<WorkItemType>)> {
    let mut template = SpaceTemplate::new(file.template.name);
    template.description = file.template.description;

    let mut ids: BTreeMap<String, Uuid> = BTreeMap::new();
    let mut types = Vec::with_capacity(file.types.len());
    for section in file.types {
        if ids.contains_key(&section.name) {
            bail!("Type '{}' is declared twice", section.name);
        }
        let mut wit = WorkItemType::new(template.id, section.name);
        wit.description = section.description;
        wit.can_construct = section.can_construct;
        wit.fields = section.fields;
        if let Some(parent) = section.extends {
            let Some(parent_id) = ids.get(&parent) else {
                bail!(
                    "Type '{}' extends '{}', which is not declared before it",
                    wit.name,
                    parent
                );
            };
            wit.extended_type_id = Some(*parent_id);
        }
        ids.insert(wit.name.clone(), wit.id);
        types.push(wit);
    }
    Ok((template, types))
}

pub fn import_template(session: &mut Session<'_>, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file: TemplateFile = toml::from_str(&content)
        .with_context(|| format!("Invalid template file {}", path.display()))?;
    let (template, types) = build_template(file)?;

    let (repo, ctx) = (session.repo, session.ctx);
    session
        .db
        .write(|tx| {
            template.insert(tx)?;
            for wit in &types {
                repo.types().create(ctx, tx, wit)?;
            }
            Ok(())
        })
        .with_context(|| format!("Failed to import template '{}'", template.name))?;

    session.output.created("template", template.id);
    session.output.message(&format!("{} work item type(s) imported", types.len()));
    Ok(())
}

pub fn list_types(session: &mut Session<'_>, template: Uuid) -> Result<()> {
    let (repo, ctx) = (session.repo, session.ctx);
    let types = session
        .db
        .read(|tx| repo.types().list_for_template(ctx, tx, template))
        .context("Failed to list work item types")?;

    session.output.print_types(&types);
    Ok(())
}
