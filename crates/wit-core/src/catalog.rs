//! Related entities of work items
//!
//! Space templates, spaces, identities, iterations, areas, codebases,
//! labels, board columns and work item links. These are the targets of the
//! compiler's table joins, the iteration rollups and the relational
//! rendering used by the type-change migrator.
//!
//! Iterations and areas keep a materialized path `/root/../self` built from
//! the ids of their ancestors, so descendants can be found with a prefix
//! match on `path`.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::field::Kind;
use crate::storage::sql::{opt_uuid_at, to_millis, uuid_at};
use crate::storage::PARENT_CHILD_LINK_TYPE_ID;

fn now_millis() -> i64 {
    to_millis(Utc::now())
}

// ==================== Space templates ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceTemplate {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

impl SpaceTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
        }
    }

    pub fn insert(&self, conn: &Connection) -> Result<()> {
        let now = now_millis();
        conn.execute(
            "INSERT INTO space_templates (id, name, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![self.id.to_string(), self.name, self.description, now],
        )?;
        Ok(())
    }

    pub fn load(conn: &Connection, id: Uuid) -> Result<Self> {
        conn.query_row(
            "SELECT id, name, description FROM space_templates
             WHERE id = ?1 AND deleted_at IS NULL",
            [id.to_string()],
            |row| {
                Ok(Self {
                    id: uuid_at(row, 0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| Error::not_found("space template", id))
    }
}

// ==================== Spaces ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Space {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub space_template_id: Uuid,
    pub owner_id: Option<Uuid>,
}

impl Space {
    pub fn new(name: impl Into<String>, space_template_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            space_template_id,
            owner_id: None,
        }
    }

    pub fn insert(&self, conn: &Connection) -> Result<()> {
        let now = now_millis();
        conn.execute(
            "INSERT INTO spaces
                (id, name, description, space_template_id, owner_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                self.id.to_string(),
                self.name,
                self.description,
                self.space_template_id.to_string(),
                self.owner_id.map(|id| id.to_string()),
                now,
            ],
        )?;
        Ok(())
    }

    pub fn load(conn: &Connection, id: Uuid) -> Result<Self> {
        conn.query_row(
            "SELECT id, name, description, space_template_id, owner_id FROM spaces
             WHERE id = ?1 AND deleted_at IS NULL",
            [id.to_string()],
            |row| {
                Ok(Self {
                    id: uuid_at(row, 0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    space_template_id: uuid_at(row, 3)?,
                    owner_id: opt_uuid_at(row, 4)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| Error::not_found("space", id))
    }
}

// ==================== Identities ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
}

impl Identity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            full_name: None,
            email: None,
        }
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    pub fn insert(&self, conn: &Connection) -> Result<()> {
        let now = now_millis();
        conn.execute(
            "INSERT INTO identities (id, username, full_name, email, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                self.id.to_string(),
                self.username,
                self.full_name,
                self.email,
                now
            ],
        )?;
        Ok(())
    }

    pub fn load(conn: &Connection, id: Uuid) -> Result<Self> {
        conn.query_row(
            "SELECT id, username, full_name, email FROM identities
             WHERE id = ?1 AND deleted_at IS NULL",
            [id.to_string()],
            |row| {
                Ok(Self {
                    id: uuid_at(row, 0)?,
                    username: row.get(1)?,
                    full_name: row.get(2)?,
                    email: row.get(3)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| Error::not_found("identity", id))
    }

    /// `Full Name (username)`
    pub fn display_name(&self) -> String {
        format!(
            "{} ({})",
            self.full_name.as_deref().unwrap_or_default(),
            self.username
        )
    }
}

// ==================== Iterations and areas ====================

/// A node of a space's iteration or area tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: Uuid,
    pub space_id: Uuid,
    pub name: String,
    /// Ancestor ids and own id, `/root/../self`
    pub path: String,
}

impl TreeNode {
    fn new(space_id: Uuid, name: impl Into<String>, parent: Option<&TreeNode>) -> Self {
        let id = Uuid::new_v4();
        let path = match parent {
            Some(parent) => format!("{}/{}", parent.path, id),
            None => format!("/{}", id),
        };
        Self {
            id,
            space_id,
            name: name.into(),
            path,
        }
    }

    /// `name (path)`
    pub fn display_name(&self) -> String {
        format!("{} ({})", self.name, self.path)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: uuid_at(row, 0)?,
            space_id: uuid_at(row, 1)?,
            name: row.get(2)?,
            path: row.get(3)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iteration {
    #[serde(flatten)]
    pub node: TreeNode,
    pub state: String,
}

impl Iteration {
    pub fn new(space_id: Uuid, name: impl Into<String>, parent: Option<&Iteration>) -> Self {
        Self {
            node: TreeNode::new(space_id, name, parent.map(|p| &p.node)),
            state: "new".to_string(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.node.id
    }

    pub fn insert(&self, conn: &Connection) -> Result<()> {
        let now = now_millis();
        conn.execute(
            "INSERT INTO iterations (id, space_id, name, path, state, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                self.node.id.to_string(),
                self.node.space_id.to_string(),
                self.node.name,
                self.node.path,
                self.state,
                now,
            ],
        )?;
        Ok(())
    }

    pub fn load(conn: &Connection, id: Uuid) -> Result<Self> {
        conn.query_row(
            "SELECT id, space_id, name, path, state FROM iterations
             WHERE id = ?1 AND deleted_at IS NULL",
            [id.to_string()],
            |row| {
                Ok(Self {
                    node: TreeNode::from_row(row)?,
                    state: row.get(4)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| Error::not_found("iteration", id))
    }

    pub fn list_for_space(conn: &Connection, space_id: Uuid) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, space_id, name, path, state FROM iterations
             WHERE space_id = ?1 AND deleted_at IS NULL
             ORDER BY path",
        )?;
        let rows = stmt.query_map([space_id.to_string()], |row| {
            Ok(Self {
                node: TreeNode::from_row(row)?,
                state: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    #[serde(flatten)]
    pub node: TreeNode,
}

impl Area {
    pub fn new(space_id: Uuid, name: impl Into<String>, parent: Option<&Area>) -> Self {
        Self {
            node: TreeNode::new(space_id, name, parent.map(|p| &p.node)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.node.id
    }

    pub fn insert(&self, conn: &Connection) -> Result<()> {
        let now = now_millis();
        conn.execute(
            "INSERT INTO areas (id, space_id, name, path, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                self.node.id.to_string(),
                self.node.space_id.to_string(),
                self.node.name,
                self.node.path,
                now,
            ],
        )?;
        Ok(())
    }

    pub fn load(conn: &Connection, id: Uuid) -> Result<Self> {
        conn.query_row(
            "SELECT id, space_id, name, path FROM areas WHERE id = ?1 AND deleted_at IS NULL",
            [id.to_string()],
            |row| {
                Ok(Self {
                    node: TreeNode::from_row(row)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| Error::not_found("area", id))
    }
}

// ==================== Codebases, labels and board columns ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Codebase {
    pub id: Uuid,
    pub space_id: Uuid,
    pub url: String,
}

impl Codebase {
    pub fn new(space_id: Uuid, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            space_id,
            url: url.into(),
        }
    }

    pub fn insert(&self, conn: &Connection) -> Result<()> {
        let now = now_millis();
        conn.execute(
            "INSERT INTO codebases (id, space_id, url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![self.id.to_string(), self.space_id.to_string(), self.url, now],
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub id: Uuid,
    pub space_id: Uuid,
    pub name: String,
}

impl Label {
    pub fn new(space_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            space_id,
            name: name.into(),
        }
    }

    pub fn insert(&self, conn: &Connection) -> Result<()> {
        let now = now_millis();
        conn.execute(
            "INSERT INTO labels (id, space_id, name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![self.id.to_string(), self.space_id.to_string(), self.name, now],
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardColumn {
    pub id: Uuid,
    pub space_template_id: Uuid,
    pub name: String,
    pub column_order: i64,
}

impl BoardColumn {
    pub fn new(space_template_id: Uuid, name: impl Into<String>, column_order: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            space_template_id,
            name: name.into(),
            column_order,
        }
    }

    pub fn insert(&self, conn: &Connection) -> Result<()> {
        let now = now_millis();
        conn.execute(
            "INSERT INTO board_columns
                (id, space_template_id, name, column_order, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                self.id.to_string(),
                self.space_template_id.to_string(),
                self.name,
                self.column_order,
                now,
            ],
        )?;
        Ok(())
    }
}

// ==================== Links ====================

/// Record `parent` as the parent of `child`
pub fn link_parent(conn: &Connection, parent: Uuid, child: Uuid) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = now_millis();
    conn.execute(
        "INSERT INTO work_item_links
            (id, link_type_id, source_id, target_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![
            id.to_string(),
            PARENT_CHILD_LINK_TYPE_ID,
            parent.to_string(),
            child.to_string(),
            now,
        ],
    )?;
    Ok(id)
}

// ==================== Relational rendering ====================

/// Render the identity stored in a relational field for humans
pub fn render_relational(conn: &Connection, kind: Kind, value: &Value) -> Result<String> {
    let id = value
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| Error::Conversion(format!("{} is not a {} reference", value, kind)))?;

    let name_of = |sql: &str, entity: &'static str| -> Result<String> {
        conn.query_row(sql, [id.to_string()], |row| row.get::<_, String>(0))
            .optional()?
            .ok_or_else(|| Error::not_found(entity, id))
    };

    match kind {
        Kind::User => Ok(Identity::load(conn, id)?.display_name()),
        Kind::Iteration => Ok(Iteration::load(conn, id)?.node.display_name()),
        Kind::Area => Ok(Area::load(conn, id)?.node.display_name()),
        Kind::Codebase => name_of("SELECT url FROM codebases WHERE id = ?1", "codebase"),
        Kind::Label => name_of("SELECT name FROM labels WHERE id = ?1", "label"),
        Kind::BoardColumn => name_of("SELECT name FROM board_columns WHERE id = ?1", "board column"),
        other => Err(Error::Internal(format!(
            "kind {} is not relational",
            other
        ))),
    }
}
