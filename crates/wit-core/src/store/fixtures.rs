//! Shared test fixture: a template, a space, a user and three types

use rusqlite::Connection;
use serde_json::{json, Value};

use super::{WorkItemRepository, WorkItemTypeRepository};
use crate::cancel::CancelToken;
use crate::catalog::{Identity, Space, SpaceTemplate};
use crate::field::{system, FieldDefinition, FieldType, Kind, WorkItemType};
use crate::model::{Fields, WorkItem};
use crate::query::TableJoinRegistry;
use crate::storage::Database;

pub(crate) struct Fixture {
    pub db: Database,
    pub ctx: CancelToken,
    pub template: SpaceTemplate,
    pub space: Space,
    pub user: Identity,
    /// Abstract type carrying the system fields
    pub base_type: WorkItemType,
    /// Extends `base` with an enum `priority` field
    pub bug_type: WorkItemType,
    /// Extends `base` with an integer `estimate` field
    pub task_type: WorkItemType,
    pub repo: WorkItemRepository,
}

fn states() -> FieldType {
    FieldType::enumeration(
        Kind::String,
        vec![json!("new"), json!("open"), json!("in progress"), json!("closed")],
    )
}

impl Fixture {
    pub fn new() -> Self {
        let db = Database::open_in_memory().unwrap();
        let ctx = CancelToken::new();
        let conn = db.connection();

        let template = SpaceTemplate::new("scrum");
        template.insert(conn).unwrap();

        let user = Identity::new("jdoe").with_full_name("Jane Doe");
        user.insert(conn).unwrap();

        let mut space = Space::new("project", template.id);
        space.owner_id = Some(user.id);
        space.insert(conn).unwrap();

        let types = WorkItemTypeRepository::new();

        let mut base_type = WorkItemType::new(template.id, "base")
            .with_field(
                system::TITLE,
                FieldDefinition::new("Title", FieldType::simple(Kind::String)).required(),
            )
            .with_field(
                system::DESCRIPTION,
                FieldDefinition::new("Description", FieldType::simple(Kind::Markup)),
            )
            .with_field(system::STATE, FieldDefinition::new("State", states()))
            .with_field(
                system::METASTATE,
                FieldDefinition::new(
                    "Meta State",
                    FieldType::enumeration(Kind::String, vec![json!("mNew"), json!("mDone")]),
                ),
            )
            .with_field(
                system::ASSIGNEES,
                FieldDefinition::new("Assignees", FieldType::list(Kind::User)),
            )
            .with_field(
                system::CREATOR,
                FieldDefinition::new("Creator", FieldType::simple(Kind::User)),
            )
            .with_field(
                system::ITERATION,
                FieldDefinition::new("Iteration", FieldType::simple(Kind::Iteration)),
            )
            .with_field(
                system::AREA,
                FieldDefinition::new("Area", FieldType::simple(Kind::Area)),
            )
            .with_field(
                system::LABELS,
                FieldDefinition::new("Labels", FieldType::list(Kind::Label)),
            )
            .with_field(
                system::ORDER,
                FieldDefinition::new("Execution Order", FieldType::simple(Kind::Float)).read_only(),
            )
            .with_field(
                system::NUMBER,
                FieldDefinition::new("Number", FieldType::simple(Kind::Integer)).read_only(),
            )
            .with_field(
                system::CREATED_AT,
                FieldDefinition::new("Created At", FieldType::simple(Kind::Instant)).read_only(),
            )
            .with_field(
                system::UPDATED_AT,
                FieldDefinition::new("Updated At", FieldType::simple(Kind::Instant)).read_only(),
            );
        base_type.can_construct = false;
        types.create(&ctx, conn, &base_type).unwrap();

        let mut bug_type = WorkItemType::new(template.id, "bug").with_field(
            "priority",
            FieldDefinition::new(
                "Priority",
                FieldType::enumeration(Kind::String, vec![json!("p1"), json!("p2"), json!("p3")]),
            ),
        );
        bug_type.extended_type_id = Some(base_type.id);
        types.create(&ctx, conn, &bug_type).unwrap();

        let mut task_type = WorkItemType::new(template.id, "task").with_field(
            "estimate",
            FieldDefinition::new("Estimate", FieldType::simple(Kind::Integer)),
        );
        task_type.extended_type_id = Some(base_type.id);
        types.create(&ctx, conn, &task_type).unwrap();

        Self {
            db,
            ctx,
            template,
            space,
            user,
            base_type,
            bug_type,
            task_type,
            repo: WorkItemRepository::new(TableJoinRegistry::default()),
        }
    }

    pub fn conn(&self) -> &Connection {
        self.db.connection()
    }

    /// Create a task titled `title` in the fixture space
    pub fn create_task(&self, title: &str) -> WorkItem {
        self.create(self.task_type.id, fields(&[(system::TITLE, json!(title))]))
    }

    pub fn create(&self, type_id: uuid::Uuid, fields: Fields) -> WorkItem {
        self.repo
            .create(&self.ctx, self.conn(), self.space.id, type_id, fields, self.user.id)
            .unwrap()
    }
}

/// Build a field map from pairs
pub(crate) fn fields(pairs: &[(&str, Value)]) -> Fields {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}
