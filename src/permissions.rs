use anyhow::Result;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectPermission {
    Create,
    Read,
    Update,
    Delete,
    Comment,
    Permission,
    Publish,
}

impl ObjectPermission {
    pub fn as_int(self) -> i32 {
        match self {
            ObjectPermission::Create => 1,
            ObjectPermission::Read => 2,
            ObjectPermission::Update => 3,
            ObjectPermission::Delete => 4,
            ObjectPermission::Comment => 5,
            ObjectPermission::Permission => 6,
            ObjectPermission::Publish => 7,
        }
    }

    pub fn from_int(value: i32) -> Option<Self> {
        match value {
            1 => Some(ObjectPermission::Create),
            2 => Some(ObjectPermission::Read),
            3 => Some(ObjectPermission::Update),
            4 => Some(ObjectPermission::Delete),
            5 => Some(ObjectPermission::Comment),
            6 => Some(ObjectPermission::Permission),
            7 => Some(ObjectPermission::Publish),
            _ => None,
        }
    }
}

pub const FULL_CONTROL: &[ObjectPermission] = &[
    ObjectPermission::Create,
    ObjectPermission::Read,
    ObjectPermission::Update,
    ObjectPermission::Delete,
    ObjectPermission::Comment,
    ObjectPermission::Permission,
    ObjectPermission::Publish,
];

/// An object that per-user permissions can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectedObject {
    Analysis(i64),
}

impl ProtectedObject {
    fn type_name(&self) -> &'static str {
        match self {
            ProtectedObject::Analysis(_) => "analysis",
        }
    }

    fn object_id(&self) -> String {
        match self {
            ProtectedObject::Analysis(id) => id.to_string(),
        }
    }
}

/// Grant `permissions` on `object` to `user_id`. Already granted permissions are kept.
pub fn grant_permissions(
    conn: &Connection,
    user_id: i64,
    object: ProtectedObject,
    permissions: &[ObjectPermission],
) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO object_permissions (user_id, object_type, object_id, permission)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for permission in permissions {
        stmt.execute(params![
            user_id,
            object.type_name(),
            object.object_id(),
            permission.as_int()
        ])?;
    }
    Ok(())
}

pub fn grant_full_control(conn: &Connection, user_id: i64, object: ProtectedObject) -> Result<()> {
    grant_permissions(conn, user_id, object, FULL_CONTROL)
}

pub fn user_permissions(
    conn: &Connection,
    user_id: i64,
    object: ProtectedObject,
) -> Result<Vec<ObjectPermission>> {
    let mut stmt = conn.prepare(
        "SELECT permission FROM object_permissions
         WHERE user_id = ?1 AND object_type = ?2 AND object_id = ?3 ORDER BY permission",
    )?;
    let permissions = stmt
        .query_map(
            params![user_id, object.type_name(), object.object_id()],
            |row| row.get::<_, i32>(0),
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .filter_map(ObjectPermission::from_int)
        .collect();
    Ok(permissions)
}
