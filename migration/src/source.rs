//! Discovery of migration scripts on disk.

use std::collections::BTreeMap;
use std::path::Path;

use walkdir::WalkDir;

use crate::MigrationError;

const UP_SUFFIX: &str = "_up.sql";
const DOWN_SUFFIX: &str = "_down.sql";

/// A paired up/down migration loaded from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// Numeric id taken from the file-name prefix; defines apply order.
    pub id: i64,
    /// Pair key, `<id>_<name>`.
    pub name: String,
    pub up_sql: String,
    /// Empty when no down script exists.
    pub down_sql: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

#[derive(Default)]
struct Pair {
    id: i64,
    up: Option<String>,
    down: Option<String>,
}

/// Splits `0003_create_roles_up.sql` into `(3, "0003_create_roles", Up)`.
///
/// Returns `None` for files that are not migration scripts at all.
fn parse_file_name(file_name: &str) -> Option<Result<(i64, String, Direction), MigrationError>> {
    let (stem, direction) = if let Some(stem) = file_name.strip_suffix(UP_SUFFIX) {
        (stem, Direction::Up)
    } else if let Some(stem) = file_name.strip_suffix(DOWN_SUFFIX) {
        (stem, Direction::Down)
    } else {
        return None;
    };

    let id_part = stem.split_once('_').map(|(id, _)| id).unwrap_or(stem);
    match id_part.parse::<i64>() {
        Ok(id) => Some(Ok((id, stem.to_string(), direction))),
        Err(_) => Some(Err(MigrationError::InvalidId {
            file: file_name.to_string(),
        })),
    }
}

/// Loads every migration pair under `dir` (recursively), sorted by id.
pub fn load_migrations(dir: impl AsRef<Path>) -> Result<Vec<MigrationFile>, MigrationError> {
    let dir = dir.as_ref();
    let mut pairs: BTreeMap<String, Pair> = BTreeMap::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|err| MigrationError::Io {
            path: dir.to_path_buf(),
            source: err.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy();
        let Some(parsed) = parse_file_name(&file_name) else {
            continue;
        };
        let (id, name, direction) = parsed?;

        let sql = std::fs::read_to_string(entry.path()).map_err(|source| MigrationError::Io {
            path: entry.path().to_path_buf(),
            source,
        })?;

        let pair = pairs.entry(name).or_default();
        pair.id = id;
        match direction {
            Direction::Up => pair.up = Some(sql),
            Direction::Down => pair.down = Some(sql),
        }
    }

    let mut by_id: BTreeMap<i64, MigrationFile> = BTreeMap::new();
    for (name, pair) in pairs {
        let up_sql = pair
            .up
            .ok_or_else(|| MigrationError::MissingUp { name: name.clone() })?;

        if let Some(existing) = by_id.get(&pair.id) {
            return Err(MigrationError::DuplicateId {
                id: pair.id,
                first: existing.name.clone(),
                second: name,
            });
        }

        by_id.insert(
            pair.id,
            MigrationFile {
                id: pair.id,
                name,
                up_sql,
                down_sql: pair.down.unwrap_or_default(),
            },
        );
    }

    Ok(by_id.into_values().collect())
}
