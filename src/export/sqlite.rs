use std::path::Path;

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::ExportError;
use crate::export::{capped, PART_CONFLICT_CLAUSE, SCHEMA};
use crate::pipeline::ExtractionResult;

/// Rows inserted or changed by one export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportCounts {
    pub parts: usize,
    pub procedures: usize,
    pub bulletins: usize,
    pub models: usize,
}

pub fn connect(path: &Path) -> Result<Connection, ExportError> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<(), ExportError> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Writes the result in one transaction, never downgrading a stored description.
pub fn export(conn: &mut Connection, result: &ExtractionResult) -> Result<ExportCounts, ExportError> {
    let tx = conn.transaction()?;
    let mut counts = ExportCounts::default();
    {
        let mut parts = tx.prepare(&format!(
            "INSERT INTO wis_parts (part_number, description, observations) VALUES (?1, ?2, ?3) {PART_CONFLICT_CLAUSE}"
        ))?;
        for rec in result.entities.values() {
            counts.parts += parts.execute(params![
                rec.key.as_str(),
                capped(&rec.description),
                rec.observation_count as i64,
            ])?;
        }

        let mut procedures = tx.prepare(
            r#"
            INSERT INTO wis_procedures (
                content_hash, title, content, action_verb, part_refs, model_refs, observations
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (content_hash) DO NOTHING
            "#,
        )?;
        for rec in result.procedures() {
            counts.procedures += procedures.execute(params![
                rec.key.as_str(),
                rec.title,
                rec.content,
                rec.reference,
                serde_json::to_string(&rec.part_refs)?,
                serde_json::to_string(&rec.model_refs)?,
                rec.observation_count as i64,
            ])?;
        }

        let mut bulletins = tx.prepare(
            r#"
            INSERT INTO wis_bulletins (
                content_hash, bulletin_number, title, content, part_refs, model_refs, observations
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (content_hash) DO NOTHING
            "#,
        )?;
        for rec in result.bulletins() {
            counts.bulletins += bulletins.execute(params![
                rec.key.as_str(),
                rec.reference,
                rec.title,
                rec.content,
                serde_json::to_string(&rec.part_refs)?,
                serde_json::to_string(&rec.model_refs)?,
                rec.observation_count as i64,
            ])?;
        }

        let mut models = tx.prepare("INSERT OR IGNORE INTO wis_models (model_code) VALUES (?1)")?;
        for model in &result.models {
            counts.models += models.execute(params![model])?;
        }
    }
    tx.commit()?;
    Ok(counts)
}

pub fn write(result: &ExtractionResult, path: &Path) -> Result<ExportCounts, ExportError> {
    let mut conn = connect(path)?;
    export(&mut conn, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::sample;
    use crate::types::EntityKey;

    fn description(conn: &Connection, key: &str) -> String {
        conn.query_row(
            "SELECT description FROM wis_parts WHERE part_number = ?1",
            params![key],
            |r| r.get(0),
        )
        .unwrap()
    }

    #[test]
    fn reexport_never_regresses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wis.sqlite");
        let first = sample();
        let counts = write(&first, &path).unwrap();
        assert_eq!(counts.parts, 3);
        assert_eq!(counts.procedures, 1);
        assert_eq!(counts.bulletins, 1);
        assert_eq!(counts.models, 2);

        let key = EntityKey::new("B373 611 19 24");
        let mut worse = sample();
        worse.entities.get_mut(&key).unwrap().description = "Valve".to_string();
        let counts = write(&worse, &path).unwrap();
        assert_eq!(counts.parts, 0);
        assert_eq!(counts.models, 0);

        let conn = connect(&path).unwrap();
        assert_eq!(description(&conn, key.as_str()), "Hydraulic valve block");

        let mut better = sample();
        better.entities.get_mut(&key).unwrap().description =
            "Hydraulic valve block, rear power take-off".to_string();
        let counts = write(&better, &path).unwrap();
        assert_eq!(counts.parts, 1);
        assert_eq!(
            description(&conn, key.as_str()),
            "Hydraulic valve block, rear power take-off"
        );
    }

    #[test]
    fn refs_stored_as_json() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        export(&mut conn, &sample()).unwrap();
        let refs: String = conn
            .query_row("SELECT part_refs FROM wis_procedures", [], |r| r.get(0))
            .unwrap();
        assert_eq!(refs, r#"["A001 890 38 67"]"#);
    }
}
