//! QA pair operations.

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::operations::parse_timestamp;
use kiln_core::{QaPair, ReviewStatus};
use rusqlite::params;

const QA_COLUMNS: &str =
    "id, knowledge_id, question, answer, status, created_by, reviewed_by, created_at, updated_at";

impl Database {
    /// Insert QA pairs in one transaction.
    pub fn create_qa_pairs(&self, pairs: &[QaPair]) -> DbResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for pair in pairs {
            tx.execute(
                r#"
                INSERT INTO qa_pairs (id, knowledge_id, question, answer, status, created_by,
                                      reviewed_by, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    pair.id,
                    pair.knowledge_id,
                    pair.question,
                    pair.answer,
                    pair.status.as_str(),
                    pair.created_by,
                    pair.reviewed_by,
                    pair.created_at.to_rfc3339(),
                    pair.updated_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Get a QA pair by ID.
    pub fn get_qa_pair(&self, id: &str) -> DbResult<QaPair> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM qa_pairs WHERE id = ?1", QA_COLUMNS),
            params![id],
            row_to_qa_pair,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                DbError::NotFound(format!("QA pair not found: {}", id))
            }
            _ => DbError::from(e),
        })
    }

    /// List QA pairs newest first, optionally for one owner id.
    pub fn list_qa_pairs(&self, owner_id: Option<&str>) -> DbResult<Vec<QaPair>> {
        let conn = self.conn()?;

        let pairs = match owner_id {
            Some(owner_id) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM qa_pairs WHERE knowledge_id = ?1
                     ORDER BY created_at DESC, rowid DESC",
                    QA_COLUMNS
                ))?;
                let rows = stmt.query_map(params![owner_id], row_to_qa_pair)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM qa_pairs ORDER BY created_at DESC, rowid DESC",
                    QA_COLUMNS
                ))?;
                let rows = stmt.query_map([], row_to_qa_pair)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(pairs)
    }
}

fn row_to_qa_pair(row: &rusqlite::Row) -> rusqlite::Result<QaPair> {
    let status_str: String = row.get(4)?;
    let created_at_str: String = row.get(7)?;
    let updated_at_str: String = row.get(8)?;

    Ok(QaPair {
        id: row.get(0)?,
        knowledge_id: row.get(1)?,
        question: row.get(2)?,
        answer: row.get(3)?,
        status: ReviewStatus::from_str(&status_str).unwrap_or_default(),
        created_by: row.get(5)?,
        reviewed_by: row.get(6)?,
        created_at: parse_timestamp(&created_at_str),
        updated_at: parse_timestamp(&updated_at_str),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qa_pairs_by_owner() {
        let db = Database::open_in_memory().unwrap();

        let pairs = vec![
            QaPair::new("src-1", "What is the torque spec?", "12 Nm.", "dave"),
            QaPair::new("src-1", "Which tool?", "A 10mm wrench.", "dave"),
            QaPair::new("src-2", "Who wrote it?", "The field team.", "dave"),
        ];
        db.create_qa_pairs(&pairs).unwrap();

        let owned = db.list_qa_pairs(Some("src-1")).unwrap();
        assert_eq!(owned.len(), 2);
        assert!(owned.iter().all(|p| p.status == ReviewStatus::Draft));

        assert_eq!(db.list_qa_pairs(None).unwrap().len(), 3);

        let fetched = db.get_qa_pair(&pairs[0].id).unwrap();
        assert_eq!(fetched.answer, "12 Nm.");
    }
}
