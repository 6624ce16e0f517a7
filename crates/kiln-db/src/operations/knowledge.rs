//! Knowledge item operations.

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::operations::parse_timestamp;
use kiln_core::{KnowledgeFilter, KnowledgeItem, KnowledgeType, ReviewStatus};
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, Connection};

const KNOWLEDGE_COLUMNS: &str = "id, source_id, title, content, summary, category, tags, \
     knowledge_type, status, created_by, reviewed_by, created_at, updated_at";

impl Database {
    /// Insert a knowledge item.
    pub fn create_knowledge_item(&self, item: &KnowledgeItem) -> DbResult<()> {
        let conn = self.conn()?;
        insert_knowledge_item(&conn, item)
    }

    /// Insert several knowledge items in one transaction.
    pub fn create_knowledge_items(&self, items: &[KnowledgeItem]) -> DbResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for item in items {
            insert_knowledge_item(&tx, item)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Get a knowledge item by ID.
    pub fn get_knowledge_item(&self, id: &str) -> DbResult<KnowledgeItem> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM knowledge_items WHERE id = ?1", KNOWLEDGE_COLUMNS),
            params![id],
            row_to_knowledge_item,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                DbError::NotFound(format!("Knowledge item not found: {}", id))
            }
            _ => DbError::from(e),
        })
    }

    /// List knowledge items newest first.
    pub fn list_knowledge_items(&self, filter: &KnowledgeFilter) -> DbResult<Vec<KnowledgeItem>> {
        let conn = self.conn()?;

        let mut sql = format!("SELECT {} FROM knowledge_items WHERE 1=1", KNOWLEDGE_COLUMNS);
        let mut values: Vec<String> = Vec::new();

        if let Some(source_id) = &filter.source_id {
            values.push(source_id.clone());
            sql.push_str(&format!(" AND source_id = ?{}", values.len()));
        }
        if let Some(kind) = filter.knowledge_type {
            values.push(kind.as_str().to_string());
            sql.push_str(&format!(" AND knowledge_type = ?{}", values.len()));
        }
        if let Some(status) = filter.status {
            values.push(status.as_str().to_string());
            sql.push_str(&format!(" AND status = ?{}", values.len()));
        }
        sql.push_str(" ORDER BY created_at DESC, rowid DESC");

        let params: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params.as_slice(), row_to_knowledge_item)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }
}

fn insert_knowledge_item(conn: &Connection, item: &KnowledgeItem) -> DbResult<()> {
    let tags = item.tags_json()?;

    conn.execute(
        r#"
        INSERT INTO knowledge_items (id, source_id, title, content, summary, category, tags,
                                     knowledge_type, status, created_by, reviewed_by,
                                     created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
        params![
            item.id,
            item.source_id,
            item.title,
            item.content,
            item.summary,
            item.category,
            tags,
            item.knowledge_type.as_str(),
            item.status.as_str(),
            item.created_by,
            item.reviewed_by,
            item.created_at.to_rfc3339(),
            item.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn row_to_knowledge_item(row: &rusqlite::Row) -> rusqlite::Result<KnowledgeItem> {
    let tags_str: Option<String> = row.get(6)?;
    let type_str: String = row.get(7)?;
    let status_str: String = row.get(8)?;
    let created_at_str: String = row.get(11)?;
    let updated_at_str: String = row.get(12)?;

    let tags = tags_str
        .map(|raw| KnowledgeItem::parse_tags(&raw))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;

    Ok(KnowledgeItem {
        id: row.get(0)?,
        source_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        summary: row.get(4)?,
        category: row.get(5)?,
        tags,
        knowledge_type: KnowledgeType::from_str(&type_str).unwrap_or_default(),
        status: ReviewStatus::from_str(&status_str).unwrap_or_default(),
        created_by: row.get(9)?,
        reviewed_by: row.get(10)?,
        created_at: parse_timestamp(&created_at_str),
        updated_at: parse_timestamp(&updated_at_str),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{FileKind, SourceFile};

    fn seeded() -> (Database, SourceFile) {
        let db = Database::open_in_memory().unwrap();
        let file = SourceFile::new("guide.pdf", FileKind::Document, "file:///guide.pdf", "carol");
        db.create_source_file(&file).unwrap();
        (db, file)
    }

    #[test]
    fn test_tags_roundtrip() {
        let (db, file) = seeded();

        let tags = vec!["安装".to_string(), "setup".to_string(), "a\"quoted\"".to_string()];
        let item = KnowledgeItem::new(&file.id, "guide.pdf - segment 1", "Install steps", "carol")
            .unwrap()
            .with_summary("How to install")
            .with_tags(tags.clone());
        db.create_knowledge_item(&item).unwrap();

        let fetched = db.get_knowledge_item(&item.id).unwrap();
        assert_eq!(fetched.tags, Some(tags));
        assert_eq!(fetched.summary.as_deref(), Some("How to install"));
        assert_eq!(fetched.knowledge_type, KnowledgeType::Rag);
        assert_eq!(fetched.status, ReviewStatus::Draft);
    }

    #[test]
    fn test_absent_tags_stay_absent() {
        let (db, file) = seeded();
        let item = KnowledgeItem::new(&file.id, "t", "body", "carol").unwrap();
        db.create_knowledge_item(&item).unwrap();

        assert!(db.get_knowledge_item(&item.id).unwrap().tags.is_none());
    }

    #[test]
    fn test_batch_insert_and_filter() {
        let (db, file) = seeded();

        let items: Vec<KnowledgeItem> = (1..=3)
            .map(|n| {
                KnowledgeItem::new(&file.id, format!("guide.pdf - segment {}", n), "text", "carol")
                    .unwrap()
            })
            .collect();
        db.create_knowledge_items(&items).unwrap();

        let all = db
            .list_knowledge_items(&KnowledgeFilter::new().for_source(&file.id))
            .unwrap();
        assert_eq!(all.len(), 3);

        let sft = db
            .list_knowledge_items(&KnowledgeFilter::new().with_type(KnowledgeType::Sft))
            .unwrap();
        assert!(sft.is_empty());

        let drafts = db
            .list_knowledge_items(
                &KnowledgeFilter::new()
                    .for_source(&file.id)
                    .with_status(ReviewStatus::Draft),
            )
            .unwrap();
        assert_eq!(drafts.len(), 3);
    }

    #[test]
    fn test_blank_content_rejected_by_schema() {
        let (db, file) = seeded();
        let mut item = KnowledgeItem::new(&file.id, "t", "body", "carol").unwrap();
        item.content = "  ".to_string();

        assert!(db.create_knowledge_item(&item).is_err());
    }
}
