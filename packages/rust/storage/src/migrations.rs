//! SQL migration definitions for the readdo database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: items, artifacts",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Captured URLs and their processing state
CREATE TABLE IF NOT EXISTS items (
    id          TEXT PRIMARY KEY,
    url         TEXT NOT NULL,
    title       TEXT NOT NULL DEFAULT '',
    domain      TEXT NOT NULL DEFAULT '',
    source_type TEXT NOT NULL DEFAULT 'web',
    intent_text TEXT NOT NULL DEFAULT '',
    status      TEXT NOT NULL DEFAULT 'CAPTURED'
                CHECK (status IN ('CAPTURED', 'PROCESSING', 'READY', 'FAILED', 'ARCHIVED')),
    priority    TEXT,
    match_score REAL,
    error_info  TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_items_status ON items(status, updated_at);
CREATE INDEX IF NOT EXISTS idx_items_priority ON items(priority, match_score DESC);
CREATE INDEX IF NOT EXISTS idx_items_queue ON items(status, created_at);
CREATE INDEX IF NOT EXISTS idx_items_url ON items(url);

-- Step outputs, one per (item, type)
CREATE TABLE IF NOT EXISTS artifacts (
    id            TEXT PRIMARY KEY,
    item_id       TEXT NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    artifact_type TEXT NOT NULL,
    payload       TEXT NOT NULL,
    created_by    TEXT NOT NULL DEFAULT 'system',
    created_at    TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_artifacts_unique ON artifacts(item_id, artifact_type);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Track repeat captures with items.save_count",
            sql: r#"
ALTER TABLE items ADD COLUMN save_count INTEGER NOT NULL DEFAULT 1;

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
        Migration {
            version: 3,
            description: "Intent history table",
            sql: r#"
CREATE TABLE IF NOT EXISTS intents (
    id         TEXT PRIMARY KEY,
    item_id    TEXT NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    text       TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_intents_item ON intents(item_id, created_at);

-- Seed history from intents captured before this table existed
INSERT INTO intents (id, item_id, text, created_at)
SELECT lower(hex(randomblob(16))), id, intent_text, created_at
FROM items
WHERE intent_text != '';

INSERT INTO schema_migrations (version) VALUES (3);
"#,
        },
        Migration {
            version: 4,
            description: "Rename priority bands",
            sql: r#"
UPDATE items SET priority = CASE priority
    WHEN 'READ_NEXT' THEN 'DO_FIRST'
    WHEN 'WORTH_IT'  THEN 'PLAN_IT'
    WHEN 'IF_TIME'   THEN 'SKIM_IT'
    WHEN 'SKIP'      THEN 'LET_GO'
    ELSE priority
END
WHERE priority IN ('READ_NEXT', 'WORTH_IT', 'IF_TIME', 'SKIP');

UPDATE artifacts SET payload = json_set(payload, '$.priority', CASE json_extract(payload, '$.priority')
    WHEN 'READ_NEXT' THEN 'DO_FIRST'
    WHEN 'WORTH_IT'  THEN 'PLAN_IT'
    WHEN 'IF_TIME'   THEN 'SKIM_IT'
    WHEN 'SKIP'      THEN 'LET_GO'
END)
WHERE artifact_type = 'score'
  AND json_valid(payload)
  AND json_extract(payload, '$.priority') IN ('READ_NEXT', 'WORTH_IT', 'IF_TIME', 'SKIP');

INSERT INTO schema_migrations (version) VALUES (4);
"#,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_strictly_ascending() {
        let versions: Vec<u32> = all_migrations().iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4]);
    }

    #[test]
    fn every_migration_records_itself() {
        for m in all_migrations() {
            let marker = format!("INSERT INTO schema_migrations (version) VALUES ({})", m.version);
            assert!(m.sql.contains(&marker), "migration v{} missing marker", m.version);
        }
    }
}
