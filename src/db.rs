use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::categorizer::Categorizer;
use crate::entities::{Category, CategoryTree, DEFAULT_CATEGORIES, UNCATEGORIZED};
use crate::error::CategoryError;
use crate::rules::{CategorizationRule, MatchType};
use crate::storage::{CategorizationStore, CategorizedText};

// ============================================================================
// TRANSACTIONS
// ============================================================================

/// A stored transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub date: String,
    pub amount: f64,
    pub description: String,
    pub merchant: Option<String>,
    pub account_name: Option<String>,
    pub category_id: Option<i64>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A transaction to insert (API body or CSV row)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub date: String,
    pub amount: f64,
    pub description: String,
    #[serde(default)]
    pub merchant: Option<String>,
    #[serde(default)]
    pub account_name: Option<String>,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewTransaction {
    pub fn new(date: &str, amount: f64, description: &str, merchant: Option<&str>) -> Self {
        NewTransaction {
            date: date.to_string(),
            amount,
            description: description.to_string(),
            merchant: merchant.map(str::to_string),
            account_name: None,
            category_id: None,
            notes: None,
        }
    }

    /// SHA-256 over date, amount, description and merchant, used to
    /// reject re-imports of the same row
    pub fn compute_idempotency_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{:.2}|{}|{}",
            self.date,
            self.amount,
            self.description,
            self.merchant.as_deref().unwrap_or("")
        ));
        format!("{:x}", hasher.finalize())
    }
}

/// Accepts ISO dates and US-style `MM/DD/YYYY`; returns ISO
pub fn normalize_date(raw: &str) -> Result<String> {
    let raw = raw.trim();
    for format in ["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Ok(date.format("%Y-%m-%d").to_string());
        }
    }
    anyhow::bail!("Unrecognized date: {:?}", raw)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    Duplicate,
}

/// Optional filters for `list_transactions`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionFilter {
    pub category_id: Option<i64>,
    pub limit: Option<usize>,
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            parent_id INTEGER REFERENCES categories(id),
            icon TEXT,
            color TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            idempotency_hash TEXT UNIQUE NOT NULL,
            date TEXT NOT NULL,
            amount REAL NOT NULL,
            description TEXT NOT NULL,
            merchant TEXT,
            account_name TEXT,
            category_id INTEGER REFERENCES categories(id),
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        )",
        [],
    )?;

    // No foreign key on category_id: a rule may outlive its category
    conn.execute(
        "CREATE TABLE IF NOT EXISTS categorization_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pattern TEXT NOT NULL,
            match_type TEXT NOT NULL DEFAULT 'contains',
            category_id INTEGER NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_category ON transactions(category_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_categories_parent ON categories(parent_id)",
        [],
    )?;

    Ok(())
}

/// Open (creating directories as needed) and set up the database at `path`
pub fn open_database(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

const TRANSACTION_COLUMNS: &str = "id, date, amount, description, merchant, account_name,
     category_id, notes, created_at, updated_at";

fn row_to_transaction(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        id: row.get(0)?,
        date: row.get(1)?,
        amount: row.get(2)?,
        description: row.get(3)?,
        merchant: row.get(4)?,
        account_name: row.get(5)?,
        category_id: row.get(6)?,
        notes: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

pub fn insert_transaction(conn: &Connection, tx: &NewTransaction) -> Result<InsertOutcome> {
    let date = normalize_date(&tx.date)?;
    let normalized = NewTransaction {
        date,
        ..tx.clone()
    };
    let hash = normalized.compute_idempotency_hash();
    let ts = now();

    let result = conn.execute(
        "INSERT INTO transactions (
            idempotency_hash, date, amount, description, merchant, account_name,
            category_id, notes, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            hash,
            normalized.date,
            normalized.amount,
            normalized.description,
            normalized.merchant,
            normalized.account_name,
            normalized.category_id,
            normalized.notes,
            ts,
        ],
    );

    match result {
        Ok(_) => Ok(InsertOutcome::Inserted(conn.last_insert_rowid())),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Ok(InsertOutcome::Duplicate)
        }
        Err(e) => Err(e.into()),
    }
}

/// Non-deleted transactions, newest first
pub fn list_transactions(conn: &Connection, filter: &TransactionFilter) -> Result<Vec<Transaction>> {
    let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM transactions
         WHERE deleted_at IS NULL AND (?1 IS NULL OR category_id = ?1)
         ORDER BY date DESC, id DESC
         LIMIT ?2",
        TRANSACTION_COLUMNS
    ))?;

    let transactions = stmt
        .query_map(params![filter.category_id, limit], row_to_transaction)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(transactions)
}

pub fn get_transaction(conn: &Connection, id: i64) -> Result<Option<Transaction>> {
    let tx = conn
        .query_row(
            &format!(
                "SELECT {} FROM transactions WHERE id = ?1 AND deleted_at IS NULL",
                TRANSACTION_COLUMNS
            ),
            params![id],
            row_to_transaction,
        )
        .optional()?;
    Ok(tx)
}

/// Returns false when the transaction does not exist (or is deleted)
pub fn set_transaction_category(conn: &Connection, id: i64, category_id: Option<i64>) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE transactions SET category_id = ?1, updated_at = ?2
         WHERE id = ?3 AND deleted_at IS NULL",
        params![category_id, now(), id],
    )?;
    Ok(changed > 0)
}

pub fn soft_delete_transaction(conn: &Connection, id: i64) -> Result<bool> {
    let ts = now();
    let changed = conn.execute(
        "UPDATE transactions SET deleted_at = ?1, updated_at = ?1
         WHERE id = ?2 AND deleted_at IS NULL",
        params![ts, id],
    )?;
    Ok(changed > 0)
}

pub fn list_categorized_transactions(conn: &Connection) -> Result<Vec<CategorizedText>> {
    let mut stmt = conn.prepare(
        "SELECT merchant, description, category_id FROM transactions
         WHERE category_id IS NOT NULL AND deleted_at IS NULL
         ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CategorizedText {
                merchant: row.get(0)?,
                description: row.get(1)?,
                category_id: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Count of non-deleted transactions
pub fn verify_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM transactions WHERE deleted_at IS NULL",
        [],
        |row| row.get(0),
    )?;

    Ok(count)
}

// ============================================================================
// CATEGORIES
// ============================================================================

/// Partial update. For `parent_id`, `icon` and `color`, `None` keeps the
/// current value and `Some(None)` clears it (for `parent_id`, moves the
/// category to the root).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryUpdate {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub icon: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub color: Option<Option<String>>,
}

// Distinguishes an absent field from an explicit `null`
fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn row_to_category(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        parent_id: row.get(2)?,
        icon: row.get(3)?,
        color: row.get(4)?,
    })
}

pub fn list_categories(conn: &Connection) -> Result<Vec<Category>> {
    let mut stmt =
        conn.prepare("SELECT id, name, parent_id, icon, color FROM categories ORDER BY id")?;
    let categories = stmt
        .query_map([], row_to_category)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(categories)
}

pub fn get_category(conn: &Connection, id: i64) -> Result<Option<Category>> {
    let category = conn
        .query_row(
            "SELECT id, name, parent_id, icon, color FROM categories WHERE id = ?1",
            params![id],
            row_to_category,
        )
        .optional()?;
    Ok(category)
}

/// First category with this exact name (lowest id)
pub fn get_category_by_name(conn: &Connection, name: &str) -> Result<Option<Category>> {
    let category = conn
        .query_row(
            "SELECT id, name, parent_id, icon, color FROM categories
             WHERE name = ?1 ORDER BY id LIMIT 1",
            params![name],
            row_to_category,
        )
        .optional()?;
    Ok(category)
}

pub fn category_tree(conn: &Connection) -> Result<CategoryTree> {
    Ok(CategoryTree::new(list_categories(conn)?))
}

fn sibling_exists(conn: &Connection, name: &str, parent_id: Option<i64>, except: Option<i64>) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM categories
         WHERE name = ?1 AND parent_id IS ?2 AND (?3 IS NULL OR id != ?3)",
        params![name, parent_id, except],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn create_category(
    conn: &Connection,
    name: &str,
    parent_id: Option<i64>,
    icon: Option<&str>,
    color: Option<&str>,
) -> Result<Category> {
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("Category name is required");
    }
    if let Some(parent) = parent_id {
        if get_category(conn, parent)?.is_none() {
            return Err(CategoryError::NotFound(parent).into());
        }
    }
    if sibling_exists(conn, name, parent_id, None)? {
        return Err(CategoryError::Duplicate(name.to_string()).into());
    }

    conn.execute(
        "INSERT INTO categories (name, parent_id, icon, color) VALUES (?1, ?2, ?3, ?4)",
        params![name, parent_id, icon, color],
    )?;
    let id = conn.last_insert_rowid();
    debug!("Created category {} ({})", name, id);

    Ok(Category {
        id,
        name: name.to_string(),
        parent_id,
        icon: icon.map(str::to_string),
        color: color.map(str::to_string),
    })
}

pub fn update_category(conn: &Connection, id: i64, update: &CategoryUpdate) -> Result<Category> {
    let tree = category_tree(conn)?;
    let current = tree.get(id).cloned().ok_or(CategoryError::NotFound(id))?;

    let parent_id = match update.parent_id {
        Some(new_parent) => {
            tree.validate_parent(id, new_parent)?;
            new_parent
        }
        None => current.parent_id,
    };
    let name = match &update.name {
        Some(n) if !n.trim().is_empty() => n.trim().to_string(),
        Some(_) => anyhow::bail!("Category name cannot be empty"),
        None => current.name.clone(),
    };
    if (name != current.name || parent_id != current.parent_id)
        && sibling_exists(conn, &name, parent_id, Some(id))?
    {
        return Err(CategoryError::Duplicate(name).into());
    }

    let updated = Category {
        id,
        name,
        parent_id,
        icon: update.icon.clone().unwrap_or(current.icon),
        color: update.color.clone().unwrap_or(current.color),
    };
    conn.execute(
        "UPDATE categories SET name = ?1, parent_id = ?2, icon = ?3, color = ?4 WHERE id = ?5",
        params![updated.name, updated.parent_id, updated.icon, updated.color, id],
    )?;
    Ok(updated)
}

/// Deletes the category and all of its descendants, and clears the
/// category of every transaction that pointed at one of them. Rules are
/// left in place. Returns the number of categories removed.
pub fn delete_category(conn: &Connection, id: i64) -> Result<usize> {
    let tree = category_tree(conn)?;
    if tree.get(id).is_none() {
        return Err(CategoryError::NotFound(id).into());
    }

    let mut ids = vec![id];
    ids.extend(tree.descendants(id).iter().map(|c| c.id));

    let db_tx = conn.unchecked_transaction()?;
    let ts = now();
    for cid in &ids {
        db_tx.execute(
            "UPDATE transactions SET category_id = NULL, updated_at = ?1 WHERE category_id = ?2",
            params![ts, cid],
        )?;
        db_tx.execute("DELETE FROM categories WHERE id = ?1", params![cid])?;
    }
    db_tx.commit()?;

    info!("Deleted category {} and {} descendants", id, ids.len() - 1);
    Ok(ids.len())
}

/// Insert the default two-level tree, skipping names that already exist
/// under the same parent. Returns the number of categories created.
pub fn seed_default_categories(conn: &Connection) -> Result<usize> {
    let mut created = 0;

    let mut ensure = |name: &str, parent: Option<i64>, icon: &str, color: &str| -> Result<i64> {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM categories WHERE name = ?1 AND parent_id IS ?2",
                params![name, parent],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            Some(id) => Ok(id),
            None => {
                created += 1;
                Ok(create_category(conn, name, parent, Some(icon), Some(color))?.id)
            }
        }
    };

    for def in DEFAULT_CATEGORIES {
        let parent = ensure(def.name, None, def.icon, def.color)?;
        for &(child, icon) in def.children {
            ensure(child, Some(parent), icon, def.color)?;
        }
    }

    if created > 0 {
        info!("Seeded {} default categories", created);
    }
    Ok(created)
}

// ============================================================================
// RULES
// ============================================================================

/// (category name, [(pattern, priority)])
const DEFAULT_RULES: &[(&str, &[(&str, i32)])] = &[
    (
        "Groceries",
        &[
            ("walmart", 10),
            ("kroger", 10),
            ("safeway", 10),
            ("trader joe", 10),
            ("whole foods", 10),
            ("costco", 10),
        ],
    ),
    ("Restaurants", &[("restaurant", 5), ("grill", 5), ("diner", 5)]),
    ("Coffee Shops", &[("starbucks", 10), ("dunkin", 10), ("coffee", 5)]),
    (
        "Gas",
        &[
            ("shell", 10),
            ("exxon", 10),
            ("chevron", 10),
            ("bp gas", 10),
            ("gas station", 5),
        ],
    ),
    (
        "Streaming Services",
        &[
            ("netflix", 10),
            ("spotify", 10),
            ("hulu", 10),
            ("disney plus", 10),
            ("hbo max", 10),
        ],
    ),
    (
        "Fast Food",
        &[
            ("mcdonald", 10),
            ("burger king", 10),
            ("wendy", 10),
            ("taco bell", 10),
            ("chick fil a", 10),
        ],
    ),
];

/// Contains-rules for the common merchants. Skips categories that do not
/// exist and patterns that already have a rule. Returns rules created.
pub fn seed_default_rules(conn: &Connection) -> Result<usize> {
    let mut created = 0;
    for (category_name, patterns) in DEFAULT_RULES {
        let Some(category) = get_category_by_name(conn, category_name)? else {
            continue;
        };
        for (pattern, priority) in *patterns {
            let exists: i64 = conn.query_row(
                "SELECT COUNT(*) FROM categorization_rules WHERE pattern = ?1",
                params![pattern],
                |row| row.get(0),
            )?;
            if exists == 0 {
                conn.execute(
                    "INSERT INTO categorization_rules (pattern, match_type, category_id, priority)
                     VALUES (?1, 'contains', ?2, ?3)",
                    params![pattern, category.id, priority],
                )?;
                created += 1;
            }
        }
    }
    if created > 0 {
        info!("Seeded {} default rules", created);
    }
    Ok(created)
}

fn row_to_rule(row: &Row<'_>) -> rusqlite::Result<CategorizationRule> {
    let match_type: String = row.get(2)?;
    let match_type = match_type.parse().unwrap_or_else(|_| {
        warn!("Unknown match type {:?}, treating as contains", match_type);
        MatchType::Contains
    });
    Ok(CategorizationRule {
        id: row.get(0)?,
        pattern: row.get(1)?,
        match_type,
        category_id: row.get(3)?,
        priority: row.get(4)?,
    })
}

/// Priority descending, creation order among equals
pub fn list_rules(conn: &Connection) -> Result<Vec<CategorizationRule>> {
    let mut stmt = conn.prepare(
        "SELECT id, pattern, match_type, category_id, priority FROM categorization_rules
         ORDER BY priority DESC, id ASC",
    )?;
    let rules = stmt
        .query_map([], row_to_rule)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rules)
}

/// Create a rule, or update match type and priority of the existing rule
/// with the same pattern and category
pub fn add_rule(
    conn: &Connection,
    pattern: &str,
    match_type: MatchType,
    category_id: i64,
    priority: i32,
) -> Result<CategorizationRule> {
    if pattern.trim().is_empty() {
        anyhow::bail!("Rule pattern is required");
    }
    if get_category(conn, category_id)?.is_none() {
        return Err(CategoryError::NotFound(category_id).into());
    }

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM categorization_rules WHERE pattern = ?1 AND category_id = ?2",
            params![pattern, category_id],
            |row| row.get(0),
        )
        .optional()?;

    let id = match existing {
        Some(id) => {
            conn.execute(
                "UPDATE categorization_rules SET match_type = ?1, priority = ?2 WHERE id = ?3",
                params![match_type.as_str(), priority, id],
            )?;
            id
        }
        None => {
            conn.execute(
                "INSERT INTO categorization_rules (pattern, match_type, category_id, priority)
                 VALUES (?1, ?2, ?3, ?4)",
                params![pattern, match_type.as_str(), category_id, priority],
            )?;
            conn.last_insert_rowid()
        }
    };

    Ok(CategorizationRule::new(id, pattern, match_type, category_id, priority))
}

pub fn delete_rule(conn: &Connection, id: i64) -> Result<bool> {
    let changed = conn.execute("DELETE FROM categorization_rules WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

// ============================================================================
// STORE ADAPTER
// ============================================================================

/// `CategorizationStore` over a borrowed SQLite connection
pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        SqliteStore { conn }
    }

    pub fn connection(&self) -> &'c Connection {
        self.conn
    }
}

impl CategorizationStore for SqliteStore<'_> {
    fn list_categorization_rules(&self) -> Result<Vec<CategorizationRule>> {
        list_rules(self.conn)
    }

    fn get_category_by_name(&self, name: &str) -> Result<Option<Category>> {
        get_category_by_name(self.conn, name)
    }

    fn get_category_by_id(&self, id: i64) -> Result<Option<Category>> {
        get_category(self.conn, id)
    }

    fn list_categorized_transactions(&self) -> Result<Vec<CategorizedText>> {
        list_categorized_transactions(self.conn)
    }
}

// ============================================================================
// RE-CATEGORIZATION
// ============================================================================

/// Which transactions `recategorize_transactions` revisits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecategorizeScope {
    /// No category, or the Uncategorized category
    #[default]
    Uncategorized,
    Category(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RecategorizeSummary {
    pub total_processed: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Run `categorize` over the selected transactions and write back results
/// that are present and differ from the stored category
pub fn recategorize_transactions<S: CategorizationStore + ?Sized>(
    conn: &Connection,
    categorizer: &Categorizer<'_, S>,
    scope: RecategorizeScope,
) -> Result<RecategorizeSummary> {
    let (sql, bind) = match scope {
        RecategorizeScope::Uncategorized => (
            "SELECT id, merchant, description, category_id FROM transactions
             WHERE deleted_at IS NULL AND (category_id IS NULL OR category_id = ?1)
             ORDER BY id",
            get_category_by_name(conn, UNCATEGORIZED)?.map(|c| c.id),
        ),
        RecategorizeScope::Category(id) => (
            "SELECT id, merchant, description, category_id FROM transactions
             WHERE deleted_at IS NULL AND category_id = ?1
             ORDER BY id",
            Some(id),
        ),
    };

    let mut stmt = conn.prepare(sql)?;
    let selected = stmt
        .query_map(params![bind], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    // All or nothing: an error part way leaves every row as it was
    let db_tx = conn.unchecked_transaction()?;
    let mut summary = RecategorizeSummary::default();
    for (id, merchant, description, current) in selected {
        summary.total_processed += 1;
        let decided = categorizer.categorize(merchant.as_deref(), Some(&description))?;
        match decided {
            Some(new_id) if Some(new_id) != current => {
                set_transaction_category(&db_tx, id, Some(new_id))?;
                summary.updated += 1;
            }
            _ => summary.unchanged += 1,
        }
    }
    db_tx.commit()?;

    info!(
        "Recategorized {} transactions: {} updated, {} unchanged",
        summary.total_processed, summary.updated, summary.unchanged
    );
    Ok(summary)
}

// ============================================================================
// CSV IMPORT
// ============================================================================

#[derive(Debug, Deserialize)]
struct CsvRow {
    date: String,
    amount: f64,
    description: String,
    #[serde(default)]
    merchant: Option<String>,
    #[serde(default)]
    account_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ImportSummary {
    pub total_rows: usize,
    pub inserted: usize,
    pub duplicates: usize,
}

/// Read `date,amount,description[,merchant,account_name]` rows
pub fn load_csv(csv_path: &Path) -> Result<Vec<NewTransaction>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(csv_path)
        .context("Failed to open CSV file")?;

    let mut transactions = Vec::new();

    for (line, result) in rdr.deserialize().enumerate() {
        let row: CsvRow =
            result.with_context(|| format!("Failed to read CSV row {}", line + 2))?;
        let blank_to_none = |s: Option<String>| s.filter(|v| !v.trim().is_empty());
        transactions.push(NewTransaction {
            date: row.date,
            amount: row.amount,
            description: row.description,
            merchant: blank_to_none(row.merchant),
            account_name: blank_to_none(row.account_name),
            category_id: None,
            notes: None,
        });
    }

    Ok(transactions)
}

/// Insert rows, categorizing those that arrive without a category.
/// Rows already present (same idempotency hash) are counted and skipped.
pub fn import_transactions<S: CategorizationStore + ?Sized>(
    conn: &Connection,
    categorizer: &Categorizer<'_, S>,
    rows: &[NewTransaction],
) -> Result<ImportSummary> {
    let mut summary = ImportSummary {
        total_rows: rows.len(),
        ..ImportSummary::default()
    };

    for row in rows {
        let mut tx = row.clone();
        if tx.category_id.is_none() {
            tx.category_id = categorizer.categorize(tx.merchant.as_deref(), Some(&tx.description))?;
        }
        match insert_transaction(conn, &tx)? {
            InsertOutcome::Inserted(_) => summary.inserted += 1,
            InsertOutcome::Duplicate => summary.duplicates += 1,
        }
    }

    info!(
        "Imported {} rows: {} inserted, {} duplicates skipped",
        summary.total_rows, summary.inserted, summary.duplicates
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ModelStore;
    use std::io::Write;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_idempotency_import_twice() {
        let conn = test_db();
        let transactions = vec![
            NewTransaction::new("2024-12-31", -45.99, "STARBUCKS #12345", Some("STARBUCKS")),
            NewTransaction::new("2024-12-30", -120.50, "AMAZON PURCHASE", Some("AMAZON")),
            NewTransaction::new("2024-12-29", 2000.00, "SALARY DEPOSIT", None),
        ];

        let first: Vec<InsertOutcome> = transactions
            .iter()
            .map(|t| insert_transaction(&conn, t).unwrap())
            .collect();
        assert!(first.iter().all(|o| matches!(o, InsertOutcome::Inserted(_))));
        assert_eq!(verify_count(&conn).unwrap(), 3);

        for t in &transactions {
            assert_eq!(insert_transaction(&conn, t).unwrap(), InsertOutcome::Duplicate);
        }
        assert_eq!(verify_count(&conn).unwrap(), 3);
    }

    #[test]
    fn test_compute_idempotency_hash() {
        let tx = NewTransaction::new("2024-12-31", -50.0, "TEST PURCHASE", Some("TEST MERCHANT"));
        let hash = tx.compute_idempotency_hash();
        assert_eq!(hash, tx.compute_idempotency_hash());
        assert_eq!(hash.len(), 64);

        let other = NewTransaction::new("2024-12-31", -50.0, "TEST PURCHASE", None);
        assert_ne!(hash, other.compute_idempotency_hash());
    }

    #[test]
    fn test_us_dates_are_normalized() {
        assert_eq!(normalize_date("01/15/2024").unwrap(), "2024-01-15");
        assert_eq!(normalize_date("2024-01-15").unwrap(), "2024-01-15");
        assert!(normalize_date("yesterday").is_err());
    }

    #[test]
    fn test_seed_is_idempotent() {
        let conn = test_db();
        let created = seed_default_categories(&conn).unwrap();
        assert!(created > 30);
        assert_eq!(seed_default_categories(&conn).unwrap(), 0);

        let rules = seed_default_rules(&conn).unwrap();
        assert!(rules > 20);
        assert_eq!(seed_default_rules(&conn).unwrap(), 0);

        let coffee = get_category_by_name(&conn, "Coffee Shops").unwrap().unwrap();
        let food = get_category_by_name(&conn, "Food & Dining").unwrap().unwrap();
        assert_eq!(coffee.parent_id, Some(food.id));
        assert!(get_category_by_name(&conn, UNCATEGORIZED).unwrap().unwrap().is_root());
    }

    #[test]
    fn test_duplicate_sibling_rejected() {
        let conn = test_db();
        let food = create_category(&conn, "Food", None, None, None).unwrap();
        create_category(&conn, "Snacks", Some(food.id), None, None).unwrap();

        let err = create_category(&conn, "Snacks", Some(food.id), None, None).unwrap_err();
        assert_eq!(
            err.downcast_ref::<CategoryError>(),
            Some(&CategoryError::Duplicate("Snacks".to_string()))
        );
        // Same name under a different parent is fine
        assert!(create_category(&conn, "Snacks", None, None, None).is_ok());
    }

    #[test]
    fn test_reparent_cycle_rejected() {
        let conn = test_db();
        let a = create_category(&conn, "A", None, None, None).unwrap();
        let b = create_category(&conn, "B", Some(a.id), None, None).unwrap();

        let update = CategoryUpdate {
            parent_id: Some(Some(b.id)),
            ..CategoryUpdate::default()
        };
        let err = update_category(&conn, a.id, &update).unwrap_err();
        assert_eq!(
            err.downcast_ref::<CategoryError>(),
            Some(&CategoryError::Cycle { id: a.id, parent: b.id })
        );

        let to_root = CategoryUpdate {
            parent_id: Some(None),
            name: Some("B2".to_string()),
            ..CategoryUpdate::default()
        };
        let moved = update_category(&conn, b.id, &to_root).unwrap();
        assert_eq!(moved.parent_id, None);
        assert_eq!(moved.name, "B2");
    }

    #[test]
    fn test_update_can_clear_icon_and_color() {
        let conn = test_db();
        let books = create_category(&conn, "Books", None, Some("book"), Some("#aa0000")).unwrap();

        let clear_icon: CategoryUpdate = serde_json::from_str(r#"{"icon": null}"#).unwrap();
        let updated = update_category(&conn, books.id, &clear_icon).unwrap();
        assert_eq!(updated.icon, None);
        assert_eq!(updated.color.as_deref(), Some("#aa0000"));

        let untouched: CategoryUpdate = serde_json::from_str(r#"{"name": "Reading"}"#).unwrap();
        let updated = update_category(&conn, books.id, &untouched).unwrap();
        assert_eq!(updated.icon, None);
        assert_eq!(updated.color.as_deref(), Some("#aa0000"));

        let recolor: CategoryUpdate =
            serde_json::from_str(r##"{"icon": "books", "color": null}"##).unwrap();
        update_category(&conn, books.id, &recolor).unwrap();
        let stored = get_category(&conn, books.id).unwrap().unwrap();
        assert_eq!(stored.icon.as_deref(), Some("books"));
        assert_eq!(stored.color, None);
        assert_eq!(stored.name, "Reading");
    }

    #[test]
    fn test_delete_cascades_and_nulls_transactions() {
        let conn = test_db();
        let a = create_category(&conn, "A", None, None, None).unwrap();
        let b = create_category(&conn, "B", Some(a.id), None, None).unwrap();
        let c = create_category(&conn, "C", Some(b.id), None, None).unwrap();
        let rule = add_rule(&conn, "acme", MatchType::Contains, c.id, 0).unwrap();

        let mut tx = NewTransaction::new("2024-01-01", -5.0, "ACME", None);
        tx.category_id = Some(c.id);
        let InsertOutcome::Inserted(tx_id) = insert_transaction(&conn, &tx).unwrap() else {
            panic!("expected insert");
        };

        assert_eq!(delete_category(&conn, a.id).unwrap(), 3);
        assert!(list_categories(&conn).unwrap().is_empty());
        assert_eq!(get_transaction(&conn, tx_id).unwrap().unwrap().category_id, None);
        // The rule outlives its category
        assert_eq!(list_rules(&conn).unwrap()[0].id, rule.id);
    }

    #[test]
    fn test_add_rule_upserts() {
        let conn = test_db();
        let coffee = create_category(&conn, "Coffee", None, None, None).unwrap();
        let first = add_rule(&conn, "starbucks", MatchType::Contains, coffee.id, 1).unwrap();
        let second = add_rule(&conn, "starbucks", MatchType::Exact, coffee.id, 9).unwrap();

        assert_eq!(first.id, second.id);
        let rules = list_rules(&conn).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].match_type, MatchType::Exact);
        assert_eq!(rules[0].priority, 9);

        assert!(add_rule(&conn, "x", MatchType::Contains, 999, 0).is_err());
        assert!(delete_rule(&conn, first.id).unwrap());
        assert!(!delete_rule(&conn, first.id).unwrap());
    }

    #[test]
    fn test_soft_deleted_transactions_are_hidden() {
        let conn = test_db();
        let gas = create_category(&conn, "Gas", None, None, None).unwrap();
        let mut tx = NewTransaction::new("2024-01-01", -30.0, "SHELL", Some("Shell"));
        tx.category_id = Some(gas.id);
        let InsertOutcome::Inserted(id) = insert_transaction(&conn, &tx).unwrap() else {
            panic!("expected insert");
        };

        assert_eq!(list_categorized_transactions(&conn).unwrap().len(), 1);
        assert!(soft_delete_transaction(&conn, id).unwrap());
        assert!(list_categorized_transactions(&conn).unwrap().is_empty());
        assert!(get_transaction(&conn, id).unwrap().is_none());
        assert!(list_transactions(&conn, &TransactionFilter::default()).unwrap().is_empty());
        assert!(!soft_delete_transaction(&conn, id).unwrap());
    }

    #[test]
    fn test_rules_listed_by_priority_then_id() {
        let conn = test_db();
        let c = create_category(&conn, "C", None, None, None).unwrap();
        let low = add_rule(&conn, "a", MatchType::Contains, c.id, 1).unwrap();
        let high = add_rule(&conn, "b", MatchType::Contains, c.id, 5).unwrap();
        let tie = add_rule(&conn, "c", MatchType::Contains, c.id, 1).unwrap();

        let store = SqliteStore::new(&conn);
        let ids: Vec<i64> = store
            .list_categorization_rules()
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![high.id, low.id, tie.id]);
    }

    #[test]
    fn test_recategorize_only_touches_changes() {
        let conn = test_db();
        seed_default_categories(&conn).unwrap();
        seed_default_rules(&conn).unwrap();
        let uncategorized = get_category_by_name(&conn, UNCATEGORIZED).unwrap().unwrap();
        let coffee = get_category_by_name(&conn, "Coffee Shops").unwrap().unwrap();

        let mut starbucks = NewTransaction::new("2024-02-01", -4.5, "STARBUCKS #123", None);
        starbucks.category_id = Some(uncategorized.id);
        insert_transaction(&conn, &starbucks).unwrap();
        insert_transaction(&conn, &NewTransaction::new("2024-02-02", -9.0, "MYSTERY SHOP", None))
            .unwrap();

        let models = ModelStore::in_memory();
        let store = SqliteStore::new(&conn);
        let categorizer = Categorizer::new(&store, &models);
        let summary =
            recategorize_transactions(&conn, &categorizer, RecategorizeScope::Uncategorized)
                .unwrap();

        // Starbucks moves to Coffee; the mystery shop goes NULL → Uncategorized
        assert_eq!(summary.total_processed, 2);
        assert_eq!(summary.updated, 2);

        let again =
            recategorize_transactions(&conn, &categorizer, RecategorizeScope::Uncategorized)
                .unwrap();
        assert_eq!(again.total_processed, 1);
        assert_eq!(again.updated, 0);
        assert_eq!(again.unchanged, 1);

        let coffee_txns = list_transactions(
            &conn,
            &TransactionFilter {
                category_id: Some(coffee.id),
                limit: None,
            },
        )
        .unwrap();
        assert_eq!(coffee_txns.len(), 1);
    }

    /// Rules and categories from SQLite, but the Uncategorized lookup fails
    struct FailingFallbackStore<'c>(SqliteStore<'c>);

    impl CategorizationStore for FailingFallbackStore<'_> {
        fn list_categorization_rules(&self) -> Result<Vec<CategorizationRule>> {
            self.0.list_categorization_rules()
        }
        fn get_category_by_name(&self, _name: &str) -> Result<Option<Category>> {
            anyhow::bail!("category lookup unavailable")
        }
        fn get_category_by_id(&self, id: i64) -> Result<Option<Category>> {
            self.0.get_category_by_id(id)
        }
        fn list_categorized_transactions(&self) -> Result<Vec<CategorizedText>> {
            self.0.list_categorized_transactions()
        }
    }

    #[test]
    fn test_recategorize_error_rolls_back_earlier_updates() {
        let conn = test_db();
        seed_default_categories(&conn).unwrap();
        let gas = get_category_by_name(&conn, "Gas").unwrap().unwrap();
        let hobbies = get_category_by_name(&conn, "Hobbies").unwrap().unwrap();
        add_rule(&conn, "acme", MatchType::Contains, hobbies.id, 10).unwrap();

        for (date, description) in [("2024-02-01", "ACME WIDGETS"), ("2024-02-02", "MYSTERY SHOP")] {
            let mut tx = NewTransaction::new(date, -9.0, description, None);
            tx.category_id = Some(gas.id);
            insert_transaction(&conn, &tx).unwrap();
        }

        // ACME is updated by the rule, then MYSTERY SHOP fails on the fallback
        let models = ModelStore::in_memory();
        let store = FailingFallbackStore(SqliteStore::new(&conn));
        let categorizer = Categorizer::new(&store, &models);
        assert!(
            recategorize_transactions(&conn, &categorizer, RecategorizeScope::Category(gas.id))
                .is_err()
        );

        let in_gas = list_transactions(
            &conn,
            &TransactionFilter {
                category_id: Some(gas.id),
                limit: None,
            },
        )
        .unwrap();
        assert_eq!(in_gas.len(), 2);
    }

    #[test]
    fn test_csv_import_categorizes_and_dedups() {
        let conn = test_db();
        seed_default_categories(&conn).unwrap();
        seed_default_rules(&conn).unwrap();
        let gas = get_category_by_name(&conn, "Gas").unwrap().unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "date,amount,description,merchant,account_name").unwrap();
        writeln!(file, "01/15/2024,-40.00,SHELL OIL 12345678,,Checking").unwrap();
        writeln!(file, "2024-01-16,-12.00,Corner store,Corner Store,").unwrap();
        file.flush().unwrap();

        let rows = load_csv(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].merchant, None);
        assert_eq!(rows[0].account_name.as_deref(), Some("Checking"));

        let models = ModelStore::in_memory();
        let store = SqliteStore::new(&conn);
        let categorizer = Categorizer::new(&store, &models);

        let first = import_transactions(&conn, &categorizer, &rows).unwrap();
        assert_eq!(first.inserted, 2);
        let second = import_transactions(&conn, &categorizer, &rows).unwrap();
        assert_eq!(second.duplicates, 2);

        let txns = list_transactions(&conn, &TransactionFilter::default()).unwrap();
        let shell = txns.iter().find(|t| t.description.starts_with("SHELL")).unwrap();
        assert_eq!(shell.category_id, Some(gas.id));
        assert_eq!(shell.date, "2024-01-15");
    }
}
