// 🗄️ Storage seam - what the categorization core reads
//
// The core never talks to SQLite directly. It reads rules, categories and
// labelled transactions through `CategorizationStore`; `db::SqliteStore` is
// the production implementation and `InMemoryStore` backs tests and fakes.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::entities::Category;
use crate::rules::{CategorizationRule, MatchType};

/// Text fields of a transaction that already carries a category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizedText {
    pub merchant: Option<String>,
    pub description: Option<String>,
    pub category_id: i64,
}

pub trait CategorizationStore {
    /// Rules ordered by priority descending, ties by creation order
    fn list_categorization_rules(&self) -> Result<Vec<CategorizationRule>>;

    fn get_category_by_name(&self, name: &str) -> Result<Option<Category>>;

    fn get_category_by_id(&self, id: i64) -> Result<Option<Category>>;

    /// Non-deleted transactions with a non-null category
    fn list_categorized_transactions(&self) -> Result<Vec<CategorizedText>>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    categories: Vec<Category>,
    rules: Vec<CategorizationRule>,
    transactions: Vec<CategorizedText>,
    next_id: i64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn add_category(&mut self, name: &str, parent_id: Option<i64>) -> i64 {
        let id = self.allocate_id();
        self.categories.push(Category::new(id, name, parent_id));
        id
    }

    /// Remove a category only; rules that point at it are left dangling
    pub fn remove_category(&mut self, id: i64) {
        self.categories.retain(|c| c.id != id);
    }

    pub fn add_rule(
        &mut self,
        pattern: &str,
        match_type: MatchType,
        category_id: i64,
        priority: i32,
    ) -> i64 {
        let id = self.allocate_id();
        self.rules.push(CategorizationRule::new(
            id,
            pattern,
            match_type,
            category_id,
            priority,
        ));
        id
    }

    pub fn add_transaction(
        &mut self,
        merchant: Option<&str>,
        description: Option<&str>,
        category_id: i64,
    ) {
        self.transactions.push(CategorizedText {
            merchant: merchant.map(str::to_string),
            description: description.map(str::to_string),
            category_id,
        });
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }
}

impl CategorizationStore for InMemoryStore {
    fn list_categorization_rules(&self) -> Result<Vec<CategorizationRule>> {
        let mut rules = self.rules.clone();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(rules)
    }

    fn get_category_by_name(&self, name: &str) -> Result<Option<Category>> {
        Ok(self.categories.iter().find(|c| c.name == name).cloned())
    }

    fn get_category_by_id(&self, id: i64) -> Result<Option<Category>> {
        Ok(self.categories.iter().find(|c| c.id == id).cloned())
    }

    fn list_categorized_transactions(&self) -> Result<Vec<CategorizedText>> {
        Ok(self.transactions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_come_back_in_priority_order() {
        let mut store = InMemoryStore::new();
        let coffee = store.add_category("Coffee Shops", None);
        let low = store.add_rule("coffee", MatchType::Contains, coffee, 1);
        let high = store.add_rule("starbucks", MatchType::Contains, coffee, 10);
        let tie = store.add_rule("dunkin", MatchType::Contains, coffee, 1);

        let ids: Vec<i64> = store
            .list_categorization_rules()
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![high, low, tie]);
    }

    #[test]
    fn test_category_lookup() {
        let mut store = InMemoryStore::new();
        let id = store.add_category("Groceries", None);
        assert_eq!(store.get_category_by_name("Groceries").unwrap().unwrap().id, id);
        assert!(store.get_category_by_name("groceries").unwrap().is_none());

        store.remove_category(id);
        assert!(store.get_category_by_id(id).unwrap().is_none());
    }
}
