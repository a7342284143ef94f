// 🏷️ Category Entity - Hierarchical categories as an arena
//
// Categories are stored flat and indexed by id. The parent is an optional id;
// children are derived by index lookup when the tree is built, never kept as
// back-pointers on the category itself.
//
// "Food & Dining" → "Coffee Shops"
// "Uncategorized" (root, terminal fallback)

use crate::error::CategoryError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Name of the sentinel category used when nothing else matches
pub const UNCATEGORIZED: &str = "Uncategorized";

// ============================================================================
// CATEGORY ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,

    /// Display name (e.g., "Groceries", "Coffee Shops")
    pub name: String,

    /// Parent category id; root categories have `None`
    pub parent_id: Option<i64>,

    /// Optional icon for UI (e.g., "cart", "cup")
    pub icon: Option<String>,

    /// Optional color for UI (e.g., "#ffc107")
    pub color: Option<String>,
}

impl Category {
    pub fn new(id: i64, name: impl Into<String>, parent_id: Option<i64>) -> Self {
        Category {
            id,
            name: name.into(),
            parent_id,
            icon: None,
            color: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_uncategorized(&self) -> bool {
        self.name == UNCATEGORIZED
    }
}

/// A category with its nested children, for hierarchy responses
#[derive(Debug, Clone, Serialize)]
pub struct CategoryNode {
    #[serde(flatten)]
    pub category: Category,
    pub children: Vec<CategoryNode>,
}

// ============================================================================
// CATEGORY TREE
// ============================================================================

/// Read-only view over a snapshot of categories.
///
/// Built from whatever the storage layer returns; ids that point at missing
/// parents are treated as roots rather than rejected.
pub struct CategoryTree {
    nodes: Vec<Category>,
    index: HashMap<i64, usize>,
    children: HashMap<i64, Vec<usize>>,
    roots: Vec<usize>,
}

impl CategoryTree {
    pub fn new(mut categories: Vec<Category>) -> Self {
        categories.sort_by_key(|c| c.id);

        let index: HashMap<i64, usize> = categories
            .iter()
            .enumerate()
            .map(|(pos, c)| (c.id, pos))
            .collect();

        let mut children: HashMap<i64, Vec<usize>> = HashMap::new();
        let mut roots = Vec::new();

        for (pos, category) in categories.iter().enumerate() {
            match category.parent_id {
                Some(parent) if index.contains_key(&parent) => {
                    children.entry(parent).or_default().push(pos);
                }
                _ => roots.push(pos),
            }
        }

        CategoryTree {
            nodes: categories,
            index,
            children,
            roots,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn all(&self) -> &[Category] {
        &self.nodes
    }

    pub fn get(&self, id: i64) -> Option<&Category> {
        self.index.get(&id).map(|&pos| &self.nodes[pos])
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Category> {
        self.nodes.iter().find(|c| c.name == name)
    }

    pub fn roots(&self) -> Vec<&Category> {
        self.roots.iter().map(|&pos| &self.nodes[pos]).collect()
    }

    pub fn children(&self, id: i64) -> Vec<&Category> {
        self.children
            .get(&id)
            .map(|kids| kids.iter().map(|&pos| &self.nodes[pos]).collect())
            .unwrap_or_default()
    }

    pub fn parent(&self, id: i64) -> Option<&Category> {
        self.get(id)
            .and_then(|c| c.parent_id)
            .and_then(|parent| self.get(parent))
    }

    /// Names from the root down to the category itself
    pub fn path(&self, id: i64) -> Vec<String> {
        let mut path = Vec::new();
        let mut current = self.get(id);
        // Bounded by node count so corrupt data cannot loop forever
        let mut steps = 0;
        while let Some(category) = current {
            if steps > self.nodes.len() {
                break;
            }
            path.push(category.name.clone());
            current = category.parent_id.and_then(|p| self.get(p));
            steps += 1;
        }
        path.reverse();
        path
    }

    pub fn path_string(&self, id: i64) -> String {
        self.path(id).join(" > ")
    }

    pub fn depth(&self, id: i64) -> usize {
        self.path(id).len().saturating_sub(1)
    }

    /// True when `ancestor_id` lies strictly above `descendant_id`
    pub fn is_ancestor(&self, ancestor_id: i64, descendant_id: i64) -> bool {
        let mut current = self.get(descendant_id).and_then(|c| c.parent_id);
        let mut steps = 0;
        while let Some(id) = current {
            if id == ancestor_id {
                return true;
            }
            if steps > self.nodes.len() {
                return false;
            }
            current = self.get(id).and_then(|c| c.parent_id);
            steps += 1;
        }
        false
    }

    /// All categories below `id`, depth-first
    pub fn descendants(&self, id: i64) -> Vec<&Category> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.children.get(&id).cloned().unwrap_or_default();
        stack.reverse();
        while let Some(pos) = stack.pop() {
            let category = &self.nodes[pos];
            if out.iter().any(|c: &&Category| c.id == category.id) {
                continue;
            }
            out.push(category);
            if let Some(kids) = self.children.get(&category.id) {
                stack.extend(kids.iter().rev());
            }
        }
        out
    }

    /// Check that `id` may be placed under `new_parent`
    pub fn validate_parent(&self, id: i64, new_parent: Option<i64>) -> Result<(), CategoryError> {
        let Some(parent) = new_parent else {
            return Ok(());
        };
        if parent == id {
            return Err(CategoryError::SelfParent(id));
        }
        if self.get(parent).is_none() {
            return Err(CategoryError::NotFound(parent));
        }
        if self.is_ancestor(id, parent) {
            return Err(CategoryError::Cycle { id, parent });
        }
        Ok(())
    }

    /// Nested view of the whole tree, roots first
    pub fn nested(&self) -> Vec<CategoryNode> {
        self.roots.iter().map(|&pos| self.node_at(pos, 0)).collect()
    }

    /// Nested view rooted at a single category
    pub fn subtree(&self, id: i64) -> Option<CategoryNode> {
        self.index.get(&id).map(|&pos| self.node_at(pos, 0))
    }

    fn node_at(&self, pos: usize, level: usize) -> CategoryNode {
        let category = self.nodes[pos].clone();
        let children = if level > self.nodes.len() {
            Vec::new()
        } else {
            self.children
                .get(&category.id)
                .map(|kids| kids.iter().map(|&k| self.node_at(k, level + 1)).collect())
                .unwrap_or_default()
        };
        CategoryNode { category, children }
    }
}

// ============================================================================
// DEFAULT TREE
// ============================================================================

/// Seed definition: (name, icon, color, children)
pub struct DefaultCategory {
    pub name: &'static str,
    pub icon: &'static str,
    pub color: &'static str,
    pub children: &'static [(&'static str, &'static str)],
}

pub const DEFAULT_CATEGORIES: &[DefaultCategory] = &[
    DefaultCategory {
        name: "Income",
        icon: "cash-coin",
        color: "#28a745",
        children: &[
            ("Salary", "briefcase"),
            ("Investments", "graph-up"),
            ("Other Income", "plus-circle"),
        ],
    },
    DefaultCategory {
        name: "Housing",
        icon: "house",
        color: "#007bff",
        children: &[
            ("Rent/Mortgage", "building"),
            ("Utilities", "lightbulb"),
            ("Home Maintenance", "tools"),
        ],
    },
    DefaultCategory {
        name: "Transportation",
        icon: "car-front",
        color: "#17a2b8",
        children: &[
            ("Gas", "fuel-pump"),
            ("Car Payment", "car-front"),
            ("Public Transit", "bus-front"),
            ("Parking", "p-circle"),
        ],
    },
    DefaultCategory {
        name: "Food & Dining",
        icon: "basket",
        color: "#ffc107",
        children: &[
            ("Groceries", "cart"),
            ("Restaurants", "cup-hot"),
            ("Coffee Shops", "cup"),
            ("Fast Food", "basket"),
        ],
    },
    DefaultCategory {
        name: "Shopping",
        icon: "bag",
        color: "#e83e8c",
        children: &[
            ("Clothing", "handbag"),
            ("Electronics", "laptop"),
            ("Home Goods", "lamp"),
        ],
    },
    DefaultCategory {
        name: "Entertainment",
        icon: "film",
        color: "#6f42c1",
        children: &[
            ("Movies", "film"),
            ("Streaming Services", "tv"),
            ("Games", "controller"),
            ("Hobbies", "palette"),
        ],
    },
    DefaultCategory {
        name: "Healthcare",
        icon: "heart-pulse",
        color: "#dc3545",
        children: &[
            ("Medical", "hospital"),
            ("Pharmacy", "capsule"),
            ("Insurance", "shield-check"),
        ],
    },
    DefaultCategory {
        name: "Personal",
        icon: "person",
        color: "#fd7e14",
        children: &[
            ("Personal Care", "scissors"),
            ("Education", "book"),
            ("Subscriptions", "journal"),
        ],
    },
    DefaultCategory {
        name: UNCATEGORIZED,
        icon: "question-circle",
        color: "#6c757d",
        children: &[],
    },
];

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Food(1) → Restaurants(2) → Fast Food(3); Food(1) → Groceries(4); Income(5)
    fn sample_tree() -> CategoryTree {
        CategoryTree::new(vec![
            Category::new(3, "Fast Food", Some(2)),
            Category::new(1, "Food & Dining", None),
            Category::new(2, "Restaurants", Some(1)),
            Category::new(4, "Groceries", Some(1)),
            Category::new(5, "Income", None),
        ])
    }

    #[test]
    fn test_category_creation() {
        let category = Category::new(9, "Coffee Shops", None);
        assert_eq!(category.name, "Coffee Shops");
        assert!(category.is_root());
        assert!(!category.is_uncategorized());
        assert!(Category::new(10, UNCATEGORIZED, None).is_uncategorized());
    }

    #[test]
    fn test_tree_roots_and_children() {
        let tree = sample_tree();
        let roots: Vec<i64> = tree.roots().iter().map(|c| c.id).collect();
        assert_eq!(roots, vec![1, 5]);

        let kids: Vec<i64> = tree.children(1).iter().map(|c| c.id).collect();
        assert_eq!(kids, vec![2, 4]);
        assert!(tree.children(5).is_empty());
    }

    #[test]
    fn test_tree_parent_and_path() {
        let tree = sample_tree();
        assert_eq!(tree.parent(3).map(|c| c.id), Some(2));
        assert!(tree.parent(1).is_none());
        assert_eq!(tree.path(3), vec!["Food & Dining", "Restaurants", "Fast Food"]);
        assert_eq!(tree.path_string(3), "Food & Dining > Restaurants > Fast Food");
        assert_eq!(tree.depth(3), 2);
        assert_eq!(tree.depth(1), 0);
    }

    #[test]
    fn test_tree_is_ancestor() {
        let tree = sample_tree();
        assert!(tree.is_ancestor(1, 3));
        assert!(tree.is_ancestor(2, 3));
        assert!(!tree.is_ancestor(3, 1));
        assert!(!tree.is_ancestor(3, 3));
        assert!(!tree.is_ancestor(5, 3));
    }

    #[test]
    fn test_tree_descendants() {
        let tree = sample_tree();
        let ids: Vec<i64> = tree.descendants(1).iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
        assert!(tree.descendants(3).is_empty());
    }

    #[test]
    fn test_validate_parent_rejects_self_and_cycles() {
        let tree = sample_tree();
        assert_eq!(tree.validate_parent(2, Some(2)), Err(CategoryError::SelfParent(2)));
        assert_eq!(
            tree.validate_parent(1, Some(3)),
            Err(CategoryError::Cycle { id: 1, parent: 3 })
        );
        assert_eq!(tree.validate_parent(4, Some(99)), Err(CategoryError::NotFound(99)));
        assert!(tree.validate_parent(4, Some(5)).is_ok());
        assert!(tree.validate_parent(4, None).is_ok());
    }

    #[test]
    fn test_orphan_parent_is_treated_as_root() {
        let tree = CategoryTree::new(vec![
            Category::new(1, "Orphan", Some(42)),
            Category::new(2, "Root", None),
        ]);
        assert_eq!(tree.roots().len(), 2);
        assert_eq!(tree.path(1), vec!["Orphan"]);
    }

    #[test]
    fn test_nested_view() {
        let tree = sample_tree();
        let nested = tree.nested();
        assert_eq!(nested.len(), 2);
        assert_eq!(nested[0].category.name, "Food & Dining");
        assert_eq!(nested[0].children.len(), 2);
        assert_eq!(nested[0].children[0].children[0].category.name, "Fast Food");

        let json = serde_json::to_value(&nested[0]).unwrap();
        assert_eq!(json["name"], "Food & Dining");
        assert!(json["children"].is_array());

        assert!(tree.subtree(99).is_none());
        assert_eq!(tree.subtree(2).unwrap().children.len(), 1);
    }

    #[test]
    fn test_default_categories_include_uncategorized() {
        assert!(DEFAULT_CATEGORIES.iter().any(|c| c.name == UNCATEGORIZED));
        let child_count: usize = DEFAULT_CATEGORIES.iter().map(|c| c.children.len()).sum();
        assert_eq!(child_count, 27);
    }
}
