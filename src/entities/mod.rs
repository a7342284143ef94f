// Entity Models
//
// Categories are the only first-class entity the categorizer reasons about.
// They live in a flat arena keyed by id; the tree is a derived view.

pub mod category;

pub use category::{
    Category, CategoryNode, CategoryTree, DefaultCategory, DEFAULT_CATEGORIES, UNCATEGORIZED,
};
