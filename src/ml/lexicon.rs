// 📚 Built-in merchant lexicon
//
// Seed training examples: common merchant phrases grouped by target
// category. Each group lists candidate category names in preference order;
// the first one that exists in the store receives the group. Groups whose
// categories are all absent contribute nothing.

use anyhow::Result;

use crate::storage::CategorizationStore;

#[derive(Debug, Clone, Copy)]
pub struct LexiconGroup {
    pub categories: &'static [&'static str],
    pub merchants: &'static [&'static str],
}

const fn group(
    categories: &'static [&'static str],
    merchants: &'static [&'static str],
) -> LexiconGroup {
    LexiconGroup {
        categories,
        merchants,
    }
}

pub const BUILTIN_LEXICON: &[LexiconGroup] = &[
    group(
        &["Auto Insurance", "Insurance"],
        &[
            "state farm", "state farm ro", "sfpp", "state farm sfpp", "allstate", "geico",
            "progressive", "farmers insurance", "liberty mutual", "nationwide", "usaa",
            "american family", "travelers", "esurance", "the general", "root insurance",
        ],
    ),
    group(
        &["Health Insurance", "Insurance", "Medical"],
        &[
            "aetna", "blue cross", "blue shield", "united healthcare", "cigna", "humana",
            "kaiser", "anthem", "health insurance",
        ],
    ),
    group(
        &["Groceries"],
        &[
            "walmart", "walmart supercenter", "target", "kroger", "safeway", "albertsons",
            "publix", "whole foods", "trader joes", "trader joe", "aldi", "costco",
            "costco whse", "costco wholesale", "sams club", "food 4 less", "food4less",
            "food lion", "heb", "meijer", "wegmans", "sprouts", "winco", "grocery",
            "north fresno grocery", "instacart", "groceries", "supermarket", "market",
        ],
    ),
    group(
        &["Restaurants"],
        &[
            "restaurant", "olive garden", "applebees", "chilis", "red lobster", "outback",
            "texas roadhouse", "buffalo wild wings", "dennys", "ihop", "cheesecake factory",
            "panera", "chipotle", "qdoba", "subway", "cafe rio", "papa murphys",
            "papa murphy", "uber eats", "doordash", "grubhub", "postmates", "kona ice",
            "dining", "grill", "bistro",
        ],
    ),
    group(
        &["Coffee Shops"],
        &[
            "starbucks", "dunkin", "peets coffee", "dutch bros", "coffee", "cafe",
            "espresso", "caribou coffee", "tim hortons",
        ],
    ),
    group(
        &["Fast Food"],
        &[
            "mcdonalds", "burger king", "wendys", "taco bell", "kfc", "popeyes",
            "chick fil a", "chickfila", "five guys", "in n out", "jack in the box", "sonic",
            "arbys", "carls jr", "hardees",
        ],
    ),
    group(
        &["Gas"],
        &[
            "shell", "exxon", "chevron", "bp", "texaco", "speedway", "circle k", "7 eleven",
            "7eleven", "gas station", "fuel", "valero", "arco", "mobil", "marathon", "sunoco",
        ],
    ),
    group(
        &["Utilities"],
        &[
            "pgande", "pge", "pg e", "pge ez pay", "pacific gas", "electric", "power company",
            "water", "city of clovis", "city of fresno", "comcast", "xfinity", "verizon",
            "at t", "att", "t mobile", "tmobile", "spectrum", "cox", "frontier", "utility",
            "utilities",
        ],
    ),
    group(
        &["Rent/Mortgage"],
        &[
            "freedom", "freedom mortgage", "freedom mtg", "mtg pymts", "mortgage", "rent",
            "quicken loans", "rocket mortgage", "lease", "housing",
        ],
    ),
    group(
        &["Transfers"],
        &[
            "venmo", "venmo payment", "venmo cashout", "tech cu", "amex epayment",
            "american express", "target card srvc", "chase credit crd", "chase autopay",
            "citi thankyou", "macys", "shop your way mc", "sears payment", "sears click2pay",
            "atm", "atmxl", "withdrawal transfer", "tsdl", "transfer std", "transfer dts",
            "pacific service cu", "eecu", "credit card payment", "payment",
        ],
    ),
    group(
        &["Salary"],
        &[
            "gusto", "rrg operations", "payroll", "direct deposit", "pay", "ramp reimburse",
            "salary", "wages", "employer",
        ],
    ),
    group(
        &["Investments"],
        &[
            "robinhood", "dividend", "fidelity", "vanguard", "schwab", "etrade",
            "td ameritrade", "investment", "brokerage",
        ],
    ),
    group(
        &["Medical"],
        &[
            "american benefit", "claim pmt", "hospital", "medical", "doctor", "dentist",
            "dental", "urgent care", "newsome", "optometrist", "frame doctors", "clinic",
            "physician", "healthcare",
        ],
    ),
    group(
        &["Pharmacy"],
        &[
            "cvs", "walgreens", "rite aid", "pharmacy", "costco rx", "walmart pharmacy",
            "drugstore",
        ],
    ),
    group(
        &["Taxes"],
        &[
            "irs treas", "irs", "tax ref", "tax refund", "franchise tax bd", "casttaxrfd",
            "state tax", "federal tax", "taxes",
        ],
    ),
    group(
        &["Streaming Services"],
        &[
            "netflix", "spotify", "hulu", "disney plus", "disney", "hbo max", "amazon prime",
            "apple tv", "youtube premium", "paramount", "peacock", "crunchyroll",
        ],
    ),
    group(
        &["Subscriptions"],
        &[
            "instacart subscription", "slidesgo", "privacycom", "patreon", "github",
            "dropbox", "google one", "icloud", "microsoft 365", "adobe", "canva",
            "subscription",
        ],
    ),
    group(
        &["Shopping", "Clothing"],
        &[
            "amazon", "amazon com", "ebay", "best buy", "the book nook", "book nook", "macys",
            "nordstrom", "kohls", "target",
        ],
    ),
    group(
        &["Home Goods"],
        &[
            "home depot", "lowes", "ikea", "fresno ag hardware", "hardware", "bed bath",
            "williams sonoma", "pottery barn",
        ],
    ),
    group(
        &["Pet Care"],
        &[
            "petco", "petsmart", "aquatic pets", "veterinarian", "vet", "animal hospital",
            "pet grooming", "pet",
        ],
    ),
    group(
        &["Entertainment", "Movies"],
        &[
            "san joaquin valley", "library", "garden bros circus", "circus", "amc", "regal",
            "cinemark", "movie", "theater", "museum", "zoo",
        ],
    ),
    group(
        &["Education"],
        &[
            "cusd", "clovis adult", "school", "university", "college", "udemy", "coursera",
            "education", "tuition",
        ],
    ),
    group(
        &["Parking"],
        &["parkmobile", "cof parcs", "parking", "park"],
    ),
    group(
        &["Car Maintenance", "Transportation"],
        &[
            "jiffy lube", "valvoline", "oil change", "car wash", "auto repair", "mechanic",
            "firestone", "goodyear", "pep boys", "autozone",
        ],
    ),
    group(
        &["Personal Care"],
        &[
            "gym", "planet fitness", "la fitness", "salon", "hair salon", "barber",
            "nail salon", "spa", "massage", "great clips",
        ],
    ),
];

/// A set of lexicon groups; the built-in one unless a test supplies its own
#[derive(Debug, Clone)]
pub struct Lexicon {
    groups: Vec<LexiconGroup>,
}

impl Lexicon {
    pub fn builtin() -> Self {
        Lexicon {
            groups: BUILTIN_LEXICON.to_vec(),
        }
    }

    pub fn new(groups: Vec<LexiconGroup>) -> Self {
        Lexicon { groups }
    }

    pub fn empty() -> Self {
        Lexicon { groups: Vec::new() }
    }

    pub fn groups(&self) -> &[LexiconGroup] {
        &self.groups
    }

    /// Raw `(merchant phrase, category id)` pairs for the categories that
    /// exist in `store`, in lexicon order
    pub fn resolve<S: CategorizationStore + ?Sized>(&self, store: &S) -> Result<Vec<(&'static str, i64)>> {
        let mut entries = Vec::new();
        for group in &self.groups {
            let mut target = None;
            for name in group.categories {
                if let Some(category) = store.get_category_by_name(name)? {
                    target = Some(category.id);
                    break;
                }
            }
            if let Some(category_id) = target {
                entries.extend(group.merchants.iter().map(|m| (*m, category_id)));
            }
        }
        Ok(entries)
    }
}

impl Default for Lexicon {
    fn default() -> Self {
        Lexicon::builtin()
    }
}
