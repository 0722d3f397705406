//! Entity types and their statically declared relations
//!
//! `EntityType::ALL` is the fixed dependency order used by both engines:
//! every type appears after the types its foreign keys point at. Exports and
//! imports walk it forwards; a replace import deletes in reverse.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Named category of tenant record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Users,
    Accounts,
    TaxCodes,
    Categories,
    Contacts,
    Quotes,
    QuoteLines,
    Invoices,
    InvoiceLines,
    JournalEntries,
    JournalLines,
    Documents,
}

/// How a row is tied to its tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// The row carries `tenant_id` directly
    Tenant,
    /// Line entity: owned through a parent row's tenant
    Parent {
        column: &'static str,
        parent: EntityType,
    },
}

/// A foreign key as it appears in storage and in portable records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    /// Internal integer column, e.g. `contact_id`
    pub column: &'static str,
    /// Portable field, e.g. `contact_public_id`
    pub field: &'static str,
    pub references: EntityType,
    /// Whether the schema requires a value
    pub required: bool,
}

/// Static description of one entity table
#[derive(Debug)]
pub struct EntitySpec {
    pub entity_type: EntityType,
    pub owner: Owner,
    pub foreign_keys: &'static [ForeignKey],
    pub soft_deletes: bool,
}

const fn fk(
    column: &'static str,
    field: &'static str,
    references: EntityType,
    required: bool,
) -> ForeignKey {
    ForeignKey {
        column,
        field,
        references,
        required,
    }
}

use EntityType::*;

static USERS: EntitySpec = EntitySpec {
    entity_type: Users,
    owner: Owner::Tenant,
    foreign_keys: &[],
    soft_deletes: true,
};

static ACCOUNTS: EntitySpec = EntitySpec {
    entity_type: Accounts,
    owner: Owner::Tenant,
    foreign_keys: &[],
    soft_deletes: true,
};

static TAX_CODES: EntitySpec = EntitySpec {
    entity_type: TaxCodes,
    owner: Owner::Tenant,
    foreign_keys: &[],
    soft_deletes: false,
};

static CATEGORIES: EntitySpec = EntitySpec {
    entity_type: Categories,
    owner: Owner::Tenant,
    foreign_keys: &[fk("account_id", "account_public_id", Accounts, false)],
    soft_deletes: false,
};

static CONTACTS: EntitySpec = EntitySpec {
    entity_type: Contacts,
    owner: Owner::Tenant,
    foreign_keys: &[fk(
        "default_account_id",
        "default_account_public_id",
        Accounts,
        false,
    )],
    soft_deletes: true,
};

static QUOTES: EntitySpec = EntitySpec {
    entity_type: Quotes,
    owner: Owner::Tenant,
    foreign_keys: &[
        fk("contact_id", "contact_public_id", Contacts, true),
        fk("created_by", "created_by_public_id", Users, false),
    ],
    soft_deletes: true,
};

static QUOTE_LINES: EntitySpec = EntitySpec {
    entity_type: QuoteLines,
    owner: Owner::Parent {
        column: "quote_id",
        parent: Quotes,
    },
    foreign_keys: &[
        fk("quote_id", "quote_public_id", Quotes, true),
        fk("tax_code_id", "tax_code_public_id", TaxCodes, false),
    ],
    soft_deletes: false,
};

static INVOICES: EntitySpec = EntitySpec {
    entity_type: Invoices,
    owner: Owner::Tenant,
    foreign_keys: &[
        fk("contact_id", "contact_public_id", Contacts, true),
        fk("quote_id", "quote_public_id", Quotes, false),
        fk("created_by", "created_by_public_id", Users, false),
    ],
    soft_deletes: true,
};

static INVOICE_LINES: EntitySpec = EntitySpec {
    entity_type: InvoiceLines,
    owner: Owner::Parent {
        column: "invoice_id",
        parent: Invoices,
    },
    foreign_keys: &[
        fk("invoice_id", "invoice_public_id", Invoices, true),
        fk("account_id", "account_public_id", Accounts, false),
        fk("tax_code_id", "tax_code_public_id", TaxCodes, false),
    ],
    soft_deletes: false,
};

static JOURNAL_ENTRIES: EntitySpec = EntitySpec {
    entity_type: JournalEntries,
    owner: Owner::Tenant,
    foreign_keys: &[
        fk("invoice_id", "invoice_public_id", Invoices, false),
        fk("created_by", "created_by_public_id", Users, false),
    ],
    soft_deletes: false,
};

static JOURNAL_LINES: EntitySpec = EntitySpec {
    entity_type: JournalLines,
    owner: Owner::Parent {
        column: "journal_entry_id",
        parent: JournalEntries,
    },
    foreign_keys: &[
        fk(
            "journal_entry_id",
            "journal_entry_public_id",
            JournalEntries,
            true,
        ),
        fk("account_id", "account_public_id", Accounts, true),
    ],
    soft_deletes: false,
};

static DOCUMENTS: EntitySpec = EntitySpec {
    entity_type: Documents,
    owner: Owner::Tenant,
    foreign_keys: &[
        fk("invoice_id", "invoice_public_id", Invoices, false),
        fk("contact_id", "contact_public_id", Contacts, false),
        fk("uploaded_by", "uploaded_by_public_id", Users, false),
    ],
    soft_deletes: true,
};

impl EntityType {
    /// Every managed entity type in dependency order
    pub const ALL: [EntityType; 12] = [
        Users,
        Accounts,
        TaxCodes,
        Categories,
        Contacts,
        Quotes,
        QuoteLines,
        Invoices,
        InvoiceLines,
        JournalEntries,
        JournalLines,
        Documents,
    ];

    /// Table name, also the archive stream name
    pub fn as_str(&self) -> &'static str {
        match self {
            Users => "users",
            Accounts => "accounts",
            TaxCodes => "tax_codes",
            Categories => "categories",
            Contacts => "contacts",
            Quotes => "quotes",
            QuoteLines => "quote_lines",
            Invoices => "invoices",
            InvoiceLines => "invoice_lines",
            JournalEntries => "journal_entries",
            JournalLines => "journal_lines",
            Documents => "documents",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    pub fn table(&self) -> &'static str {
        self.as_str()
    }

    pub fn spec(&self) -> &'static EntitySpec {
        match self {
            Users => &USERS,
            Accounts => &ACCOUNTS,
            TaxCodes => &TAX_CODES,
            Categories => &CATEGORIES,
            Contacts => &CONTACTS,
            Quotes => &QUOTES,
            QuoteLines => &QUOTE_LINES,
            Invoices => &INVOICES,
            InvoiceLines => &INVOICE_LINES,
            JournalEntries => &JOURNAL_ENTRIES,
            JournalLines => &JOURNAL_LINES,
            Documents => &DOCUMENTS,
        }
    }

    /// Position in the dependency order
    pub fn position(&self) -> usize {
        Self::ALL
            .iter()
            .position(|t| t == self)
            .unwrap_or(Self::ALL.len())
    }

    /// Archive member holding this type's records
    pub fn data_file(&self) -> String {
        format!("data/{}.ndjson", self.as_str())
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EntitySpec {
    /// SQL predicate restricting `alias` rows to the tenant bound as `?1`
    pub fn tenant_scope(&self, alias: &str) -> String {
        match self.owner {
            Owner::Tenant => format!("{alias}.tenant_id = ?1"),
            Owner::Parent { column, parent } => format!(
                "{alias}.{column} IN (SELECT id FROM {} WHERE tenant_id = ?1)",
                parent.table()
            ),
        }
    }
}
