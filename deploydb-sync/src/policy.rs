//! Pre-execution policy rules.
//!
//! The engine asks every rule in order; the first rejection wins. A rule that
//! cannot decide (the lookup failed) returns a [`PolicyError`]. The pass never
//! admits such a file: an unreachable database aborts it, anything else fails
//! that file.

use deploydb_core::{ChangedFile, Database, DbError, ObjectType, Session};

use crate::error::PolicyError;

/// Verdict for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected { rule: String, reason: String },
}

/// Read-only view of the target database that rules may consult.
pub trait ObjectLookup {
    /// Whether the object a script defines already exists in its database.
    fn object_exists(&mut self, file: &ChangedFile) -> Result<bool, DbError>;
}

/// A single admission rule.
pub trait PolicyRule: Send + Sync {
    /// Stable identifier, reported with rejections.
    fn name(&self) -> &'static str;

    fn evaluate(
        &self,
        file: &ChangedFile,
        lookup: &mut dyn ObjectLookup,
    ) -> Result<Admission, PolicyError>;
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Ordered rule set.
pub struct PolicyEngine {
    rules: Vec<Box<dyn PolicyRule>>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::empty().with_rule(ExistingTableRule)
    }
}

impl PolicyEngine {
    /// Engine that admits everything.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: impl PolicyRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn admit(
        &self,
        file: &ChangedFile,
        lookup: &mut dyn ObjectLookup,
    ) -> Result<Admission, PolicyError> {
        for rule in &self.rules {
            let verdict = rule.evaluate(file, lookup)?;
            if let Admission::Rejected { .. } = verdict {
                return Ok(verdict);
            }
        }
        Ok(Admission::Admitted)
    }
}

// ---------------------------------------------------------------------------
// Built-in rules
// ---------------------------------------------------------------------------

/// Skips `Tables` scripts whose table already exists in the target database.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExistingTableRule;

impl PolicyRule for ExistingTableRule {
    fn name(&self) -> &'static str {
        "existing-table"
    }

    fn evaluate(
        &self,
        file: &ChangedFile,
        lookup: &mut dyn ObjectLookup,
    ) -> Result<Admission, PolicyError> {
        if file.object_type != ObjectType::Tables {
            return Ok(Admission::Admitted);
        }
        let exists = lookup
            .object_exists(file)
            .map_err(|source| PolicyError::Lookup {
                rule: self.name(),
                path: file.path.clone(),
                source,
            })?;
        tracing::debug!(
            "db:{} type:{} name:{} exists:{exists}",
            file.database,
            file.object_type,
            file.object_name
        );
        if exists {
            return Ok(Admission::Rejected {
                rule: self.name().to_string(),
                reason: format!(
                    "table {} already exists in {}",
                    file.object_name, file.database
                ),
            });
        }
        Ok(Admission::Admitted)
    }
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

const OBJECT_LOOKUP_SQL: &str = "SELECT 1 FROM sqlite_master \
     WHERE type = ?1 AND (name = ?2 COLLATE NOCASE OR name = ?3 COLLATE NOCASE) LIMIT 1";

/// `sqlite_master` object kind for a script folder, if it defines a
/// catalogued object.
fn catalog_kind(object_type: ObjectType) -> Option<&'static str> {
    match object_type {
        ObjectType::Tables => Some("table"),
        ObjectType::Views => Some("view"),
        ObjectType::Triggers => Some("trigger"),
        _ => None,
    }
}

/// Look `file`'s object up through an open session. Both the qualified
/// (`dbo.Customers`) and bare (`Customers`) names match.
pub fn object_exists_in(session: &mut dyn Session, file: &ChangedFile) -> Result<bool, DbError> {
    let Some(kind) = catalog_kind(file.object_type) else {
        return Ok(false);
    };
    let rows = session.query(
        OBJECT_LOOKUP_SQL,
        &[
            kind.into(),
            file.object_name.as_str().into(),
            file.unqualified_name().into(),
        ],
    )?;
    Ok(!rows.is_empty())
}

/// Looks objects up in the file's own database, opening it read-only.
/// A database that does not exist yet holds no objects.
pub struct CatalogLookup<'a> {
    db: &'a dyn Database,
}

impl<'a> CatalogLookup<'a> {
    pub fn new(db: &'a dyn Database) -> Self {
        Self { db }
    }
}

impl ObjectLookup for CatalogLookup<'_> {
    fn object_exists(&mut self, file: &ChangedFile) -> Result<bool, DbError> {
        match self.db.connect_existing(&file.database)? {
            Some(mut session) => object_exists_in(session.as_mut(), file),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use deploydb_core::classify;
    use tempfile::TempDir;

    use super::*;
    use crate::sqlite::SqliteDatabase;

    fn file(path: &str) -> ChangedFile {
        classify(path).unwrap().unwrap()
    }

    /// Fixed set of existing object names; counts lookups.
    #[derive(Default)]
    struct FakeCatalog {
        existing: HashSet<String>,
        fail: bool,
        lookups: usize,
    }

    impl ObjectLookup for FakeCatalog {
        fn object_exists(&mut self, file: &ChangedFile) -> Result<bool, DbError> {
            self.lookups += 1;
            if self.fail {
                return Err(DbError::Database {
                    message: "catalog unavailable".to_string(),
                });
            }
            Ok(self.existing.contains(&file.object_name))
        }
    }

    struct RejectDmls;

    impl PolicyRule for RejectDmls {
        fn name(&self) -> &'static str {
            "no-dml"
        }
        fn evaluate(
            &self,
            file: &ChangedFile,
            _: &mut dyn ObjectLookup,
        ) -> Result<Admission, PolicyError> {
            if file.is_dml() {
                return Ok(Admission::Rejected {
                    rule: self.name().to_string(),
                    reason: "frozen".to_string(),
                });
            }
            Ok(Admission::Admitted)
        }
    }

    #[test]
    fn existing_table_is_rejected() {
        let mut lookup = FakeCatalog::default();
        lookup.existing.insert("dbo.Customers".to_string());
        let verdict = PolicyEngine::default()
            .admit(&file("SalesDB/Tables/dbo.Customers.sql"), &mut lookup)
            .unwrap();
        assert!(matches!(verdict, Admission::Rejected { ref rule, .. } if rule == "existing-table"));
    }

    #[test]
    fn new_table_is_admitted() {
        let mut lookup = FakeCatalog::default();
        let verdict = PolicyEngine::default()
            .admit(&file("SalesDB/Tables/dbo.Orders.sql"), &mut lookup)
            .unwrap();
        assert_eq!(verdict, Admission::Admitted);
        assert_eq!(lookup.lookups, 1);
    }

    #[test]
    fn non_table_types_are_admitted_without_probing() {
        let mut lookup = FakeCatalog::default();
        lookup.existing.insert("dbo.Summary".to_string());
        let verdict = PolicyEngine::default()
            .admit(&file("SalesDB/Views/dbo.Summary.sql"), &mut lookup)
            .unwrap();
        assert_eq!(verdict, Admission::Admitted);
        assert_eq!(lookup.lookups, 0);
    }

    #[test]
    fn lookup_failure_is_an_error_not_an_admission() {
        let mut lookup = FakeCatalog {
            fail: true,
            ..FakeCatalog::default()
        };
        let err = PolicyEngine::default()
            .admit(&file("SalesDB/Tables/dbo.Orders.sql"), &mut lookup)
            .unwrap_err();
        assert!(err.to_string().contains("catalog unavailable"));
    }

    #[test]
    fn first_rejection_wins_in_rule_order() {
        let engine = PolicyEngine::default().with_rule(RejectDmls);
        assert_eq!(engine.rule_names(), vec!["existing-table", "no-dml"]);

        let mut lookup = FakeCatalog::default();
        let verdict = engine
            .admit(&file("SalesDB/DMLs/seed.sql"), &mut lookup)
            .unwrap();
        assert!(matches!(verdict, Admission::Rejected { ref rule, .. } if rule == "no-dml"));
    }

    #[test]
    fn empty_engine_admits_everything() {
        let mut lookup = FakeCatalog::default();
        lookup.existing.insert("dbo.Customers".to_string());
        let verdict = PolicyEngine::empty()
            .admit(&file("SalesDB/Tables/dbo.Customers.sql"), &mut lookup)
            .unwrap();
        assert_eq!(verdict, Admission::Admitted);
    }

    #[test]
    fn catalog_lookup_matches_qualified_and_bare_names() {
        let dir = TempDir::new().unwrap();
        let db = SqliteDatabase::new(dir.path());
        db.connect("SalesDB")
            .unwrap()
            .execute_batch("CREATE TABLE Customers (id INTEGER PRIMARY KEY);")
            .unwrap();

        let mut lookup = CatalogLookup::new(&db);
        assert!(lookup
            .object_exists(&file("SalesDB/Tables/dbo.Customers.sql"))
            .unwrap());
        assert!(lookup
            .object_exists(&file("SalesDB/Tables/customers.sql"))
            .unwrap());
        assert!(!lookup
            .object_exists(&file("SalesDB/Tables/dbo.Orders.sql"))
            .unwrap());
        // A view of the same name is a different catalog entry.
        assert!(!lookup
            .object_exists(&file("SalesDB/Views/dbo.Customers.sql"))
            .unwrap());
    }

    #[test]
    fn catalog_lookup_leaves_missing_databases_alone() {
        let dir = TempDir::new().unwrap();
        let db = SqliteDatabase::new(dir.path());

        let mut lookup = CatalogLookup::new(&db);
        assert!(!lookup
            .object_exists(&file("NewDB/Tables/dbo.Customers.sql"))
            .unwrap());
        assert!(!dir.path().join("NewDB.db").exists());
    }
}
