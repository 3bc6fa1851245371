// Introspected schema model
// Engine-neutral catalog -> namespace -> relation hierarchy

use serde::{Deserialize, Serialize};

/// Filter controlling which parts of the schema are introspected.
///
/// An empty namespace allow-list yields an empty schema, never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataScope {
    /// Explicit namespace allow-list; `None` means all non-system namespaces.
    pub namespaces: Option<Vec<String>>,
    pub include_tables: bool,
    pub include_views: bool,
    pub include_procedures: bool,
}

impl Default for MetadataScope {
    fn default() -> Self {
        Self {
            namespaces: None,
            include_tables: true,
            include_views: true,
            include_procedures: true,
        }
    }
}

impl MetadataScope {
    /// Scope restricted to the given namespaces, everything included.
    pub fn for_namespaces(namespaces: Vec<String>) -> Self {
        Self { namespaces: Some(namespaces), ..Self::default() }
    }
}

/// Identifies exactly one relation; value-equal and hashable so it can key
/// per-table state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableIdentifier {
    pub catalog: String,
    pub namespace: String,
    pub name: String,
}

impl TableIdentifier {
    pub fn new(
        catalog: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self { catalog: catalog.into(), namespace: namespace.into(), name: name.into() }
    }
}

impl std::fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.catalog, self.namespace, self.name)
    }
}

/// A column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub column_default: Option<String>,
}

/// A table and its columns. `primary_key` names a subset of `columns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
}

impl Table {
    /// Whether every primary-key column actually exists on the table.
    pub fn primary_key_is_consistent(&self) -> bool {
        self.primary_key
            .iter()
            .all(|pk| self.columns.iter().any(|c| c.name == *pk))
    }
}

/// A view, with its defining query when the engine exposes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub name: String,
    pub definition: Option<String>,
}

/// Direction of a stored-procedure parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamDirection {
    In,
    Out,
    InOut,
}

impl ParamDirection {
    /// Parse the SQL-standard mode string ("IN", "OUT", "INOUT").
    pub fn from_mode(mode: &str) -> Self {
        match mode.to_ascii_uppercase().as_str() {
            "OUT" => ParamDirection::Out,
            "INOUT" => ParamDirection::InOut,
            _ => ParamDirection::In,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureParam {
    pub name: String,
    pub data_type: String,
    pub direction: ParamDirection,
}

/// A stored procedure or function with its ordered parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    pub name: String,
    pub params: Vec<ProcedureParam>,
}

/// A namespace ("schema" in most engines) grouping relations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    pub tables: Vec<Table>,
    pub views: Vec<View>,
    pub procedures: Vec<Procedure>,
}

impl Namespace {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Sort the namespace's relations by name for deterministic output.
    pub fn sort_by_name(&mut self) {
        self.tables.sort_by(|a, b| a.name.cmp(&b.name));
        self.views.sort_by(|a, b| a.name.cmp(&b.name));
        self.procedures.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

/// A catalog ("database" in most engines) grouping namespaces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub name: String,
    pub namespaces: Vec<Namespace>,
}

/// The full introspected hierarchy, sorted by name at every level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub catalogs: Vec<Catalog>,
}

impl Schema {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sort catalogs, namespaces and relations by name.
    pub fn sort_by_name(&mut self) {
        self.catalogs.sort_by(|a, b| a.name.cmp(&b.name));
        for catalog in &mut self.catalogs {
            catalog.namespaces.sort_by(|a, b| a.name.cmp(&b.name));
            for namespace in &mut catalog.namespaces {
                namespace.sort_by_name();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scope_includes_everything() {
        let scope = MetadataScope::default();
        assert!(scope.namespaces.is_none());
        assert!(scope.include_tables);
        assert!(scope.include_views);
        assert!(scope.include_procedures);
    }

    #[test]
    fn test_table_identifier_is_a_map_key() {
        use std::collections::HashMap;

        let a = TableIdentifier::new("db", "public", "artists");
        let b = TableIdentifier::new("db", "public", "artists");
        let mut map = HashMap::new();
        map.insert(a, 1);
        assert_eq!(map.get(&b), Some(&1));
    }

    #[test]
    fn test_primary_key_subset_check() {
        let table = Table {
            name: "t".to_string(),
            columns: vec![Column {
                name: "id".to_string(),
                data_type: "integer".to_string(),
                is_nullable: false,
                column_default: None,
            }],
            primary_key: vec!["id".to_string()],
        };
        assert!(table.primary_key_is_consistent());

        let broken = Table { primary_key: vec!["missing".to_string()], ..table };
        assert!(!broken.primary_key_is_consistent());
    }

    #[test]
    fn test_schema_sorts_every_level() {
        let mut schema = Schema {
            catalogs: vec![Catalog {
                name: "db".to_string(),
                namespaces: vec![
                    Namespace {
                        name: "zeta".to_string(),
                        views: vec![
                            View { name: "v2".to_string(), definition: None },
                            View { name: "v1".to_string(), definition: None },
                        ],
                        ..Namespace::default()
                    },
                    Namespace::named("alpha"),
                ],
            }],
        };

        schema.sort_by_name();

        let names: Vec<&str> = schema.catalogs[0]
            .namespaces
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);

        let views: Vec<&str> = schema.catalogs[0].namespaces[1]
            .views
            .iter()
            .map(|v| v.name.as_str())
            .collect();
        assert_eq!(views, vec!["v1", "v2"]);
    }

    #[test]
    fn test_param_direction_parsing() {
        assert_eq!(ParamDirection::from_mode("IN"), ParamDirection::In);
        assert_eq!(ParamDirection::from_mode("out"), ParamDirection::Out);
        assert_eq!(ParamDirection::from_mode("InOut"), ParamDirection::InOut);
        assert_eq!(ParamDirection::from_mode(""), ParamDirection::In);
    }
}
