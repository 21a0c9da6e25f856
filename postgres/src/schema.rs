use pg_escape::quote_identifier;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Semantic type of a target column.
///
/// The type drives how a JSON value is rendered as text for `COPY` and for parameterized
/// statements, and which Postgres type the rendered text is cast to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Integer,
    BigInteger,
    String,
    DateTime,
    Uuid,
    Boolean,
    Json,
}

impl ColumnType {
    /// Returns the Postgres type name used in casts.
    pub fn pg_type_name(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::BigInteger => "bigint",
            ColumnType::String => "text",
            ColumnType::DateTime => "timestamp",
            ColumnType::Uuid => "uuid",
            ColumnType::Boolean => "boolean",
            ColumnType::Json => "jsonb",
        }
    }
}

/// Declarative description of a target column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSchema {
    /// The name of the column.
    pub name: &'static str,
    /// The semantic type of the column.
    pub typ: ColumnType,
    /// Whether the column can contain NULL values.
    pub nullable: bool,
    /// Whether the column is part of the table's primary key.
    pub primary_key: bool,
    /// Text rendering of the value used when a row does not carry the column.
    pub default: Option<&'static str>,
}

impl ColumnSchema {
    /// Creates a non-nullable, non-key column without default.
    pub const fn new(name: &'static str, typ: ColumnType) -> Self {
        Self {
            name,
            typ,
            nullable: false,
            primary_key: false,
            default: None,
        }
    }

    /// Marks the column as nullable.
    pub const fn nullable(self) -> Self {
        Self {
            nullable: true,
            ..self
        }
    }

    /// Marks the column as part of the primary key.
    pub const fn primary_key(self) -> Self {
        Self {
            primary_key: true,
            ..self
        }
    }

    /// Sets the text rendering used when the value is missing.
    pub const fn with_default(self, default: &'static str) -> Self {
        Self {
            default: Some(default),
            ..self
        }
    }
}

/// Declarative description of a target table: name, columns and primary key.
///
/// Models are declared as statics and referenced by every row that targets the table, so
/// two models are the same table when their qualified names are equal.
#[derive(Debug)]
pub struct TableModel {
    /// Schema containing the table, `None` for the connection's search path.
    pub schema: Option<&'static str>,
    /// The name of the table.
    pub name: &'static str,
    /// Columns in table order.
    pub columns: &'static [ColumnSchema],
}

impl TableModel {
    /// Creates a model for a table of the default schema.
    pub const fn new(name: &'static str, columns: &'static [ColumnSchema]) -> Self {
        Self {
            schema: None,
            name,
            columns,
        }
    }

    /// Returns the column named `name`.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Returns the names of all columns in table order.
    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|column| column.name)
    }

    /// Returns the primary key columns in table order.
    pub fn primary_key(&self) -> impl Iterator<Item = &ColumnSchema> + '_ {
        self.columns.iter().filter(|column| column.primary_key)
    }

    /// Returns the table name as a properly quoted Postgres identifier.
    pub fn as_quoted_identifier(&self) -> String {
        match self.schema {
            Some(schema) => format!(
                "{}.{}",
                quote_identifier(schema),
                quote_identifier(self.name)
            ),
            None => quote_identifier(self.name).into_owned(),
        }
    }

    /// Returns the comma separated, quoted column list.
    pub fn quoted_column_list(&self) -> String {
        self.columns
            .iter()
            .map(|column| quote_identifier(column.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl PartialEq for TableModel {
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema && self.name == other.name
    }
}

impl Eq for TableModel {}

impl Hash for TableModel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.schema.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for TableModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static PIDS: TableModel = TableModel::new(
        "pidstore_pid",
        &[
            ColumnSchema::new("id", ColumnType::Integer).primary_key(),
            ColumnSchema::new("pid_value", ColumnType::String),
            ColumnSchema::new("object_uuid", ColumnType::Uuid).nullable(),
            ColumnSchema::new("pid_provider", ColumnType::String)
                .nullable()
                .with_default(""),
        ],
    );

    #[test]
    fn primary_key_columns_are_selected() {
        let keys: Vec<_> = PIDS.primary_key().map(|column| column.name).collect();
        assert_eq!(keys, vec!["id"]);
    }

    #[test]
    fn column_lookup_and_flags() {
        let column = PIDS.column("object_uuid").unwrap();
        assert!(column.nullable);
        assert!(!column.primary_key);
        assert_eq!(PIDS.column("pid_provider").unwrap().default, Some(""));
        assert!(PIDS.column("missing").is_none());
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(PIDS.as_quoted_identifier(), "pidstore_pid");
        assert_eq!(
            PIDS.quoted_column_list(),
            "id, pid_value, object_uuid, pid_provider"
        );

        static QUOTED: TableModel = TableModel {
            schema: Some("public"),
            name: "User",
            columns: &[],
        };
        assert_eq!(QUOTED.as_quoted_identifier(), "public.\"User\"");
        assert_eq!(QUOTED.to_string(), "public.User");
    }
}
