//! SQL text for temp-table DDL and temp-to-destination reconciliation.

use crate::value::{EnumRepr, FieldKind};

/// Column of a synthesized temp table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempColumn {
    pub name: String,
    pub sql_type: String,
    pub nullable: bool,
}

/// Inputs of a reconciliation statement from a temp table into its
/// destination.
#[derive(Debug, Clone, Copy)]
pub struct MergePlan<'a> {
    pub target: &'a str,
    pub source: &'a str,
    pub match_keys: &'a [String],
    /// Assigned on match. Empty means matched rows are left alone.
    pub update_columns: &'a [String],
    /// Written for source rows without a match.
    pub insert_columns: &'a [String],
    pub insert_unmatched: bool,
}

pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    fn quote_ident(&self, ident: &str) -> String;

    /// Quote a possibly schema-qualified table name part by part.
    fn quote_table(&self, table: &str) -> String {
        table
            .split('.')
            .map(|part| self.quote_ident(unquote(part)))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Fixed name-based SQL type of a property kind.
    fn column_type(&self, kind: FieldKind) -> String;

    /// Temp table name template for `destination`; `*` marks the unique token.
    fn default_temp_template(&self, destination: &str) -> String;

    /// Empty table mirroring the column set of `destination`.
    fn create_clone_table(&self, table: &str, destination: &str) -> String;

    fn create_table(&self, table: &str, columns: &[TempColumn]) -> String;

    fn drop_table(&self, table: &str) -> String;

    fn merge(&self, plan: &MergePlan<'_>) -> String;

    /// `INSERT … SELECT` from `source` into `target`, every column when
    /// `columns` is `None`.
    fn insert_select(&self, target: &str, source: &str, columns: Option<&[String]>) -> String {
        match columns {
            Some(columns) => {
                let list = self.column_list(columns, None);
                format!(
                    "INSERT INTO {} ({}) SELECT {} FROM {}",
                    self.quote_table(target),
                    list,
                    list,
                    self.quote_table(source)
                )
            }
            None => format!(
                "INSERT INTO {} SELECT * FROM {}",
                self.quote_table(target),
                self.quote_table(source)
            ),
        }
    }

    fn column_list(&self, columns: &[String], prefix: Option<&str>) -> String {
        columns
            .iter()
            .map(|c| match prefix {
                Some(p) => format!("{}.{}", p, self.quote_ident(c)),
                None => self.quote_ident(c),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn unquote(part: &str) -> &str {
    part.trim()
        .trim_start_matches(['[', '"', '`'])
        .trim_end_matches([']', '"', '`'])
}

/// Last segment of a table name without quoting, for use inside names.
fn bare_name(table: &str) -> &str {
    unquote(table.rsplit('.').next().unwrap_or(table))
}

fn key_condition<D: Dialect + ?Sized>(dialect: &D, target: &str, source: &str, keys: &[String]) -> String {
    keys.iter()
        .map(|k| {
            let column = dialect.quote_ident(k);
            format!("{}.{} = {}.{}", target, column, source, column)
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn column_type(&self, kind: FieldKind) -> String {
        match kind {
            FieldKind::Text | FieldKind::Enum(EnumRepr::Text) | FieldKind::DateTime => "TEXT",
            FieldKind::Bool
            | FieldKind::Int
            | FieldKind::BigInt
            | FieldKind::Enum(EnumRepr::Int) => "INTEGER",
            FieldKind::Float | FieldKind::Double => "REAL",
            FieldKind::Decimal => "NUMERIC",
            FieldKind::Bytes => "BLOB",
            FieldKind::Unsupported(_) => "TEXT",
        }
        .to_string()
    }

    fn default_temp_template(&self, destination: &str) -> String {
        format!("{}_tmp_*", bare_name(destination))
    }

    fn create_clone_table(&self, table: &str, destination: &str) -> String {
        format!(
            "CREATE TABLE {} AS SELECT * FROM {} WHERE 0",
            self.quote_table(table),
            self.quote_table(destination)
        )
    }

    fn create_table(&self, table: &str, columns: &[TempColumn]) -> String {
        let defs: Vec<String> = columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", self.quote_ident(&c.name), c.sql_type);
                if !c.nullable {
                    def.push_str(" NOT NULL");
                }
                def
            })
            .collect();
        format!("CREATE TABLE {} ({})", self.quote_table(table), defs.join(", "))
    }

    fn drop_table(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote_table(table))
    }

    fn merge(&self, plan: &MergePlan<'_>) -> String {
        let target = self.quote_table(plan.target);
        let source = self.quote_table(plan.source);
        let mut statements = Vec::new();

        if !plan.update_columns.is_empty() {
            let assignments: Vec<String> = plan
                .update_columns
                .iter()
                .map(|c| {
                    let column = self.quote_ident(c);
                    format!("{} = src.{}", column, column)
                })
                .collect();
            statements.push(format!(
                "UPDATE {} SET {} FROM {} AS src WHERE {}",
                target,
                assignments.join(", "),
                source,
                key_condition(self, &target, "src", plan.match_keys)
            ));
        }

        if plan.insert_unmatched {
            statements.push(format!(
                "INSERT INTO {} ({}) SELECT {} FROM {} AS src WHERE NOT EXISTS (SELECT 1 FROM {} WHERE {})",
                target,
                self.column_list(plan.insert_columns, None),
                self.column_list(plan.insert_columns, Some("src")),
                source,
                target,
                key_condition(self, &target, "src", plan.match_keys)
            ));
        }

        statements.join(";\n")
    }
}

/// SQL Server flavour: `MERGE` and `##` global temp tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct TSqlDialect;

impl Dialect for TSqlDialect {
    fn name(&self) -> &'static str {
        "tsql"
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn column_type(&self, kind: FieldKind) -> String {
        match kind {
            FieldKind::Text | FieldKind::Enum(EnumRepr::Text) => "NVARCHAR(MAX)".to_string(),
            FieldKind::Bool => "BIT".to_string(),
            FieldKind::Float | FieldKind::Double => "FLOAT".to_string(),
            FieldKind::Decimal => "DECIMAL(38, 10)".to_string(),
            FieldKind::Bytes => "VARBINARY(MAX)".to_string(),
            FieldKind::Unsupported(_) => "NVARCHAR(MAX)".to_string(),
            other => other.type_name().to_ascii_uppercase(),
        }
    }

    fn default_temp_template(&self, destination: &str) -> String {
        format!("##{}_*", bare_name(destination))
    }

    fn create_clone_table(&self, table: &str, destination: &str) -> String {
        format!(
            "SELECT TOP 0 * INTO {} FROM {}",
            self.quote_table(table),
            self.quote_table(destination)
        )
    }

    fn create_table(&self, table: &str, columns: &[TempColumn]) -> String {
        let defs: Vec<String> = columns
            .iter()
            .map(|c| {
                format!(
                    "{} {} {}",
                    self.quote_ident(&c.name),
                    c.sql_type,
                    if c.nullable { "NULL" } else { "NOT NULL" }
                )
            })
            .collect();
        format!("CREATE TABLE {} ({})", self.quote_table(table), defs.join(", "))
    }

    fn drop_table(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote_table(table))
    }

    fn merge(&self, plan: &MergePlan<'_>) -> String {
        let mut sql = format!(
            "MERGE INTO {} AS tgt USING {} AS src ON {}",
            self.quote_table(plan.target),
            self.quote_table(plan.source),
            key_condition(self, "tgt", "src", plan.match_keys)
        );

        if !plan.update_columns.is_empty() {
            let assignments: Vec<String> = plan
                .update_columns
                .iter()
                .map(|c| {
                    let column = self.quote_ident(c);
                    format!("tgt.{} = src.{}", column, column)
                })
                .collect();
            sql.push_str(&format!(
                "\nWHEN MATCHED THEN UPDATE SET {}",
                assignments.join(", ")
            ));
        }

        if plan.insert_unmatched {
            sql.push_str(&format!(
                "\nWHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
                self.column_list(plan.insert_columns, None),
                self.column_list(plan.insert_columns, Some("src"))
            ));
        }

        sql.push(';');
        sql
    }
}
