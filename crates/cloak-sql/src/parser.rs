//! Statement analysis: table, parameter and result-column identity.

use crate::error::SqlError;
use crate::lexical::{self, Placeholder};
use cloak_core::normalize_identifier;
use regex::Regex;
use serde::Serialize;
use sqlparser::ast::{Expr, FromTable, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

/// ORM-generated result labels such as `email3_0_`.
static ORM_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<name>[a-z_][a-z0-9_]*?)\d+_\d+_$").unwrap());

/// Kind of statement, taken from the AST or from the leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementKind {
    Insert,
    Update,
    Select,
    Delete,
    #[default]
    Other,
}

impl StatementKind {
    /// Whether bound parameters of this kind of statement may be written to a column.
    pub fn is_write(&self) -> bool {
        matches!(self, StatementKind::Insert | StatementKind::Update)
    }

    /// Classify by the first keyword, skipping whitespace, comments and parentheses.
    pub fn from_leading_keyword(sql: &str) -> Self {
        let masked = lexical::mask_literals(sql);
        let word: String = masked
            .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_lowercase();
        match word.as_str() {
            "insert" | "replace" => StatementKind::Insert,
            "update" => StatementKind::Update,
            "select" | "with" => StatementKind::Select,
            "delete" => StatementKind::Delete,
            _ => StatementKind::Other,
        }
    }
}

/// A table referenced by the statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    /// Split a possibly qualified object name (`db.schema.table`) into schema and table.
    fn from_object_name(raw: &str, alias: Option<String>) -> Self {
        let mut parts: Vec<String> = raw.split('.').map(normalize_identifier).collect();
        let name = parts.pop().unwrap_or_default();
        Self {
            schema: parts.pop(),
            name,
            alias: alias.map(|a| normalize_identifier(&a)),
        }
    }

    fn answers_to(&self, qualifier: &str) -> bool {
        let qualifier = normalize_identifier(qualifier);
        self.alias.as_deref() == Some(qualifier.as_str()) || self.name == qualifier
    }
}

/// The column a bound parameter is written to or compared against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterTarget {
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column: String,
}

/// The real column behind a result label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnOrigin {
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column: String,
}

/// Everything recovered from one statement.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParsedStatement {
    pub kind: StatementKind,
    /// Primary table: the write target, or the first `FROM` table.
    pub table: Option<String>,
    pub schema: Option<String>,
    pub tables: Vec<TableRef>,
    /// Parameter position (1-based) → column it is written to.
    pub write_parameters: BTreeMap<usize, ParameterTarget>,
    /// Parameter position (1-based) → column it is compared against.
    pub filter_parameters: BTreeMap<usize, ParameterTarget>,
    /// Result label (lowercased) → real column.
    pub column_origins: HashMap<String, ColumnOrigin>,
}

impl ParsedStatement {
    /// A result for text the parser could not handle: kind only, no table.
    pub fn unparsed(kind: StatementKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn has_table(&self) -> bool {
        self.table.is_some()
    }

    pub fn write_target(&self, position: usize) -> Option<&ParameterTarget> {
        self.write_parameters.get(&position)
    }

    pub fn filter_target(&self, position: usize) -> Option<&ParameterTarget> {
        self.filter_parameters.get(&position)
    }

    /// The table a qualifier (alias or bare name) refers to.
    pub fn resolve_qualifier(&self, qualifier: &str) -> Option<&TableRef> {
        self.tables.iter().find(|t| t.answers_to(qualifier))
    }

    /// Real column behind a result label.
    ///
    /// Looks up explicit projection aliases first, then undoes ORM label
    /// suffixes (`email3_0_` → `email`), and finally treats the label as a
    /// column of the primary table. Returns `None` when no table is known.
    pub fn origin_for_label(&self, label: &str) -> Option<ColumnOrigin> {
        let label = normalize_identifier(label);
        if let Some(origin) = self.column_origins.get(&label) {
            return Some(origin.clone());
        }

        let column = ORM_LABEL
            .captures(&label)
            .and_then(|c| c.name("name"))
            .map(|m| m.as_str().to_string())
            .unwrap_or(label);
        if let Some(origin) = self.column_origins.get(&column) {
            return Some(origin.clone());
        }

        self.table.as_ref().map(|table| ColumnOrigin {
            schema: self.schema.clone(),
            table: Some(table.clone()),
            column,
        })
    }

    fn target_for(&self, qualifier: Option<&str>, column: &str) -> ParameterTarget {
        let table = qualifier.and_then(|q| self.resolve_qualifier(q));
        match table {
            Some(t) => ParameterTarget {
                schema: t.schema.clone().or_else(|| self.schema.clone()),
                table: Some(t.name.clone()),
                column: normalize_identifier(column),
            },
            None => ParameterTarget {
                schema: self.schema.clone(),
                table: self.table.clone(),
                column: normalize_identifier(column),
            },
        }
    }
}

/// Best-effort statement analyzer.
pub struct StatementParser {
    dialect: GenericDialect,
}

impl Clone for StatementParser {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Default for StatementParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementParser {
    pub fn new() -> Self {
        Self {
            dialect: GenericDialect {},
        }
    }

    /// Analyze a statement. Never fails; unparseable text yields a table-less result.
    pub fn parse(&self, sql: &str) -> ParsedStatement {
        match self.parse_statement(sql) {
            Ok(stmt) => self.analyze(&stmt, sql),
            Err(e) => {
                let kind = StatementKind::from_leading_keyword(sql);
                if kind.is_write()
                    && let Some(parsed) = self.recover_write(kind, sql)
                {
                    tracing::debug!(error = %e, table = ?parsed.table, "write not parseable, target recovered from text");
                    return parsed;
                }
                tracing::debug!(error = %e, "statement not analyzable, result metadata will be used");
                ParsedStatement::unparsed(kind)
            }
        }
    }

    /// Table and parameter targets of an INSERT or UPDATE the grammar
    /// rejects, read from the text alone.
    fn recover_write(&self, kind: StatementKind, sql: &str) -> Option<ParsedStatement> {
        let masked = lexical::mask_literals(sql);
        let head = lexical::write_head(&masked)?;
        let table = TableRef::from_object_name(&head.table, head.alias);
        let mut parsed = ParsedStatement {
            kind,
            table: Some(table.name.clone()),
            schema: table.schema.clone(),
            tables: vec![table],
            ..Default::default()
        };

        let holders = lexical::placeholders(&masked);
        match kind {
            StatementKind::Insert => self.map_insert(&mut parsed, &masked, &holders, &head.columns),
            _ => self.map_update(&mut parsed, &masked, &holders),
        }
        Some(parsed)
    }

    fn parse_statement(&self, sql: &str) -> Result<Statement, SqlError> {
        let mut statements = Parser::parse_sql(&self.dialect, sql)
            .map_err(|e| SqlError::ParseError(e.to_string()))?;
        if statements.is_empty() {
            return Err(SqlError::Empty);
        }
        Ok(statements.swap_remove(0))
    }

    fn analyze(&self, stmt: &Statement, sql: &str) -> ParsedStatement {
        let mut parsed = ParsedStatement {
            kind: self.get_operation(stmt),
            ..Default::default()
        };
        self.visit_statement(stmt, &mut parsed.tables);

        if let Some(primary) = parsed.tables.first() {
            parsed.table = Some(primary.name.clone());
            parsed.schema = primary.schema.clone();
        } else {
            tracing::debug!(error = %SqlError::NoTable, "statement has no table reference");
            return ParsedStatement::unparsed(parsed.kind);
        }

        let masked = lexical::mask_literals(sql);
        let holders = lexical::placeholders(&masked);

        match stmt {
            Statement::Insert(insert) => {
                let columns: Vec<String> = insert.columns.iter().map(|c| c.to_string()).collect();
                self.map_insert(&mut parsed, &masked, &holders, &columns);
            }
            Statement::Update(_) => self.map_update(&mut parsed, &masked, &holders),
            Statement::Query(query) => {
                self.collect_origins(&mut parsed, &query.body);
                self.map_filters(&mut parsed, &masked, &holders);
            }
            Statement::Delete(_) => self.map_filters(&mut parsed, &masked, &holders),
            _ => {}
        }

        parsed
    }

    fn map_insert(
        &self,
        parsed: &mut ParsedStatement,
        masked: &str,
        holders: &[Placeholder],
        columns: &[String],
    ) {
        let rows = lexical::find_top_level_keyword(masked, "values")
            .map(|at| lexical::values_rows(masked, at))
            .unwrap_or_default();
        let where_at = lexical::find_top_level_keyword(masked, "where");

        for holder in holders {
            let item = rows.iter().find_map(|row| {
                row.iter()
                    .position(|(start, end)| (*start..*end).contains(&holder.offset))
            });
            if let Some(index) = item {
                if let Some(column) = columns.get(index) {
                    let target = parsed.target_for(None, column);
                    parsed.write_parameters.entry(holder.position).or_insert(target);
                }
                continue;
            }

            // `ON CONFLICT ... SET col = ?` and friends
            if let Some((qualifier, column)) = lexical::comparison_target(&masked[..holder.offset]) {
                let target = parsed.target_for(qualifier.as_deref(), &column);
                let is_filter = where_at.is_some_and(|w| holder.offset > w);
                let slot = if is_filter {
                    &mut parsed.filter_parameters
                } else {
                    &mut parsed.write_parameters
                };
                slot.entry(holder.position).or_insert(target);
            }
        }
    }

    fn map_update(&self, parsed: &mut ParsedStatement, masked: &str, holders: &[Placeholder]) {
        let where_at = lexical::find_top_level_keyword(masked, "where");

        for holder in holders {
            let Some((qualifier, column)) = lexical::comparison_target(&masked[..holder.offset])
            else {
                continue;
            };
            let target = parsed.target_for(qualifier.as_deref(), &column);
            let is_filter = where_at.is_some_and(|w| holder.offset > w);
            let slot = if is_filter {
                &mut parsed.filter_parameters
            } else {
                &mut parsed.write_parameters
            };
            slot.entry(holder.position).or_insert(target);
        }
    }

    fn map_filters(&self, parsed: &mut ParsedStatement, masked: &str, holders: &[Placeholder]) {
        for holder in holders {
            if let Some((qualifier, column)) = lexical::comparison_target(&masked[..holder.offset]) {
                let target = parsed.target_for(qualifier.as_deref(), &column);
                parsed.filter_parameters.entry(holder.position).or_insert(target);
            }
        }
    }

    fn collect_origins(&self, parsed: &mut ParsedStatement, body: &SetExpr) {
        let SetExpr::Select(select) = body else {
            return;
        };

        for item in &select.projection {
            let (expr, label) = match item {
                SelectItem::UnnamedExpr(expr) => (expr, None),
                SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias.value.clone())),
                _ => continue,
            };
            let (qualifier, column) = match expr {
                Expr::Identifier(ident) => (None, ident.value.clone()),
                Expr::CompoundIdentifier(idents) if !idents.is_empty() => {
                    let column = idents[idents.len() - 1].value.clone();
                    let qualifier = (idents.len() >= 2).then(|| idents[idents.len() - 2].value.clone());
                    (qualifier, column)
                }
                _ => continue,
            };

            let target = parsed.target_for(qualifier.as_deref(), &column);
            let label = normalize_identifier(label.as_deref().unwrap_or(&column));
            parsed.column_origins.insert(
                label,
                ColumnOrigin {
                    schema: target.schema,
                    table: target.table,
                    column: target.column,
                },
            );
        }
    }

    fn visit_statement(&self, stmt: &Statement, tables: &mut Vec<TableRef>) {
        match stmt {
            Statement::Query(query) => {
                if let Some(body) = query.body.as_select() {
                    for table_with_joins in &body.from {
                        self.visit_table_with_joins(table_with_joins, tables);
                    }
                }
            }
            Statement::Insert(insert) => {
                tables.push(TableRef::from_object_name(&insert.table.to_string(), None));
            }
            Statement::Update(update) => {
                self.visit_table_with_joins(&update.table, tables);
            }
            Statement::Delete(delete) => match &delete.from {
                FromTable::WithFromKeyword(tables_with_joins)
                | FromTable::WithoutKeyword(tables_with_joins) => {
                    for twj in tables_with_joins {
                        self.visit_table_with_joins(twj, tables);
                    }
                }
            },
            _ => {}
        }
    }

    fn visit_table_with_joins(&self, table_with_joins: &TableWithJoins, tables: &mut Vec<TableRef>) {
        if let Some(name) = self.extract_table_name(&table_with_joins.relation) {
            let alias = self.extract_table_alias(&table_with_joins.relation);
            tables.push(TableRef::from_object_name(&name, alias));
        }

        for join in &table_with_joins.joins {
            if let Some(name) = self.extract_table_name(&join.relation) {
                let alias = self.extract_table_alias(&join.relation);
                tables.push(TableRef::from_object_name(&name, alias));
            }
        }
    }

    fn extract_table_name(&self, table_factor: &TableFactor) -> Option<String> {
        match table_factor {
            TableFactor::Table { name, .. } => Some(name.to_string()),
            _ => None,
        }
    }

    fn extract_table_alias(&self, table_factor: &TableFactor) -> Option<String> {
        match table_factor {
            TableFactor::Table { alias, .. } => alias.as_ref().map(|a| a.name.value.clone()),
            _ => None,
        }
    }

    fn get_operation(&self, stmt: &Statement) -> StatementKind {
        match stmt {
            Statement::Query(_) => StatementKind::Select,
            Statement::Insert { .. } => StatementKind::Insert,
            Statement::Update { .. } => StatementKind::Update,
            Statement::Delete(_) => StatementKind::Delete,
            _ => StatementKind::Other,
        }
    }
}
