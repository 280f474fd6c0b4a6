//! Column pre-processing: raw column definitions -> compiled relations
//!
//! Each column type has a pre-processor that decides whether the column can
//! take part in relation resolution at all. A column that cannot is compiled
//! to `Relation::None` and the reason is logged; it is never an error.

use std::collections::BTreeSet;

use super::models::{ColumnDefinition, ColumnType};
use super::relation::{
    DirectReference, InlineRelation, MM_UID_FOREIGN, MM_UID_LOCAL, ManyToMany, MmTarget, Relation,
    SubDocument,
};

/// Default separator between ids in a column value
const DEFAULT_DELIMITER: &str = ",";

/// Knowledge available while compiling a schema
#[derive(Debug, Clone, Default)]
pub struct CompileContext {
    /// All declared table names
    pub known_tables: BTreeSet<String>,
}

impl CompileContext {
    pub fn new(known_tables: BTreeSet<String>) -> Self {
        Self { known_tables }
    }

    fn require_table(&self, table: &str) -> Result<(), String> {
        if self.known_tables.contains(table) {
            Ok(())
        } else {
            Err(format!("table '{}' is not declared in the schema", table))
        }
    }
}

/// Compiles columns of one type into relations
pub trait PreProcessor {
    /// Column type handled by this pre-processor
    fn column_type(&self) -> ColumnType;

    /// Check the column configuration; `Err` carries the reason it is not a relation
    fn check(&self, ctx: &CompileContext, column: &ColumnDefinition) -> Result<(), String>;

    /// Build the relation. Only called after a successful `check`.
    fn build(&self, table: &str, column: &ColumnDefinition) -> Relation;

    fn can_pre_process(&self, ctx: &CompileContext, column: &ColumnDefinition) -> bool {
        self.check(ctx, column).is_ok()
    }
}

/// Compile a single column with the matching pre-processor
pub fn compile_column(ctx: &CompileContext, table: &str, column: &ColumnDefinition) -> Relation {
    let processor: &dyn PreProcessor = match column.column_type {
        ColumnType::Select => &SelectProcessor,
        ColumnType::Group => &GroupProcessor,
        ColumnType::Inline => &InlineProcessor,
        ColumnType::Flex => &FlexProcessor,
        ColumnType::None | ColumnType::Other => return Relation::None,
    };

    match processor.check(ctx, column) {
        Ok(()) => processor.build(table, column),
        Err(reason) => {
            log::debug!(
                "Column {}.{} ({}) is not a relation: {}",
                table,
                column.name,
                processor.column_type().label(),
                reason
            );
            Relation::None
        }
    }
}

fn check_mm(ctx: &CompileContext, column: &ColumnDefinition) -> Result<(), String> {
    if let Some(mm) = &column.mm {
        ctx.require_table(mm)?;
    }
    Ok(())
}

fn build_mm(table: &str, column: &ColumnDefinition, mm_table: &str, target: MmTarget) -> Relation {
    let (self_field, target_field) = if column.mm_opposite_field.is_some() {
        (MM_UID_FOREIGN, MM_UID_LOCAL)
    } else {
        (MM_UID_LOCAL, MM_UID_FOREIGN)
    };
    Relation::ManyToMany(ManyToMany {
        table: table.to_string(),
        column: column.name.clone(),
        mm_table: mm_table.to_string(),
        self_field: self_field.to_string(),
        target_field: target_field.to_string(),
        target,
        match_fields: column.mm_match_fields.clone(),
        has_uid: column.mm_has_uid,
    })
}

fn delimiter(column: &ColumnDefinition) -> String {
    column
        .delimiter
        .clone()
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| DEFAULT_DELIMITER.to_string())
}

/// Select columns: ids into `foreign_table`, optionally through a pivot
pub struct SelectProcessor;

impl PreProcessor for SelectProcessor {
    fn column_type(&self) -> ColumnType {
        ColumnType::Select
    }

    fn check(&self, ctx: &CompileContext, column: &ColumnDefinition) -> Result<(), String> {
        let foreign_table = column
            .foreign_table
            .as_deref()
            .ok_or_else(|| "foreign_table is not set".to_string())?;
        if column.mm_target_table_field.is_none() {
            ctx.require_table(foreign_table)?;
        }
        check_mm(ctx, column)
    }

    fn build(&self, table: &str, column: &ColumnDefinition) -> Relation {
        let foreign_table = column.foreign_table.clone().unwrap_or_default();
        match &column.mm {
            Some(mm) => {
                let target = match &column.mm_target_table_field {
                    Some(field) => MmTarget::Field(field.clone()),
                    None => MmTarget::Table(foreign_table),
                };
                build_mm(table, column, mm, target)
            }
            None => Relation::DirectReference(DirectReference {
                table: table.to_string(),
                column: column.name.clone(),
                targets: vec![foreign_table],
                delimiter: delimiter(column),
            }),
        }
    }
}

/// Group columns: ids into one or several allowed tables, optionally through a pivot
pub struct GroupProcessor;

impl GroupProcessor {
    fn targets(column: &ColumnDefinition) -> Vec<String> {
        if !column.allowed.is_empty() {
            column.allowed.clone()
        } else {
            column.foreign_table.iter().cloned().collect()
        }
    }
}

impl PreProcessor for GroupProcessor {
    fn column_type(&self) -> ColumnType {
        ColumnType::Group
    }

    fn check(&self, ctx: &CompileContext, column: &ColumnDefinition) -> Result<(), String> {
        let targets = Self::targets(column);
        if targets.is_empty() {
            return Err("neither allowed nor foreign_table is set".to_string());
        }
        for target in targets.iter().filter(|t| t.as_str() != "*") {
            ctx.require_table(target)?;
        }
        if column.mm.is_some()
            && column.mm_target_table_field.is_none()
            && (targets.len() != 1 || targets[0] == "*")
        {
            return Err("multi-table pivot relation needs mm_target_table_field".to_string());
        }
        check_mm(ctx, column)
    }

    fn build(&self, table: &str, column: &ColumnDefinition) -> Relation {
        let targets = Self::targets(column);
        match &column.mm {
            Some(mm) => {
                let target = match &column.mm_target_table_field {
                    Some(field) => MmTarget::Field(field.clone()),
                    None => MmTarget::Table(targets[0].clone()),
                };
                build_mm(table, column, mm, target)
            }
            None => Relation::DirectReference(DirectReference {
                table: table.to_string(),
                column: column.name.clone(),
                targets,
                delimiter: delimiter(column),
            }),
        }
    }
}

/// Inline columns: child rows in `foreign_table` pointing back at the record
pub struct InlineProcessor;

impl PreProcessor for InlineProcessor {
    fn column_type(&self) -> ColumnType {
        ColumnType::Inline
    }

    fn check(&self, ctx: &CompileContext, column: &ColumnDefinition) -> Result<(), String> {
        let foreign_table = column
            .foreign_table
            .as_deref()
            .ok_or_else(|| "foreign_table is not set".to_string())?;
        ctx.require_table(foreign_table)?;
        if column.mm.is_some() {
            return check_mm(ctx, column);
        }
        if column.foreign_field.as_deref().unwrap_or("").is_empty() {
            return Err("foreign_field is not set".to_string());
        }
        Ok(())
    }

    fn build(&self, table: &str, column: &ColumnDefinition) -> Relation {
        let foreign_table = column.foreign_table.clone().unwrap_or_default();
        if let Some(mm) = &column.mm {
            return build_mm(table, column, mm, MmTarget::Table(foreign_table));
        }
        Relation::Inline(InlineRelation {
            table: table.to_string(),
            column: column.name.clone(),
            foreign_table,
            foreign_field: column.foreign_field.clone().unwrap_or_default(),
            foreign_table_field: column.foreign_table_field.clone(),
            match_fields: column.foreign_match_fields.clone(),
        })
    }
}

/// Flex columns: structured sub-documents with their own field schema
pub struct FlexProcessor;

impl PreProcessor for FlexProcessor {
    fn column_type(&self) -> ColumnType {
        ColumnType::Flex
    }

    fn check(&self, _ctx: &CompileContext, column: &ColumnDefinition) -> Result<(), String> {
        if column.data_structures.is_empty() {
            return Err("no data structures defined".to_string());
        }
        if column.ds_pointer_field.len() > 2 {
            return Err("at most two ds_pointer_field columns are supported".to_string());
        }
        if column.data_structures.iter().any(|ds| ds.key.is_empty()) {
            return Err("data structure with empty key".to_string());
        }
        Ok(())
    }

    fn build(&self, table: &str, column: &ColumnDefinition) -> Relation {
        Relation::SubDocument(SubDocument {
            table: table.to_string(),
            column: column.name.clone(),
            pointer_fields: column.ds_pointer_field.clone(),
            structures: column
                .data_structures
                .iter()
                .map(|ds| ds.key.clone())
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::models::DataStructureDefinition;
    use serde_json::json;

    fn ctx() -> CompileContext {
        CompileContext::new(
            ["pages", "tt_content", "sys_category", "sys_category_record_mm", "sys_file_reference"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    #[test]
    fn test_select_without_foreign_table_is_none() {
        let column = ColumnDefinition::new("sys_language_uid", ColumnType::Select);
        assert!(!SelectProcessor.can_pre_process(&ctx(), &column));
        assert_eq!(compile_column(&ctx(), "pages", &column), Relation::None);
    }

    #[test]
    fn test_select_unknown_target_is_none() {
        let mut column = ColumnDefinition::new("sys_language_uid", ColumnType::Select);
        column.foreign_table = Some("sys_language".to_string());
        assert_eq!(compile_column(&ctx(), "pages", &column), Relation::None);
    }

    #[test]
    fn test_select_direct_reference() {
        let mut column = ColumnDefinition::new("parent", ColumnType::Select);
        column.foreign_table = Some("sys_category".to_string());

        match compile_column(&ctx(), "sys_category", &column) {
            Relation::DirectReference(direct) => {
                assert_eq!(direct.targets, vec!["sys_category".to_string()]);
                assert_eq!(direct.delimiter, ",");
                assert!(!direct.is_multi_table());
            }
            other => panic!("unexpected relation {:?}", other),
        }
    }

    #[test]
    fn test_select_mm_opposite_swaps_fields() {
        let mut column = ColumnDefinition::new("categories", ColumnType::Select);
        column.foreign_table = Some("sys_category".to_string());
        column.mm = Some("sys_category_record_mm".to_string());
        column.mm_opposite_field = Some("items".to_string());
        column.mm_match_fields.insert("tablenames".to_string(), json!("pages"));

        match compile_column(&ctx(), "pages", &column) {
            Relation::ManyToMany(mm) => {
                assert_eq!(mm.self_field, MM_UID_FOREIGN);
                assert_eq!(mm.target_field, MM_UID_LOCAL);
                assert_eq!(mm.target, MmTarget::Table("sys_category".to_string()));
                assert_eq!(mm.match_fields.get("tablenames"), Some(&json!("pages")));
            }
            other => panic!("unexpected relation {:?}", other),
        }
    }

    #[test]
    fn test_group_multi_table_mm_requires_target_field() {
        let mut column = ColumnDefinition::new("items", ColumnType::Group);
        column.allowed = vec!["*".to_string()];
        column.mm = Some("sys_category_record_mm".to_string());
        assert_eq!(compile_column(&ctx(), "sys_category", &column), Relation::None);

        column.mm_target_table_field = Some("tablenames".to_string());
        match compile_column(&ctx(), "sys_category", &column) {
            Relation::ManyToMany(mm) => {
                assert_eq!(mm.self_field, MM_UID_LOCAL);
                assert_eq!(mm.target, MmTarget::Field("tablenames".to_string()));
            }
            other => panic!("unexpected relation {:?}", other),
        }
    }

    #[test]
    fn test_inline_requires_foreign_field() {
        let mut column = ColumnDefinition::new("media", ColumnType::Inline);
        column.foreign_table = Some("sys_file_reference".to_string());
        assert_eq!(compile_column(&ctx(), "tt_content", &column), Relation::None);

        column.foreign_field = Some("uid_foreign".to_string());
        column.foreign_table_field = Some("tablenames".to_string());
        assert!(matches!(
            compile_column(&ctx(), "tt_content", &column),
            Relation::Inline(_)
        ));
    }

    #[test]
    fn test_flex_requires_structures() {
        let mut column = ColumnDefinition::new("pi_flexform", ColumnType::Flex);
        assert_eq!(compile_column(&ctx(), "tt_content", &column), Relation::None);

        column.ds_pointer_field = vec!["list_type".to_string(), "CType".to_string()];
        column.data_structures.push(DataStructureDefinition {
            key: "*,list".to_string(),
            columns: Vec::new(),
        });
        match compile_column(&ctx(), "tt_content", &column) {
            Relation::SubDocument(sub) => {
                assert_eq!(sub.synthetic_table("*,list"), "tt_content/pi_flexform/*,list");
            }
            other => panic!("unexpected relation {:?}", other),
        }
    }

    #[test]
    fn test_plain_columns_are_none() {
        let column = ColumnDefinition::new("title", ColumnType::None);
        assert_eq!(compile_column(&ctx(), "pages", &column), Relation::None);
        let column = ColumnDefinition::new("bodytext", ColumnType::Other);
        assert_eq!(compile_column(&ctx(), "tt_content", &column), Relation::None);
    }
}
