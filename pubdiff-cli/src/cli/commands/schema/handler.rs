//! Schema command handler

use anyhow::{Context, Result};
use colored::*;
use serde_json::{Value, json};

use super::SchemaCommands;
use crate::config::Config;
use crate::schema::{MmTarget, Relation, SchemaRegistry, TableSchema};

/// Handle the schema command
pub fn handle_schema_command(args: SchemaCommands) -> Result<()> {
    let config = Config::load(args.config.as_deref())?;
    let registry = SchemaRegistry::load(&args.schema, &config.ignore)?;

    let tables: Vec<&TableSchema> = match &args.table {
        Some(name) => {
            let table = registry
                .table(name)
                .with_context(|| format!("Table '{}' is not declared in the schema", name))?;
            vec![table]
        }
        None => registry.tables().collect(),
    };

    if args.json {
        let document: Vec<Value> = tables.iter().map(|table| table_json(table)).collect();
        let output = serde_json::to_string_pretty(&document).context("Failed to format JSON output")?;
        println!("{}", output);
        return Ok(());
    }

    for table in tables {
        print_table(table);
    }
    Ok(())
}

fn print_table(table: &TableSchema) {
    let mut flags = Vec::new();
    if let Some(field) = &table.delete_field {
        flags.push(format!("delete: {}", field));
    }
    if let Some(field) = &table.sort_field {
        flags.push(format!("sort: {}", field));
    }
    if !table.has_parent {
        flags.push("no parent".to_string());
    }
    if table.synthetic {
        flags.push("sub-document".to_string());
    }

    if flags.is_empty() {
        println!("{}", table.name.bold());
    } else {
        println!("{} {}", table.name.bold(), format!("({})", flags.join(", ")).dimmed());
    }
    if !table.ignored_fields.is_empty() {
        let ignored: Vec<&str> = table.ignored_fields.iter().map(String::as_str).collect();
        println!("  {} {}", "ignored:".dimmed(), ignored.join(", "));
    }
    for column in &table.relations {
        println!(
            "  {} {} {}",
            column.column.cyan(),
            column.relation.label().bright_green(),
            describe(&column.relation)
        );
    }
    println!();
}

/// One line summary of where a relation leads
pub fn describe(relation: &Relation) -> String {
    match relation {
        Relation::DirectReference(reference) => {
            format!("-> {} (split at '{}')", reference.targets.join(" | "), reference.delimiter)
        }
        Relation::ManyToMany(mm) => {
            let target = match &mm.target {
                MmTarget::Table(table) => table.clone(),
                MmTarget::Field(field) => format!("<{}>", field),
            };
            format!(
                "-> {} via {} ({} -> {})",
                target, mm.mm_table, mm.self_field, mm.target_field
            )
        }
        Relation::Inline(inline) => match &inline.foreign_table_field {
            Some(table_field) => format!(
                "<- {}.{} (table in {})",
                inline.foreign_table, inline.foreign_field, table_field
            ),
            None => format!("<- {}.{}", inline.foreign_table, inline.foreign_field),
        },
        Relation::SubDocument(document) => format!(
            "structures [{}] selected by [{}]",
            document.structures.join(", "),
            document.pointer_fields.join(", ")
        ),
        Relation::None => String::new(),
    }
}

fn table_json(table: &TableSchema) -> Value {
    json!({
        "name": table.name,
        "delete_field": table.delete_field,
        "sort_field": table.sort_field,
        "has_parent": table.has_parent,
        "synthetic": table.synthetic,
        "ignored_fields": table.ignored_fields,
        "relations": table.relations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IgnoreConfig;

    const SCHEMA: &str = r#"
        [tables.pages]
        [[tables.pages.columns]]
        name = "categories"
        type = "select"
        foreign_table = "sys_category"
        mm = "sys_category_record_mm"
        mm_match_fields = { tablenames = "pages" }

        [[tables.pages.columns]]
        name = "media"
        type = "inline"
        foreign_table = "sys_file_reference"
        foreign_field = "uid_foreign"
        foreign_table_field = "tablenames"

        [tables.sys_category]
        [tables.sys_file_reference]
        [tables.sys_category_record_mm]
        has_parent = false
    "#;

    #[test]
    fn test_describe_relations() {
        let registry = SchemaRegistry::from_toml(SCHEMA, &IgnoreConfig::default()).unwrap();
        let mm = registry.relation("pages", "categories").unwrap();
        assert_eq!(
            describe(mm),
            "-> sys_category via sys_category_record_mm (uid_local -> uid_foreign)"
        );
        let media = registry.relation("pages", "media").unwrap();
        assert_eq!(
            describe(media),
            "<- sys_file_reference.uid_foreign (table in tablenames)"
        );
    }

    #[test]
    fn test_table_json() {
        let registry = SchemaRegistry::from_toml(SCHEMA, &IgnoreConfig::default()).unwrap();
        let value = table_json(registry.table("pages").unwrap());
        assert_eq!(value["name"], json!("pages"));
        assert_eq!(value["relations"][0]["relation"]["kind"], json!("many_to_many"));
        assert_eq!(value["relations"][1]["column"], json!("media"));
    }
}
