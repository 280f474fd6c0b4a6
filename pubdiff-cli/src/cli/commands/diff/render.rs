//! Colored tree rendering of a record report

use colored::*;

use crate::graph::RecordReport;
use crate::record::RecordState;

/// Render a report as an indented tree, one record per line
pub fn render_tree(report: &RecordReport) -> String {
    let mut out = String::new();
    out.push_str(&node_line(report));
    out.push('\n');
    render_children(&report.related, "", &mut out);
    out
}

fn render_children(children: &[RecordReport], prefix: &str, out: &mut String) {
    for (i, child) in children.iter().enumerate() {
        let last = i + 1 == children.len();
        let branch = if last { "└── " } else { "├── " };
        out.push_str(&format!("{}{}{}\n", prefix, branch, node_line(child)));

        let next = format!("{}{}", prefix, if last { "    " } else { "│   " });
        render_children(&child.related, &next, out);
    }
}

fn node_line(report: &RecordReport) -> String {
    let key = format!("{}[{}]", report.table, report.identifier);
    let mut line = format!("{} {}", state_badge(report.state), key.bold());

    if let Some(label) = &report.label {
        line.push_str(&format!(" {}", label.dimmed()));
    }
    if !report.changed_fields.is_empty() {
        let fields: Vec<&str> = report.changed_fields.iter().map(String::as_str).collect();
        line.push_str(&format!(" ({})", fields.join(", ").yellow()));
    }
    if report.repeated {
        line.push_str(&format!(" {}", "(see above)".dimmed()));
    }
    line
}

fn state_badge(state: RecordState) -> ColoredString {
    let text = format!("{:<9}", state.label());
    match state {
        RecordState::Unchanged => text.dimmed(),
        RecordState::Added => text.green().bold(),
        RecordState::Changed => text.yellow().bold(),
        RecordState::Moved => text.cyan().bold(),
        RecordState::Deleted => text.red().bold(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordId;
    use std::collections::{BTreeMap, BTreeSet};

    fn node(table: &str, uid: i64, state: RecordState, related: Vec<RecordReport>) -> RecordReport {
        RecordReport {
            table: table.to_string(),
            identifier: RecordId::Uid(uid),
            state,
            label: None,
            changed_fields: BTreeSet::new(),
            additional_properties: BTreeMap::new(),
            repeated: false,
            related,
        }
    }

    #[test]
    fn test_render_tree_layout() {
        colored::control::set_override(false);

        let mut changed = node("tt_content", 10, RecordState::Changed, vec![]);
        changed.changed_fields.insert("header".to_string());
        let mut back = node("pages", 1, RecordState::Unchanged, vec![]);
        back.repeated = true;
        let about = node("pages", 2, RecordState::Added, vec![changed, back]);
        let mut root = node("pages", 1, RecordState::Unchanged, vec![about, node("pages", 3, RecordState::Moved, vec![])]);
        root.label = Some("Home".to_string());

        let rendered = render_tree(&root);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines,
            vec![
                "unchanged pages[1] Home",
                "├── added     pages[2]",
                "│   ├── changed   tt_content[10] (header)",
                "│   └── unchanged pages[1] (see above)",
                "└── moved     pages[3]",
            ]
        );
    }
}
