//! Demands: lookups requested by resolvers, executed later in bulk
//!
//! Resolvers never fetch. They describe what they need and which record the
//! result attaches to; identical lookups from several records collapse into
//! one demand with several requesters.

use std::collections::{BTreeMap, BTreeSet};

use crate::record::RecordKey;
use crate::schema::ManyToMany;
use crate::source::Properties;

/// A single requested lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Demand {
    /// The row of `table` with uid `id`
    Identifier { table: String, id: i64 },
    /// All rows of `table` matching every filter
    Select { table: String, filters: Properties },
    /// Pivot rows of `relation` matching every filter, then their targets
    Join {
        relation: ManyToMany,
        filters: Properties,
    },
}

impl Demand {
    /// Deduplication key
    fn key(&self) -> String {
        let filters_key =
            |filters: &Properties| serde_json::to_string(filters).unwrap_or_default();
        match self {
            Demand::Identifier { table, id } => format!("id:{}:{}", table, id),
            Demand::Select { table, filters } => {
                format!("select:{}:{}", table, filters_key(filters))
            }
            Demand::Join { relation, filters } => format!(
                "join:{}:{}.{}:{}",
                relation.mm_table,
                relation.table,
                relation.column,
                filters_key(filters)
            ),
        }
    }

    /// Table the demand reads from
    pub fn table(&self) -> &str {
        match self {
            Demand::Identifier { table, .. } | Demand::Select { table, .. } => table,
            Demand::Join { relation, .. } => &relation.mm_table,
        }
    }
}

/// Accumulator of demands for one resolution round
#[derive(Debug, Default)]
pub struct Demands {
    entries: BTreeMap<String, (Demand, BTreeSet<RecordKey>)>,
}

impl Demands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a lookup on behalf of `requester`
    pub fn add(&mut self, demand: Demand, requester: &RecordKey) {
        self.entries
            .entry(demand.key())
            .or_insert_with(|| (demand, BTreeSet::new()))
            .1
            .insert(requester.clone());
    }

    pub fn add_identifier(&mut self, table: &str, id: i64, requester: &RecordKey) {
        self.add(
            Demand::Identifier {
                table: table.to_string(),
                id,
            },
            requester,
        );
    }

    pub fn add_select(&mut self, table: &str, filters: Properties, requester: &RecordKey) {
        self.add(
            Demand::Select {
                table: table.to_string(),
                filters,
            },
            requester,
        );
    }

    pub fn add_join(&mut self, relation: &ManyToMany, filters: Properties, requester: &RecordKey) {
        self.add(
            Demand::Join {
                relation: relation.clone(),
                filters,
            },
            requester,
        );
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Take all demands, leaving the accumulator empty
    pub fn take(&mut self) -> Vec<(Demand, BTreeSet<RecordKey>)> {
        std::mem::take(&mut self.entries).into_values().collect()
    }
}
