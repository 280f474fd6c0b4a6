//! Execution of demands against a property source
//!
//! Rows are fetched from both sides and merged by identity. Every resulting
//! record is looked up in the index before it is built, attached to all of
//! its requesters and, when it was new, handed back to the caller so its own
//! relations can be resolved in the next round.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::demands::{Demand, Demands};
use crate::record::{
    IndexError, Record, RecordFactory, RecordId, RecordKey, Registration, pivot_identity,
};
use crate::schema::{ManyToMany, MmTarget};
use crate::source::{Properties, PropertySource, Side, row_uid, value_as_id};

/// Rows of one identity on both sides
type SidedRows<K> = BTreeMap<K, (Properties, Properties)>;

pub struct DemandResolver<'a> {
    source: &'a dyn PropertySource,
    factory: &'a RecordFactory,
}

impl<'a> DemandResolver<'a> {
    pub fn new(source: &'a dyn PropertySource, factory: &'a RecordFactory) -> Self {
        Self { source, factory }
    }

    /// Execute all demands, including the target lookups of pivot rows.
    ///
    /// Returns the records that were newly built.
    pub fn resolve(&self, mut demands: Demands) -> Result<Vec<Arc<Record>>, IndexError> {
        let mut created = Vec::new();

        while !demands.is_empty() {
            let mut follow_up = Demands::new();
            for (demand, requesters) in demands.take() {
                match demand {
                    Demand::Identifier { table, id } => {
                        self.resolve_identifier(&table, id, &requesters, &mut created)?;
                    }
                    Demand::Select { table, filters } => {
                        self.resolve_select(&table, &filters, &requesters, &mut created)?;
                    }
                    Demand::Join { relation, filters } => {
                        self.resolve_join(&relation, &filters, &requesters, &mut follow_up, &mut created)?;
                    }
                }
            }
            demands = follow_up;
        }

        Ok(created)
    }

    fn resolve_identifier(
        &self,
        table: &str,
        id: i64,
        requesters: &BTreeSet<RecordKey>,
        created: &mut Vec<Arc<Record>>,
    ) -> Result<(), IndexError> {
        let key = RecordKey::uid(table, id);
        let record = match self.factory.index().find(&key) {
            Some(existing) => existing,
            None => {
                let local = self.source.get_by_identifier(table, id, Side::Local);
                let foreign = self.source.get_by_identifier(table, id, Side::Foreign);
                match self.factory.create_database_record(table, id, local, foreign)? {
                    Some(registration) => self.collect(registration, created),
                    None => {
                        log::debug!("{} does not exist on either side", key);
                        return Ok(());
                    }
                }
            }
        };
        self.attach(&record, requesters);
        Ok(())
    }

    fn resolve_select(
        &self,
        table: &str,
        filters: &Properties,
        requesters: &BTreeSet<RecordKey>,
        created: &mut Vec<Arc<Record>>,
    ) -> Result<(), IndexError> {
        let rows = self.fetch_by_uid(table, filters);
        for (uid, (local, foreign)) in rows {
            let record = match self.factory.index().find(&RecordKey::uid(table, uid)) {
                Some(existing) => existing,
                None => match self.factory.create_database_record(table, uid, local, foreign)? {
                    Some(registration) => self.collect(registration, created),
                    None => continue,
                },
            };
            self.attach(&record, requesters);
        }
        Ok(())
    }

    fn resolve_join(
        &self,
        relation: &ManyToMany,
        filters: &Properties,
        requesters: &BTreeSet<RecordKey>,
        follow_up: &mut Demands,
        created: &mut Vec<Arc<Record>>,
    ) -> Result<(), IndexError> {
        let mut rows: SidedRows<RecordId> = BTreeMap::new();
        for side in Side::both() {
            for row in self.source.find_by_properties(&relation.mm_table, filters, side) {
                let Some(id) = pivot_identity(relation, &row) else {
                    continue;
                };
                let entry = rows.entry(id).or_default();
                match side {
                    Side::Local => entry.0 = row,
                    Side::Foreign => entry.1 = row,
                }
            }
        }

        for (id, (local, foreign)) in rows {
            let key = RecordKey::new(relation.mm_table.clone(), id);
            let (pivot, is_new) = match self.factory.index().find(&key) {
                Some(existing) => (existing, false),
                None => match self.factory.create_pivot_record(relation, local, foreign)? {
                    Some(registration) => {
                        let is_new = registration.is_inserted();
                        (self.collect(registration, created), is_new)
                    }
                    None => continue,
                },
            };
            self.attach(&pivot, requesters);

            if is_new {
                if let Some((table, uid)) = pivot_target(relation, &pivot) {
                    follow_up.add_identifier(&table, uid, pivot.key());
                }
            }
        }
        Ok(())
    }

    /// Fetch rows of both sides matching the filters, merged by uid
    fn fetch_by_uid(&self, table: &str, filters: &Properties) -> SidedRows<i64> {
        let mut rows: SidedRows<i64> = BTreeMap::new();
        for side in Side::both() {
            for row in self.source.find_by_properties(table, filters, side) {
                let Some(uid) = row_uid(&row) else {
                    log::debug!("Skipping row of {} without uid", table);
                    continue;
                };
                let entry = rows.entry(uid).or_default();
                match side {
                    Side::Local => entry.0 = row,
                    Side::Foreign => entry.1 = row,
                }
            }
        }
        rows
    }

    /// Remember new records for the next round; ignored ones are not resolved further
    fn collect(&self, registration: Registration, created: &mut Vec<Arc<Record>>) -> Arc<Record> {
        if let Registration::Inserted(record) = &registration {
            if !record.is_ignored() {
                created.push(Arc::clone(record));
            }
        }
        registration.into_record()
    }

    /// Attach a record to every requester, unless it is hidden by policy
    fn attach(&self, record: &Record, requesters: &BTreeSet<RecordKey>) {
        if record.is_ignored() {
            return;
        }
        for requester in requesters {
            match self.factory.index().find(requester) {
                Some(parent) => parent.add_related(record.key()),
                None => log::warn!("Requester {} of {} is not indexed", requester, record.key()),
            }
        }
    }
}

/// Target `(table, uid)` of a pivot row
fn pivot_target(relation: &ManyToMany, pivot: &Record) -> Option<(String, i64)> {
    let table = match &relation.target {
        MmTarget::Table(table) => table.clone(),
        MmTarget::Field(field) => pivot.property(field)?.as_str()?.to_string(),
    };
    let uid = pivot.property(&relation.target_field).and_then(value_as_id)?;
    (uid > 0 && !table.is_empty()).then_some((table, uid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IgnoreConfig;
    use crate::hooks::{IgnoreTables, NeverIgnore};
    use crate::record::RecordIndex;
    use crate::resolve::resolve_record;
    use crate::schema::SchemaRegistry;
    use crate::source::{FixtureData, FixtureSource};
    use serde_json::json;

    const SCHEMA: &str = r#"
        [tables.pages]
        [[tables.pages.columns]]
        name = "categories"
        type = "select"
        foreign_table = "sys_category"
        mm = "sys_category_record_mm"
        mm_opposite_field = "items"
        mm_match_fields = { tablenames = "pages", fieldname = "categories" }

        [tables.sys_category]
        [[tables.sys_category.columns]]
        name = "items"
        type = "group"
        allowed = ["*"]
        mm = "sys_category_record_mm"
        mm_target_table_field = "tablenames"
        mm_match_fields = { fieldname = "categories" }

        [tables.sys_category_record_mm]
        has_parent = false
    "#;

    fn fixture(value: serde_json::Value) -> FixtureData {
        serde_json::from_value(value).unwrap()
    }

    fn data() -> serde_json::Value {
        json!({
            "tables": {
                "pages": [{ "uid": 1, "pid": 0, "title": "Home" }],
                "sys_category": [{ "uid": 3, "pid": 0, "title": "News" }],
                "sys_category_record_mm": [
                    { "uid_local": 3, "uid_foreign": 1, "tablenames": "pages", "fieldname": "categories", "sorting": 1 }
                ]
            }
        })
    }

    fn setup(policy: Arc<dyn crate::hooks::IgnoreRecordPolicy>) -> (FixtureSource, RecordFactory) {
        let registry = SchemaRegistry::from_toml(SCHEMA, &IgnoreConfig::default()).unwrap();
        let source = FixtureSource::new(fixture(data()), fixture(data()));
        let factory = RecordFactory::new(Arc::new(registry), Arc::new(RecordIndex::new()), policy);
        (source, factory)
    }

    fn resolve_all(source: &FixtureSource, factory: &RecordFactory, start: Arc<Record>) {
        let resolver = DemandResolver::new(source, factory);
        let mut pending = vec![start];
        while !pending.is_empty() {
            let mut demands = Demands::new();
            for record in &pending {
                resolve_record(factory.registry(), &mut demands, record);
            }
            pending = resolver.resolve(demands).unwrap();
        }
    }

    fn page(source: &FixtureSource, factory: &RecordFactory) -> Arc<Record> {
        factory
            .create_database_record(
                "pages",
                1,
                source.get_by_identifier("pages", 1, Side::Local),
                source.get_by_identifier("pages", 1, Side::Foreign),
            )
            .unwrap()
            .unwrap()
            .into_record()
    }

    #[test]
    fn test_mm_chain_reaches_target_and_back() {
        let (source, factory) = setup(Arc::new(NeverIgnore));
        let page = page(&source, &factory);
        resolve_all(&source, &factory, Arc::clone(&page));

        let index = factory.index();
        let pivots = page.related_ids("sys_category_record_mm");
        assert_eq!(pivots.len(), 1);

        let pivot_key = RecordKey::new("sys_category_record_mm", pivots.iter().next().unwrap().clone());
        let pivot = index.find(&pivot_key).unwrap();
        assert!(pivot.related_ids("sys_category").contains(&RecordId::Uid(3)));

        // the category reaches the same pivot through its opposite relation
        let category = index.find(&RecordKey::uid("sys_category", 3)).unwrap();
        assert!(category.related_ids("sys_category_record_mm").contains(&pivot_key.id));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_ignored_records_are_indexed_but_not_attached() {
        let (source, factory) = setup(Arc::new(IgnoreTables::new(["sys_category"])));
        let page = page(&source, &factory);
        resolve_all(&source, &factory, Arc::clone(&page));

        let index = factory.index();
        assert!(index.contains(&RecordKey::uid("sys_category", 3)));
        let pivot_id = page.related_ids("sys_category_record_mm").into_iter().next().unwrap();
        let pivot = index.find(&RecordKey::new("sys_category_record_mm", pivot_id)).unwrap();
        assert!(pivot.related_ids("sys_category").is_empty());
    }

    #[test]
    fn test_missing_target_is_skipped() {
        let (source, factory) = setup(Arc::new(NeverIgnore));
        let resolver = DemandResolver::new(&source, &factory);
        let page = page(&source, &factory);

        let mut demands = Demands::new();
        demands.add_identifier("sys_category", 99, page.key());
        let created = resolver.resolve(demands).unwrap();
        assert!(created.is_empty());
        assert!(!page.has_related());
    }
}
