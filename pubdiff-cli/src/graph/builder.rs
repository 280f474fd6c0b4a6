//! Graph builder
//!
//! Builds the record graph of a single record, or of a page tree:
//! - The start record is fetched from both sides and registered
//! - Every relation column is resolved, rounds of demands are executed until
//!   no new records appear
//! - For page trees, the rows of every child table bound to a page by parent
//!   id are attached as content, then child pages are built depth first
//!
//! Each build owns a fresh `RecordIndex`. Records already in the index are
//! reused and never resolved twice, which terminates cyclic references.

use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::RecordGraph;
use super::natsort::{natural_cmp, sort_text};
use crate::config::TreeConfig;
use crate::hooks::{IgnoreRecordPolicy, NeverIgnore};
use crate::record::{IndexError, Record, RecordFactory, RecordId, RecordIndex, RecordKey, Registration};
use crate::resolve::{DemandResolver, Demands, resolve_record};
use crate::schema::SchemaRegistry;
use crate::source::{Properties, PropertySource, Side, is_flag_set, row_uid};

/// Builds record graphs from a property source
pub struct GraphBuilder {
    registry: Arc<SchemaRegistry>,
    source: Arc<dyn PropertySource>,
    policy: Arc<dyn IgnoreRecordPolicy>,
    tree: TreeConfig,
}

/// A child page row of both sides
#[derive(Debug, Clone)]
struct ChildPage {
    uid: i64,
    local: Properties,
    foreign: Properties,
}

/// Pages whose content and children have been built, shared by all workers
#[derive(Debug, Default)]
struct ExpandedPages(Mutex<HashSet<i64>>);

impl ExpandedPages {
    /// Claim a page; false if it was already claimed
    fn claim(&self, uid: i64) -> bool {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).insert(uid)
    }
}

impl GraphBuilder {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        source: Arc<dyn PropertySource>,
        tree: TreeConfig,
    ) -> Self {
        Self {
            registry,
            source,
            policy: Arc::new(NeverIgnore),
            tree,
        }
    }

    /// Use a policy deciding which records are hidden from the graph
    pub fn with_policy(mut self, policy: Arc<dyn IgnoreRecordPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Build the graph of one record and everything it relates to.
    ///
    /// Returns `None` when the record exists on neither side.
    pub fn find_by_identifier(&self, id: i64, table: &str) -> Result<Option<RecordGraph>> {
        let index = Arc::new(RecordIndex::new());
        let session = BuildSession::new(self, Arc::clone(&index), Arc::default());

        let Some(registration) = session.fetch_record(table, id)? else {
            log::info!("{}[{}] does not exist on either side", table, id);
            return Ok(None);
        };
        let record = registration.into_record();
        session.resolve_closure(vec![Arc::clone(&record)])?;

        log::info!("Built graph of {} with {} records", record.key(), index.len());
        Ok(Some(RecordGraph::new(index, record.key().clone(), false)))
    }

    /// Build the page tree below `root_id` (0 for the whole tree).
    ///
    /// Cancellation is checked between the top-level child pages; a cancelled
    /// build returns what was built so far.
    pub fn build_tree(&self, root_id: i64, cancel: &AtomicBool) -> Result<Option<RecordGraph>> {
        let index = Arc::new(RecordIndex::new());
        let session = BuildSession::new(self, Arc::clone(&index), Arc::default());

        let Some(root) = session.start_tree(root_id)? else {
            log::info!("Page {} does not exist on either side", root_id);
            return Ok(None);
        };

        let mut was_cancelled = false;
        for child in session.top_level_pages(root_id) {
            if cancel.load(Ordering::Relaxed) {
                log::warn!("Build of page tree {} cancelled", root_id);
                was_cancelled = true;
                break;
            }
            session.build_child_page(&root, child, 1)?;
        }

        log::info!("Built page tree {} with {} records", root.key(), index.len());
        Ok(Some(RecordGraph::new(index, root.key().clone(), was_cancelled)))
    }

    /// Build the page tree below `root_id`, one worker task per top-level
    /// child page, at most `tree.workers` at a time.
    ///
    /// All subtrees are joined before returning, so classification can run on
    /// the complete graph.
    pub async fn build_tree_concurrent(
        self: Arc<Self>,
        root_id: i64,
        cancel: Arc<AtomicBool>,
    ) -> Result<Option<RecordGraph>> {
        let index = Arc::new(RecordIndex::new());
        let expanded = Arc::new(ExpandedPages::default());

        let start = {
            let builder = Arc::clone(&self);
            let index = Arc::clone(&index);
            let expanded = Arc::clone(&expanded);
            tokio::task::spawn_blocking(move || -> Result<_, IndexError> {
                let session = BuildSession::new(&builder, index, expanded);
                let Some(root) = session.start_tree(root_id)? else {
                    return Ok(None);
                };
                let children = session.top_level_pages(root_id);
                Ok(Some((root, children)))
            })
            .await
            .context("Page tree root task failed")??
        };

        let Some((root, children)) = start else {
            log::info!("Page {} does not exist on either side", root_id);
            return Ok(None);
        };

        let workers = self.tree.workers.max(1);
        log::debug!(
            "Building {} top-level pages of {} with {} workers",
            children.len(),
            root.key(),
            workers
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();
        let mut was_cancelled = false;
        let mut order = Vec::with_capacity(children.len());

        for child in children {
            if cancel.load(Ordering::Relaxed) {
                log::warn!("Build of page tree {} cancelled", root_id);
                was_cancelled = true;
                break;
            }
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .context("Worker pool closed")?;

            let builder = Arc::clone(&self);
            let index = Arc::clone(&index);
            let expanded = Arc::clone(&expanded);
            let root = Arc::clone(&root);
            order.push(RecordId::Uid(child.uid));
            tasks.spawn_blocking(move || {
                let _permit = permit;
                let session = BuildSession::new(&builder, index, expanded);
                session.build_child_page(&root, child, 1)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            joined.context("Subtree task failed")??;
        }
        // workers attach top-level pages as they finish
        root.order_related(&self.tree.page_table, &order);

        log::info!("Built page tree {} with {} records", root.key(), index.len());
        Ok(Some(RecordGraph::new(index, root.key().clone(), was_cancelled)))
    }
}

/// State of one build (or one worker of a concurrent build)
struct BuildSession<'a> {
    builder: &'a GraphBuilder,
    factory: RecordFactory,
    expanded: Arc<ExpandedPages>,
}

impl<'a> BuildSession<'a> {
    fn new(builder: &'a GraphBuilder, index: Arc<RecordIndex>, expanded: Arc<ExpandedPages>) -> Self {
        let factory = RecordFactory::new(
            Arc::clone(&builder.registry),
            index,
            Arc::clone(&builder.policy),
        );
        Self {
            builder,
            factory,
            expanded,
        }
    }

    fn page_table(&self) -> &str {
        &self.builder.tree.page_table
    }

    /// Fetch a row of both sides unless the record is already indexed
    fn fetch_record(&self, table: &str, uid: i64) -> Result<Option<Registration>, IndexError> {
        if let Some(existing) = self.factory.index().find(&RecordKey::uid(table, uid)) {
            return Ok(Some(Registration::Existing(existing)));
        }
        let local = self.builder.source.get_by_identifier(table, uid, Side::Local);
        let foreign = self.builder.source.get_by_identifier(table, uid, Side::Foreign);
        self.factory.create_database_record(table, uid, local, foreign)
    }

    /// Resolve relations of the given records and of everything they reach
    fn resolve_closure(&self, start: Vec<Arc<Record>>) -> Result<(), IndexError> {
        let resolver = DemandResolver::new(self.builder.source.as_ref(), &self.factory);
        let mut pending = start;
        while !pending.is_empty() {
            let mut demands = Demands::new();
            for record in &pending {
                resolve_record(&self.builder.registry, &mut demands, record);
            }
            pending = resolver.resolve(demands)?;
        }
        Ok(())
    }

    /// Register the tree root, resolve it and attach its content
    fn start_tree(&self, root_id: i64) -> Result<Option<Arc<Record>>, IndexError> {
        let root = if root_id == 0 {
            self.factory.create_page_tree_root(self.page_table())?.into_record()
        } else {
            match self.fetch_record(self.page_table(), root_id)? {
                Some(registration) => registration.into_record(),
                None => return Ok(None),
            }
        };
        self.expanded.claim(root_id);
        if !root.is_page_tree_root() {
            self.resolve_closure(vec![Arc::clone(&root)])?;
        }
        self.attach_content(&root)?;
        Ok(Some(root))
    }

    /// Child pages of the tree root, if recursion allows any
    fn top_level_pages(&self, root_id: i64) -> Vec<ChildPage> {
        if self.builder.tree.maximum_page_recursion == 0 {
            return Vec::new();
        }
        self.child_pages(root_id)
    }

    /// Build one child page, its relations, content and children
    fn build_child_page(&self, parent: &Record, child: ChildPage, depth: usize) -> Result<(), IndexError> {
        let page_table = self.page_table().to_string();
        let registration = match self.factory.index().find(&RecordKey::uid(&page_table, child.uid)) {
            Some(existing) => Registration::Existing(existing),
            None => match self
                .factory
                .create_database_record(&page_table, child.uid, child.local, child.foreign)?
            {
                Some(registration) => registration,
                None => return Ok(()),
            },
        };
        let is_new = registration.is_inserted();
        let page = registration.into_record();

        if page.is_ignored() {
            return Ok(());
        }
        parent.add_related(page.key());

        if !self.expanded.claim(child.uid) {
            return Ok(());
        }
        if is_new {
            self.resolve_closure(vec![Arc::clone(&page)])?;
        }
        self.attach_content(&page)?;

        if depth < self.builder.tree.maximum_page_recursion {
            for grandchild in self.child_pages(child.uid) {
                self.build_child_page(&page, grandchild, depth + 1)?;
            }
        }
        Ok(())
    }

    /// Attach rows of all child tables bound to the page by parent id
    fn attach_content(&self, page: &Arc<Record>) -> Result<(), IndexError> {
        let Some(uid) = page.identifier().as_uid() else {
            return Ok(());
        };
        let excluded = self.excluded_child_tables();
        let mut created = Vec::new();

        for table in self.builder.registry.all_tables(&excluded) {
            for row_id in self.child_uids(&table, uid) {
                let Some(registration) = self.fetch_record(&table, row_id)? else {
                    continue;
                };
                let is_new = registration.is_inserted();
                let record = registration.into_record();
                if record.is_ignored() {
                    continue;
                }
                page.add_related(record.key());
                if is_new {
                    created.push(record);
                }
            }
        }

        self.resolve_closure(created)
    }

    fn excluded_child_tables(&self) -> BTreeSet<String> {
        let mut excluded: BTreeSet<String> =
            self.builder.tree.exclude_related_tables.iter().cloned().collect();
        excluded.insert(self.page_table().to_string());
        excluded
    }

    /// Uids of rows of `table` with the given parent id on either side.
    ///
    /// Rows are only discovered by parent; their properties are fetched by
    /// uid so a row whose parent differs between the sides is complete.
    fn child_uids(&self, table: &str, parent_id: i64) -> BTreeSet<i64> {
        Side::both()
            .into_iter()
            .flat_map(|side| self.builder.source.get_by_parent(table, parent_id, side))
            .filter_map(|row| row_uid(&row))
            .collect()
    }

    /// Child pages in natural order of their sort field, without pages that
    /// are deleted on both sides or were deleted before ever being published
    fn child_pages(&self, parent_id: i64) -> Vec<ChildPage> {
        let page_table = self.page_table();
        let delete_field = self.builder.registry.delete_field(page_table);
        let sort_field = self.builder.registry.sort_field(page_table);

        let mut pages: Vec<ChildPage> = self
            .child_uids(page_table, parent_id)
            .into_iter()
            .map(|uid| ChildPage {
                uid,
                local: self.builder.source.get_by_identifier(page_table, uid, Side::Local),
                foreign: self.builder.source.get_by_identifier(page_table, uid, Side::Foreign),
            })
            .filter(|page| {
                let Some(field) = delete_field else {
                    return true;
                };
                let local_deleted = is_flag_set(&page.local, field);
                let foreign_deleted = is_flag_set(&page.foreign, field);
                let skip = (local_deleted && foreign_deleted) || (local_deleted && page.foreign.is_empty());
                if skip {
                    log::debug!("Skipping deleted page {}", page.uid);
                }
                !skip
            })
            .collect();

        if let Some(field) = sort_field {
            pages.sort_by(|a, b| {
                let a_sort = a.local.get(field).or_else(|| a.foreign.get(field));
                let b_sort = b.local.get(field).or_else(|| b.foreign.get(field));
                natural_cmp(&sort_text(a_sort), &sort_text(b_sort)).then(a.uid.cmp(&b.uid))
            });
        }
        pages
    }
}
