//! The filtering engine: list store, client registry and policy
//! evaluator behind a single reader/writer lock.
//!
//! The DNS path only ever takes the lock in shared mode; every REST
//! mutation takes it exclusively, rebuilds or patches the affected trie,
//! and rewrites the durable form (a text file per list, one JSON
//! document for all clients) before returning.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::entry::Entry;
use crate::error::FilterError;
use crate::models::{ClientPolicy, Decision, ListContent, ListKind, ListMetadata};
use crate::trie::DomainTrie;
use crate::Result;

#[derive(Default)]
struct EngineState {
    block_tries: HashMap<String, DomainTrie>,
    allow_tries: HashMap<String, DomainTrie>,
    /// Keyed by client IP; the stored policies carry an empty `ip` field.
    clients: HashMap<String, ClientPolicy>,
}

impl EngineState {
    fn tries(&self, kind: ListKind) -> &HashMap<String, DomainTrie> {
        match kind {
            ListKind::Block => &self.block_tries,
            ListKind::Allow => &self.allow_tries,
        }
    }

    fn tries_mut(&mut self, kind: ListKind) -> &mut HashMap<String, DomainTrie> {
        match kind {
            ListKind::Block => &mut self.block_tries,
            ListKind::Allow => &mut self.allow_tries,
        }
    }
}

/// Process-wide filtering engine.
///
/// Constructed once at startup and shared (via `Arc`) between the DNS
/// handler and the control-plane server.
pub struct FilterEngine {
    config_path: PathBuf,
    block_dir: PathBuf,
    allow_dir: PathBuf,
    state: RwLock<EngineState>,
}

impl FilterEngine {
    pub fn new(
        config_path: impl Into<PathBuf>,
        block_dir: impl Into<PathBuf>,
        allow_dir: impl Into<PathBuf>,
    ) -> Self {
        FilterEngine {
            config_path: config_path.into(),
            block_dir: block_dir.into(),
            allow_dir: allow_dir.into(),
            state: RwLock::new(EngineState::default()),
        }
    }

    /// Load the durable state: ensure directories, read the client
    /// document, then build a trie for every list referenced by any
    /// client. Lists on disk that no client references stay unloaded
    /// until something references them.
    pub fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.block_dir)?;
        fs::create_dir_all(&self.allow_dir)?;
        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let clients = load_clients(&self.config_path)?;

        let mut state = self.write_state()?;
        state.clients = clients;

        for kind in [ListKind::Block, ListKind::Allow] {
            let referenced: BTreeSet<String> = state
                .clients
                .values()
                .flat_map(|c| c.refs(kind).iter().cloned())
                .collect();
            for name in referenced {
                let path = self.list_path(&name, kind);
                match load_list_file(&path) {
                    Ok(trie) => {
                        info!(list = %name, kind = %kind, entries = trie.len(), "loaded list");
                        state.tries_mut(kind).insert(name, trie);
                    }
                    Err(e) => {
                        warn!(list = %name, kind = %kind, error = %e, "could not load list");
                    }
                }
            }
        }

        info!(
            clients = state.clients.len(),
            blocklists = state.block_tries.len(),
            whitelists = state.allow_tries.len(),
            "filter engine initialized"
        );
        Ok(())
    }

    // === List operations ===

    pub fn create_list(&self, name: &str, kind: ListKind, domains: &[String]) -> Result<ListContent> {
        let entries = parse_entries(domains)?;
        let mut state = self.write_state()?;

        // On-disk presence is authoritative even for unloaded lists, so
        // a create can never silently overwrite a file.
        if state.tries(kind).contains_key(name) || self.list_path(name, kind).exists() {
            return Err(FilterError::already_exists(kind.as_str(), name));
        }

        let trie = DomainTrie::from_entries(&entries);
        self.write_list_file(name, kind, &rendered(&entries))?;
        state.tries_mut(kind).insert(name.to_string(), trie);

        info!(list = %name, kind = %kind, "list created");
        Ok(self.content_locked(&state, name, kind))
    }

    pub fn update_list(&self, name: &str, kind: ListKind, domains: &[String]) -> Result<ListContent> {
        let entries = parse_entries(domains)?;
        let mut state = self.write_state()?;

        if !state.tries(kind).contains_key(name) {
            return Err(FilterError::not_found(kind.as_str(), name));
        }

        let trie = DomainTrie::from_entries(&entries);
        self.write_list_file(name, kind, &rendered(&entries))?;
        // Publish the rebuilt trie; the old root is dropped with the swap.
        state.tries_mut(kind).insert(name.to_string(), trie);

        info!(list = %name, kind = %kind, "list updated");
        Ok(self.content_locked(&state, name, kind))
    }

    pub fn delete_list(&self, name: &str, kind: ListKind) -> Result<()> {
        let mut state = self.write_state()?;

        if state.tries_mut(kind).remove(name).is_none() {
            return Err(FilterError::not_found(kind.as_str(), name));
        }

        // In-memory removal already happened; a failing unlink is logged
        // and not surfaced.
        let path = self.list_path(name, kind);
        if let Err(e) = fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "could not delete list file");
        }

        self.repair_after_list_deletion(&mut state, name, kind);
        info!(list = %name, kind = %kind, "list deleted");
        Ok(())
    }

    /// Merge extra entries into an existing list's trie, then rewrite the
    /// file from the merged enumeration.
    pub fn add_entries(&self, name: &str, kind: ListKind, domains: &[String]) -> Result<()> {
        let entries = parse_entries(domains)?;
        let mut state = self.write_state()?;

        let trie = state
            .tries_mut(kind)
            .get_mut(name)
            .ok_or_else(|| FilterError::not_found(kind.as_str(), name))?;
        for entry in &entries {
            trie.insert(entry);
        }
        let all = rendered(&trie.entries());
        self.write_list_file(name, kind, &all)?;

        debug!(list = %name, kind = %kind, added = entries.len(), "entries added");
        Ok(())
    }

    /// Remove entries whose base domain matches any of the given base
    /// domains, regardless of exception sets, then rebuild and rewrite.
    pub fn remove_entries(&self, name: &str, kind: ListKind, domains: &[String]) -> Result<()> {
        let removals = parse_entries(domains)?;
        let mut state = self.write_state()?;

        let trie = state
            .tries(kind)
            .get(name)
            .ok_or_else(|| FilterError::not_found(kind.as_str(), name))?;

        let doomed: BTreeSet<String> = removals.iter().map(|e| e.domain()).collect();
        let remaining: Vec<Entry> = trie
            .entries()
            .into_iter()
            .filter(|e| !doomed.contains(&e.domain()))
            .collect();

        let rebuilt = DomainTrie::from_entries(&remaining);
        self.write_list_file(name, kind, &rendered(&remaining))?;
        state.tries_mut(kind).insert(name.to_string(), rebuilt);

        debug!(list = %name, kind = %kind, "entries removed");
        Ok(())
    }

    pub fn list(&self, name: &str, kind: ListKind) -> Result<ListContent> {
        let state = self.read_state()?;
        if !state.tries(kind).contains_key(name) {
            return Err(FilterError::not_found(kind.as_str(), name));
        }
        Ok(self.content_locked(&state, name, kind))
    }

    /// Metadata for all loaded lists, optionally restricted to one kind.
    pub fn list_meta(&self, kind: Option<ListKind>) -> Result<Vec<ListMetadata>> {
        let state = self.read_state()?;
        let kinds = match kind {
            Some(k) => vec![k],
            None => vec![ListKind::Block, ListKind::Allow],
        };

        let mut out = Vec::new();
        for kind in kinds {
            for (name, trie) in state.tries(kind) {
                out.push(ListMetadata {
                    name: name.clone(),
                    kind,
                    count: trie.len(),
                    last_modified: self.last_modified(name, kind),
                });
            }
        }
        Ok(out)
    }

    // === Client operations ===

    pub fn create_client(&self, policy: ClientPolicy) -> Result<ClientPolicy> {
        let mut state = self.write_state()?;
        if state.clients.contains_key(&policy.ip) {
            return Err(FilterError::already_exists("client", &policy.ip));
        }
        self.store_client(&mut state, policy)
    }

    pub fn update_client(&self, policy: ClientPolicy) -> Result<ClientPolicy> {
        let mut state = self.write_state()?;
        if !state.clients.contains_key(&policy.ip) {
            return Err(FilterError::not_found("client", &policy.ip));
        }
        self.store_client(&mut state, policy)
    }

    fn store_client(&self, state: &mut EngineState, policy: ClientPolicy) -> Result<ClientPolicy> {
        validate_refs(state, &policy)?;

        let ip = policy.ip.clone();
        let stored = ClientPolicy {
            ip: String::new(),
            ..policy.clone()
        };
        state.clients.insert(ip, stored);
        self.save_clients(&state.clients)?;
        Ok(policy)
    }

    pub fn delete_client(&self, ip: &str) -> Result<()> {
        let mut state = self.write_state()?;
        if state.clients.remove(ip).is_none() {
            return Err(FilterError::not_found("client", ip));
        }
        self.save_clients(&state.clients)?;
        info!(client = %ip, "client deleted");
        Ok(())
    }

    pub fn client(&self, ip: &str) -> Result<ClientPolicy> {
        let state = self.read_state()?;
        let stored = state
            .clients
            .get(ip)
            .ok_or_else(|| FilterError::not_found("client", ip))?;
        Ok(ClientPolicy {
            ip: ip.to_string(),
            ..stored.clone()
        })
    }

    pub fn clients(&self) -> Result<Vec<ClientPolicy>> {
        let state = self.read_state()?;
        Ok(state
            .clients
            .iter()
            .map(|(ip, stored)| ClientPolicy {
                ip: ip.clone(),
                ..stored.clone()
            })
            .collect())
    }

    // === Evaluation ===

    /// Decide whether `name` is allowed for the client at `ip`.
    ///
    /// Never errors: an unknown client, an unknown mode, or a poisoned
    /// lock all degrade to `Deny`.
    pub fn decide(&self, ip: &str, name: &str) -> Decision {
        let state = match self.state.read() {
            Ok(guard) => guard,
            Err(e) => {
                warn!(error = %e, "engine state lock poisoned; denying");
                return Decision::Deny;
            }
        };

        let Some(policy) = state.clients.get(ip) else {
            debug!(client = %ip, query = %name, "unknown client; denying");
            return Decision::Deny;
        };

        match policy.mode {
            ListKind::Block => {
                for list in &policy.blocklists {
                    let Some(trie) = state.block_tries.get(list) else {
                        warn!(client = %ip, list = %list, "referenced blocklist not loaded");
                        continue;
                    };
                    if trie.matches(name) {
                        debug!(client = %ip, query = %name, list = %list, "blocked by blocklist");
                        return Decision::Deny;
                    }
                }
                Decision::Allow
            }
            ListKind::Allow => {
                for list in &policy.whitelists {
                    let Some(trie) = state.allow_tries.get(list) else {
                        warn!(client = %ip, list = %list, "referenced whitelist not loaded");
                        continue;
                    };
                    if trie.matches(name) {
                        debug!(client = %ip, query = %name, list = %list, "allowed by whitelist");
                        return Decision::Allow;
                    }
                }
                debug!(client = %ip, query = %name, "not in any whitelist; denying");
                Decision::Deny
            }
        }
    }

    // === Internals ===

    fn read_state(&self) -> Result<RwLockReadGuard<'_, EngineState>> {
        self.state
            .read()
            .map_err(|e| FilterError::Internal(format!("lock poisoned: {e}")))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, EngineState>> {
        self.state
            .write()
            .map_err(|e| FilterError::Internal(format!("lock poisoned: {e}")))
    }

    fn list_path(&self, name: &str, kind: ListKind) -> PathBuf {
        let dir = match kind {
            ListKind::Block => &self.block_dir,
            ListKind::Allow => &self.allow_dir,
        };
        dir.join(name)
    }

    fn content_locked(&self, state: &EngineState, name: &str, kind: ListKind) -> ListContent {
        let domains = state
            .tries(kind)
            .get(name)
            .map(|t| rendered(&t.entries()))
            .unwrap_or_default();
        ListContent {
            name: name.to_string(),
            kind,
            domains,
        }
    }

    fn last_modified(&self, name: &str, kind: ListKind) -> DateTime<Utc> {
        fs::metadata(self.list_path(name, kind))
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now())
    }

    fn write_list_file(&self, name: &str, kind: ListKind, domains: &[String]) -> Result<()> {
        let mut out = String::from("# Automatically generated list\n");
        out.push_str(&format!("# Last update: {}\n\n", Utc::now().to_rfc3339()));
        for domain in domains {
            out.push_str(domain);
            out.push('\n');
        }
        fs::write(self.list_path(name, kind), out)?;
        Ok(())
    }

    /// Strip a deleted list's name from every policy's matching ref-set.
    /// A failure to persist the cleaned document is logged, not surfaced:
    /// the in-memory registry is already consistent.
    fn repair_after_list_deletion(&self, state: &mut EngineState, name: &str, kind: ListKind) {
        let mut changed = false;
        for policy in state.clients.values_mut() {
            let refs = match kind {
                ListKind::Block => &mut policy.blocklists,
                ListKind::Allow => &mut policy.whitelists,
            };
            let before = refs.len();
            refs.retain(|r| r != name);
            changed |= refs.len() != before;
        }

        if changed {
            if let Err(e) = self.save_clients(&state.clients) {
                warn!(error = %e, "could not persist client document after list deletion");
            }
        }
    }

    fn save_clients(&self, clients: &HashMap<String, ClientPolicy>) -> Result<()> {
        let doc = serde_json::to_string_pretty(clients)?;
        fs::write(&self.config_path, doc)?;
        Ok(())
    }
}

fn parse_entries(domains: &[String]) -> Result<Vec<Entry>> {
    domains.iter().map(|d| Entry::parse(d)).collect()
}

fn rendered(entries: &[Entry]) -> Vec<String> {
    entries.iter().map(|e| e.to_string()).collect()
}

fn validate_refs(state: &EngineState, policy: &ClientPolicy) -> Result<()> {
    for kind in [ListKind::Block, ListKind::Allow] {
        for name in policy.refs(kind) {
            if !state.tries(kind).contains_key(name) {
                return Err(FilterError::ReferencedListMissing {
                    kind,
                    name: name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Read the client document; an absent file is an empty registry.
fn load_clients(path: &Path) -> Result<HashMap<String, ClientPolicy>> {
    match fs::read_to_string(path) {
        Ok(doc) => Ok(serde_json::from_str(&doc)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e.into()),
    }
}

/// Parse a list file into a trie. Comment and blank lines are skipped;
/// malformed lines are logged and skipped rather than failing the load.
fn load_list_file(path: &Path) -> Result<DomainTrie> {
    let content = fs::read_to_string(path)?;
    let mut trie = DomainTrie::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match Entry::parse(line) {
            Ok(entry) => trie.insert(&entry),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping malformed entry"),
        }
    }
    Ok(trie)
}
