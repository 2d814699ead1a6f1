#![forbid(unsafe_code)]

//! Content-addressed verification cache.
//!
//! A cache key fingerprints everything semantically relevant to a function's
//! verification: its signature, its contract expressions, the signatures and
//! inlinable bodies of callees its contracts reference (transitively), the
//! module's integer mode, and the engine version tag. Key equality therefore
//! implies result reusability; no TTL is needed.
//!
//! Entries are one JSON file per key. Writes go to a temp file in the cache
//! directory followed by an atomic rename, so a concurrent reader never
//! observes a partially written entry; the last writer for a key wins. A
//! corrupt or unreadable entry is treated as a miss and simply overwritten
//! on the next store.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use vow_ast::{Expr, Function, IntegerMode, Module, Stmt};

use crate::verify::{
    contract_spans, ContractKind, ContractOutcome, FunctionVerificationResult, VerificationOutcome,
};

/// Bumped whenever the encoder or orchestrator changes in a way that makes
/// prior outcomes non-reusable.
pub const VERSION_TAG: &str = concat!("vow-verify/", env!("CARGO_PKG_VERSION"));

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

/// Fingerprint a function's semantically relevant verification inputs.
pub fn fingerprint(module: &Module, f: &Function) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(VERSION_TAG.as_bytes());
    hasher.update(match module.integer_mode {
        IntegerMode::Wrap => b"wrap".as_slice(),
        IntegerMode::Trap => b"trap".as_slice(),
    });
    hasher.update(f.signature().as_bytes());
    for pre in &f.preconditions {
        hasher.update(b"pre:");
        hasher.update(pre.to_string().as_bytes());
    }
    for post in &f.postconditions {
        hasher.update(b"post:");
        hasher.update(post.to_string().as_bytes());
    }
    // The body model feeds postcondition proofs.
    for stmt in &f.body {
        hasher.update(b"stmt:");
        hasher.update(render_stmt(stmt).as_bytes());
    }
    for sig in referenced_callee_signatures(module, f) {
        hasher.update(b"callee:");
        hasher.update(sig.as_bytes());
    }
    CacheKey(hex_digest(hasher))
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Signatures (and inlinable bodies) of every callee a contract can reach,
/// transitively, in deterministic order.
fn referenced_callee_signatures(module: &Module, f: &Function) -> Vec<String> {
    let mut pending: Vec<String> = Vec::new();
    for contract in f.preconditions.iter().chain(&f.postconditions) {
        for (name, _) in contract.call_sites() {
            pending.push(name.to_string());
        }
    }
    let mut seen = BTreeSet::new();
    let mut out = BTreeSet::new();
    while let Some(name) = pending.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        if let Some(target) = module.function(&name) {
            let body = match target.body.as_slice() {
                [Stmt::Return { value: Some(e), .. }] => e.to_string(),
                _ => "<opaque>".to_string(),
            };
            out.insert(format!("{}; body={body}", target.signature()));
            if let [Stmt::Return { value: Some(e), .. }] = target.body.as_slice() {
                for (callee, _) in e.call_sites() {
                    pending.push(callee.to_string());
                }
            }
        } else if let Some(ext) = module.extern_fn(&name) {
            let params: Vec<String> = ext.param_types.iter().map(|t| t.to_string()).collect();
            let effects: Vec<&str> = ext.effects.iter().map(|e| e.label()).collect();
            out.insert(format!(
                "extern {}({}) -> {} !{}",
                ext.name,
                params.join(", "),
                ext.return_type,
                effects.join(",")
            ));
        } else {
            out.insert(format!("unknown {name}"));
        }
    }
    out.into_iter().collect()
}

fn render_stmt(stmt: &Stmt) -> String {
    fn expr(e: &Expr) -> String {
        e.to_string()
    }
    match stmt {
        Stmt::Let {
            name, ty, value, ..
        } => match value {
            Some(v) => format!("(let {name} {ty} {})", expr(v)),
            None => format!("(let {name} {ty})"),
        },
        Stmt::Assign { target, value, .. } => format!("(set {target} {})", expr(value)),
        Stmt::If {
            cond,
            then_body,
            else_body,
            ..
        } => format!(
            "(if {} ({}) ({}))",
            expr(cond),
            render_stmts(then_body),
            render_stmts(else_body)
        ),
        Stmt::While { cond, body, .. } => {
            format!("(while {} ({}))", expr(cond), render_stmts(body))
        }
        Stmt::DoWhile { body, cond, .. } => {
            format!("(do-while ({}) {})", render_stmts(body), expr(cond))
        }
        Stmt::For {
            var,
            from,
            to,
            body,
            ..
        } => format!(
            "(for {var} {} {} ({}))",
            expr(from),
            expr(to),
            render_stmts(body)
        ),
        Stmt::Return { value, .. } => match value {
            Some(v) => format!("(return {})", expr(v)),
            None => "(return)".to_string(),
        },
        Stmt::Throw { value, .. } => format!("(throw {})", expr(value)),
        Stmt::Expr(e) => format!("(expr {})", expr(e)),
        Stmt::Opaque { .. } => "(opaque)".to_string(),
    }
}

fn render_stmts(stmts: &[Stmt]) -> String {
    stmts.iter().map(render_stmt).collect::<Vec<_>>().join(" ")
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredContract {
    pub kind: ContractKind,
    pub index: usize,
    pub outcome: VerificationOutcome,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredEntry {
    version: String,
    timestamp_secs: u64,
    outcomes: Vec<StoredContract>,
}

/// File-per-key store, safe under concurrent access from overlapping
/// compiler invocations.
#[derive(Clone, Debug)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.as_hex()))
    }

    /// Look up prior outcomes. Any read or parse failure is a miss.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<StoredContract>> {
        let text = fs::read_to_string(self.entry_path(key)).ok()?;
        let entry: StoredEntry = serde_json::from_str(&text).ok()?;
        if entry.version != VERSION_TAG {
            return None;
        }
        Some(entry.outcomes)
    }

    /// Store outcomes for a key, all-or-nothing.
    pub fn put(&self, key: &CacheKey, outcomes: &[StoredContract]) -> io::Result<()> {
        let entry = StoredEntry {
            version: VERSION_TAG.to_string(),
            timestamp_secs: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            outcomes: outcomes.to_vec(),
        };
        let text = serde_json::to_string_pretty(&entry)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tmp = self.dir.join(format!(
            ".{}.tmp-{}",
            key.as_hex(),
            std::process::id()
        ));
        fs::write(&tmp, text)?;
        fs::rename(&tmp, self.entry_path(key))
    }
}

/// Persist a fresh verification result under its key.
pub fn store_result(cache: &FileCache, key: &CacheKey, result: &FunctionVerificationResult) {
    let outcomes: Vec<StoredContract> = result
        .outcomes
        .iter()
        .map(|c| StoredContract {
            kind: c.kind,
            index: c.index,
            outcome: c.outcome.clone(),
        })
        .collect();
    // Cache write failure is never an analysis failure.
    let _ = cache.put(key, &outcomes);
}

/// Rehydrate a cached result against the current function, restoring spans
/// from the live AST. Returns `None` (a miss) when the stored shape no
/// longer matches the function's contract list.
pub fn load_result(
    cache: &FileCache,
    key: &CacheKey,
    f: &Function,
) -> Option<FunctionVerificationResult> {
    let stored = cache.get(key)?;
    if stored.len() != f.contract_count() {
        return None;
    }
    let mut outcomes = Vec::with_capacity(stored.len());
    for (s, (kind, index, span)) in stored.into_iter().zip(contract_spans(f)) {
        if s.kind != kind || s.index != index {
            return None;
        }
        outcomes.push(ContractOutcome {
            kind,
            index,
            span,
            outcome: s.outcome,
        });
    }
    Some(FunctionVerificationResult {
        function: f.id,
        name: f.name.clone(),
        outcomes,
        time_ms: 0,
        from_cache: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vow_ast::{span, BinOp, FunctionId, Param, Type};

    fn sp() -> vow_ast::Span {
        span(0, 1)
    }

    fn sample_function(name: &str) -> Function {
        Function {
            id: FunctionId(3),
            name: name.to_string(),
            params: vec![Param::new(sp(), "x", Type::Int)],
            return_type: Type::Int,
            preconditions: vec![Expr::binary(
                sp(),
                Expr::var(sp(), "x", Type::Int),
                BinOp::Gt,
                Expr::int(sp(), 0),
            )],
            postconditions: vec![],
            effects: vec![],
            body: vec![Stmt::Return {
                span: sp(),
                value: Some(Expr::var(sp(), "x", Type::Int)),
            }],
            span: sp(),
        }
    }

    #[test]
    fn test_fingerprint_deterministic_and_sensitive() {
        let module = Module::new("m", IntegerMode::Trap);
        let f = sample_function("f");
        let a = fingerprint(&module, &f);
        let b = fingerprint(&module, &f);
        assert_eq!(a, b);

        let mut changed = f.clone();
        changed.preconditions[0] = Expr::binary(
            sp(),
            Expr::var(sp(), "x", Type::Int),
            BinOp::Ge,
            Expr::int(sp(), 0),
        );
        assert_ne!(fingerprint(&module, &changed), a);

        let wrap_module = Module::new("m", IntegerMode::Wrap);
        assert_ne!(fingerprint(&wrap_module, &f), a);
    }

    #[test]
    fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        let module = Module::new("m", IntegerMode::Trap);
        let f = sample_function("f");
        let key = fingerprint(&module, &f);

        let stored = vec![StoredContract {
            kind: ContractKind::Precondition,
            index: 0,
            outcome: VerificationOutcome::Proven,
        }];
        cache.put(&key, &stored).unwrap();

        let loaded = cache.get(&key).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].outcome, VerificationOutcome::Proven);
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        let module = Module::new("m", IntegerMode::Trap);
        let f = sample_function("f");
        let key = fingerprint(&module, &f);

        fs::write(cache.entry_path(&key), b"{not json").unwrap();
        assert!(cache.get(&key).is_none());

        // Overwriting heals the entry.
        cache
            .put(
                &key,
                &[StoredContract {
                    kind: ContractKind::Precondition,
                    index: 0,
                    outcome: VerificationOutcome::Unproven,
                }],
            )
            .unwrap();
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        let module = Module::new("m", IntegerMode::Trap);
        let f = sample_function("f");
        let key = fingerprint(&module, &f);
        cache
            .put(
                &key,
                &[StoredContract {
                    kind: ContractKind::Precondition,
                    index: 0,
                    outcome: VerificationOutcome::Proven,
                }],
            )
            .unwrap();
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".json"));
    }

    #[test]
    fn test_load_result_rehydrates_spans_and_flags_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        let module = Module::new("m", IntegerMode::Trap);
        let f = sample_function("f");
        let key = fingerprint(&module, &f);
        cache
            .put(
                &key,
                &[StoredContract {
                    kind: ContractKind::Precondition,
                    index: 0,
                    outcome: VerificationOutcome::Proven,
                }],
            )
            .unwrap();

        let result = load_result(&cache, &key, &f).unwrap();
        assert!(result.from_cache);
        assert_eq!(result.outcomes.len(), 1);
        assert_eq!(result.outcomes[0].span, f.preconditions[0].span);
    }

    #[test]
    fn test_load_result_shape_mismatch_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).unwrap();
        let module = Module::new("m", IntegerMode::Trap);
        let f = sample_function("f");
        let key = fingerprint(&module, &f);
        // Stored shape claims two contracts; the function has one.
        cache
            .put(
                &key,
                &[
                    StoredContract {
                        kind: ContractKind::Precondition,
                        index: 0,
                        outcome: VerificationOutcome::Proven,
                    },
                    StoredContract {
                        kind: ContractKind::Postcondition,
                        index: 0,
                        outcome: VerificationOutcome::Proven,
                    },
                ],
            )
            .unwrap();
        assert!(load_result(&cache, &key, &f).is_none());
    }
}
