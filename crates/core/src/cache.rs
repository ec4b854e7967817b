//! Memoization of named, side-effect free operations.
//!
//! Functions are registered by name with a hasher turning `(name, args)`
//! into a cache key. [ApiCache::get] returns a stored result or runs the
//! function, and at most one run per key is in flight at any time:
//! concurrent callers share the pending result. Errors pass through
//! unchanged and are never stored.
//!
//! Invalidation removes stored results whose key matches a pattern, and
//! detaches matching in-flight runs so their results are not stored.

use futures::future::{FutureExt, Shared};
use hrss_api::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// Arguments of a cached call.
pub type CacheArgs = Vec<serde_json::Value>;

/// Turns a function name and its arguments into a cache key.
pub type Hasher =
    Arc<dyn Fn(&str, &[serde_json::Value]) -> String + 'static + Send + Sync>;

/// A function that can be registered with an [ApiCache].
pub type CachedFn<V> = Arc<
    dyn Fn(CacheArgs) -> BoxFut<'static, HrssResult<V>> + 'static + Send + Sync,
>;

/// Deterministic json serialization: object keys sorted recursively,
/// array order preserved.
pub fn stable_stringify(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

fn write_stable(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                write_stable(&map[key], out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// The default hasher: `stable_stringify([name, ...args])`.
pub fn default_hasher(name: &str, args: &[serde_json::Value]) -> String {
    let mut all = Vec::with_capacity(args.len() + 1);
    all.push(serde_json::Value::String(name.to_string()));
    all.extend_from_slice(args);
    stable_stringify(&serde_json::Value::Array(all))
}

/// Selects cache keys to invalidate.
#[derive(Debug, Clone)]
pub enum KeyPattern {
    /// Every key.
    All,
    /// Keys matching a regex.
    Regex(regex::Regex),
}

impl KeyPattern {
    /// Keys containing `text` literally.
    pub fn containing(text: &str) -> Self {
        match regex::Regex::new(&regex::escape(text)) {
            Ok(r) => Self::Regex(r),
            Err(err) => {
                tracing::warn!(?err, "falling back to full invalidation");
                Self::All
            }
        }
    }

    /// True if `key` is selected.
    pub fn is_match(&self, key: &str) -> bool {
        match self {
            Self::All => true,
            Self::Regex(r) => r.is_match(key),
        }
    }
}

/// The result of [ApiCache::get_cached].
pub struct CacheLookup<V> {
    /// True if a result is stored.
    pub cached: bool,
    /// The stored result, if any.
    pub value: Option<V>,
    /// The cache key of the call.
    pub key: String,
    /// The registered function.
    pub func: CachedFn<V>,
}

struct Registered<V> {
    hasher: Hasher,
    func: CachedFn<V>,
}

type Pending<V> = Shared<BoxFut<'static, HrssResult<V>>>;

struct State<V> {
    results: HashMap<String, V>,
    in_flight: HashMap<String, (u64, Pending<V>)>,
    next_flight: u64,
}

/// Memoizes named operations. See the module docs.
pub struct ApiCache<V> {
    funcs: Mutex<HashMap<String, Registered<V>>>,
    state: Arc<Mutex<State<V>>>,
}

impl<V> std::fmt::Debug for ApiCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("ApiCache")
            .field("functions", &self.funcs.lock().unwrap().len())
            .field("results", &state.results.len())
            .field("in_flight", &state.in_flight.len())
            .finish()
    }
}

impl<V: Clone + Send + Sync + 'static> ApiCache<V> {
    /// Construct a new, empty cache.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            funcs: Mutex::new(HashMap::new()),
            state: Arc::new(Mutex::new(State {
                results: HashMap::new(),
                in_flight: HashMap::new(),
                next_flight: 0,
            })),
        })
    }

    /// Register `func` under `name`. Without a `hasher`,
    /// [default_hasher] is used. Re-registering replaces the function.
    pub fn add_function(
        &self,
        name: &str,
        func: CachedFn<V>,
        hasher: Option<Hasher>,
    ) {
        let hasher: Hasher = match hasher {
            Some(hasher) => hasher,
            None => Arc::new(default_hasher),
        };
        self.funcs
            .lock()
            .unwrap()
            .insert(name.to_string(), Registered { hasher, func });
    }

    /// Look up a call without running it. Fails with a configuration
    /// error if `name` was never registered.
    pub fn get_cached(
        &self,
        name: &str,
        args: &[serde_json::Value],
    ) -> HrssResult<CacheLookup<V>> {
        let (key, func) = {
            let funcs = self.funcs.lock().unwrap();
            let reg = funcs.get(name).ok_or_else(|| {
                HrssError::configuration(format!(
                    "no cached function registered as {name}"
                ))
            })?;
            ((reg.hasher)(name, args), reg.func.clone())
        };
        let value = self.state.lock().unwrap().results.get(&key).cloned();
        Ok(CacheLookup {
            cached: value.is_some(),
            value,
            key,
            func,
        })
    }

    /// Return the stored result of a call, or run it and store the result.
    pub async fn get(&self, name: &str, args: CacheArgs) -> HrssResult<V> {
        let lookup = self.get_cached(name, &args)?;
        if let Some(value) = lookup.value {
            return Ok(value);
        }
        let CacheLookup { key, func, .. } = lookup;

        let pending = {
            let mut state = self.state.lock().unwrap();
            if let Some(value) = state.results.get(&key) {
                return Ok(value.clone());
            }
            match state.in_flight.get(&key) {
                Some((_, pending)) => pending.clone(),
                None => {
                    let flight = state.next_flight;
                    state.next_flight += 1;
                    let pending = run_once(
                        Arc::downgrade(&self.state),
                        key.clone(),
                        flight,
                        func(args),
                    );
                    state
                        .in_flight
                        .insert(key.clone(), (flight, pending.clone()));
                    pending
                }
            }
        };

        pending.await
    }

    /// Remove stored results whose key matches `pattern`, returning
    /// the removed keys.
    pub fn invalidate(&self, pattern: &regex::Regex) -> Vec<String> {
        self.invalidate_matching(|key| pattern.is_match(key))
    }

    /// Remove stored results selected by `pattern`.
    pub fn invalidate_pattern(&self, pattern: &KeyPattern) -> Vec<String> {
        self.invalidate_matching(|key| pattern.is_match(key))
    }

    /// Remove stored results whose key satisfies `pred`, returning
    /// the removed keys. Matching in-flight runs are detached.
    pub fn invalidate_matching<F: Fn(&str) -> bool>(
        &self,
        pred: F,
    ) -> Vec<String> {
        let mut state = self.state.lock().unwrap();
        let removed: Vec<String> = state
            .results
            .keys()
            .filter(|k| pred(k))
            .cloned()
            .collect();
        for key in removed.iter() {
            state.results.remove(key);
        }
        state.in_flight.retain(|key, _| !pred(key));
        removed
    }

    /// Number of stored results.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().results.len()
    }

    /// True if no results are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn run_once<V: Clone + Send + Sync + 'static>(
    state: Weak<Mutex<State<V>>>,
    key: String,
    flight: u64,
    fut: BoxFut<'static, HrssResult<V>>,
) -> Pending<V> {
    let fut: BoxFut<'static, HrssResult<V>> = Box::pin(async move {
        let res = fut.await;
        if let Some(state) = state.upgrade() {
            let mut state = state.lock().unwrap();
            let ours = matches!(
                state.in_flight.get(&key),
                Some((f, _)) if *f == flight
            );
            if ours {
                state.in_flight.remove(&key);
                if let Ok(value) = &res {
                    state.results.insert(key, value.clone());
                }
            }
        }
        res
    });
    fut.shared()
}

/// A registered function, called through its cache.
pub struct CachedMethod<V> {
    cache: Arc<ApiCache<V>>,
    name: Arc<str>,
}

impl<V> Clone for CachedMethod<V> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            name: self.name.clone(),
        }
    }
}

impl<V> std::fmt::Debug for CachedMethod<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedMethod")
            .field("name", &self.name)
            .finish()
    }
}

impl<V: Clone + Send + Sync + 'static> CachedMethod<V> {
    /// Call through the cache.
    pub async fn call(&self, args: CacheArgs) -> HrssResult<V> {
        self.cache.get(&self.name, args).await
    }

    /// The registered name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Register `func` with `cache` under `name`, returning a handle that
/// calls it through the cache.
pub fn cache_method<V: Clone + Send + Sync + 'static>(
    cache: &Arc<ApiCache<V>>,
    name: &str,
    func: CachedFn<V>,
    hasher: Option<Hasher>,
) -> CachedMethod<V> {
    cache.add_function(name, func, hasher);
    CachedMethod {
        cache: cache.clone(),
        name: name.into(),
    }
}

/// Builds the invalidation pattern for a mutating call from its arguments.
pub type MakeKeyPattern =
    Arc<dyn Fn(&[serde_json::Value]) -> KeyPattern + 'static + Send + Sync>;

/// Wraps mutating calls so that, once the mutation finished (successfully
/// or not), every cache entry matching the call's pattern is invalidated.
pub struct InvalidateOn<V> {
    cache: Arc<ApiCache<V>>,
    make_pattern: MakeKeyPattern,
}

impl<V> std::fmt::Debug for InvalidateOn<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidateOn").finish()
    }
}

impl<V: Clone + Send + Sync + 'static> InvalidateOn<V> {
    /// Construct a new wrapper.
    pub fn new(cache: Arc<ApiCache<V>>, make_pattern: MakeKeyPattern) -> Self {
        Self {
            cache,
            make_pattern,
        }
    }

    /// Run `mutation`, then invalidate entries matching `args`.
    pub async fn run<T, F>(
        &self,
        args: &[serde_json::Value],
        mutation: F,
    ) -> HrssResult<T>
    where
        F: std::future::Future<Output = HrssResult<T>>,
    {
        let res = mutation.await;
        let pattern = (self.make_pattern)(args);
        let removed = self.cache.invalidate_pattern(&pattern);
        tracing::trace!(?removed, "invalidated cache entries");
        res
    }
}
