//! # Stage: Script Loader
//!
//! ## Responsibility
//! Makes third-party browser scripts (markdown renderer, highlighter and its
//! language packs) executable in the page, inserting each `<script>` at most
//! once no matter how many callers ask for it.
//!
//! ## Guarantees
//! - First caller wins: the first [`ScriptLoader::ensure`] for a URL inserts
//!   the element; every later caller awaits the same shared future
//! - A script tag already present in the document is treated as loaded
//! - Optional resources never fail a batch; their failures are logged
//! - Settled outcomes are cached for the loader's lifetime, failures included
//!
//! ## NOT Responsible For
//! - Retrying failed loads (a page reload is the retry)
//! - Cancelling loads when a route is suppressed

use std::cell::RefCell;
use std::collections::HashMap;

use futures_util::future::{self, FutureExt, LocalBoxFuture, Shared};
use tracing::{debug, info, warn};

use crate::config::{DependencyManifest, ScriptSpec};
use crate::error::{AugmentError, LoadFailure};

/// Page operations the loader needs. The browser binding implements this
/// over `web-sys`.
pub trait ScriptHost {
    /// `true` when a `<script src="url">` already exists in the document.
    fn has_script(&self, url: &str) -> bool;
    /// `true` when `window[name]` is defined.
    fn has_global(&self, name: &str) -> bool;
    /// Insert a script element into the document head now; the returned
    /// future settles on its `load` or `error` event.
    fn insert_script(&self, url: &str) -> LocalBoxFuture<'static, Result<(), String>>;
}

/// Lifecycle of one script URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptState {
    Unrequested,
    Loading,
    Loaded,
    Failed,
}

impl std::fmt::Display for ScriptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScriptState::Unrequested => "unrequested",
            ScriptState::Loading => "loading",
            ScriptState::Loaded => "loaded",
            ScriptState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Pending or settled load shared by every caller for one URL.
pub type SharedLoad = Shared<LocalBoxFuture<'static, Result<(), LoadFailure>>>;

/// Per-URL, first-caller-wins script loader.
pub struct ScriptLoader<H: ScriptHost> {
    host: H,
    cache: RefCell<HashMap<String, SharedLoad>>,
}

impl<H: ScriptHost> ScriptLoader<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Resolve once `url` is executable in the page.
    ///
    /// The script element is inserted synchronously by the first call; the
    /// returned future only waits for it to settle.
    pub fn ensure(&self, url: &str) -> SharedLoad {
        if let Some(pending) = self.cache.borrow().get(url) {
            return pending.clone();
        }

        let load: SharedLoad = if self.host.has_script(url) {
            debug!(url, "script tag already present");
            future::ready(Ok(())).boxed_local().shared()
        } else {
            debug!(url, "inserting script");
            let owned = url.to_string();
            self.host
                .insert_script(url)
                .map(move |res| res.map_err(|detail| LoadFailure::new(owned, detail)))
                .boxed_local()
                .shared()
        };

        self.cache
            .borrow_mut()
            .insert(url.to_string(), load.clone());
        load
    }

    /// Current state of `url`.
    pub fn state(&self, url: &str) -> ScriptState {
        match self.cache.borrow().get(url) {
            None => ScriptState::Unrequested,
            Some(load) => match load.peek() {
                None => ScriptState::Loading,
                Some(Ok(())) => ScriptState::Loaded,
                Some(Err(_)) => ScriptState::Failed,
            },
        }
    }

    /// Load optional resources in parallel. Failures are logged and
    /// returned, never propagated.
    pub async fn ensure_optional(&self, urls: &[String]) -> Vec<LoadFailure> {
        let loads: Vec<SharedLoad> = urls.iter().map(|u| self.ensure(u)).collect();
        let failures: Vec<LoadFailure> = future::join_all(loads)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();
        for f in &failures {
            let err = AugmentError::OptionalDependency(f.clone());
            warn!(error = %err, "optional script failed to load");
        }
        failures
    }

    /// Load a required script unless the global it defines already exists.
    pub async fn ensure_required(&self, spec: &ScriptSpec) -> Result<bool, LoadFailure> {
        if let Some(global) = spec.global.as_deref() {
            if self.host.has_global(global) {
                debug!(global, "global already defined, skipping load");
                return Ok(false);
            }
        }
        self.ensure(&spec.url).await?;
        Ok(true)
    }

    /// Load everything the editor needs: renderer, then highlighter, then
    /// the language packs in parallel (only when the highlighter itself had
    /// to be loaded).
    pub async fn load_dependencies(&self, manifest: &DependencyManifest) -> Result<(), AugmentError> {
        self.ensure_required(&manifest.renderer).await?;
        let loaded_highlighter = self.ensure_required(&manifest.highlighter).await?;
        if loaded_highlighter && !manifest.languages.is_empty() {
            let failed = self.ensure_optional(&manifest.languages).await;
            if !failed.is_empty() {
                warn!(
                    failed = failed.len(),
                    total = manifest.languages.len(),
                    "continuing without some highlighter languages"
                );
            }
        }
        info!("markdown editor dependencies loaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct FakeHost {
        existing: Vec<String>,
        globals: Vec<String>,
        inserted: RefCell<Vec<String>>,
        pending: RefCell<HashMap<String, oneshot::Sender<Result<(), String>>>>,
    }

    impl FakeHost {
        fn inserted(&self, url: &str) -> usize {
            self.inserted.borrow().iter().filter(|u| *u == url).count()
        }

        fn settle(&self, url: &str, outcome: Result<(), String>) {
            let tx = self.pending.borrow_mut().remove(url).expect("no pending load");
            let _ = tx.send(outcome);
        }

        /// Settle `url` as soon as its element has been inserted.
        async fn settle_when_inserted(&self, url: &str, outcome: Result<(), String>) {
            while !self.pending.borrow().contains_key(url) {
                tokio::task::yield_now().await;
            }
            self.settle(url, outcome);
        }
    }

    impl ScriptHost for FakeHost {
        fn has_script(&self, url: &str) -> bool {
            self.existing.iter().any(|u| u == url)
        }

        fn has_global(&self, name: &str) -> bool {
            self.globals.iter().any(|g| g == name)
        }

        fn insert_script(&self, url: &str) -> LocalBoxFuture<'static, Result<(), String>> {
            self.inserted.borrow_mut().push(url.to_string());
            let (tx, rx) = oneshot::channel();
            self.pending.borrow_mut().insert(url.to_string(), tx);
            async move { rx.await.unwrap_or_else(|_| Err("host dropped".into())) }.boxed_local()
        }
    }

    #[tokio::test]
    async fn concurrent_ensure_inserts_once_and_shares_outcome() {
        let loader = ScriptLoader::new(FakeHost::default());
        let a = loader.ensure("/a.js");
        let b = loader.ensure("/a.js");
        let c = loader.ensure("/a.js");
        assert_eq!(loader.host().inserted("/a.js"), 1);
        assert_eq!(loader.state("/a.js"), ScriptState::Loading);

        loader.host().settle("/a.js", Ok(()));
        let (ra, rb, rc) = tokio::join!(a, b, c);
        assert!(ra.is_ok() && rb.is_ok() && rc.is_ok());
        assert_eq!(loader.state("/a.js"), ScriptState::Loaded);
    }

    #[tokio::test]
    async fn failure_is_shared_and_cached() {
        let loader = ScriptLoader::new(FakeHost::default());
        let a = loader.ensure("/bad.js");
        let b = loader.ensure("/bad.js");
        loader.host().settle("/bad.js", Err("404".into()));
        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra.clone().unwrap_err(), LoadFailure::new("/bad.js", "404"));
        assert_eq!(ra, rb);
        assert_eq!(loader.state("/bad.js"), ScriptState::Failed);

        // A later request does not insert again.
        assert!(loader.ensure("/bad.js").await.is_err());
        assert_eq!(loader.host().inserted("/bad.js"), 1);
    }

    #[tokio::test]
    async fn existing_tag_counts_as_loaded() {
        let host = FakeHost {
            existing: vec!["/a.js".into()],
            ..FakeHost::default()
        };
        let loader = ScriptLoader::new(host);
        assert!(loader.ensure("/a.js").await.is_ok());
        assert_eq!(loader.host().inserted("/a.js"), 0);
        assert_eq!(loader.state("/a.js"), ScriptState::Loaded);
    }

    #[test]
    fn unrequested_state_by_default() {
        let loader = ScriptLoader::new(FakeHost::default());
        assert_eq!(loader.state("/x.js"), ScriptState::Unrequested);
        assert_eq!(ScriptState::Unrequested.to_string(), "unrequested");
    }

    #[tokio::test]
    async fn optional_batch_survives_one_failure() {
        let loader = ScriptLoader::new(FakeHost::default());
        let urls = vec!["/go.js".to_string(), "/rust.js".to_string()];
        let batch = loader.ensure_optional(&urls);
        let settle = async {
            let host = loader.host();
            host.settle_when_inserted("/go.js", Err("timeout".into())).await;
            host.settle_when_inserted("/rust.js", Ok(())).await;
        };
        let (failures, ()) = tokio::join!(batch, settle);
        assert_eq!(failures, vec![LoadFailure::new("/go.js", "timeout")]);
        assert_eq!(loader.state("/rust.js"), ScriptState::Loaded);
    }

    #[tokio::test]
    async fn required_global_skips_load() {
        let host = FakeHost {
            globals: vec!["markdownit".into()],
            ..FakeHost::default()
        };
        let loader = ScriptLoader::new(host);
        let spec = ScriptSpec::new("/md.js", Some("markdownit"));
        assert_eq!(loader.ensure_required(&spec).await, Ok(false));
        assert_eq!(loader.host().inserted("/md.js"), 0);
    }

    #[tokio::test]
    async fn load_dependencies_fails_on_required_renderer() {
        let loader = ScriptLoader::new(FakeHost::default());
        let manifest = DependencyManifest::default();
        let run = loader.load_dependencies(&manifest);
        let settle = loader
            .host()
            .settle_when_inserted("/static/markdown-it.min.js", Err("offline".into()));
        let (res, ()) = tokio::join!(run, settle);
        assert!(matches!(res, Err(AugmentError::DependencyLoad(_))));
        assert_eq!(loader.host().inserted("/static/highlight.min.js"), 0);
    }

    #[tokio::test]
    async fn load_dependencies_tolerates_language_failures() {
        let loader = ScriptLoader::new(FakeHost::default());
        let manifest = DependencyManifest::default();
        let run = loader.load_dependencies(&manifest);
        let settle = async {
            let host = loader.host();
            host.settle_when_inserted("/static/markdown-it.min.js", Ok(())).await;
            host.settle_when_inserted("/static/highlight.min.js", Ok(())).await;
            host.settle_when_inserted("/static/go.min.js", Err("404".into())).await;
            host.settle_when_inserted("/static/rust.min.js", Ok(())).await;
            host.settle_when_inserted("/static/typescript.min.js", Ok(())).await;
            host.settle_when_inserted("/static/python.min.js", Err("404".into())).await;
        };
        let (res, ()) = tokio::join!(run, settle);
        assert!(res.is_ok());
        assert_eq!(loader.state("/static/go.min.js"), ScriptState::Failed);
        assert_eq!(loader.state("/static/rust.min.js"), ScriptState::Loaded);
    }

    proptest! {
        #[test]
        fn any_number_of_waiters_share_one_insert(n in 1usize..32, ok in any::<bool>()) {
            let loader = ScriptLoader::new(FakeHost::default());
            let waiters: Vec<SharedLoad> = (0..n).map(|_| loader.ensure("/p.js")).collect();
            prop_assert_eq!(loader.host().inserted("/p.js"), 1);
            let outcome = if ok { Ok(()) } else { Err("x".to_string()) };
            loader.host().settle("/p.js", outcome);
            let results = tokio_test::block_on(future::join_all(waiters));
            let first = results[0].clone();
            prop_assert_eq!(first.is_ok(), ok);
            prop_assert!(results.iter().all(|r| *r == first));
        }
    }
}
