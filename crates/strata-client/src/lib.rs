//! URL-addressed driver clients.
//!
//! Dialect drivers register an [`Opener`] under their URL scheme (plus
//! optional flavours) at startup; [`open`] resolves a URL to a live
//! [`Client`]. The registry is process-wide: registration happens once
//! during initialization and panics on duplicate schemes. Connection
//! and transaction lifecycles dispatch [`Hook`]s; hooks run under a
//! marker that forbids nested `open`/`tx` calls.

use std::cell::Cell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tracing::debug;
use url::Url;

use strata_migrate::{Driver, LocalDir, MigrateError};

/// Errors raised by the client registry and lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The URL has no scheme to select a driver with.
    #[error("strata/client: missing driver scheme")]
    MissingScheme,

    /// No driver is registered for the scheme.
    #[error("strata/client: unknown driver {0:?}")]
    UnknownDriver(String),

    /// `open` was called from within a hook.
    #[error("strata/client: cannot open a connection inside a hook")]
    HookOpen,

    /// `tx` was called from within a hook.
    #[error("strata/client: cannot begin a transaction inside a hook")]
    HookTx,

    /// URL parse failure.
    #[error("strata/client: parse open url: {0}")]
    Url(#[from] url::ParseError),

    /// A lifecycle hook failed.
    #[error("strata/client: hook: {0}")]
    Hook(String),

    /// Two errors joined, e.g. a hook failure and the close failure it
    /// triggered.
    #[error("{0}: {1}")]
    Joined(Box<ClientError>, Box<ClientError>),

    /// Failure in the migration layer.
    #[error(transparent)]
    Migrate(#[from] MigrateError),
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// A parsed connection URL enriched by the driver's URL parser.
#[derive(Debug, Clone)]
pub struct ClientUrl {
    /// The raw URL.
    pub url: Url,
    /// The DSN handed to the underlying connector.
    pub dsn: String,
    /// The schema the client is bound to, when the URL selects one.
    pub schema: Option<String>,
}

/// Translates a URL into a [`ClientUrl`].
pub trait UrlParser: Send + Sync {
    /// Parses the URL and attaches connection information.
    fn parse_url(&self, url: &Url) -> ClientUrl;
}

// The default parser uses the whole URL as the DSN.
struct DefaultUrlParser;

impl UrlParser for DefaultUrlParser {
    fn parse_url(&self, url: &Url) -> ClientUrl {
        ClientUrl {
            url: url.clone(),
            dsn: url.to_string(),
            schema: None,
        }
    }
}

/// Opens a client for a URL.
#[async_trait]
pub trait Opener: Send + Sync {
    /// Opens a client.
    async fn open(&self, url: &Url) -> Result<Client>;
}

/// Opens driver transactions; registered by dialects that need custom
/// begin behavior (e.g. disabling foreign-key enforcement).
#[async_trait]
pub trait TxOpener: Send + Sync {
    /// Begins a transaction on the driver.
    async fn begin(&self, driver: &dyn Driver) -> Result<()>;
}

type ConnHook = Box<dyn Fn(&Client) -> Result<()> + Send + Sync>;
type TxHook = Box<dyn for<'a> Fn(&TxClient<'a>) -> Result<()> + Send + Sync>;

/// Connection and transaction lifecycle hooks.
#[derive(Default)]
pub struct Hook {
    /// Runs after a connection opens.
    pub conn_after_open: Option<ConnHook>,
    /// Runs before a connection closes.
    pub conn_before_close: Option<ConnHook>,
    /// Runs after a transaction begins.
    pub tx_after_begin: Option<TxHook>,
    /// Runs before a transaction commits.
    pub tx_before_commit: Option<TxHook>,
    /// Runs before a transaction rolls back.
    pub tx_before_rollback: Option<TxHook>,
}

// Marks the current thread as running inside a hook. Hooks are
// synchronous, so the marker covers exactly the hook's execution.
mod hook_guard {
    use super::Cell;

    thread_local! {
        static IN_HOOK: Cell<bool> = const { Cell::new(false) };
    }

    pub(crate) struct Guard(bool);

    impl Drop for Guard {
        fn drop(&mut self) {
            IN_HOOK.with(|f| f.set(self.0));
        }
    }

    pub(crate) fn enter() -> Guard {
        let prev = IN_HOOK.with(|f| f.replace(true));
        Guard(prev)
    }

    pub(crate) fn active() -> bool {
        IN_HOOK.with(std::cell::Cell::get)
    }
}

/// A dialect-specific client bound to one connection.
pub struct Client {
    /// Driver name used at registration.
    pub name: String,
    /// The enriched connection URL.
    pub url: ClientUrl,
    /// The migration driver for the attached dialect.
    pub driver: Arc<dyn Driver>,
    hooks: Vec<Arc<Hook>>,
    tx_opener: Option<Arc<dyn TxOpener>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.name)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client over a driver. Used by openers.
    #[must_use]
    pub fn new(name: impl Into<String>, url: ClientUrl, driver: Arc<dyn Driver>) -> Self {
        Self {
            name: name.into(),
            url,
            driver,
            hooks: Vec::new(),
            tx_opener: None,
        }
    }

    /// Begins a transaction, routing through the registered
    /// [`TxOpener`] when the dialect provides one.
    pub async fn tx(&self) -> Result<TxClient<'_>> {
        if hook_guard::active() {
            return Err(ClientError::HookTx);
        }
        match &self.tx_opener {
            Some(opener) => opener.begin(self.driver.as_ref()).await?,
            None => {
                self.driver.tx_begin().await.map_err(ClientError::Migrate)?;
            }
        }
        let tx = TxClient { client: self };
        for hook in &self.hooks {
            if let Some(f) = &hook.tx_after_begin {
                let guard = hook_guard::enter();
                let res = f(&tx);
                drop(guard);
                if let Err(err) = res {
                    let rollback = self.driver.tx_rollback().await;
                    return Err(match rollback {
                        Ok(()) => err,
                        Err(rerr) => ClientError::Joined(
                            Box::new(err),
                            Box::new(ClientError::Migrate(rerr)),
                        ),
                    });
                }
            }
        }
        Ok(tx)
    }

    /// Closes the client: runs the before-close hooks, then releases
    /// the driver connection. Hook failures are joined with the close
    /// result.
    pub async fn close(self) -> Result<()> {
        let mut hook_err: Option<ClientError> = None;
        for hook in &self.hooks {
            if let Some(f) = &hook.conn_before_close {
                let guard = hook_guard::enter();
                let res = f(&self);
                drop(guard);
                if let Err(err) = res {
                    hook_err = Some(match hook_err {
                        None => err,
                        Some(prev) => ClientError::Joined(Box::new(prev), Box::new(err)),
                    });
                }
            }
        }
        let closed = self.driver.close().await.map_err(ClientError::Migrate);
        match (hook_err, closed) {
            (None, Ok(())) => Ok(()),
            (Some(err), Ok(())) => Err(err),
            (None, Err(err)) => Err(err),
            (Some(err), Err(cerr)) => Err(ClientError::Joined(Box::new(err), Box::new(cerr))),
        }
    }

    fn after_open(&self) -> Result<()> {
        if hook_guard::active() {
            return Err(ClientError::HookOpen);
        }
        for hook in &self.hooks {
            if let Some(f) = &hook.conn_after_open {
                let guard = hook_guard::enter();
                let res = f(self);
                drop(guard);
                res?;
            }
        }
        Ok(())
    }
}

/// A client whose driver operations run within a transaction. The
/// driver capability object is bound to the transaction and must not
/// outlive it.
pub struct TxClient<'a> {
    /// The client the transaction was opened on.
    pub client: &'a Client,
}

impl TxClient<'_> {
    /// The transaction-bound driver.
    #[must_use]
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.client.driver
    }

    /// Commits the transaction after running the before-commit hooks.
    pub async fn commit(self) -> Result<()> {
        for hook in &self.client.hooks {
            if let Some(f) = &hook.tx_before_commit {
                let guard = hook_guard::enter();
                let res = f(&self);
                drop(guard);
                res?;
            }
        }
        self.client
            .driver
            .tx_commit()
            .await
            .map_err(ClientError::Migrate)
    }

    /// Rolls back the transaction after running the before-rollback
    /// hooks.
    pub async fn rollback(self) -> Result<()> {
        for hook in &self.client.hooks {
            if let Some(f) = &hook.tx_before_rollback {
                let guard = hook_guard::enter();
                let res = f(&self);
                drop(guard);
                res?;
            }
        }
        self.client
            .driver
            .tx_rollback()
            .await
            .map_err(ClientError::Migrate)
    }
}

struct Registered {
    name: String,
    opener: Arc<dyn Opener>,
    parser: Arc<dyn UrlParser>,
    tx_opener: Option<Arc<dyn TxOpener>>,
}

static DRIVERS: Lazy<RwLock<HashMap<String, Arc<Registered>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// A driver registration. Built once at startup and finished with
/// [`Registration::register`].
pub struct Registration {
    name: String,
    opener: Arc<dyn Opener>,
    parser: Arc<dyn UrlParser>,
    tx_opener: Option<Arc<dyn TxOpener>>,
    flavours: Vec<String>,
}

impl Registration {
    /// Starts a registration for the given scheme.
    #[must_use]
    pub fn new(name: impl Into<String>, opener: Arc<dyn Opener>) -> Self {
        Self {
            name: name.into(),
            opener,
            parser: Arc::new(DefaultUrlParser),
            tx_opener: None,
            flavours: Vec::new(),
        }
    }

    /// Adds alias schemes accepted for this driver.
    #[must_use]
    pub fn flavours(mut self, flavours: &[&str]) -> Self {
        self.flavours = flavours.iter().map(|f| (*f).to_string()).collect();
        self
    }

    /// Sets the URL parser enriching opened URLs.
    #[must_use]
    pub fn url_parser(mut self, parser: impl UrlParser + 'static) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    /// Sets a custom transaction opener.
    #[must_use]
    pub fn tx_opener(mut self, opener: impl TxOpener + 'static) -> Self {
        self.tx_opener = Some(Arc::new(opener));
        self
    }

    /// Registers the driver under its scheme and flavours.
    ///
    /// # Panics
    ///
    /// Panics when any scheme is already registered. Registration must
    /// happen once, during startup.
    pub fn register(self) {
        let registered = Arc::new(Registered {
            name: self.name.clone(),
            opener: self.opener,
            parser: self.parser,
            tx_opener: self.tx_opener,
        });
        let schemes: Vec<&String> = self.flavours.iter().chain(std::iter::once(&self.name)).collect();
        let duplicate = {
            let drivers = DRIVERS.read().expect("driver registry poisoned");
            schemes.iter().find(|s| drivers.contains_key(s.as_str())).map(|s| (*s).clone())
        };
        if let Some(scheme) = duplicate {
            panic!("strata/client: register called twice for {scheme}");
        }
        let mut drivers = DRIVERS.write().expect("driver registry poisoned");
        for scheme in schemes {
            drivers.insert(scheme.clone(), registered.clone());
        }
    }
}

/// Reports whether a driver is registered for the scheme.
#[must_use]
pub fn has_driver(scheme: &str) -> bool {
    DRIVERS
        .read()
        .expect("driver registry poisoned")
        .contains_key(scheme)
}

/// Options for [`open`].
#[derive(Default)]
pub struct OpenOptions {
    hooks: Vec<Arc<Hook>>,
}

impl OpenOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a lifecycle hook.
    #[must_use]
    pub fn hook(mut self, hook: Hook) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }
}

/// Opens a client by URL string.
pub async fn open(url: &str) -> Result<Client> {
    open_with(url, OpenOptions::new()).await
}

/// Opens a client by URL string with options.
pub async fn open_with(url: &str, opts: OpenOptions) -> Result<Client> {
    let url = Url::parse(url)?;
    open_url(&url, opts).await
}

/// Opens a client by parsed URL.
pub async fn open_url(url: &Url, opts: OpenOptions) -> Result<Client> {
    if hook_guard::active() {
        return Err(ClientError::HookOpen);
    }
    let scheme = url.scheme();
    if scheme.is_empty() {
        return Err(ClientError::MissingScheme);
    }
    let registered = {
        let drivers = DRIVERS.read().expect("driver registry poisoned");
        drivers
            .get(scheme)
            .cloned()
            .ok_or_else(|| ClientError::UnknownDriver(scheme.to_string()))?
    };
    debug!(scheme, driver = %registered.name, "opening client");
    let mut client = registered.opener.open(url).await?;
    client.url = registered.parser.parse_url(url);
    if client.tx_opener.is_none() {
        client.tx_opener.clone_from(&registered.tx_opener);
    }
    if !opts.hooks.is_empty() {
        client.hooks = opts.hooks;
        if let Err(err) = client.after_open() {
            return Err(match client.close().await {
                Ok(()) => err,
                Err(cerr) => ClientError::Joined(Box::new(err), Box::new(cerr)),
            });
        }
    }
    Ok(client)
}

/// Resolves a `file://` URL to a local migration directory.
pub fn dir_from_url(url: &Url) -> Result<LocalDir> {
    if url.scheme() != "file" {
        return Err(ClientError::UnknownDriver(url.scheme().to_string()));
    }
    let mut path = PathBuf::new();
    if let Some(host) = url.host_str().filter(|h| !h.is_empty()) {
        path.push(host);
    }
    let url_path = url.path();
    if !url_path.is_empty() && url_path != "/" {
        let trimmed = url_path.strip_prefix('/').unwrap_or(url_path);
        if path.as_os_str().is_empty() {
            path.push(format!("/{trimmed}"));
        } else {
            path.push(trimmed);
        }
    }
    Ok(LocalDir::new(path).map_err(ClientError::Migrate)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use strata_migrate::driver::{InspectOptions, RestoreFunc, UnlockFunc};
    use strata_migrate::{Plan, Stmt, TableIdent};
    use strata_schema::changes::{Change, DiffOptions};
    use strata_schema::model::{Realm, Schema, Table};
    use strata_schema::types::Type;

    #[derive(Default)]
    struct StubDriver;

    #[async_trait]
    impl Driver for StubDriver {
        async fn inspect_schema(
            &self,
            _: Option<&str>,
            _: &InspectOptions,
        ) -> strata_migrate::Result<Schema> {
            Ok(Schema::new("main"))
        }

        async fn inspect_realm(&self, _: &InspectOptions) -> strata_migrate::Result<Realm> {
            Ok(Realm::new())
        }

        fn realm_diff(
            &self,
            _: &Realm,
            _: &Realm,
            _: &DiffOptions,
        ) -> strata_migrate::Result<Vec<Change>> {
            Ok(Vec::new())
        }

        fn schema_diff(
            &self,
            _: &Schema,
            _: &Schema,
            _: &DiffOptions,
        ) -> strata_migrate::Result<Vec<Change>> {
            Ok(Vec::new())
        }

        fn table_diff(
            &self,
            _: &Table,
            _: &Table,
            _: &DiffOptions,
        ) -> strata_migrate::Result<Vec<Change>> {
            Ok(Vec::new())
        }

        async fn plan_changes(&self, _: &str, _: &[Change]) -> strata_migrate::Result<Plan> {
            Ok(Plan::default())
        }

        async fn apply_changes(&self, _: &[Change]) -> strata_migrate::Result<()> {
            Ok(())
        }

        async fn exec(&self, _: &str) -> strata_migrate::Result<()> {
            Ok(())
        }

        fn scan_stmts(&self, input: &str) -> strata_migrate::Result<Vec<Stmt>> {
            strata_migrate::scan_file(input, strata_migrate::ScannerOptions::default())
        }

        async fn check_clean(&self, _: Option<&TableIdent>) -> strata_migrate::Result<()> {
            Ok(())
        }

        async fn snapshot(&self) -> strata_migrate::Result<Box<dyn RestoreFunc>> {
            Err(MigrateError::Driver("snapshot unsupported".into()))
        }

        async fn lock(
            &self,
            _: &str,
            _: Duration,
        ) -> strata_migrate::Result<Box<dyn UnlockFunc>> {
            Err(MigrateError::Driver("lock unsupported".into()))
        }

        fn format_type(&self, _: &Type) -> strata_migrate::Result<String> {
            Ok("int".into())
        }

        fn parse_type(&self, _: &str) -> strata_migrate::Result<Type> {
            Ok(Type::int())
        }
    }

    struct StubOpener;

    #[async_trait]
    impl Opener for StubOpener {
        async fn open(&self, url: &Url) -> Result<Client> {
            Ok(Client::new(
                "stub",
                DefaultUrlParser.parse_url(url),
                Arc::new(StubDriver),
            ))
        }
    }

    fn register_stub_once() {
        static ONCE: std::sync::Once = std::sync::Once::new();
        ONCE.call_once(|| {
            Registration::new("stub", Arc::new(StubOpener))
                .flavours(&["stub-flavour"])
                .register();
        });
    }

    #[tokio::test]
    async fn open_resolves_scheme_and_flavours() {
        register_stub_once();
        assert!(has_driver("stub"));
        assert!(has_driver("stub-flavour"));

        let client = open("stub://localhost/db").await.unwrap();
        assert_eq!(client.name, "stub");
        assert_eq!(client.url.dsn, "stub://localhost/db");

        let client = open("stub-flavour://localhost/db").await.unwrap();
        assert_eq!(client.name, "stub");
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        let err = open("nosuch://x").await.unwrap_err();
        assert!(matches!(err, ClientError::UnknownDriver(s) if s == "nosuch"));
    }

    #[test]
    #[should_panic(expected = "register called twice")]
    fn duplicate_registration_panics() {
        Registration::new("dup-scheme", Arc::new(StubOpener)).register();
        Registration::new("dup-scheme", Arc::new(StubOpener)).register();
    }

    #[tokio::test]
    async fn after_open_hooks_run() {
        register_stub_once();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let opts = OpenOptions::new().hook(Hook {
            conn_after_open: Some(Box::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
            ..Hook::default()
        });
        open_with("stub://x", opts).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_after_open_hook_closes_client() {
        register_stub_once();
        let opts = OpenOptions::new().hook(Hook {
            conn_after_open: Some(Box::new(|_| Err(ClientError::Hook("refused".into())))),
            ..Hook::default()
        });
        let err = open_with("stub://x", opts).await.unwrap_err();
        assert!(err.to_string().contains("refused"));
    }

    #[tokio::test]
    async fn nested_open_inside_hook_is_forbidden() {
        register_stub_once();
        let guard = hook_guard::enter();
        let err = open("stub://x").await.unwrap_err();
        assert!(matches!(err, ClientError::HookOpen));
        drop(guard);
        assert!(open("stub://x").await.is_ok());
    }

    #[tokio::test]
    async fn hook_marker_is_active_during_hooks() {
        register_stub_once();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let opts = OpenOptions::new().hook(Hook {
            conn_after_open: Some(Box::new(move |_| {
                if hook_guard::active() {
                    s.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            })),
            ..Hook::default()
        });
        open_with("stub://x", opts).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!hook_guard::active());
    }

    #[tokio::test]
    async fn tx_hooks_dispatch() {
        register_stub_once();
        let commits = Arc::new(AtomicUsize::new(0));
        let c = commits.clone();
        let opts = OpenOptions::new().hook(Hook {
            tx_before_commit: Some(Box::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
            ..Hook::default()
        });
        let client = open_with("stub://x", opts).await.unwrap();
        let tx = client.tx().await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(commits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn file_url_to_dir() {
        let tmp = tempdir_path();
        let url = Url::parse(&format!("file://{}", tmp.display())).unwrap();
        let dir = dir_from_url(&url).unwrap();
        assert_eq!(dir.path(), tmp.as_path());

        let url = Url::parse("env://prod").unwrap();
        assert!(matches!(dir_from_url(&url), Err(ClientError::UnknownDriver(_))));
    }

    fn tempdir_path() -> PathBuf {
        let path = std::env::temp_dir().join("strata-client-test-dir");
        std::fs::create_dir_all(&path).unwrap();
        path
    }
}
