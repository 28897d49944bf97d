//! Synchronous execution of one loaded source.
//!
//! Every call runs the guest on the calling thread. Capabilities that need
//! async work block that thread on the [`Bridge`], so an [`Interpreter`] must
//! be driven from outside the tokio runtime, for example through
//! [`crate::Source`].

use std::{collections::BTreeMap, collections::HashMap, sync::Arc, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::watch;
use tracing::{debug, info, info_span};
use url::Url;
use wasmtime::{Config, Engine, Func, Linker, Module, Store, Trap, TypedFunc, WasmParams, WasmResults};

use crate::{
    TRACE_TARGET_SCRIPT,
    arena::{ABSENT, Arena, Image, Resource, SharedArena},
    bridge::Bridge,
    capability,
    config::{SourceConfig, UnknownImports},
    error::{Error, Result},
    features::{OPTIONAL_EXPORTS, REQUIRED_EXPORTS, SourceFeatures},
    host::{Host, HttpRequest},
    internal::{
        abi::{GuestResult, ResultBuffer},
        engine::{EpochTicker, configure_engine, deadline_ticks},
        limits::StoreLimits,
    },
    memory::GuestMemory,
    model::{
        Chapter, DeepLinkResult, FilterValue, Home, HomePartialResult, IdKind, ImageResponse,
        Listing, Manga, MangaPageResult, Page, PageContext,
    },
    partial::PartialResults,
    rate_limit::RateLimiter,
    state::{HostState, SourceContext},
};

/// Values placed in the arena for the duration of one call.
struct Arguments {
    arena: SharedArena,
    handles: Vec<i32>,
}

impl Arguments {
    const fn new(arena: SharedArena) -> Self {
        Self {
            arena,
            handles: Vec::new(),
        }
    }

    fn keep(&mut self, handle: i32) -> i32 {
        self.handles.push(handle);
        handle
    }

    fn text(&mut self, text: &str) -> i32 {
        let handle = self.arena.lock().store(text);
        self.keep(handle)
    }

    fn encoded<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<i32> {
        let handle = self.arena.lock().store_encoded(value)?;
        Ok(self.keep(handle))
    }

    fn optional<T: Serialize>(&mut self, value: Option<&T>) -> Result<i32> {
        value.map_or(Ok(ABSENT), |value| self.encoded(value))
    }
}

impl Drop for Arguments {
    fn drop(&mut self) {
        let mut arena = self.arena.lock();
        for handle in self.handles.drain(..) {
            arena.remove(handle);
        }
    }
}

#[derive(Default)]
struct HomeProgress {
    home: Option<Home>,
    error: Option<sourcebridge_codec::Error>,
}

fn trap_error(error: anyhow::Error, timeout: Option<Duration>) -> Error {
    match (error.downcast_ref::<Trap>(), timeout) {
        (Some(Trap::Interrupt), Some(timeout)) => Error::Timeout(timeout),
        _ => Error::Wasm(error),
    }
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    sourcebridge_codec::from_bytes(payload).map_err(Error::Decode)
}

pub struct Interpreter {
    store: Store<HostState>,
    memory: GuestMemory,
    free_result: TypedFunc<i32, ()>,
    exports: HashMap<&'static str, Func>,
    features: SourceFeatures,
    context: Arc<SourceContext>,
    call_timeout: Option<Duration>,
    deadline: u64,
    manga_updates: watch::Sender<Option<Manga>>,
    home_updates: watch::Sender<Option<Home>>,
    _ticker: Option<EpochTicker>,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("source_key", &self.context.source_key)
            .field("features", &self.features)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl Interpreter {
    /// Compile and instantiate `wasm` (binary or text format), link the
    /// capability namespaces and run the guest's `start` export.
    ///
    /// # Errors
    /// Fails on invalid modules, unresolved imports (unless
    /// [`UnknownImports::Trap`]), missing required exports, or a failing
    /// `start`.
    pub fn load(
        wasm: impl AsRef<[u8]>,
        host: Arc<dyn Host>,
        config: &SourceConfig,
        bridge: Bridge,
    ) -> Result<Self> {
        let _span = info_span!(
            target: TRACE_TARGET_SCRIPT,
            "source.load",
            source = %config.source_key,
        )
        .entered();

        let mut cfg = Config::new();
        configure_engine(&mut cfg, config.call_timeout.is_some());
        let engine = Engine::new(&cfg).map_err(Error::Wasm)?;
        let module = Module::new(&engine, wasm).map_err(Error::Wasm)?;

        let context = Arc::new(SourceContext {
            source_key: config.source_key.clone(),
            arena: Arena::shared(),
            host,
            bridge,
            rate_limiter: RateLimiter::new(),
            partials: PartialResults::new(),
            settings: Arc::clone(&config.settings),
            max_response_bytes: config.max_response_bytes,
        });

        let mut linker = Linker::new(&engine);
        let mut capabilities = capability::builtin();
        capabilities.extend(config.capabilities.iter().cloned());
        capability::link_all(&mut linker, &capabilities);

        let mut store = Store::new(
            &engine,
            HostState::new(StoreLimits::new(config), Arc::clone(&context)),
        );
        store.limiter(|state| &mut state.limits);

        match config.unknown_imports {
            UnknownImports::Trap => linker
                .define_unknown_imports_as_traps(&module)
                .map_err(Error::Wasm)?,
            UnknownImports::Reject => {
                for import in module.imports() {
                    if linker
                        .get(&mut store, import.module(), import.name())
                        .is_none()
                    {
                        return Err(Error::link(
                            format!("{}.{}", import.module(), import.name()),
                            "no capability provides this import",
                        ));
                    }
                }
            }
        }

        let deadline = config
            .call_timeout
            .map_or(u64::MAX, |timeout| deadline_ticks(timeout, config.epoch_tick));
        let ticker = match config.call_timeout {
            Some(_) => {
                store.set_epoch_deadline(deadline);
                let ticker = EpochTicker::start(engine.clone(), config.epoch_tick)
                    .map_err(|e| Error::Wasm(e.into()))?;
                Some(ticker)
            }
            None => None,
        };

        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| trap_error(e, config.call_timeout))?;
        let memory = GuestMemory::from_instance(&instance, &mut store)?;

        for name in REQUIRED_EXPORTS {
            if instance.get_func(&mut store, name).is_none() {
                return Err(Error::link(name, "missing required export"));
            }
        }
        let exports: HashMap<&'static str, Func> = REQUIRED_EXPORTS
            .into_iter()
            .chain(OPTIONAL_EXPORTS)
            .filter_map(|name| instance.get_func(&mut store, name).map(|f| (name, f)))
            .collect();
        let features = SourceFeatures::detect(|name| exports.contains_key(name));
        let free_result = instance
            .get_typed_func::<i32, ()>(&mut store, "free_result")
            .map_err(|e| Error::link("free_result", e.to_string()))?;

        let mut interpreter = Self {
            store,
            memory,
            free_result,
            exports,
            features,
            context,
            call_timeout: config.call_timeout,
            manga_updates: watch::Sender::new(None),
            home_updates: watch::Sender::new(None),
            deadline,
            _ticker: ticker,
        };
        interpreter.call::<(), ()>("start", ())?;
        info!(target: TRACE_TARGET_SCRIPT, ?features, "source loaded");
        Ok(interpreter)
    }

    #[must_use]
    pub const fn features(&self) -> SourceFeatures {
        self.features
    }

    #[must_use]
    pub fn source_key(&self) -> &str {
        &self.context.source_key
    }

    #[must_use]
    pub const fn context(&self) -> &Arc<SourceContext> {
        &self.context
    }

    /// Partial manga streamed during [`Self::get_manga_update`], merged over
    /// the manga passed in.
    #[must_use]
    pub fn subscribe_manga_updates(&self) -> watch::Receiver<Option<Manga>> {
        self.manga_updates.subscribe()
    }

    /// Home layout as assembled from partial results during
    /// [`Self::get_home`].
    #[must_use]
    pub fn subscribe_home_updates(&self) -> watch::Receiver<Option<Home>> {
        self.home_updates.subscribe()
    }

    /// Place a value in the arena for the guest to reference later.
    pub fn store(&self, resource: impl Into<Resource>) -> i32 {
        self.context.arena.lock().store(resource)
    }

    pub fn remove(&self, handle: i32) -> Option<Resource> {
        self.context.arena.lock().remove(handle)
    }

    fn call<P, R>(&mut self, name: &'static str, params: P) -> Result<R>
    where
        P: WasmParams,
        R: WasmResults,
    {
        if !self.features.supports(name) {
            return Err(Error::Unimplemented);
        }
        let func = *self.exports.get(name).ok_or(Error::Unimplemented)?;
        let typed = func
            .typed::<P, R>(&self.store)
            .map_err(|e| Error::link(name, e.to_string()))?;
        let _span = info_span!(
            target: TRACE_TARGET_SCRIPT,
            "source.call",
            source = %self.context.source_key,
            function = name,
        )
        .entered();
        if self.call_timeout.is_some() {
            self.store.set_epoch_deadline(self.deadline);
        }
        typed
            .call(&mut self.store, params)
            .map_err(|e| trap_error(e, self.call_timeout))
    }

    /// Resolve a pointer-returning call into its payload, handing the buffer
    /// back to the guest.
    fn take_result(&mut self, ret: i32) -> Result<Vec<u8>> {
        if ret < 0 {
            return Err(Error::from_sentinel(ret));
        }
        let timeout = self.call_timeout;
        let buffer = ResultBuffer::new(&mut self.store, self.free_result.clone(), ret);
        let read = buffer.read(&self.memory);
        buffer.release().map_err(|e| trap_error(e, timeout))?;
        match read? {
            GuestResult::Payload(payload) => Ok(payload),
            GuestResult::Message(message) => Err(Error::Message(message)),
        }
    }

    fn decode_result<T: DeserializeOwned>(&mut self, ret: i32) -> Result<T> {
        let payload = self.take_result(ret)?;
        decode(&payload)
    }

    fn arguments(&self) -> Arguments {
        Arguments::new(Arc::clone(&self.context.arena))
    }

    fn stamp(&self, result: &mut MangaPageResult) {
        for entry in &mut result.entries {
            entry.source_key.clone_from(&self.context.source_key);
        }
    }

    /// A missing query reaches the source as an empty string.
    ///
    /// # Errors
    /// Propagates guest failures and undecodable results.
    pub fn get_search_manga_list(
        &mut self,
        query: Option<&str>,
        page: i32,
        filters: &[FilterValue],
    ) -> Result<MangaPageResult> {
        let mut args = self.arguments();
        let query = args.text(query.unwrap_or_default());
        let filters = args.encoded(filters)?;
        let ret = self.call("get_search_manga_list", (query, page, filters))?;
        let mut result = self.decode_result(ret)?;
        self.stamp(&mut result);
        Ok(result)
    }

    /// Fetch fresh details and/or chapters for `manga`.
    ///
    /// # Errors
    /// Propagates guest failures and undecodable results.
    pub fn get_manga_update(
        &mut self,
        manga: &Manga,
        needs_details: bool,
        needs_chapters: bool,
    ) -> Result<Manga> {
        self.manga_updates.send_replace(None);
        let base = Manga {
            source_key: self.context.source_key.clone(),
            ..manga.clone()
        };
        let updates = self.manga_updates.clone();
        let _registration = self.context.partials.register(move |_: Option<()>, data: &[u8]| {
            match decode::<Manga>(data) {
                Ok(partial) => {
                    updates.send_replace(Some(base.merged_with(partial)));
                }
                Err(error) => debug!(%error, "undecodable partial manga"),
            }
            None
        });

        let mut args = self.arguments();
        let manga_handle = args.encoded(manga)?;
        let ret = self.call(
            "get_manga_update",
            (
                manga_handle,
                i32::from(needs_details),
                i32::from(needs_chapters),
            ),
        )?;
        let mut updated: Manga = self.decode_result(ret)?;
        updated.source_key.clone_from(&self.context.source_key);
        Ok(updated)
    }

    /// Pages of `chapter`. Image pages whose handle no longer resolves are
    /// dropped.
    ///
    /// # Errors
    /// Propagates guest failures and undecodable results.
    pub fn get_page_list(&mut self, manga: &Manga, chapter: &Chapter) -> Result<Vec<Page>> {
        let manga = Manga {
            chapters: None,
            ..manga.clone()
        };
        let mut args = self.arguments();
        let manga_handle = args.encoded(&manga)?;
        let chapter_handle = args.encoded(chapter)?;
        let ret = self.call("get_page_list", (manga_handle, chapter_handle))?;
        let pages: Vec<Page> = self.decode_result(ret)?;
        let arena = self.context.arena.lock();
        Ok(pages
            .into_iter()
            .filter(|page| {
                page.content
                    .image_handle()
                    .is_none_or(|handle| arena.image(handle).is_ok())
            })
            .collect())
    }

    /// # Errors
    /// [`Error::Unimplemented`] unless the source provides listings.
    pub fn get_manga_list(&mut self, listing: &Listing, page: i32) -> Result<MangaPageResult> {
        let mut args = self.arguments();
        let listing = args.encoded(listing)?;
        let ret = self.call("get_manga_list", (listing, page))?;
        let mut result = self.decode_result(ret)?;
        self.stamp(&mut result);
        Ok(result)
    }

    /// Build the home screen. Partial results streamed during the call are
    /// published to [`Self::subscribe_home_updates`]; if the final layout has
    /// no components, the streamed one is returned instead.
    ///
    /// # Errors
    /// [`Error::Unimplemented`] unless the source provides a home screen, or
    /// a decode error from any streamed partial result.
    pub fn get_home(&mut self) -> Result<Home> {
        self.home_updates.send_replace(None);
        let source_key = self.context.source_key.clone();
        let updates = self.home_updates.clone();
        let registration = self.context.partials.register(
            move |progress: Option<HomeProgress>, data: &[u8]| {
                let mut progress = progress.unwrap_or_default();
                if progress.error.is_some() {
                    return Some(progress);
                }
                match sourcebridge_codec::from_bytes::<HomePartialResult>(data) {
                    Ok(partial) => {
                        let mut home = progress.home.take().unwrap_or_default();
                        home.apply(partial);
                        home.set_source_key(&source_key);
                        updates.send_replace(Some(home.clone()));
                        progress.home = Some(home);
                    }
                    Err(error) => progress.error = Some(error),
                }
                Some(progress)
            },
        );

        let ret = self.call::<(), i32>("get_home", ())?;
        let payload = self.take_result(ret);
        let progress = registration.finish().unwrap_or_default();
        if let Some(error) = progress.error {
            return Err(Error::Decode(error));
        }
        let mut home: Home = decode(&payload?)?;
        home.set_source_key(&self.context.source_key);
        match progress.home {
            Some(partial) if home.components.is_empty() => Ok(partial),
            _ => Ok(home),
        }
    }

    /// Let the source transform a fetched page image. Returns the processed
    /// image, or `None` if the returned handle holds no image. The returned
    /// handle is released either way.
    ///
    /// # Errors
    /// [`Error::Unimplemented`] unless the source processes pages.
    pub fn process_page_image(
        &mut self,
        response: &ImageResponse,
        context: Option<&PageContext>,
    ) -> Result<Option<Image>> {
        let mut args = self.arguments();
        let response = args.encoded(response)?;
        let context = args.optional(context)?;
        let ret = self.call("process_page_image", (response, context))?;
        let handle: i32 = self.decode_result(ret)?;
        let removed = self.context.arena.lock().remove(handle);
        Ok(match removed {
            Some(Resource::Image(image)) => Some(image),
            _ => None,
        })
    }

    /// # Errors
    /// [`Error::Unimplemented`] unless the source builds filters at runtime.
    pub fn get_filters<T: DeserializeOwned>(&mut self) -> Result<Vec<T>> {
        let ret = self.call::<(), i32>("get_filters", ())?;
        self.decode_result(ret)
    }

    /// # Errors
    /// [`Error::Unimplemented`] unless the source builds settings at runtime.
    pub fn get_settings<T: DeserializeOwned>(&mut self) -> Result<Vec<T>> {
        let ret = self.call::<(), i32>("get_settings", ())?;
        self.decode_result(ret)
    }

    /// # Errors
    /// [`Error::Unimplemented`] unless the source builds listings at runtime.
    pub fn get_listings(&mut self) -> Result<Vec<Listing>> {
        let ret = self.call::<(), i32>("get_listings", ())?;
        self.decode_result(ret)
    }

    /// The request to fetch a page image with.
    ///
    /// # Errors
    /// [`Error::MissingResult`] if the returned handle holds no request with
    /// a URL. The returned handle is released either way.
    pub fn get_image_request(
        &mut self,
        url: &str,
        context: Option<&PageContext>,
    ) -> Result<HttpRequest> {
        let mut args = self.arguments();
        let url = args.encoded(url)?;
        let context = args.optional(context)?;
        let ret = self.call("get_image_request", (url, context))?;
        let handle: i32 = self.decode_result(ret)?;
        let removed = self.context.arena.lock().remove(handle);
        match removed {
            Some(Resource::Request(request)) => {
                request.to_http_request().ok_or(Error::MissingResult)
            }
            _ => Err(Error::MissingResult),
        }
    }

    /// # Errors
    /// [`Error::Unimplemented`] unless the source provides page descriptions.
    pub fn get_page_description(&mut self, page: &Page) -> Result<String> {
        let mut args = self.arguments();
        let page = args.encoded(page)?;
        let ret = self.call("get_page_description", (page,))?;
        self.decode_result(ret)
    }

    /// # Errors
    /// [`Error::Unimplemented`] unless the source provides alternate covers.
    pub fn get_alternate_covers(&mut self, manga: &Manga) -> Result<Vec<String>> {
        let mut args = self.arguments();
        let manga = args.encoded(manga)?;
        let ret = self.call("get_alternate_covers", (manga,))?;
        self.decode_result(ret)
    }

    /// The source's base URL, `None` if unset or unparsable.
    ///
    /// # Errors
    /// [`Error::Unimplemented`] unless the source provides a base URL.
    pub fn get_base_url(&mut self) -> Result<Option<Url>> {
        let ret = self.call::<(), i32>("get_base_url", ())?;
        let url: Option<String> = self.decode_result(ret)?;
        Ok(url.and_then(|url| Url::parse(&url).ok()))
    }

    /// Forward a notification. The guest's return value carries no meaning
    /// and is discarded.
    ///
    /// # Errors
    /// [`Error::Unimplemented`] unless the source handles notifications.
    pub fn handle_notification(&mut self, notification: &str) -> Result<()> {
        let mut args = self.arguments();
        let notification = args.encoded(notification)?;
        let ret = self.call("handle_notification", (notification,))?;
        if ret >= 0
            && let Err(error) = self.take_result(ret)
        {
            debug!(%error, "notification result discarded");
        }
        Ok(())
    }

    /// # Errors
    /// [`Error::Unimplemented`] unless the source handles deep links.
    pub fn handle_deep_link(&mut self, url: &str) -> Result<Option<DeepLinkResult>> {
        let mut args = self.arguments();
        let url = args.encoded(url)?;
        let ret = self.call("handle_deep_link", (url,))?;
        self.decode_result(ret)
    }

    /// # Errors
    /// [`Error::Unimplemented`] unless the source handles basic login.
    pub fn handle_basic_login(&mut self, key: &str, username: &str, password: &str) -> Result<bool> {
        let mut args = self.arguments();
        let key = args.encoded(key)?;
        let username = args.encoded(username)?;
        let password = args.encoded(password)?;
        let ret = self.call("handle_basic_login", (key, username, password))?;
        self.decode_result(ret)
    }

    /// Hand cookies captured by a web login to the source.
    ///
    /// # Errors
    /// [`Error::Unimplemented`] unless the source handles web login.
    pub fn handle_web_login(&mut self, key: &str, cookies: &BTreeMap<String, String>) -> Result<bool> {
        let (names, values): (Vec<&String>, Vec<&String>) = cookies.iter().unzip();
        let mut args = self.arguments();
        let key = args.encoded(key)?;
        let names = args.encoded(&names)?;
        let values = args.encoded(&values)?;
        let ret = self.call("handle_web_login", (key, names, values))?;
        self.decode_result(ret)
    }

    /// Translate an identifier from an older version of the source.
    ///
    /// # Errors
    /// [`Error::Unimplemented`] unless the source handles migration.
    pub fn handle_id_migration(&mut self, id: &str, kind: IdKind) -> Result<String> {
        let mut args = self.arguments();
        let id = args.encoded(id)?;
        let ret = self.call("handle_id_migration", (id, kind.as_raw()))?;
        self.decode_result(ret)
    }
}
