use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use url::Url;

use crate::{
    arena::{Image, Resource},
    bridge::Bridge,
    config::SourceConfig,
    error::{Error, Result},
    features::SourceFeatures,
    host::{Host, HttpRequest},
    interpreter::Interpreter,
    model::{
        Chapter, DeepLinkResult, FilterValue, Home, IdKind, ImageResponse, Listing, Manga,
        MangaPageResult, Page, PageContext,
    },
};

/// Async handle to a loaded source.
///
/// Calls are serialised and run on tokio's blocking pool, leaving runtime
/// workers free to drive the host futures the guest waits on. Clones share
/// the same guest instance.
#[derive(Clone)]
pub struct Source {
    interpreter: Arc<Mutex<Interpreter>>,
    features: SourceFeatures,
    source_key: Arc<str>,
    manga_updates: watch::Receiver<Option<Manga>>,
    home_updates: watch::Receiver<Option<Home>>,
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("source_key", &self.source_key)
            .field("features", &self.features)
            .finish_non_exhaustive()
    }
}

impl Source {
    /// Load a source on the blocking pool of the current runtime.
    ///
    /// # Errors
    /// See [`Interpreter::load`]; also fails outside a tokio runtime.
    pub async fn load<H: Host>(
        wasm: impl Into<Vec<u8>>,
        host: H,
        config: SourceConfig,
    ) -> Result<Self> {
        let bridge = Bridge::current()?;
        let host: Arc<dyn Host> = Arc::new(host);
        let wasm = wasm.into();
        let interpreter = tokio::task::spawn_blocking(move || {
            Interpreter::load(&wasm, host, &config, bridge)
        })
        .await??;
        Ok(Self {
            features: interpreter.features(),
            source_key: interpreter.source_key().into(),
            manga_updates: interpreter.subscribe_manga_updates(),
            home_updates: interpreter.subscribe_home_updates(),
            interpreter: Arc::new(Mutex::new(interpreter)),
        })
    }

    #[must_use]
    pub const fn features(&self) -> SourceFeatures {
        self.features
    }

    #[must_use]
    pub fn source_key(&self) -> &str {
        &self.source_key
    }

    /// Partial manga streamed by the running [`Self::get_manga_update`].
    #[must_use]
    pub fn manga_updates(&self) -> watch::Receiver<Option<Manga>> {
        self.manga_updates.clone()
    }

    /// Home layout streamed by the running [`Self::get_home`].
    #[must_use]
    pub fn home_updates(&self) -> watch::Receiver<Option<Home>> {
        self.home_updates.clone()
    }

    async fn run<R, F>(&self, call: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Interpreter) -> Result<R> + Send + 'static,
    {
        let interpreter = Arc::clone(&self.interpreter);
        tokio::task::spawn_blocking(move || call(&mut interpreter.lock()))
            .await
            .map_err(Error::Join)?
    }

    pub fn store(&self, resource: impl Into<Resource>) -> i32 {
        self.interpreter.lock().store(resource)
    }

    pub fn remove(&self, handle: i32) -> Option<Resource> {
        self.interpreter.lock().remove(handle)
    }

    /// # Errors
    /// See [`Interpreter::get_search_manga_list`].
    pub async fn get_search_manga_list(
        &self,
        query: Option<String>,
        page: i32,
        filters: Vec<FilterValue>,
    ) -> Result<MangaPageResult> {
        self.run(move |i| i.get_search_manga_list(query.as_deref(), page, &filters))
            .await
    }

    /// # Errors
    /// See [`Interpreter::get_manga_update`].
    pub async fn get_manga_update(
        &self,
        manga: Manga,
        needs_details: bool,
        needs_chapters: bool,
    ) -> Result<Manga> {
        self.run(move |i| i.get_manga_update(&manga, needs_details, needs_chapters))
            .await
    }

    /// # Errors
    /// See [`Interpreter::get_page_list`].
    pub async fn get_page_list(&self, manga: Manga, chapter: Chapter) -> Result<Vec<Page>> {
        self.run(move |i| i.get_page_list(&manga, &chapter)).await
    }

    /// # Errors
    /// See [`Interpreter::get_manga_list`].
    pub async fn get_manga_list(&self, listing: Listing, page: i32) -> Result<MangaPageResult> {
        self.run(move |i| i.get_manga_list(&listing, page)).await
    }

    /// # Errors
    /// See [`Interpreter::get_home`].
    pub async fn get_home(&self) -> Result<Home> {
        self.run(Interpreter::get_home).await
    }

    /// # Errors
    /// See [`Interpreter::process_page_image`].
    pub async fn process_page_image(
        &self,
        response: ImageResponse,
        context: Option<PageContext>,
    ) -> Result<Option<Image>> {
        self.run(move |i| i.process_page_image(&response, context.as_ref()))
            .await
    }

    /// # Errors
    /// See [`Interpreter::get_filters`].
    pub async fn get_filters<T: DeserializeOwned + Send + 'static>(&self) -> Result<Vec<T>> {
        self.run(Interpreter::get_filters::<T>).await
    }

    /// # Errors
    /// See [`Interpreter::get_settings`].
    pub async fn get_settings<T: DeserializeOwned + Send + 'static>(&self) -> Result<Vec<T>> {
        self.run(Interpreter::get_settings::<T>).await
    }

    /// # Errors
    /// See [`Interpreter::get_listings`].
    pub async fn get_listings(&self) -> Result<Vec<Listing>> {
        self.run(Interpreter::get_listings).await
    }

    /// # Errors
    /// See [`Interpreter::get_image_request`].
    pub async fn get_image_request(
        &self,
        url: String,
        context: Option<PageContext>,
    ) -> Result<HttpRequest> {
        self.run(move |i| i.get_image_request(&url, context.as_ref()))
            .await
    }

    /// # Errors
    /// See [`Interpreter::get_page_description`].
    pub async fn get_page_description(&self, page: Page) -> Result<String> {
        self.run(move |i| i.get_page_description(&page)).await
    }

    /// # Errors
    /// See [`Interpreter::get_alternate_covers`].
    pub async fn get_alternate_covers(&self, manga: Manga) -> Result<Vec<String>> {
        self.run(move |i| i.get_alternate_covers(&manga)).await
    }

    /// # Errors
    /// See [`Interpreter::get_base_url`].
    pub async fn get_base_url(&self) -> Result<Option<Url>> {
        self.run(Interpreter::get_base_url).await
    }

    /// # Errors
    /// See [`Interpreter::handle_notification`].
    pub async fn handle_notification(&self, notification: String) -> Result<()> {
        self.run(move |i| i.handle_notification(&notification)).await
    }

    /// # Errors
    /// See [`Interpreter::handle_deep_link`].
    pub async fn handle_deep_link(&self, url: String) -> Result<Option<DeepLinkResult>> {
        self.run(move |i| i.handle_deep_link(&url)).await
    }

    /// # Errors
    /// See [`Interpreter::handle_basic_login`].
    pub async fn handle_basic_login(
        &self,
        key: String,
        username: String,
        password: String,
    ) -> Result<bool> {
        self.run(move |i| i.handle_basic_login(&key, &username, &password))
            .await
    }

    /// # Errors
    /// See [`Interpreter::handle_web_login`].
    pub async fn handle_web_login(
        &self,
        key: String,
        cookies: BTreeMap<String, String>,
    ) -> Result<bool> {
        self.run(move |i| i.handle_web_login(&key, &cookies)).await
    }

    /// # Errors
    /// See [`Interpreter::handle_id_migration`].
    pub async fn handle_id_migration(&self, id: String, kind: IdKind) -> Result<String> {
        self.run(move |i| i.handle_id_migration(&id, kind)).await
    }
}
