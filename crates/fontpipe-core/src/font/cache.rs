//! Load cache and deduplicator
//!
//! `FontLoader` owns every provisioned font for one document. Requests for a
//! family that is already cached return immediately, requests for a family
//! that is still loading share the running attempt, and everything else starts
//! a new pipeline run.

use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use async_channel::Receiver;
use futures::future::{LocalBoxFuture, Shared};
use futures::FutureExt;

use crate::apply::{global_style_id, AppliedStyles, FontApplier};
use crate::config::PipelineConfig;
use crate::error::{FontError, FontResult};
use crate::events::{EventBus, FontEvent};
use crate::font::acquire::acquire_binary;
use crate::font::encoder::encode_chunked;
use crate::font::fallback::{backup_style_id, force_probe_id, preload_id, FallbackForcer};
use crate::font::naming::{backup_family_name, FamilyMinter};
use crate::font::register::{probe_id, style_id, Registrar};
use crate::font::verify::Verifier;
use crate::font::{BinarySource, FontDefinition, FontFormat, FontRecord, Liveness, UsageType, Verification};
use crate::traits::{DocumentSurface, EventLoop, Fetcher};

type SharedAttempt = Shared<LocalBoxFuture<'static, FontResult<FontRecord>>>;

/// What identifies "the same font" when no family is given
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum SourceKey {
    Url(String),
    Bytes {
        fingerprint: u64,
        len: usize,
        display_name: String,
        format: FontFormat,
        usage: UsageType,
    },
}

impl SourceKey {
    fn of(definition: &FontDefinition) -> Self {
        match &definition.source {
            BinarySource::Url(url) => SourceKey::Url(url.trim().to_string()),
            BinarySource::Bytes { bytes, .. } => {
                let mut hasher = DefaultHasher::new();
                bytes.hash(&mut hasher);
                SourceKey::Bytes {
                    fingerprint: hasher.finish(),
                    len: bytes.len(),
                    display_name: definition.display_name.clone(),
                    format: definition.format,
                    usage: definition.usage,
                }
            }
        }
    }
}

struct Pending {
    attempt: u64,
    future: SharedAttempt,
}

struct LoaderState {
    fonts: HashMap<String, FontRecord>,
    /// Attempts still tracked for deduplication
    pending: HashMap<String, Pending>,
    /// Attempts still running, including ones the watchdog stopped tracking
    running: HashMap<String, HashSet<u64>>,
    aliases: HashMap<SourceKey, String>,
    cancelled: HashSet<u64>,
    applied: HashMap<String, Vec<String>>,
    minter: FamilyMinter,
    next_attempt: u64,
}

struct LoaderInner {
    surface: Rc<dyn DocumentSurface>,
    event_loop: Rc<dyn EventLoop>,
    fetcher: Rc<dyn Fetcher>,
    config: PipelineConfig,
    events: Rc<EventBus>,
    registrar: Registrar,
    verifier: Verifier,
    forcer: FallbackForcer,
    applier: FontApplier,
    state: RefCell<LoaderState>,
}

/// Deduplicating font loader for one document.
///
/// Cheap to clone; clones share the same cache.
#[derive(Clone)]
pub struct FontLoader {
    inner: Rc<LoaderInner>,
}

impl FontLoader {
    pub fn new(
        surface: Rc<dyn DocumentSurface>,
        event_loop: Rc<dyn EventLoop>,
        fetcher: Rc<dyn Fetcher>,
        config: PipelineConfig,
    ) -> Self {
        let events = Rc::new(EventBus::new());
        let registrar = Registrar::new(
            Rc::clone(&surface),
            Rc::clone(&event_loop),
            Rc::clone(&events),
            config.clone(),
        );
        let verifier = Verifier::new(Rc::clone(&surface), Rc::clone(&event_loop), config.clone());
        let forcer = FallbackForcer::new(Rc::clone(&surface), Rc::clone(&event_loop), config.clone());
        let applier = FontApplier::new(Rc::clone(&surface));
        let state = LoaderState {
            fonts: HashMap::new(),
            pending: HashMap::new(),
            running: HashMap::new(),
            aliases: HashMap::new(),
            cancelled: HashSet::new(),
            applied: HashMap::new(),
            minter: FamilyMinter::new(config.family_slug_max_graphemes),
            next_attempt: 0,
        };

        FontLoader {
            inner: Rc::new(LoaderInner {
                surface,
                event_loop,
                fetcher,
                config,
                events,
                registrar,
                verifier,
                forcer,
                applier,
                state: RefCell::new(state),
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Provision a font, reusing cached or in-flight work for the same family.
    pub async fn acquire(&self, definition: FontDefinition) -> FontResult<FontRecord> {
        let attempt = {
            let mut state = self.inner.state.borrow_mut();
            let key = SourceKey::of(&definition);
            let known = definition.family.clone().or_else(|| state.aliases.get(&key).cloned());
            let family = match known {
                Some(family) => family,
                None => {
                    let now = self.inner.event_loop.now_millis();
                    state.minter.mint(&definition.display_name, now)
                }
            };

            if let Some(record) = state.fonts.get(&family) {
                tracing::debug!("font {} already loaded", family);
                return Ok(record.clone());
            }

            let joined = state.pending.get(&family).map(|p| (p.attempt, p.future.clone()));
            if let Some((attempt, future)) = joined {
                tracing::debug!("font {} is loading, joining attempt {}", family, attempt);
                future
            } else {
                let attempt = state.next_attempt;
                state.next_attempt += 1;
                state.aliases.insert(key.clone(), family.clone());
                state.running.entry(family.clone()).or_default().insert(attempt);

                let future = LoaderInner::run_attempt(
                    Rc::clone(&self.inner),
                    definition,
                    family.clone(),
                    key,
                    attempt,
                )
                .boxed_local()
                .shared();
                state.pending.insert(family.clone(), Pending { attempt, future: future.clone() });
                drop(state);

                tracing::info!("starting load attempt {} for {}", attempt, family);
                // Drive the attempt even if every caller stops waiting
                self.inner.event_loop.spawn(Box::pin(future.clone().map(|_| ())));
                self.spawn_watchdog(family, attempt);
                future
            }
        };

        attempt.await
    }

    fn spawn_watchdog(&self, family: String, attempt: u64) {
        let inner: Weak<LoaderInner> = Rc::downgrade(&self.inner);
        let delay = self.inner.event_loop.sleep(self.inner.config.inflight_timeout);
        let timeout = self.inner.config.inflight_timeout;
        self.inner.event_loop.spawn(Box::pin(async move {
            delay.await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut state = inner.state.borrow_mut();
            if state.pending.get(&family).is_some_and(|p| p.attempt == attempt) {
                state.pending.remove(&family);
                tracing::warn!(
                    "load attempt {} for {} still running after {:?}, no longer deduplicating it",
                    attempt,
                    family,
                    timeout
                );
            }
        }));
    }

    /// Remove a font and every side effect it left on the document.
    ///
    /// Returns `false` for an unknown family. An in-flight attempt for the
    /// family is cancelled and resolves with [`FontError::Released`].
    pub fn release(&self, family: &str) -> bool {
        let (applied, was_loading) = {
            let mut state = self.inner.state.borrow_mut();
            let record = state.fonts.remove(family);
            state.pending.remove(family);
            let running = state.running.remove(family);
            if record.is_none() && running.is_none() {
                tracing::debug!("release of unknown font {}", family);
                return false;
            }
            // Includes attempts the watchdog no longer deduplicates
            state.cancelled.extend(running.into_iter().flatten());
            state.aliases.retain(|_, f| f != family);
            (state.applied.remove(family).unwrap_or_default(), record.is_none())
        };

        let surface = &self.inner.surface;
        let owned = [
            style_id(family),
            probe_id(family),
            backup_style_id(family),
            preload_id(family),
            force_probe_id(family),
            global_style_id(family),
        ];
        for id in owned.iter().chain(applied.iter()) {
            // Forcer probes may have been replaced more than once
            while surface.remove_node(id) {}
        }

        for name in [family.to_string(), backup_family_name(family)] {
            match surface.delete_faces(&name) {
                Ok(0) => {}
                Ok(n) => tracing::debug!("removed {} font faces for {}", n, name),
                Err(e) => tracing::warn!("failed to remove font faces for {}: {}", name, e),
            }
        }

        if was_loading {
            tracing::info!("released {} while it was still loading", family);
        } else {
            tracing::info!("released font {}", family);
        }
        self.inner.events.publish(FontEvent::Released { family: family.to_string() });
        true
    }

    pub fn get(&self, family: &str) -> Option<FontRecord> {
        self.inner.state.borrow().fonts.get(family).cloned()
    }

    /// Every cached font, ordered by family
    pub fn fonts(&self) -> Vec<FontRecord> {
        let mut fonts: Vec<FontRecord> = self.inner.state.borrow().fonts.values().cloned().collect();
        fonts.sort_by(|a, b| a.family.cmp(&b.family));
        fonts
    }

    pub fn fonts_by_usage(&self, usage: UsageType) -> Vec<FontRecord> {
        self.fonts().into_iter().filter(|f| f.usage == usage).collect()
    }

    pub fn is_loading(&self, family: &str) -> bool {
        self.inner.state.borrow().running.contains_key(family)
    }

    pub fn subscribe(&self) -> Receiver<FontEvent> {
        self.inner.events.subscribe()
    }

    /// Run verification again for a cached font.
    ///
    /// A font that fails and has no backup yet gets the fallback forcer.
    pub async fn reverify(&self, family: &str) -> FontResult<Verification> {
        let record = self.cached(family)?;
        let active = self.inner.verifier.verify(family).await;
        let verification = if active { Verification::Active } else { Verification::Failed };

        let backup = match record.backup_family {
            None if !active => Some(
                self.inner
                    .forcer
                    .force_apply(family, &record.encoded_payload, record.format, self.inner.liveness(family, None))
                    .backup_family,
            ),
            backup => backup,
        };

        self.update(family, |r| {
            r.verification = verification;
            r.backup_family = backup;
        })?;
        self.inner.events.publish(FontEvent::Verified { family: family.to_string(), verification });
        Ok(verification)
    }

    /// Register a cached font again and force it onto the page
    pub async fn refresh(&self, family: &str) -> FontResult<FontRecord> {
        let record = self.cached(family)?;
        tracing::info!("refreshing font {}", family);
        let live = self.inner.liveness(family, None);
        self.inner.registrar.register(&record, Rc::clone(&live)).await;
        let forced = self.inner.forcer.force_apply(family, &record.encoded_payload, record.format, live);
        self.update(family, |r| r.backup_family = Some(forced.backup_family))
    }

    /// Apply a cached font to one element
    pub fn apply_to_element(&self, element: &str, family: &str) -> FontResult<String> {
        let record = self.cached(family)?;
        let style_id = self.inner.applier.apply_to_element(element, &record);
        self.track_applied(family, std::slice::from_ref(&style_id));
        Ok(style_id)
    }

    /// Apply a cached font to every element matching its usage selectors
    pub fn apply_to_targets(&self, family: &str) -> FontResult<AppliedStyles> {
        let record = self.cached(family)?;
        let applied = self.inner.applier.apply_to_targets(&record);
        self.track_applied(family, &applied.style_ids);
        Ok(applied)
    }

    fn track_applied(&self, family: &str, style_ids: &[String]) {
        self.inner
            .state
            .borrow_mut()
            .applied
            .entry(family.to_string())
            .or_default()
            .extend_from_slice(style_ids);
    }

    fn cached(&self, family: &str) -> FontResult<FontRecord> {
        self.get(family).ok_or_else(|| FontError::UnknownFamily { family: family.to_string() })
    }

    /// Mutate a cached record; the font may have been released while we waited
    fn update(&self, family: &str, f: impl FnOnce(&mut FontRecord)) -> FontResult<FontRecord> {
        let mut state = self.inner.state.borrow_mut();
        let record = state
            .fonts
            .get_mut(family)
            .ok_or_else(|| FontError::Released { family: family.to_string() })?;
        f(record);
        Ok(record.clone())
    }
}

impl LoaderInner {
    async fn run_attempt(
        inner: Rc<LoaderInner>,
        definition: FontDefinition,
        family: String,
        key: SourceKey,
        attempt: u64,
    ) -> FontResult<FontRecord> {
        let result = inner.provision(&definition, &family, attempt).await;

        let mut state = inner.state.borrow_mut();
        let cancelled = state.cancelled.remove(&attempt);
        if state.pending.get(&family).is_some_and(|p| p.attempt == attempt) {
            state.pending.remove(&family);
        }
        if let Some(attempts) = state.running.get_mut(&family) {
            attempts.remove(&attempt);
            if attempts.is_empty() {
                state.running.remove(&family);
            }
        }

        match result {
            Ok(_) if cancelled => Err(FontError::Released { family }),
            Ok(record) => {
                let record = state.fonts.entry(family.clone()).or_insert(record).clone();
                drop(state);
                inner.events.publish(FontEvent::Verified {
                    family,
                    verification: record.verification,
                });
                Ok(record)
            }
            Err(e) => {
                if state.aliases.get(&key) == Some(&family) && !state.fonts.contains_key(&family) {
                    state.aliases.remove(&key);
                }
                match e {
                    FontError::Released { .. } => tracing::debug!("attempt {} for {} ended by release", attempt, family),
                    _ => tracing::error!("loading {} failed: {}", family, e),
                }
                Err(e)
            }
        }
    }

    /// Liveness for timers scheduled on behalf of `family`.
    ///
    /// Live while the given attempt is still running, or once the family is cached.
    fn liveness(self: &Rc<Self>, family: &str, attempt: Option<u64>) -> Liveness {
        let inner = Rc::downgrade(self);
        let family = family.to_string();
        Rc::new(move || {
            inner.upgrade().is_some_and(|inner| {
                let state = inner.state.borrow();
                let running = attempt.is_some_and(|attempt| {
                    state.running.get(&family).is_some_and(|attempts| attempts.contains(&attempt))
                });
                running || state.fonts.contains_key(&family)
            })
        })
    }

    fn ensure_live(&self, family: &str, attempt: u64) -> FontResult<()> {
        if self.state.borrow().cancelled.contains(&attempt) {
            tracing::debug!("attempt {} for {} was released, stopping", attempt, family);
            return Err(FontError::Released { family: family.to_string() });
        }
        Ok(())
    }

    async fn provision(self: &Rc<Self>, definition: &FontDefinition, family: &str, attempt: u64) -> FontResult<FontRecord> {
        let bytes = acquire_binary(&definition.source, self.fetcher.as_ref())
            .await
            .map_err(|source| FontError::Acquisition {
                source_name: definition.source.describe(),
                source,
            })?;
        self.ensure_live(family, attempt)?;

        if let Some(sniffed) = FontFormat::sniff(&bytes) {
            if sniffed != definition.format {
                tracing::warn!(
                    "{} is declared as {} but looks like {}",
                    definition.display_name,
                    definition.format,
                    sniffed
                );
            }
        }

        let payload = encode_chunked(&bytes, definition.format, self.config.effective_chunk_size())?;
        let mut record = FontRecord {
            family: family.to_string(),
            display_name: definition.display_name.clone(),
            source_kind: definition.source.kind(),
            format: definition.format,
            encoded_payload: payload.into(),
            usage: definition.usage,
            verification: Verification::Unverified,
            backup_family: None,
            byte_len: bytes.len(),
        };

        let live = self.liveness(family, Some(attempt));
        let loaded = self.registrar.register(&record, Rc::clone(&live)).await;
        self.ensure_live(family, attempt)?;

        if !loaded {
            // CSS-only path: the face never loaded, so a verdict would mean nothing
            tracing::warn!("face load for {} failed, forcing fallback without verification", family);
            let forced = self.forcer.force_apply(family, &record.encoded_payload, record.format, live);
            record.backup_family = Some(forced.backup_family);
        } else {
            let active = self.verifier.verify(family).await;
            self.ensure_live(family, attempt)?;
            record.verification = if active { Verification::Active } else { Verification::Failed };

            if !active || self.config.proactive_fallback {
                let forced = self.forcer.force_apply(family, &record.encoded_payload, record.format, live);
                record.backup_family = Some(forced.backup_family);
            }
        }

        tracing::info!(
            "font {} ready ({} bytes, {:?})",
            family,
            record.byte_len,
            record.verification
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy_surface::{DummySurface, ManualEventLoop, RenderMode, StaticFetcher};
    use crate::error::AcquireError;
    use std::time::Duration;

    struct Harness {
        surface: Rc<DummySurface>,
        event_loop: Rc<ManualEventLoop>,
        loader: FontLoader,
    }

    fn harness_with(surface: DummySurface, fetcher: StaticFetcher, config: PipelineConfig) -> Harness {
        let surface = Rc::new(surface);
        let event_loop = Rc::new(ManualEventLoop::new());
        let loader = FontLoader::new(surface.clone(), event_loop.clone(), Rc::new(fetcher), config);
        Harness { surface, event_loop, loader }
    }

    fn harness() -> Harness {
        harness_with(DummySurface::new(), StaticFetcher::new(), PipelineConfig::default())
    }

    fn definition() -> FontDefinition {
        FontDefinition::from_bytes("Kai", vec![0u8, 1, 0, 0, 7, 7], FontFormat::Ttf, UsageType::Character)
    }

    #[test]
    fn test_acquire_caches_record() {
        let h = harness();
        let record = h.event_loop.block_on(h.loader.acquire(definition())).unwrap();
        assert!(record.family.starts_with("custom_Kai_"));
        assert_eq!(record.verification, Verification::Active);
        assert_eq!(record.backup_family, None);
        assert_eq!(h.loader.get(&record.family), Some(record.clone()));
        assert!(!h.loader.is_loading(&record.family));
    }

    #[test]
    fn test_same_source_is_deduplicated() {
        let h = harness();
        let a = h.event_loop.block_on(h.loader.acquire(definition())).unwrap();
        let b = h.event_loop.block_on(h.loader.acquire(definition())).unwrap();
        assert_eq!(a, b);
        assert_eq!(h.surface.style_insertions(&format!("font-style-{}", a.family)), 1);
        assert_eq!(h.loader.fonts().len(), 1);
    }

    #[test]
    fn test_explicit_family_is_used() {
        let h = harness();
        let record = h
            .event_loop
            .block_on(h.loader.acquire(definition().with_family("custom_Fixed_1")))
            .unwrap();
        assert_eq!(record.family, "custom_Fixed_1");
    }

    #[test]
    fn test_failed_verification_forces_fallback() {
        let h = harness_with(
            DummySurface::new().with_render_mode(RenderMode::Fallback),
            StaticFetcher::new(),
            PipelineConfig::default(),
        );
        let record = h.event_loop.block_on(h.loader.acquire(definition())).unwrap();
        assert_eq!(record.verification, Verification::Failed);
        assert_eq!(record.backup_family, Some(format!("{}_backup", record.family)));
        assert!(h.surface.has_node(&format!("font-backup-{}", record.family)));
    }

    #[test]
    fn test_proactive_fallback() {
        let h = harness_with(
            DummySurface::new(),
            StaticFetcher::new(),
            PipelineConfig::default().with_proactive_fallback(true),
        );
        let record = h.event_loop.block_on(h.loader.acquire(definition())).unwrap();
        assert_eq!(record.verification, Verification::Active);
        assert!(record.backup_family.is_some());
    }

    #[test]
    fn test_acquisition_error_leaves_no_state() {
        let fetcher = StaticFetcher::new().with_status("https://cdn.example/kai.ttf", 404, "Not Found");
        let h = harness_with(DummySurface::new(), fetcher, PipelineConfig::default());
        let def = FontDefinition::from_url("Kai", "https://cdn.example/kai.ttf", FontFormat::Ttf, UsageType::Character);

        let err = h.event_loop.block_on(h.loader.acquire(def)).unwrap_err();
        assert!(err.is_acquisition());
        assert!(matches!(
            err,
            FontError::Acquisition { source: AcquireError::Http { status: 404, .. }, .. }
        ));
        assert!(h.loader.fonts().is_empty());
        assert!(h.surface.node_ids().is_empty());
    }

    #[test]
    fn test_release_unknown_family() {
        let h = harness();
        assert!(!h.loader.release("custom_nothing_1"));
    }

    #[test]
    fn test_release_mints_fresh_family() {
        let h = harness();
        let first = h.event_loop.block_on(h.loader.acquire(definition())).unwrap();
        assert!(h.loader.release(&first.family));
        let second = h.event_loop.block_on(h.loader.acquire(definition())).unwrap();
        assert_ne!(first.family, second.family);
    }

    #[test]
    fn test_release_cancels_in_flight_attempt() {
        let h = harness();
        let loader = h.loader.clone();
        let family = "custom_Kai_cancel";
        let releaser = {
            let loader = loader.clone();
            let delay = h.event_loop.sleep(Duration::from_millis(100));
            async move {
                delay.await;
                loader.release(family)
            }
        };
        let (result, released) = h.event_loop.block_on(futures::future::join(
            loader.acquire(definition().with_family(family)),
            releaser,
        ));
        assert!(released);
        assert_eq!(result, Err(FontError::Released { family: family.to_string() }));
        assert!(h.loader.get(family).is_none());
        h.event_loop.run_until_idle();
        assert!(h.surface.nodes_mentioning(family).is_empty());
    }

    #[test]
    fn test_reverify_updates_record() {
        let h = harness();
        let record = h.event_loop.block_on(h.loader.acquire(definition())).unwrap();
        h.surface.set_render_mode(RenderMode::Fallback);

        let verification = h.event_loop.block_on(h.loader.reverify(&record.family)).unwrap();
        assert_eq!(verification, Verification::Failed);
        let updated = h.loader.get(&record.family).unwrap();
        assert_eq!(updated.verification, Verification::Failed);
        assert!(updated.backup_family.is_some());

        let err = h.event_loop.block_on(h.loader.reverify("custom_nothing_1")).unwrap_err();
        assert!(matches!(err, FontError::UnknownFamily { .. }));
    }

    #[test]
    fn test_refresh_reregisters_and_forces() {
        let h = harness();
        let record = h.event_loop.block_on(h.loader.acquire(definition())).unwrap();
        let refreshed = h.event_loop.block_on(h.loader.refresh(&record.family)).unwrap();
        assert_eq!(h.surface.style_insertions(&format!("font-style-{}", record.family)), 2);
        assert_eq!(refreshed.backup_family, Some(format!("{}_backup", record.family)));
    }

    #[test]
    fn test_fonts_by_usage() {
        let h = harness();
        h.event_loop.block_on(h.loader.acquire(definition())).unwrap();
        let pinyin = FontDefinition::from_bytes("Py", vec![9u8; 8], FontFormat::Otf, UsageType::Pinyin);
        h.event_loop.block_on(h.loader.acquire(pinyin)).unwrap();
        assert_eq!(h.loader.fonts_by_usage(UsageType::Pinyin).len(), 1);
        assert_eq!(h.loader.fonts_by_usage(UsageType::Character).len(), 1);
    }

    #[test]
    fn test_watchdog_stops_deduplicating_slow_attempt() {
        let url = "https://cdn.example/slow.ttf";
        let family = "custom_Slow_1";
        let event_loop = Rc::new(ManualEventLoop::new());
        let handle: Rc<dyn EventLoop> = event_loop.clone();
        let fetcher = StaticFetcher::new()
            .with_font(url, vec![0, 1, 0, 0, 9])
            .with_latency(handle, Duration::from_millis(6000));
        let loader = FontLoader::new(
            Rc::new(DummySurface::new()),
            event_loop.clone(),
            Rc::new(fetcher.clone()),
            PipelineConfig::default(),
        );
        let def = FontDefinition::from_url("Slow", url, FontFormat::Ttf, UsageType::Character).with_family(family);

        let first = loader.clone();
        let first_def = def.clone();
        event_loop.spawn(Box::pin(async move {
            let _ = first.acquire(first_def).await;
        }));
        event_loop.run_for(Duration::from_millis(5500));
        assert!(loader.is_loading(family));
        assert_eq!(fetcher.fetch_count(), 1);

        // The stuck attempt is no longer shared, so a new request starts over
        let record = event_loop.block_on(loader.acquire(def)).unwrap();
        assert_eq!(fetcher.fetch_count(), 2);
        assert_eq!(record.family, family);
        assert_eq!(loader.fonts().len(), 1);
    }

    #[test]
    fn test_release_during_face_load_leaves_nothing_behind() {
        let family = "custom_Kai_rel";
        let event_loop = Rc::new(ManualEventLoop::new());
        let handle: Rc<dyn EventLoop> = event_loop.clone();
        let surface = Rc::new(DummySurface::new().with_face_load_latency(handle, Duration::from_millis(300)));
        let loader = FontLoader::new(
            surface.clone(),
            event_loop.clone(),
            Rc::new(StaticFetcher::new()),
            PipelineConfig::default(),
        );
        let rx = loader.subscribe();

        let releaser = {
            let loader = loader.clone();
            let delay = event_loop.sleep(Duration::from_millis(100));
            async move {
                delay.await;
                loader.release(family)
            }
        };
        let (result, released) = event_loop.block_on(futures::future::join(
            loader.acquire(definition().with_family(family)),
            releaser,
        ));
        assert!(released);
        assert_eq!(result, Err(FontError::Released { family: family.to_string() }));

        event_loop.run_until_idle();
        assert!(surface.nodes_mentioning(family).is_empty());
        assert_eq!(surface.total_faces(), 0);
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events, vec![FontEvent::Released { family: family.to_string() }]);
    }

    #[test]
    fn test_failed_face_load_forces_fallback_unverified() {
        let h = harness_with(
            DummySurface::new().with_failing_face_loads(),
            StaticFetcher::new(),
            PipelineConfig::default(),
        );
        let record = h.event_loop.block_on(h.loader.acquire(definition())).unwrap();
        assert_eq!(record.verification, Verification::Unverified);
        assert_eq!(record.backup_family, Some(format!("{}_backup", record.family)));
        assert!(h.surface.has_node(&format!("font-backup-{}", record.family)));
        assert_eq!(h.surface.sandboxes_opened(), 0);
        assert_eq!(h.loader.get(&record.family), Some(record));
    }

    #[test]
    fn test_release_cancels_attempts_the_watchdog_let_go() {
        let url = "https://cdn.example/slow.ttf";
        let family = "custom_Slow_2";
        let event_loop = Rc::new(ManualEventLoop::new());
        let handle: Rc<dyn EventLoop> = event_loop.clone();
        let fetcher = StaticFetcher::new()
            .with_font(url, vec![0, 1, 0, 0, 9])
            .with_latency(handle, Duration::from_millis(6000));
        let surface = Rc::new(DummySurface::new());
        let loader = FontLoader::new(
            surface.clone(),
            event_loop.clone(),
            Rc::new(fetcher.clone()),
            PipelineConfig::default(),
        );
        let def = FontDefinition::from_url("Slow", url, FontFormat::Ttf, UsageType::Character).with_family(family);
        let start = |loader: &FontLoader| {
            let loader = loader.clone();
            let def = def.clone();
            event_loop.spawn(Box::pin(async move {
                let _ = loader.acquire(def).await;
            }));
        };

        start(&loader);
        event_loop.run_for(Duration::from_millis(5500));
        start(&loader);
        event_loop.run_for(Duration::from_millis(100));
        assert_eq!(fetcher.fetch_count(), 2);

        assert!(loader.release(family));
        event_loop.run_until_idle();
        assert!(loader.get(family).is_none());
        assert!(!loader.is_loading(family));
        assert!(surface.nodes_mentioning(family).is_empty());
    }
}
