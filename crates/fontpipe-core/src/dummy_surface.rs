//! Dummy surface for exercising the pipeline without a browser
//!
//! `DummySurface` records every node, face and element operation so tests can
//! assert on side effects. `ManualEventLoop` runs spawned tasks on a
//! `LocalPool` and advances a virtual clock only when every task is waiting on
//! a timer, so timing assertions are exact and instant.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use futures::executor::{LocalPool, LocalSpawner};
use futures::future::LocalBoxFuture;
use futures::task::{waker, ArcWake, LocalSpawnExt};

use crate::constants::BASELINE_STACK;
use crate::error::{AcquireError, SurfaceError};
use crate::font::encoder::decode_data_uri;
use crate::raster::{Raster, TextRasterizer};
use crate::traits::{
    DocumentSurface, EventLoop, FaceDescriptors, Fetcher, ProbeId, ProbeMetrics, ProbeSandbox,
    ProbeSpec, RasterSpec, StylePlacement,
};

/// Advance of the synthetic system serif, in em
const BASELINE_ADVANCE_EM: f64 = 0.5;
/// Advance used for registered faces whose bytes fontdue cannot parse
const SYNTHETIC_FACE_ADVANCE_EM: f64 = 0.62;

/// How the dummy renderer treats registered faces inside the verification sandbox
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderMode {
    /// Registered faces are drawn with their own glyphs
    Active,
    /// Every stack silently resolves to the baseline serif
    Fallback,
    /// Faces draw their own glyphs but layout reports the serif's width and family
    InkOnly,
    /// Sandbox never finishes loading
    HangingSandbox,
    /// Sandbox creation fails
    BrokenSandbox,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DummyNode {
    Style { css: String, placement: StylePlacement },
    Probe(ProbeSpec),
    Preload { href: String },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DummyElement {
    pub classes: Vec<String>,
    /// property -> (value, important)
    pub inline: BTreeMap<String, (String, bool)>,
    pub data: BTreeMap<String, String>,
}

/// Delay applied to every face load
struct FaceLoadLatency(Rc<dyn EventLoop>, Duration);

impl fmt::Debug for FaceLoadLatency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FaceLoadLatency").field(&self.1).finish()
    }
}

#[derive(Debug)]
struct SurfaceState {
    nodes: Vec<(String, DummyNode)>,
    style_insertions: HashMap<String, usize>,
    faces: HashMap<String, Vec<String>>,
    body_visible: bool,
    visibility_toggles: usize,
    elements: Vec<(Option<String>, DummyElement)>,
    next_element_id: usize,
    render_mode: RenderMode,
    fail_face_loads: bool,
    fail_face_deletes: bool,
    face_load_latency: Option<FaceLoadLatency>,
    open_sandboxes: usize,
    sandboxes_opened: usize,
}

/// Recording implementation of [`DocumentSurface`]
#[derive(Debug, Clone)]
pub struct DummySurface {
    state: Rc<RefCell<SurfaceState>>,
}

impl Default for DummySurface {
    fn default() -> Self {
        Self::new()
    }
}

impl DummySurface {
    pub fn new() -> Self {
        DummySurface {
            state: Rc::new(RefCell::new(SurfaceState {
                nodes: Vec::new(),
                style_insertions: HashMap::new(),
                faces: HashMap::new(),
                body_visible: true,
                visibility_toggles: 0,
                elements: Vec::new(),
                next_element_id: 0,
                render_mode: RenderMode::Active,
                fail_face_loads: false,
                fail_face_deletes: false,
                face_load_latency: None,
                open_sandboxes: 0,
                sandboxes_opened: 0,
            })),
        }
    }

    pub fn with_render_mode(self, mode: RenderMode) -> Self {
        self.state.borrow_mut().render_mode = mode;
        self
    }

    pub fn with_failing_face_loads(self) -> Self {
        self.state.borrow_mut().fail_face_loads = true;
        self
    }

    pub fn with_failing_face_deletes(self) -> Self {
        self.state.borrow_mut().fail_face_deletes = true;
        self
    }

    /// Face loads register immediately but resolve `latency` later on the given loop
    pub fn with_face_load_latency(self, event_loop: Rc<dyn EventLoop>, latency: Duration) -> Self {
        self.state.borrow_mut().face_load_latency = Some(FaceLoadLatency(event_loop, latency));
        self
    }

    pub fn set_render_mode(&self, mode: RenderMode) {
        self.state.borrow_mut().render_mode = mode;
    }

    /// Add a page element carrying the given classes
    pub fn add_element(&self, id: &str, classes: &[&str]) {
        self.push_element(Some(id.to_string()), classes);
    }

    /// Add a page element without an id
    pub fn add_anonymous_element(&self, classes: &[&str]) {
        self.push_element(None, classes);
    }

    fn push_element(&self, id: Option<String>, classes: &[&str]) {
        let element = DummyElement {
            classes: classes.iter().map(|c| c.to_string()).collect(),
            ..DummyElement::default()
        };
        self.state.borrow_mut().elements.push((id, element));
    }

    pub fn element(&self, id: &str) -> Option<DummyElement> {
        self.state
            .borrow()
            .elements
            .iter()
            .find(|(eid, _)| eid.as_deref() == Some(id))
            .map(|(_, e)| e.clone())
    }

    pub fn node(&self, id: &str) -> Option<DummyNode> {
        self.state.borrow().nodes.iter().find(|(nid, _)| nid == id).map(|(_, n)| n.clone())
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.state.borrow().nodes.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Number of live nodes with exactly this id
    pub fn nodes_with_id(&self, id: &str) -> usize {
        self.state.borrow().nodes.iter().filter(|(nid, _)| nid == id).count()
    }

    /// Live nodes whose id mentions `needle`
    pub fn nodes_mentioning(&self, needle: &str) -> Vec<String> {
        self.node_ids().into_iter().filter(|id| id.contains(needle)).collect()
    }

    /// How many times a style with this id was ever inserted
    pub fn style_insertions(&self, id: &str) -> usize {
        self.state.borrow().style_insertions.get(id).copied().unwrap_or(0)
    }

    pub fn face_count(&self, family: &str) -> usize {
        self.state.borrow().faces.get(family).map_or(0, Vec::len)
    }

    pub fn total_faces(&self) -> usize {
        self.state.borrow().faces.values().map(Vec::len).sum()
    }

    pub fn body_visible(&self) -> bool {
        self.state.borrow().body_visible
    }

    pub fn visibility_toggles(&self) -> usize {
        self.state.borrow().visibility_toggles
    }

    pub fn open_sandboxes(&self) -> usize {
        self.state.borrow().open_sandboxes
    }

    pub fn sandboxes_opened(&self) -> usize {
        self.state.borrow().sandboxes_opened
    }

    fn with_element<R>(&self, id: &str, f: impl FnOnce(&mut DummyElement) -> R) -> Option<R> {
        let mut state = self.state.borrow_mut();
        state
            .elements
            .iter_mut()
            .find(|(eid, _)| eid.as_deref() == Some(id))
            .map(|(_, e)| f(e))
    }
}

impl DocumentSurface for DummySurface {
    fn insert_style(&self, id: &str, css: &str, placement: StylePlacement) -> Result<(), SurfaceError> {
        let mut state = self.state.borrow_mut();
        let node = (id.to_string(), DummyNode::Style { css: css.to_string(), placement });
        match placement {
            StylePlacement::Prepend => state.nodes.insert(0, node),
            StylePlacement::Append => state.nodes.push(node),
        }
        *state.style_insertions.entry(id.to_string()).or_default() += 1;
        Ok(())
    }

    fn remove_node(&self, id: &str) -> bool {
        let mut state = self.state.borrow_mut();
        match state.nodes.iter().position(|(nid, _)| nid == id) {
            Some(pos) => {
                state.nodes.remove(pos);
                true
            }
            None => false,
        }
    }

    fn has_node(&self, id: &str) -> bool {
        self.state.borrow().nodes.iter().any(|(nid, _)| nid == id)
    }

    fn append_probe(&self, probe: &ProbeSpec) -> Result<(), SurfaceError> {
        self.state.borrow_mut().nodes.push((probe.id.clone(), DummyNode::Probe(probe.clone())));
        Ok(())
    }

    fn append_preload(&self, id: &str, href: &str) -> Result<(), SurfaceError> {
        self.state
            .borrow_mut()
            .nodes
            .push((id.to_string(), DummyNode::Preload { href: href.to_string() }));
        Ok(())
    }

    fn set_body_visible(&self, visible: bool) {
        let mut state = self.state.borrow_mut();
        state.body_visible = visible;
        state.visibility_toggles += 1;
    }

    fn load_face(
        &self,
        family: &str,
        source: &str,
        _descriptors: &FaceDescriptors,
    ) -> LocalBoxFuture<'static, Result<(), SurfaceError>> {
        let mut state = self.state.borrow_mut();
        let result = if state.fail_face_loads {
            Err(SurfaceError::FaceLoad {
                family: family.to_string(),
                message: "NetworkError: A network error occurred.".to_string(),
            })
        } else {
            state.faces.entry(family.to_string()).or_default().push(source.to_string());
            Ok(())
        };
        let delay = state.face_load_latency.as_ref().map(|FaceLoadLatency(event_loop, latency)| event_loop.sleep(*latency));
        Box::pin(async move {
            if let Some(delay) = delay {
                delay.await;
            }
            result
        })
    }

    fn delete_faces(&self, family: &str) -> Result<usize, SurfaceError> {
        let mut state = self.state.borrow_mut();
        if state.fail_face_deletes {
            return Err(SurfaceError::Dom(format!("cannot delete faces for {family}")));
        }
        Ok(state.faces.remove(family).map_or(0, |v| v.len()))
    }

    fn open_sandbox(&self) -> LocalBoxFuture<'static, Result<Box<dyn ProbeSandbox>, SurfaceError>> {
        let mode = self.state.borrow().render_mode;
        match mode {
            RenderMode::HangingSandbox => Box::pin(futures::future::pending()),
            RenderMode::BrokenSandbox => {
                Box::pin(async { Err(SurfaceError::Sandbox("iframe failed to load".to_string())) })
            }
            RenderMode::Active | RenderMode::Fallback | RenderMode::InkOnly => {
                {
                    let mut state = self.state.borrow_mut();
                    state.open_sandboxes += 1;
                    state.sandboxes_opened += 1;
                }
                let sandbox = DummySandbox { state: Rc::clone(&self.state), probes: Vec::new() };
                Box::pin(async move { Ok(Box::new(sandbox) as Box<dyn ProbeSandbox>) })
            }
        }
    }

    fn select_elements(&self, selectors: &str) -> Vec<String> {
        let wanted: Vec<&str> = selectors
            .split(',')
            .filter_map(|s| s.trim().strip_prefix('.'))
            .collect();

        let mut state = self.state.borrow_mut();
        let mut next_id = state.next_element_id;
        let mut ids = Vec::new();
        for (id, element) in state.elements.iter_mut() {
            if !element.classes.iter().any(|c| wanted.contains(&c.as_str())) {
                continue;
            }
            let id = id.get_or_insert_with(|| {
                next_id += 1;
                format!("el-{next_id}")
            });
            ids.push(id.clone());
        }
        state.next_element_id = next_id;
        ids
    }

    fn element_classes(&self, element: &str) -> Vec<String> {
        self.with_element(element, |e| e.classes.clone()).unwrap_or_default()
    }

    fn add_class(&self, element: &str, class: &str) {
        self.with_element(element, |e| {
            if !e.classes.iter().any(|c| c == class) {
                e.classes.push(class.to_string());
            }
        });
    }

    fn remove_class(&self, element: &str, class: &str) {
        self.with_element(element, |e| e.classes.retain(|c| c != class));
    }

    fn remove_inline_property(&self, element: &str, property: &str) {
        self.with_element(element, |e| e.inline.remove(property));
    }

    fn set_inline_property(&self, element: &str, property: &str, value: &str, important: bool) {
        self.with_element(element, |e| {
            e.inline.insert(property.to_string(), (value.to_string(), important))
        });
    }

    fn set_data_attribute(&self, element: &str, key: &str, value: &str) {
        self.with_element(element, |e| e.data.insert(key.to_string(), value.to_string()));
    }
}

/// First family of a font stack, unquoted
fn stack_head(stack: &str) -> &str {
    stack.split(',').next().unwrap_or_default().trim().trim_matches('"').trim_matches('\'')
}

struct DummySandbox {
    state: Rc<RefCell<SurfaceState>>,
    probes: Vec<(String, String, f64)>,
}

impl DummySandbox {
    /// Rasterizer and reported computed family for a stack.
    ///
    /// `ink` selects the pixel path rather than layout.
    fn resolve(&self, stack: &str, ink: bool) -> (TextRasterizer, String) {
        let baseline = || (TextRasterizer::synthetic(BASELINE_ADVANCE_EM), BASELINE_STACK.to_string());
        let state = self.state.borrow();
        let uses_face = match state.render_mode {
            RenderMode::Active => true,
            RenderMode::InkOnly => ink,
            _ => false,
        };
        if !uses_face {
            return baseline();
        }
        let Some(source) = state.faces.get(stack_head(stack)).and_then(|v| v.first()) else {
            return baseline();
        };

        let uri = source.trim_start_matches("url(").trim_end_matches(')').trim_matches('"');
        let rasterizer = decode_data_uri(uri)
            .ok()
            .and_then(|data| TextRasterizer::from_font_bytes(&data.bytes).ok())
            .unwrap_or_else(|| TextRasterizer::synthetic(SYNTHETIC_FACE_ADVANCE_EM));
        (rasterizer, stack.to_string())
    }
}

impl ProbeSandbox for DummySandbox {
    fn mount_probe(&mut self, text: &str, font_stack: &str, font_size_px: f64) -> Result<ProbeId, SurfaceError> {
        self.probes.push((text.to_string(), font_stack.to_string(), font_size_px));
        Ok(ProbeId(self.probes.len() - 1))
    }

    fn probe_metrics(&self, probe: ProbeId) -> Result<ProbeMetrics, SurfaceError> {
        let (text, stack, size) = self
            .probes
            .get(probe.0)
            .ok_or_else(|| SurfaceError::Sandbox(format!("no probe {}", probe.0)))?;
        let (rasterizer, computed_family) = self.resolve(stack, false);
        Ok(ProbeMetrics { width: rasterizer.measure(text, *size).round(), computed_family })
    }

    fn rasterize(&self, text: &str, font_stack: &str, spec: &RasterSpec) -> Result<Raster, SurfaceError> {
        let (rasterizer, _) = self.resolve(font_stack, true);
        Ok(rasterizer.render(text, spec.font_size_px, spec.width, spec.height, spec.origin))
    }
}

impl Drop for DummySandbox {
    fn drop(&mut self) {
        self.state.borrow_mut().open_sandboxes -= 1;
    }
}

#[derive(Debug)]
struct TimerState {
    fired: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

#[derive(Debug)]
struct Timer {
    deadline: Duration,
    state: Rc<TimerState>,
}

struct Sleep {
    state: Rc<TimerState>,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.state.fired.get() {
            Poll::Ready(())
        } else {
            *self.state.waker.borrow_mut() = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

struct WakeFlag(AtomicBool);

impl ArcWake for WakeFlag {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.0.store(true, Ordering::SeqCst);
    }
}

/// Event loop with a virtual clock.
///
/// Time only moves when every task is blocked on a timer; it then jumps to
/// the earliest live deadline.
pub struct ManualEventLoop {
    epoch_millis: u64,
    now: Cell<Duration>,
    timers: RefCell<Vec<Timer>>,
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
}

impl Default for ManualEventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualEventLoop {
    pub fn new() -> Self {
        Self::with_epoch(1_700_000_000_000)
    }

    pub fn with_epoch(epoch_millis: u64) -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        ManualEventLoop {
            epoch_millis,
            now: Cell::new(Duration::ZERO),
            timers: RefCell::new(Vec::new()),
            pool: RefCell::new(pool),
            spawner,
        }
    }

    /// Virtual time since the loop was created
    pub fn elapsed(&self) -> Duration {
        self.now.get()
    }

    /// Drive `future` to completion, running spawned tasks and timers as needed.
    ///
    /// Panics if the future can never complete.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        let mut future = pin!(future);
        let flag = Arc::new(WakeFlag(AtomicBool::new(true)));
        let main_waker = waker(Arc::clone(&flag));
        let mut cx = Context::from_waker(&main_waker);

        loop {
            if flag.0.swap(false, Ordering::SeqCst) {
                if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                    return output;
                }
            }
            self.pool.borrow_mut().run_until_stalled();
            if flag.0.load(Ordering::SeqCst) {
                continue;
            }
            if !self.advance() {
                panic!("ManualEventLoop::block_on: future is pending with no live timers");
            }
        }
    }

    /// Run spawned tasks and fire timers until nothing is left
    pub fn run_until_idle(&self) {
        loop {
            self.pool.borrow_mut().run_until_stalled();
            if !self.advance() {
                break;
            }
        }
    }

    /// Advance by at most `duration`, running everything that falls due
    pub fn run_for(&self, duration: Duration) {
        let until = self.now.get() + duration;
        loop {
            self.pool.borrow_mut().run_until_stalled();
            let next = self.next_deadline();
            match next {
                Some(deadline) if deadline <= until => {
                    self.advance();
                }
                _ => break,
            }
        }
        self.now.set(until);
    }

    fn next_deadline(&self) -> Option<Duration> {
        let mut timers = self.timers.borrow_mut();
        // A timer nobody holds a Sleep for can never wake anything
        timers.retain(|t| Rc::strong_count(&t.state) > 1 && !t.state.fired.get());
        timers.iter().map(|t| t.deadline).min()
    }

    /// Jump to the next deadline and fire everything due; false if no timers remain
    fn advance(&self) -> bool {
        let Some(deadline) = self.next_deadline() else {
            return false;
        };
        if deadline > self.now.get() {
            self.now.set(deadline);
        }

        let due: Vec<Rc<TimerState>> = {
            let mut timers = self.timers.borrow_mut();
            let now = self.now.get();
            let (due, pending): (Vec<Timer>, Vec<Timer>) = timers.drain(..).partition(|t| t.deadline <= now);
            *timers = pending;
            due.into_iter().map(|t| t.state).collect()
        };

        for state in due {
            state.fired.set(true);
            let waker = state.waker.borrow_mut().take();
            if let Some(waker) = waker {
                waker.wake();
            }
        }
        true
    }
}

impl EventLoop for ManualEventLoop {
    fn now_millis(&self) -> u64 {
        self.epoch_millis + self.now.get().as_millis() as u64
    }

    fn sleep(&self, delay: Duration) -> LocalBoxFuture<'static, ()> {
        let state = Rc::new(TimerState { fired: Cell::new(false), waker: RefCell::new(None) });
        self.timers.borrow_mut().push(Timer {
            deadline: self.now.get() + delay,
            state: Rc::clone(&state),
        });
        Box::pin(Sleep { state })
    }

    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        if let Err(e) = self.spawner.spawn_local(task) {
            tracing::error!("failed to spawn task on manual event loop: {}", e);
        }
    }
}

/// Fetcher answering from a fixed table of URLs
#[derive(Clone, Default)]
pub struct StaticFetcher {
    responses: HashMap<String, Result<Vec<u8>, AcquireError>>,
    calls: Rc<Cell<usize>>,
    latency: Option<(Rc<dyn EventLoop>, Duration)>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.responses.insert(url.to_string(), Ok(bytes));
        self
    }

    pub fn with_status(mut self, url: &str, status: u16, status_text: &str) -> Self {
        self.responses.insert(
            url.to_string(),
            Err(AcquireError::Http { status, status_text: status_text.to_string() }),
        );
        self
    }

    /// Delay every response by `latency` on the given loop
    pub fn with_latency(mut self, event_loop: Rc<dyn EventLoop>, latency: Duration) -> Self {
        self.latency = Some((event_loop, latency));
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.calls.get()
    }
}

impl Fetcher for StaticFetcher {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<Vec<u8>, AcquireError>> {
        self.calls.set(self.calls.get() + 1);
        let response = self.responses.get(url).cloned().unwrap_or_else(|| {
            Err(AcquireError::Network { message: format!("Failed to fetch {url}") })
        });
        let delay = self.latency.as_ref().map(|(event_loop, latency)| event_loop.sleep(*latency));
        Box::pin(async move {
            if let Some(delay) = delay {
                delay.await;
            }
            response
        })
    }
}
