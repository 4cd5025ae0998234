use crate::breakpoint::{
    BreakpointPosition, BreakpointRequest, BreakpointState, DebuggerControl, RequestedBreakpoint,
    TrackedBreakpoint,
};
use crate::error::Error;
use crate::source::{SourceIdentity, SourceNormalizer, SourceRef};
use indexmap::IndexMap;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;

/// Upper bound of worker threads applying one phase.
const PHASE_WORKERS: usize = 8;

/// Apply `op` to every item and return when all of them settled.
///
/// Items are pulled from a shared cursor by at most [`PHASE_WORKERS`] scoped threads, the calling
/// thread takes part too, so a failed spawn only narrows the fan-out.
fn fan_out<T: Sync>(phase: &str, items: &[T], op: impl Fn(&T) + Sync) {
    let cursor = AtomicUsize::new(0);
    let work = || {
        while let Some(item) = items.get(cursor.fetch_add(1, Ordering::SeqCst)) {
            op(item);
        }
    };
    thread::scope(|s| {
        for n in 1..items.len().min(PHASE_WORKERS) {
            let spawned = thread::Builder::new()
                .name(format!("breakpoint-{phase}-{n}"))
                .spawn_scoped(s, work);
            if let Err(e) = spawned {
                warn!(target: "breakpoint", "spawn {phase} worker: {e}");
                break;
            }
        }
        work();
    });
}

/// Breakpoints of one source.
#[derive(Default)]
struct SourceSlot {
    /// Held by a reconciliation for the whole diff-apply-update cycle.
    serial: Mutex<()>,
    /// Ordered by line, adds settle in arbitrary order.
    entries: RwLock<Vec<TrackedBreakpoint>>,
}

impl SourceSlot {
    fn snapshot(&self) -> Vec<TrackedBreakpoint> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Authoritative map of breakpoints set on an external debugger.
///
/// Client sends a full set of breakpoints for a source each time, registry diffs it against
/// breakpoints it already tracks and issues only missing adds and removes through
/// [`DebuggerControl`]. Reconciliations of the same source are serialized, reconciliations of
/// different sources run independently.
pub struct BreakpointRegistry {
    control: Arc<dyn DebuggerControl>,
    normalizer: Arc<dyn SourceNormalizer>,
    sources: Mutex<IndexMap<SourceIdentity, Arc<SourceSlot>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl BreakpointRegistry {
    pub fn new(control: Arc<dyn DebuggerControl>, normalizer: Arc<dyn SourceNormalizer>) -> Self {
        Self {
            control,
            normalizer,
            sources: Mutex::default(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Normalized identity of a client source.
    pub fn identity(&self, source: &SourceRef) -> Result<SourceIdentity, Error> {
        self.normalizer.normalize(source).ok_or(Error::MissingSource)
    }

    fn slot(&self, source: &SourceIdentity) -> Arc<SourceSlot> {
        let mut sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        sources.entry(source.clone()).or_default().clone()
    }

    /// Make breakpoints of `source` on the debugger match `requests`.
    ///
    /// Return all breakpoints tracked for the source after every add and remove settled. Failed
    /// debugger commands don't fail the call: a failed add is not tracked, a failed remove keeps
    /// the breakpoint tracked. Requests without a valid line are skipped, the rest of them are
    /// applied and then [`Error::MalformedBreakpoints`] is returned.
    pub fn reconcile(
        &self,
        source: &SourceRef,
        requests: &[BreakpointRequest],
    ) -> Result<Vec<TrackedBreakpoint>, Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }

        let identity = self.identity(source)?;
        let slot = self.slot(&identity);
        let _serial = slot.serial.lock().unwrap_or_else(PoisonError::into_inner);

        let (candidates, malformed) = Self::candidates(&identity, requests);
        let current = slot.snapshot();

        // unverified breakpoints are re-added, client asks for them again
        let to_add: Vec<&RequestedBreakpoint> = candidates
            .iter()
            .filter(|c| !current.iter().any(|t| t.line == c.line && t.is_verified()))
            .collect();
        let to_remove: Vec<&TrackedBreakpoint> = current
            .iter()
            .filter(|t| !candidates.iter().any(|c| c.line == t.line))
            .collect();

        debug!(
            target: "breakpoint",
            "reconcile `{identity}`: {} requested, {} to add, {} to remove",
            candidates.len(),
            to_add.len(),
            to_remove.len()
        );

        let slot = slot.as_ref();
        fan_out("add", &to_add, |bp| self.apply_add(slot, bp));
        fan_out("remove", &to_remove, |bp| self.apply_remove(slot, bp));

        // results of a torn down registry are gone
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        if malformed > 0 {
            return Err(Error::MalformedBreakpoints {
                source_name: identity.to_string(),
                count: malformed,
            });
        }

        Ok(slot.snapshot())
    }

    /// Validate requests. Return breakpoint candidates (one per line, first request wins) and a
    /// number of malformed requests.
    fn candidates(
        source: &SourceIdentity,
        requests: &[BreakpointRequest],
    ) -> (Vec<RequestedBreakpoint>, usize) {
        let mut candidates: Vec<RequestedBreakpoint> = Vec::with_capacity(requests.len());
        let mut malformed = 0;
        for request in requests {
            let Some(line) = request.line.and_then(|l| u64::try_from(l).ok()).filter(|&l| l > 0)
            else {
                malformed += 1;
                continue;
            };
            if candidates.iter().any(|c| c.line == line) {
                continue;
            }
            candidates.push(RequestedBreakpoint {
                source: source.clone(),
                line,
                column: request.column.and_then(|c| u64::try_from(c).ok()),
            });
        }
        (candidates, malformed)
    }

    fn apply_add(&self, slot: &SourceSlot, bp: &RequestedBreakpoint) {
        let position = BreakpointPosition {
            line: bp.line,
            source: bp.source.as_str().to_string(),
        };

        let verified = match self.control.add_breakpoint(&position) {
            Ok(verified) => verified,
            Err(e) => {
                warn!(
                    target: "breakpoint",
                    "set breakpoint on line {}, file {}: {e:#}", position.line, position.source
                );
                return;
            }
        };
        if !verified {
            warn!(
                target: "breakpoint",
                "impossible to set breakpoint on line {}, file {}", position.line, position.source
            );
        }

        let mut entries = slot.entries.write().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let state = BreakpointState::Tracked { verified };
        match entries.iter_mut().find(|t| t.line == bp.line) {
            Some(existing) => {
                existing.state = state;
                existing.column = bp.column;
            }
            None => {
                let at = entries.partition_point(|t| t.line < bp.line);
                entries.insert(
                    at,
                    TrackedBreakpoint {
                        id: self.next_id.fetch_add(1, Ordering::SeqCst),
                        source: bp.source.clone(),
                        line: bp.line,
                        column: bp.column,
                        state,
                    },
                );
            }
        }
    }

    fn apply_remove(&self, slot: &SourceSlot, bp: &TrackedBreakpoint) {
        if let Err(e) = self.control.remove_breakpoint(&bp.position()) {
            warn!(
                target: "breakpoint",
                "remove breakpoint on line {}, file {}: {e:#}", bp.line, bp.source
            );
            return;
        }

        let mut entries = slot.entries.write().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        entries.retain(|t| t.id != bp.id);
    }

    /// Breakpoints tracked for a source.
    pub fn breakpoints(&self, source: &SourceIdentity) -> Vec<TrackedBreakpoint> {
        self.slot(source).snapshot()
    }

    /// Tracked breakpoints of all sources.
    pub fn all_breakpoints(&self) -> Vec<TrackedBreakpoint> {
        let slots: Vec<_> = self
            .sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        slots.iter().flat_map(|slot| slot.snapshot()).collect()
    }

    /// Tear the registry down. Commands that are still in flight complete, but their results
    /// are dropped, further reconciliations fail with [`Error::SessionClosed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let sources = std::mem::take(
            &mut *self.sources.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for slot in sources.values() {
            slot.entries
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
