use log::{LevelFilter, Log, Metadata, Record};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

static ENABLED: AtomicBool = AtomicBool::new(true);

#[inline(always)]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::SeqCst)
}

pub fn disable() {
    ENABLED.store(false, Ordering::SeqCst)
}

/// Process-wide logger whose backend can be replaced at runtime.
///
/// [`log::set_logger`] may be called only once per process, the switcher is installed on the first
/// [`LoggerSwitcher::switch`] call and every later call only swaps the backend.
pub struct LoggerSwitcher {
    inner: RwLock<Option<Box<dyn Log>>>,
}

impl LoggerSwitcher {
    const fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    pub fn switch(&'static self, logger: impl Log + 'static, filter: LevelFilter) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(logger));
        _ = log::set_logger(self);
        log::set_max_level(filter);
    }
}

impl Log for LoggerSwitcher {
    fn enabled(&self, metadata: &Metadata) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.as_ref().is_some_and(|l| l.enabled(metadata))
    }

    fn log(&self, record: &Record) {
        if !is_enabled() {
            return;
        }
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(logger) = inner.as_ref() {
            logger.log(record);
        }
    }

    fn flush(&self) {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(logger) = inner.as_ref() {
            logger.flush();
        }
    }
}

pub static LOGGER_SWITCHER: LoggerSwitcher = LoggerSwitcher::new();
