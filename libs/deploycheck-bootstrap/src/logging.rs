use crate::config::{LoggingConfig, LogSection};
use crate::paths::home_dir::resolve_under;
use std::io::IsTerminal;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{fmt, util::SubscriberInitExt, Layer};

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};

/// Keeps the non-blocking console writer alive. Dropping it flushes
/// buffered records, so hold it until the process is about to exit.
#[must_use = "dropping the guard stops console logging"]
#[derive(Default)]
pub struct LoggingGuard {
    console: Option<tracing_appender::non_blocking::WorkerGuard>,
}

impl std::fmt::Debug for LoggingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingGuard")
            .field("console", &self.console.is_some())
            .finish()
    }
}

impl LoggingGuard {
    pub fn has_console_writer(&self) -> bool {
        self.console.is_some()
    }
}

const DEFAULT_SECTION: &str = "default";

/// `off`/`none` disable the sink; anything unrecognised means info.
fn parse_tracing_level(s: &str) -> Option<Level> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("off") || s.eq_ignore_ascii_case("none") {
        return None;
    }
    Some(s.parse().unwrap_or(Level::INFO))
}

fn level_filter(s: &str) -> LevelFilter {
    parse_tracing_level(s)
        .map(LevelFilter::from_level)
        .unwrap_or(LevelFilter::OFF)
}

/// Returns true if target == prefix or target starts with "prefix::"
fn matches_target_prefix(target: &str, prefix: &str) -> bool {
    target == prefix
        || (target.starts_with(prefix) && target[prefix.len()..].starts_with("::"))
}


type SharedRotate = Arc<Mutex<FileRotate<AppendTimestamp>>>;

#[derive(Clone)]
struct RotatingFile(SharedRotate);

/// A writer that drops records when no file matches the target.
struct RoutedWriter(Option<SharedRotate>);

impl Write for RoutedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &self.0 {
            Some(file) => file
                .lock()
                .map_err(|_| std::io::Error::other("log file lock poisoned"))?
                .write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &self.0 {
            Some(file) => file
                .lock()
                .map_err(|_| std::io::Error::other("log file lock poisoned"))?
                .flush(),
            None => Ok(()),
        }
    }
}

/// Route log records to different files by target prefix, e.g. "deploycheck::scenario".
#[derive(Clone, Default)]
struct FileRouter {
    default: Option<RotatingFile>,
    by_prefix: Vec<(String, RotatingFile)>,
}

impl FileRouter {
    fn resolve_for(&self, target: &str) -> Option<SharedRotate> {
        self.by_prefix
            .iter()
            .find(|(prefix, _)| matches_target_prefix(target, prefix))
            .map(|(_, f)| f.0.clone())
            .or_else(|| self.default.as_ref().map(|f| f.0.clone()))
    }

    fn is_empty(&self) -> bool {
        self.default.is_none() && self.by_prefix.is_empty()
    }
}

impl<'a> fmt::MakeWriter<'a> for FileRouter {
    type Writer = RoutedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RoutedWriter(self.default.as_ref().map(|f| f.0.clone()))
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        RoutedWriter(self.resolve_for(meta.target()))
    }
}

fn open_rotating_file(
    log_path: &Path,
    section: &LogSection,
) -> Result<RotatingFile, Box<dyn std::error::Error + Send + Sync>> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Backup count wins over age when both are set.
    let limit = match section.max_backups {
        Some(n) => FileLimit::MaxFiles(n),
        None => FileLimit::Age(chrono::Duration::days(
            section.max_age_days.unwrap_or(1) as i64,
        )),
    };
    let max_bytes = section.max_size_mb.unwrap_or(100) as usize * 1024 * 1024;

    let rot = FileRotate::new(
        log_path,
        AppendTimestamp::default(limit),
        ContentLimit::BytesSurpassed(max_bytes),
        Compression::None,
        None,
    );

    Ok(RotatingFile(Arc::new(Mutex::new(rot))))
}

fn file_for_section(name: &str, section: &LogSection, base_dir: &Path) -> Option<RotatingFile> {
    if section.file.trim().is_empty() {
        return None;
    }
    let log_path: PathBuf = resolve_under(base_dir, &section.file);
    match open_rotating_file(&log_path, section) {
        Ok(f) => Some(f),
        Err(e) => {
            eprintln!(
                "Failed to init log file for '{}': {} ({})",
                name,
                log_path.to_string_lossy(),
                e
            );
            None
        }
    }
}


/// Console and file sinks differ only in which level field is read and in
/// whether a subsystem without a file participates.
#[derive(Clone, Copy)]
enum Sink {
    Console,
    File { has_default_file: bool },
}

fn build_targets(cfg: &LoggingConfig, sink: Sink) -> Targets {
    let default_section = cfg.get(DEFAULT_SECTION);

    let default_level = match sink {
        Sink::Console => default_section
            .map(|s| level_filter(&s.console_level))
            .unwrap_or(LevelFilter::INFO),
        Sink::File { has_default_file } => match default_section {
            Some(s) if has_default_file && !s.file_level.is_empty() => level_filter(&s.file_level),
            _ if has_default_file => LevelFilter::INFO,
            _ => LevelFilter::OFF,
        },
    };

    let mut targets = Targets::new().with_default(default_level);
    for (name, section) in cfg.iter().filter(|(k, _)| k.as_str() != DEFAULT_SECTION) {
        let level = match sink {
            Sink::Console => level_filter(&section.console_level),
            Sink::File { .. } => {
                if section.file.trim().is_empty() {
                    continue;
                }
                level_filter(&section.file_level)
            }
        };
        targets = targets.with_target(name.clone(), level);
    }
    targets
}

fn build_file_router(cfg: &LoggingConfig, base_dir: &Path) -> FileRouter {
    let mut router = FileRouter {
        default: cfg
            .get(DEFAULT_SECTION)
            .and_then(|s| file_for_section(DEFAULT_SECTION, s, base_dir)),
        by_prefix: Vec::new(),
    };

    let mut named: Vec<_> = cfg
        .iter()
        .filter(|(k, _)| k.as_str() != DEFAULT_SECTION)
        .collect();
    // Longest prefix first so "a::b" wins over "a".
    named.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then(a.cmp(b)));
    for (name, section) in named {
        if let Some(f) = file_for_section(name, section, base_dir) {
            router.by_prefix.push((name.clone(), f));
        }
    }
    router
}

/// Install the global subscriber: human-readable console output on stderr
/// plus optional rotating JSON files, both filtered per subsystem.
///
/// `RUST_LOG`, when set, caps every sink. Calling this more than once is
/// harmless. Keep the returned guard alive for as long as logs should flow.
pub fn init_logging_unified(cfg: &LoggingConfig, base_dir: &Path) -> LoggingGuard {
    // `log` records must be bridged before the subscriber goes in.
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("LogTracer init skipped: {e}");
    }

    if cfg.is_empty() {
        init_minimal();
        return LoggingGuard::default();
    }

    let router = build_file_router(cfg, base_dir);
    let console_targets = build_targets(cfg, Sink::Console);
    let file_targets = build_targets(
        cfg,
        Sink::File {
            has_default_file: router.default.is_some(),
        },
    );

    install_subscriber(console_targets, file_targets, router)
}

fn install_subscriber(
    console_targets: Targets,
    file_targets: Targets,
    router: FileRouter,
) -> LoggingGuard {
    use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

    let env: Option<EnvFilter> = EnvFilter::try_from_default_env().ok();

    let (nb_stderr, guard) = tracing_appender::non_blocking(std::io::stderr());

    let console_layer = fmt::layer()
        .with_writer(nb_stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(true)
        .with_level(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(console_targets);

    let file_layer = (!router.is_empty()).then(|| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(true)
            .with_level(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(router)
            .with_filter(file_targets)
    });

    let _ = Registry::default()
        .with(env)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    LoggingGuard {
        console: Some(guard),
    }
}

fn init_minimal() {
    use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

    let env = EnvFilter::try_from_default_env().ok();
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let _ = Registry::default().with(env).with(fmt_layer).try_init();
}
