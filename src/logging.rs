use std::time::Instant;

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::adapter::{OpPath, Routed};
use crate::config::{Config, DEFAULT_LOG_FILTER};
use crate::{AppError, AppResult};

const LOG_FILE_PREFIX: &str = "nestbudget.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Installs the global subscriber. Keep the returned guard alive for as long
/// as file logging should flush.
///
/// Calling this twice is harmless; the second subscriber is dropped.
pub fn init_logging(config: &Config) -> AppResult<Option<WorkerGuard>> {
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let console: BoxedLayer = if config.log_json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stderr)
            .boxed()
    };
    layers.push(console);

    let guard = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .map_err(|e| AppError::from(e).with_context("path", dir.display().to_string()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_target(true)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(writer)
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init();
    Ok(guard)
}

fn context_to_json(err: &AppError) -> Value {
    let mut map = Map::new();
    map.insert("code".into(), Value::String(err.code().to_string()));
    map.insert("message".into(), Value::String(err.message().to_string()));
    if !err.context().is_empty() {
        let context = err
            .context()
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect::<Map<_, _>>();
        map.insert("context".into(), Value::Object(context));
    }
    Value::Object(map)
}

/// Timing and outcome log for one adapter operation.
pub struct OpScope {
    op: &'static str,
    family_id: Option<String>,
    start: Instant,
}

impl OpScope {
    pub fn new(op: &'static str, family_id: Option<&str>) -> Self {
        let scope = Self {
            op,
            family_id: family_id.map(str::to_string),
            start: Instant::now(),
        };
        debug!(
            target: "nestbudget",
            event = "op_enter",
            op = scope.op,
            family_id = scope.family_id.as_deref()
        );
        scope
    }

    fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn success(&self, path: OpPath, queued: bool) {
        info!(
            target: "nestbudget",
            event = "op_success",
            op = self.op,
            family_id = self.family_id.as_deref(),
            path = path.as_str(),
            queued,
            duration_ms = self.elapsed_ms()
        );
    }

    pub fn fail(&self, err: &AppError) {
        let details = context_to_json(err);
        if err.is_validation() {
            warn!(
                target: "nestbudget",
                event = "op_rejected",
                op = self.op,
                family_id = self.family_id.as_deref(),
                duration_ms = self.elapsed_ms(),
                details = %details
            );
        } else {
            error!(
                target: "nestbudget",
                event = "op_failed",
                op = self.op,
                family_id = self.family_id.as_deref(),
                duration_ms = self.elapsed_ms(),
                details = %details
            );
        }
    }

    /// Logs the outcome and unwraps the routed value.
    pub fn complete<T>(self, result: AppResult<Routed<T>>) -> AppResult<T> {
        match result {
            Ok(routed) => {
                self.success(routed.path, routed.queued);
                Ok(routed.value)
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }
}
